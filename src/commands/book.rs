use anyhow::{Context, Result};
use reis_sync::booking::{
    countdown, parse_portal_datetime, BookingArm, BookingEvent, BookingScheduler, SystemClock,
    TermLookup,
};
use reis_sync::cache::{Partition, CURRENT_KEY};
use reis_sync::config::Config;
use reis_sync::portal::PortalApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use super::Runtime;

const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

pub async fn book(config: Config, term: String, section: String) -> Result<()> {
    let runtime = Runtime::new(&config)?;

    // Refresh the exam list so the term and its window are current
    match runtime.portal.fetch_exams(config.language).await {
        Ok(exams) => runtime
            .store
            .set(Partition::Exams, CURRENT_KEY, &exams)
            .context("Failed to store exams")?,
        Err(e) => tracing::warn!(error = %e, "Failed to refresh exams, using cached list"),
    }

    let scheduler = BookingScheduler::new(
        runtime.portal.clone(),
        runtime.store.clone(),
        Arc::new(SystemClock),
        config.booking_poll_interval(),
    );
    let mut events = scheduler.subscribe();
    scheduler
        .arm(BookingArm::new(term.clone(), section))
        .with_context(|| format!("Cannot arm term {term}"))?;

    let start = runtime
        .store
        .term(&term)
        .and_then(|t| t.registration_start)
        .map(|s| parse_portal_datetime(&s))
        .transpose()?;

    let mut ticker = tokio::time::interval(COUNTDOWN_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(start) = start {
                    eprint!("\r{}   ", countdown(start, chrono::Local::now()).formatted);
                }
            }
            event = events.recv() => match event {
                Ok(BookingEvent::Triggered(_)) => eprintln!(),
                Ok(BookingEvent::Succeeded { term_id }) => {
                    println!("Registered for term {term_id}");
                    return Ok(());
                }
                Ok(BookingEvent::Failed { term_id, error }) => {
                    anyhow::bail!("Registration for term {term_id} failed: {error}");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => anyhow::bail!("Booking scheduler stopped"),
            },
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                scheduler.cancel();
                println!("\nBooking cancelled");
                return Ok(());
            }
        }
    }
}
