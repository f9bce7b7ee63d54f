//! Automatic exam registration at the moment registration opens
//!
//! The scheduler is a small state machine: `Idle → Armed → Firing → Idle`,
//! with cancellation allowed while armed. Only one term is armed at a time and
//! arming another one replaces it. State lives in memory only.
//!
//! # Example
//!
//! ```rust,ignore
//! let scheduler = BookingScheduler::new(registrar, store, Arc::new(SystemClock), Duration::from_secs(1));
//! scheduler.arm(BookingArm::new("123456", "EBC-ALG-zkouška"))?;
//! ```

use crate::cache::{CacheStore, Partition, CURRENT_KEY};
use crate::i18n::t;
use crate::metrics;
use crate::models::{find_section, find_term, ExamSection, ExamSubject, ExamTerm, Language};
use crate::portal::ExamRegistrar;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 32;

/// Booking errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingError {
    #[error("Exam term not found: {0}")]
    TermNotFound(String),

    #[error("Exam term {0} has no registration start")]
    MissingRegistrationStart(String),

    #[error("Invalid registration date: {0}")]
    InvalidDate(String),

    #[error("Registration failed: {0}")]
    Registration(String),
}

impl BookingError {
    pub fn localized_desc(&self, lang: Language) -> String {
        let locale = lang.locale();
        match self {
            Self::TermNotFound(_) => t!("errors.booking.term_not_found", locale = locale).to_string(),
            Self::MissingRegistrationStart(_) => t!("errors.booking.no_start", locale = locale).to_string(),
            Self::InvalidDate(value) => {
                format!("{}: {value}", t!("errors.booking.invalid_date", locale = locale))
            }
            Self::Registration(msg) => {
                format!("{}: {msg}", t!("errors.booking.registration", locale = locale))
            }
        }
    }
}

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Where the scheduler reads exam terms from
pub trait TermLookup: Send + Sync {
    fn exams(&self) -> Vec<ExamSubject>;

    fn term(&self, term_id: &str) -> Option<ExamTerm> {
        find_term(&self.exams(), term_id).cloned()
    }

    fn section(&self, section_id: &str) -> Option<ExamSection> {
        find_section(&self.exams(), section_id).cloned()
    }
}

impl TermLookup for CacheStore {
    fn exams(&self) -> Vec<ExamSubject> {
        match self.get(Partition::Exams, CURRENT_KEY) {
            Ok(exams) => exams.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read exams for booking");
                Vec::new()
            }
        }
    }
}

/// The term to register for and the section it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingArm {
    pub term_id: String,
    pub section_id: String,
}

impl BookingArm {
    pub fn new(term_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self {
            term_id: term_id.into(),
            section_id: section_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BookingState {
    #[default]
    Idle,
    Armed(BookingArm),
    Firing(BookingArm),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookingEvent {
    Armed(BookingArm),
    Triggered(BookingArm),
    Succeeded { term_id: String },
    Failed { term_id: String, error: String },
    Cancelled(BookingArm),
}

#[derive(Default)]
struct Inner {
    state: BookingState,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    registrar: Arc<dyn ExamRegistrar>,
    terms: Arc<dyn TermLookup>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    inner: Mutex<Inner>,
    events: broadcast::Sender<BookingEvent>,
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: BookingEvent) {
        let _ = self.events.send(event);
    }

    /// Registration start of an armed term, read fresh on every tick
    fn registration_start(&self, term_id: &str) -> Result<DateTime<Local>, BookingError> {
        let term = self
            .terms
            .term(term_id)
            .ok_or_else(|| BookingError::TermNotFound(term_id.to_string()))?;
        let start = term
            .registration_start
            .ok_or_else(|| BookingError::MissingRegistrationStart(term_id.to_string()))?;
        parse_portal_datetime(&start)
    }

    /// Return to idle unless a newer arm took over
    fn finish(&self, generation: u64) {
        let mut inner = self.inner();
        if inner.generation == generation {
            inner.state = BookingState::Idle;
            inner.task = None;
        }
    }

    async fn run_armed(self: Arc<Self>, arm: BookingArm, generation: u64) {
        loop {
            let start = match self.registration_start(&arm.term_id) {
                Ok(start) => start,
                Err(e) => {
                    tracing::warn!(term_id = %arm.term_id, error = %e, "Disarming booking");
                    self.finish(generation);
                    self.emit(BookingEvent::Failed {
                        term_id: arm.term_id.clone(),
                        error: e.to_string(),
                    });
                    return;
                }
            };

            let now = self.clock.now();
            if now >= start {
                break;
            }
            let remaining = (start - now).to_std().unwrap_or_default();
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        }

        {
            let mut inner = self.inner();
            if inner.generation != generation || inner.state != BookingState::Armed(arm.clone()) {
                return;
            }
            inner.state = BookingState::Firing(arm.clone());
            inner.task = None;
        }
        tracing::info!(term_id = %arm.term_id, "Registration open, firing");
        self.emit(BookingEvent::Triggered(arm.clone()));

        let result = self.fire(&arm).await;
        metrics::record_booking_fired(result.is_ok());
        self.finish(generation);

        match result {
            Ok(()) => {
                tracing::info!(term_id = %arm.term_id, "Automatic registration succeeded");
                self.emit(BookingEvent::Succeeded {
                    term_id: arm.term_id.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(term_id = %arm.term_id, error = %e, "Automatic registration failed");
                self.emit(BookingEvent::Failed {
                    term_id: arm.term_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Unregister a different held term of the section, then register
    async fn fire(&self, arm: &BookingArm) -> Result<(), BookingError> {
        let held = self
            .terms
            .section(&arm.section_id)
            .and_then(|section| section.registered_term)
            .filter(|registered| registered.id != arm.term_id);

        if let Some(held) = held {
            tracing::info!(term_id = %held.id, "Releasing current registration first");
            let released = self
                .registrar
                .unregister_exam(&held.id)
                .await
                .map_err(|e| BookingError::Registration(e.to_string()))?;
            if !released.success {
                return Err(BookingError::Registration(
                    released.error.unwrap_or_else(|| "unregister failed".to_string()),
                ));
            }
        }

        let result = self
            .registrar
            .register_exam(&arm.term_id)
            .await
            .map_err(|e| BookingError::Registration(e.to_string()))?;
        if result.success {
            Ok(())
        } else {
            Err(BookingError::Registration(
                result.error.unwrap_or_else(|| "registration refused".to_string()),
            ))
        }
    }
}

/// Arms a single exam term and registers when its window opens
#[derive(Clone)]
pub struct BookingScheduler {
    shared: Arc<Shared>,
}

impl BookingScheduler {
    pub fn new(
        registrar: Arc<dyn ExamRegistrar>,
        terms: Arc<dyn TermLookup>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                registrar,
                terms,
                clock,
                poll_interval: poll_interval.max(Duration::from_millis(10)),
                inner: Mutex::new(Inner::default()),
                events,
            }),
        }
    }

    /// Arm `arm`, replacing any current arm
    ///
    /// The term must exist and carry a parseable registration start.
    pub fn arm(&self, arm: BookingArm) -> Result<(), BookingError> {
        let start = self.shared.registration_start(&arm.term_id)?;

        let mut inner = self.shared.inner();
        if let Some(previous) = inner.task.take() {
            previous.abort();
        }
        if let BookingState::Armed(previous) = &inner.state {
            tracing::info!(term_id = %previous.term_id, "Replacing armed booking");
        }
        inner.generation += 1;
        inner.state = BookingState::Armed(arm.clone());
        let generation = inner.generation;
        // Subscribers see Armed before anything the task emits
        self.shared.emit(BookingEvent::Armed(arm.clone()));
        inner.task = Some(tokio::spawn(self.shared.clone().run_armed(arm.clone(), generation)));
        drop(inner);

        tracing::info!(term_id = %arm.term_id, start = %start, "Booking armed");
        Ok(())
    }

    /// Cancel the current arm; firing cannot be cancelled
    pub fn cancel(&self) -> bool {
        let mut inner = self.shared.inner();
        let BookingState::Armed(arm) = inner.state.clone() else {
            return false;
        };
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        inner.state = BookingState::Idle;
        drop(inner);

        tracing::info!(term_id = %arm.term_id, "Booking cancelled");
        self.shared.emit(BookingEvent::Cancelled(arm));
        true
    }

    pub fn state(&self) -> BookingState {
        self.shared.inner().state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.shared.events.subscribe()
    }
}

/// Parse `DD.MM.YYYY HH:MM[:SS]` as local time
pub fn parse_portal_datetime(value: &str) -> Result<DateTime<Local>, BookingError> {
    let value = value.trim();
    let naive = NaiveDateTime::parse_from_str(value, "%d.%m.%Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%d.%m.%Y %H:%M"))
        .map_err(|_| BookingError::InvalidDate(value.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| BookingError::InvalidDate(value.to_string()))
}

/// Time left until registration opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    pub locked: bool,
    pub remaining: Duration,
    pub formatted: String,
}

pub fn countdown(start: DateTime<Local>, now: DateTime<Local>) -> Countdown {
    let remaining = (start - now).to_std().unwrap_or_default();
    if remaining.is_zero() {
        return Countdown {
            locked: false,
            remaining,
            formatted: t!("booking.open").to_string(),
        };
    }

    let secs = remaining.as_secs();
    let (days, hours, minutes, seconds) = (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);
    let time = if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    };
    Countdown {
        locked: true,
        remaining,
        formatted: t!("booking.countdown", time = time).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_portal_datetime() {
        let dt = parse_portal_datetime("01.12.2025 08:00").unwrap();
        assert_eq!((dt.day(), dt.month(), dt.year()), (1, 12, 2025));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (8, 0, 0));

        let with_seconds = parse_portal_datetime(" 15.01.2026 09:30:15 ").unwrap();
        assert_eq!(with_seconds.second(), 15);

        assert!(matches!(
            parse_portal_datetime("2026-01-15 09:30"),
            Err(BookingError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_countdown() {
        let start = parse_portal_datetime("10.01.2026 10:00").unwrap();
        let now = parse_portal_datetime("09.01.2026 08:59:30").unwrap();

        let c = countdown(start, now);
        assert!(c.locked);
        assert_eq!(c.remaining, Duration::from_secs(86_400 + 3600 + 30));
        assert!(c.formatted.contains("1d 01:00:30"));

        let open = countdown(start, start);
        assert!(!open.locked);
        assert_eq!(open.remaining, Duration::ZERO);
    }

    #[test]
    fn test_localized_booking_errors() {
        let err = BookingError::TermNotFound("1".into());
        assert_ne!(err.localized_desc(Language::Cz), err.localized_desc(Language::En));
    }
}
