//! Host-side message handling
//!
//! The host owns the authenticated session. It answers relayed fetches and
//! actions, serves data requests from the orchestrator snapshot and pushes
//! every published snapshot to the isolated side as `SYNC_UPDATE`.

use super::channel::MessageSink;
use super::messages::{actions, FetchOptions, HostMessage, IsolatedMessage, ResponseBody};
use crate::cache::EntryStatus;
use crate::crawler::PageFetcher;
use crate::portal::ExamRegistrar;
use crate::sync::{SyncOrchestrator, SyncOutcome};
use crate::utils::error::BridgeError;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Answer an action with a cache entry's value
fn entry_response<T: Serialize>(id: String, status: EntryStatus<T>) -> Result<ResponseBody, BridgeError> {
    Ok(match status {
        EntryStatus::Ready(value) => ResponseBody::ok(id, serde_json::to_value(&value)?),
        EntryStatus::Loading => ResponseBody::err(id, "Already loading"),
        EntryStatus::Error(message) => ResponseBody::err(id, message),
    })
}

pub struct HostHandler {
    fetcher: Arc<dyn PageFetcher>,
    registrar: Arc<dyn ExamRegistrar>,
    orchestrator: Arc<SyncOrchestrator>,
    outbound: Arc<dyn MessageSink<HostMessage>>,
}

impl HostHandler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        registrar: Arc<dyn ExamRegistrar>,
        orchestrator: Arc<SyncOrchestrator>,
        outbound: Arc<dyn MessageSink<HostMessage>>,
    ) -> Self {
        Self {
            fetcher,
            registrar,
            orchestrator,
            outbound,
        }
    }

    /// Handle one message from the isolated side
    pub async fn handle(&self, message: IsolatedMessage) -> Result<(), BridgeError> {
        match message {
            IsolatedMessage::Ready => self.on_ready().await,
            IsolatedMessage::RequestData { data_type } => self.on_request_data(data_type).await,
            IsolatedMessage::Fetch { id, url, options } => self.on_fetch(id, &url, &options).await,
            IsolatedMessage::Action { id, action, payload } => self.on_action(id, &action, payload).await,
        }
    }

    async fn on_ready(&self) -> Result<(), BridgeError> {
        let snapshot = self.orchestrator.snapshot().await;
        if !snapshot.has_synced() {
            tracing::debug!("Isolated side ready, no sync completed yet");
            return Ok(());
        }
        self.outbound
            .post(HostMessage::SyncUpdate {
                snapshot: Box::new(snapshot),
            })
            .await
    }

    async fn on_request_data(&self, data_type: String) -> Result<(), BridgeError> {
        let mut snapshot = self.orchestrator.snapshot().await;
        if data_type == "all" && !snapshot.has_synced() {
            self.orchestrator.sync_all().await;
            snapshot = self.orchestrator.snapshot().await;
        }

        let message = match snapshot.part(&data_type) {
            Some(data) => HostMessage::Data {
                data_type,
                data,
                error: None,
            },
            None => {
                tracing::debug!(data_type = %data_type, "Unknown data type requested");
                HostMessage::Data {
                    error: Some(format!("Unknown data type: {data_type}")),
                    data_type,
                    data: Value::Null,
                }
            }
        };
        self.outbound.post(message).await
    }

    async fn on_fetch(&self, id: String, url: &str, options: &FetchOptions) -> Result<(), BridgeError> {
        let body = match self.fetcher.fetch_page(url, options).await {
            Ok(text) => ResponseBody::ok(id, Value::String(text)),
            Err(e) => {
                tracing::debug!(%url, error = %e, "Relayed fetch failed");
                ResponseBody::err(id, e.to_string())
            }
        };
        self.outbound.post(HostMessage::FetchResult(body)).await
    }

    async fn on_action(&self, id: String, action: &str, payload: Value) -> Result<(), BridgeError> {
        let body = match action {
            actions::REGISTER_EXAM | actions::UNREGISTER_EXAM => {
                match payload.get("termId").and_then(Value::as_str) {
                    None => ResponseBody::err(id, "Missing termId"),
                    Some(term_id) => {
                        let result = if action == actions::REGISTER_EXAM {
                            self.registrar.register_exam(term_id).await
                        } else {
                            self.registrar.unregister_exam(term_id).await
                        };
                        match result {
                            Ok(outcome) if outcome.success => {
                                ResponseBody::ok(id, serde_json::to_value(&outcome)?)
                            }
                            Ok(outcome) => ResponseBody::err(
                                id,
                                outcome.error.unwrap_or_else(|| format!("{action} failed")),
                            ),
                            Err(e) => ResponseBody::err(id, e.to_string()),
                        }
                    }
                }
            }
            actions::TRIGGER_SYNC => {
                let status = match self.orchestrator.sync_all().await {
                    SyncOutcome::Completed(report) if report.is_partial() => "partial",
                    SyncOutcome::Completed(_) => "completed",
                    SyncOutcome::Skipped => "skipped",
                };
                ResponseBody::ok(id, json!({ "status": status }))
            }
            actions::FETCH_SUCCESS_RATE | actions::FETCH_CLASSMATES => {
                match payload.get("courseCode").and_then(Value::as_str) {
                    None => ResponseBody::err(id, "Missing courseCode"),
                    Some(code) if action == actions::FETCH_SUCCESS_RATE => {
                        entry_response(id, self.orchestrator.success_rate(code).await)?
                    }
                    Some(code) => entry_response(id, self.orchestrator.classmates(code).await)?,
                }
            }
            other => {
                tracing::warn!(action = other, "Unknown action");
                ResponseBody::err(id, format!("Unknown action: {other}"))
            }
        };
        self.outbound.post(HostMessage::ActionResult(body)).await
    }

    /// Handle messages until `inbound` closes
    ///
    /// Each message runs on its own task so a slow sync never blocks relayed
    /// fetches. Orchestrator snapshots are forwarded for as long as this runs.
    pub fn serve(self: Arc<Self>, mut inbound: mpsc::Receiver<IsolatedMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let forwarder = self.clone().spawn_update_forwarder();

            while let Some(message) = inbound.recv().await {
                let handler = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(message).await {
                        tracing::warn!(error = %e, "Failed to answer isolated message");
                    }
                });
            }

            forwarder.abort();
            tracing::info!("Isolated side disconnected");
        })
    }

    fn spawn_update_forwarder(self: Arc<Self>) -> JoinHandle<()> {
        let mut updates = self.orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(snapshot) => {
                        let message = HostMessage::SyncUpdate {
                            snapshot: Box::new(snapshot),
                        };
                        if let Err(e) = self.outbound.post(message).await {
                            tracing::debug!(error = %e, "Stopped forwarding sync updates");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Skipped stale sync updates");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
