//! Isolated-side facade over the transport
//!
//! [`BridgeClient`] turns the wire protocol into typed calls and implements
//! the page-fetch and exam-registration seams, so crawling and booking code
//! runs unchanged on the isolated side.

use super::messages::{actions, FetchOptions, HostMessage, IsolatedMessage, Request};
use super::transport::{Transport, DEFAULT_TIMEOUT};
use crate::crawler::PageFetcher;
use crate::error::Error;
use crate::models::ExamActionResult;
use crate::portal::ExamRegistrar;
use crate::utils::error::{BridgeError, FetchError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct BridgeClient {
    transport: Arc<Transport>,
    timeout: Duration,
}

impl BridgeClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Relay a fetch through the host and return the body text
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<String, BridgeError> {
        let data = self
            .transport
            .call(
                Request::Fetch {
                    url: url.to_string(),
                    options,
                },
                self.timeout,
            )
            .await?;

        match data {
            Value::String(body) => Ok(body),
            other => Err(BridgeError::UnexpectedPayload(format!(
                "expected text body, got {other}"
            ))),
        }
    }

    /// Run a named host action
    pub async fn action(&self, action: &str, payload: Value) -> Result<Value, BridgeError> {
        self.transport
            .call(
                Request::Action {
                    action: action.to_string(),
                    payload,
                },
                self.timeout,
            )
            .await
    }

    /// Ask the host for a data domain; the answer arrives as a `DATA` message
    pub async fn request_data(&self, data_type: &str) -> Result<(), BridgeError> {
        self.transport
            .post(IsolatedMessage::RequestData {
                data_type: data_type.to_string(),
            })
            .await
    }

    pub async fn signal_ready(&self) -> Result<(), BridgeError> {
        self.transport.post(IsolatedMessage::Ready).await
    }

    /// Uncorrelated host messages
    pub fn subscribe(&self) -> broadcast::Receiver<HostMessage> {
        self.transport.subscribe()
    }

    async fn exam_action(&self, action: &str, term_id: &str) -> Result<ExamActionResult, Error> {
        match self.action(action, json!({ "termId": term_id })).await {
            Ok(data) => Ok(serde_json::from_value(data).unwrap_or_else(|_| ExamActionResult::ok())),
            // The host reports refused registrations as failed actions
            Err(BridgeError::Remote(message)) => Ok(ExamActionResult::failed(message)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PageFetcher for BridgeClient {
    async fn fetch_page(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        Ok(self.fetch(url, options.clone()).await?)
    }
}

#[async_trait]
impl ExamRegistrar for BridgeClient {
    async fn register_exam(&self, term_id: &str) -> Result<ExamActionResult, Error> {
        self.exam_action(actions::REGISTER_EXAM, term_id).await
    }

    async fn unregister_exam(&self, term_id: &str) -> Result<ExamActionResult, Error> {
        self.exam_action(actions::UNREGISTER_EXAM, term_id).await
    }
}
