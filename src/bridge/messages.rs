//! Wire protocol between the isolated and the host side
//!
//! Every message is a JSON object tagged by `type`:
//!
//! | Direction | Kind | Fields |
//! |---|---|---|
//! | isolated→host | `READY` | |
//! | isolated→host | `REQUEST_DATA` | `dataType` |
//! | isolated→host | `FETCH` | `id`, `url`, `options` |
//! | isolated→host | `ACTION` | `id`, `action`, `payload` |
//! | host→isolated | `DATA` | `dataType`, `data`, `error?` |
//! | host→isolated | `FETCH_RESULT` | `id`, `success`, `data?`, `error?` |
//! | host→isolated | `ACTION_RESULT` | `id`, `success`, `data?`, `error?` |
//! | host→isolated | `SYNC_UPDATE` | `snapshot` |

use crate::models::SyncSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Action names understood by the host
pub mod actions {
    pub const REGISTER_EXAM: &str = "register_exam";
    pub const UNREGISTER_EXAM: &str = "unregister_exam";
    pub const TRIGGER_SYNC: &str = "trigger_sync";
    pub const FETCH_SUCCESS_RATE: &str = "fetch_success_rate";
    pub const FETCH_CLASSMATES: &str = "fetch_classmates";
}

/// Options of a relayed fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOptions {
    #[serde(default = "FetchOptions::default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Send exactly once even if the method is idempotent
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_retry: bool,
}

impl FetchOptions {
    fn default_method() -> String {
        "GET".to_string()
    }

    /// A form-encoded POST
    pub fn post_form(body: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded; charset=UTF-8".to_string(),
        );
        Self {
            method: "POST".to_string(),
            headers,
            body: Some(body),
            no_retry: false,
        }
    }

    /// A GET with side effects, which must not be replayed
    pub fn get_once() -> Self {
        Self {
            no_retry: true,
            ..Self::default()
        }
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Whether a failed attempt may be repeated
    pub fn is_retryable(&self) -> bool {
        self.is_get() && !self.no_retry
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Self::default_method(),
            headers: BTreeMap::new(),
            body: None,
            no_retry: false,
        }
    }
}

/// Messages sent by the isolated side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolatedMessage {
    Ready,
    #[serde(rename_all = "camelCase")]
    RequestData { data_type: String },
    Fetch {
        id: String,
        url: String,
        #[serde(default)]
        options: FetchOptions,
    },
    Action {
        id: String,
        action: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Messages sent by the host side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    Data {
        data_type: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FetchResult(ResponseBody),
    ActionResult(ResponseBody),
    SyncUpdate { snapshot: Box<SyncSnapshot> },
}

/// Body shared by the correlated responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseBody {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Kind of a correlated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Fetch,
    Action,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "FETCH",
            Self::Action => "ACTION",
        }
    }
}

/// A correlated request before an id is assigned
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Fetch { url: String, options: FetchOptions },
    Action { action: String, payload: Value },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Fetch { .. } => RequestKind::Fetch,
            Self::Action { .. } => RequestKind::Action,
        }
    }

    /// Short description for logs and timeout errors
    pub fn target(&self) -> &str {
        match self {
            Self::Fetch { url, .. } => url,
            Self::Action { action, .. } => action,
        }
    }

    pub(crate) fn into_message(self, id: String) -> IsolatedMessage {
        match self {
            Self::Fetch { url, options } => IsolatedMessage::Fetch { id, url, options },
            Self::Action { action, payload } => IsolatedMessage::Action {
                id,
                action,
                payload,
            },
        }
    }
}

impl HostMessage {
    /// Correlated response carried by this message, if any
    pub fn response(&self) -> Option<(RequestKind, &ResponseBody)> {
        match self {
            Self::FetchResult(body) => Some((RequestKind::Fetch, body)),
            Self::ActionResult(body) => Some((RequestKind::Action, body)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_isolated_wire_format() {
        let msg = IsolatedMessage::RequestData {
            data_type: "all".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "REQUEST_DATA", "dataType": "all"})
        );

        let ready: IsolatedMessage = serde_json::from_value(json!({"type": "READY"})).unwrap();
        assert_eq!(ready, IsolatedMessage::Ready);

        let fetch: IsolatedMessage =
            serde_json::from_value(json!({"type": "FETCH", "id": "1", "url": "https://x"}))
                .unwrap();
        assert_eq!(
            fetch,
            IsolatedMessage::Fetch {
                id: "1".into(),
                url: "https://x".into(),
                options: FetchOptions::default(),
            }
        );
    }

    #[test]
    fn test_host_wire_format() {
        let msg = HostMessage::FetchResult(ResponseBody::err("7", "Request failed"));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "FETCH_RESULT", "id": "7", "success": false, "error": "Request failed"})
        );

        let update = HostMessage::SyncUpdate {
            snapshot: Box::default(),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "SYNC_UPDATE");
        assert_eq!(value["snapshot"]["isSyncing"], false);
    }

    #[test]
    fn test_response_extraction() {
        let msg = HostMessage::ActionResult(ResponseBody::ok("a", json!(true)));
        let (kind, body) = msg.response().unwrap();
        assert_eq!(kind, RequestKind::Action);
        assert_eq!(body.id, "a");

        let data = HostMessage::Data {
            data_type: "exams".into(),
            data: Value::Null,
            error: None,
        };
        assert!(data.response().is_none());
    }
}
