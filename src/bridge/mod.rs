//! Message bridge between the isolated client and the privileged host
//!
//! - [`messages`]: the JSON wire protocol
//! - [`channel`]: one-way channels (in-process, JSON lines over a stream)
//! - [`transport`]: request/response correlation with timeouts
//! - [`client`]: isolated-side facade
//! - [`host`]: host-side handler

pub mod channel;
pub mod client;
pub mod host;
pub mod messages;
pub mod transport;

pub use channel::{in_process_pair, spawn_json_lines_reader, HostEnd, IsolatedEnd, JsonLinesSink, MessageSink};
pub use client::BridgeClient;
pub use host::HostHandler;
pub use messages::{actions, FetchOptions, HostMessage, IsolatedMessage, Request, RequestKind, ResponseBody};
pub use transport::{Transport, DEFAULT_TIMEOUT};
