//! Request orchestration over a pluggable HTTP transport.
//!
//! # Overview
//! `RequestService` accepts data, upload and download requests, runs each
//! one as a task in a session shared by every request with the same
//! configuration, and reports progress and exactly one terminal outcome
//! per submission. Running requests can be suspended, resumed and
//! cancelled by identity, or all at once.
//!
//! # Design
//! - The service never performs I/O. A `Transport` implementation does,
//!   and reports back through `TransportEvent`s on a channel; see
//!   `transport` for the contract. `BlockingTransport` is the bundled
//!   implementation, built on ureq.
//! - Session pool and task registry share one lock. Registration happens
//!   before a task is started so no event can outrun it.
//! - A single callback bridge task consumes events in order; application
//!   callbacks run on tokio's blocking pool, never under the lock.
//! - Requests compare by URL, method and payload, so control operations
//!   address every running copy of "the same" request together.

mod bridge;
pub mod config;
pub mod error;
pub mod http;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod request;
pub mod service;
pub mod transport;

pub use config::{
    CachePolicy, Configuration, ConfigurationKind, CookieAcceptPolicy, CustomSettings,
    ServiceSettings, SessionSettings, DEFAULT_BACKGROUND_ID,
};
pub use error::{FailureKind, RegistryError, ServiceError, TransportFailure};
pub use http::{HttpHeader, HttpMethod, Payload, Response, ResponseMetadata, TransportCall};
pub use progress::{Progress, ProgressSnapshot, ProgressState};
pub use request::{CompletionHandler, FailureAction, ProgressObserver, Request, SuccessAction};
pub use service::{BackgroundHandler, RequestService};
pub use transport::blocking::BlockingTransport;
pub use transport::{
    Capabilities, EventSink, EventStream, SessionHandle, SessionId, TaskHandle, TaskId, Transport,
    TransportEvent, TransportSession, TransportTask,
};
