//! # rtlink Engine
//!
//! Push/poll delivery coordinator for rtlink.
//!
//! This crate provides:
//! - Two-axis connection state machine (push × polling) with a derived state
//! - Event deduplication by hash and per-entity version
//! - Push transport and HTTP client abstractions, with mocks
//! - Room join over push with HTTP fallback, and backoff-driven rejoin
//! - Single-flight HTTP pull with watermark tracking
//! - Named notifications for the embedding application
//!
//! ## Architecture
//!
//! The client follows a **push first, poll as safety net** model:
//! 1. Open the push transport and join rooms over it
//! 2. Poll sparsely while push is up, reporting what push missed
//! 3. When push drops, poll at full cadence until it comes back
//! 4. On reconnection, rejoin every known room with linear backoff
//!
//! ## Key Invariants
//!
//! - An event is delivered to the application at most once per session
//! - Entity updates older than one already delivered are dropped
//! - The watermark only moves forward
//! - `disconnect()` leaves no timer, operation or session data behind

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod events;
mod http;
mod ledger;
mod polling;
mod promises;
mod state;
mod timer;
mod transport;

pub use client::RealtimeClient;
pub use config::{ClientConfig, ClientOptions, ConfigError, RejoinBackoff, TransportOptions};
pub use error::{ClientError, ClientResult, RequestFailureKind};
pub use events::{ErrorReport, EventBus, ListenerId, Notification};
pub use http::{
    ApiClient, ApiEndpoint, HttpClient, HttpError, HttpRequest, HttpResponse, Method,
    MockHttpClient,
};
pub use ledger::EventLedger;
pub use polling::PullSummary;
pub use promises::{Deferred, Operation, OperationName, Outcome, PromiseRegistry};
pub use state::{
    ConnectionStateMachine, ConnectionStates, DerivedState, PollState, PushState, SubState,
    Transition,
};
pub use transport::{
    MockConnector, MockTransport, PushConnector, PushTransport, TransportEvent, TransportEvents,
};

pub use rtlink_protocol::{EventRecord, JoinParams, Via};
