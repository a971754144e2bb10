//! # rtlink protocol
//!
//! Data types exchanged between the realtime client and its servers.
//!
//! This crate provides:
//! - `EventRecord` for application events and their entity identity
//! - Join, analytics and ping acknowledgement decoding
//! - Rooms and pull response decoding, including envelope unwrapping
//! - HTTP `Date` header parsing for watermark seeding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod date;
mod error;
mod event;
mod messages;

pub use date::{now_millis, parse_http_date};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{EntityKey, EventRecord, Via};
pub use messages::{
    unwrap_envelope, AnalyticsAck, JoinAck, JoinParams, PongAck, PullResponse, RoomsResponse,
};
