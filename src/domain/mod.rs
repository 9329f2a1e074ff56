//! Domain layer for rask-event-streamer.
//!
//! Contains the canonical types shared across all modules:
//! - `Event`: The record a producer submits for ingestion
//! - `Acknowledgement`: Per-event outcome reported by the remote side
//! - `StreamError` / `ConnectionError` / `TransportError`: Error taxonomy

pub mod ack;
pub mod error;
pub mod event;

pub use ack::{AckStatus, Acknowledgement};
pub use error::{ConnectionError, StreamError, TransportError};
pub use event::Event;
