#![warn(missing_debug_implementations)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_possible_truncation, // Nanosecond fields fit in i32 by construction
    clippy::cast_possible_wrap,       // Safe in non-negative contexts
    clippy::cast_precision_loss,      // Acceptable for throughput/display
    clippy::missing_errors_doc,       // Error enums are documented instead
    clippy::module_name_repetitions,  // e.g. StreamError in sender module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

//! High-throughput event streaming client.
//!
//! Events submitted by producer code are fanned out across several duplex
//! streams to a remote ingestion endpoint, and per-event acknowledgements are
//! folded back into a single [`StreamStats`] result.
//!
//! ```rust,no_run
//! use rask_event_streamer::{ClientConfig, Credential, Event, Session};
//! use rask_event_streamer::transport::grpc::GrpcDialer;
//!
//! # async fn run() -> Result<(), rask_event_streamer::StreamError> {
//! let session = Session::connect(
//!     Credential::new("api-key"),
//!     ClientConfig::session_defaults(),
//!     GrpcDialer::default(),
//! )
//! .await?;
//!
//! for i in 0..10_000 {
//!     session
//!         .submit(Event::new(format!("user-{}", i % 100), "action").with_data("index", i))
//!         .await?;
//! }
//!
//! let stats = session.finalize().await?;
//! println!("{} events at {:.0}/s", stats.total_sent, stats.events_per_sec);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod domain;
pub mod sender;
pub mod transport;

// Re-export main types for easy access
pub use app::Config;
pub use domain::{AckStatus, Acknowledgement, ConnectionError, Event, StreamError, TransportError};
pub use sender::{ClientConfig, Session, StreamClient, StreamStats};
pub use transport::Credential;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
