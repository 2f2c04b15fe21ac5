//! Server-side feature-flag evaluation client.
//!
//! The client keeps a local, versioned cache of flag and segment
//! definitions, fed by a streaming (or polling) connection to the control
//! service, and evaluates flags against it without touching the network.
//!
//! ```no_run
//! use beacon_client::{Client, ConfigBuilder, User};
//!
//! # async fn demo() -> Result<(), beacon_client::Error> {
//! let config = ConfigBuilder::new("sdk-key").build()?;
//! let client = Client::build(config)?;
//! client.start();
//! client.wait_for_initialization().await?;
//!
//! let user = User::with_key("user@example.com");
//! if client.bool_variation(&user, "new-checkout", false) {
//!     // ...
//! }
//! # client.close();
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod diagnostics;
mod error;
mod events;
mod flags_state;
mod poll;
mod processor;
mod requestor;
mod sse;
mod stream;

pub use client::Client;
pub use config::{Config, ConfigBuilder, ProxyConfig, TlsConfig};
pub use diagnostics::{DiagnosticsSink, NullDiagnosticsSink};
pub use error::{is_http_error_recoverable, Error};
pub use events::{Event, EventSink, NullEventSink};
pub use flags_state::{FlagsState, FlagsStateOptions};
pub use poll::PollingProcessor;
pub use processor::{InitSignal, NullUpdateProcessor, UpdateProcessor};
pub use requestor::Requestor;
pub use stream::StreamingProcessor;

// Re-export the vocabulary callers interact with: evaluation results,
// users, and the snapshot shape accepted by `Client::seed`.
pub use eval::{Detail, ErrorKind, Flag, Reason, Segment, User, UserBuilder};
pub use store::AllData;
