//! # Relay Service
//!
//! The relay state machine and its fan-out.
//!
//! ## Components
//! - **Hub**: subscriber registry and best-effort broadcast
//! - **Relay**: owns all relay state and runs the single-threaded reactor
//!
//! ## Data Flow
//! ```text
//! datagram -> decode -> { envelope | single | fragment -> reassembly } -> hub -> subscribers
//! secondary message ------------------------------------------------------> hub
//! ```

pub mod hub;
pub mod relay;

pub use hub::{BroadcastHub, BroadcastReport, SubscriberId, SubscriberState};
pub use relay::{run, serve, serve_with_shutdown, ChannelFilter, Outcome, RelayService, RelaySockets};
