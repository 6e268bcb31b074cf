//! # tandem-collab — Session fabric for tandem
//!
//! WebSocket-facing half of the collaboration engine: connection sessions,
//! document subscriptions, message validation and routing, per-user rate
//! limiting, heartbeat liveness, and exclude-self fan-out.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   JSON frames    ┌───────────────┐
//! │ WS client  │ ◄──────────────► │ CollabServer  │
//! │ (per user) │                  │ (accept/auth) │
//! └────────────┘                  └───────┬───────┘
//!                                         │ Transport
//!                                         ▼
//!                                 ┌───────────────┐      ┌────────────────┐
//!                                 │ SessionFabric │ ───► │ Collaboration  │
//!                                 │ validate/route│      │ Engine (core)  │
//!                                 │ rate limit    │      └────────────────┘
//!                                 │ heartbeat     │
//!                                 └───────┬───────┘
//!                                         │ fan-out (exclude sender)
//!                                         ▼
//!                                   subscribed sessions
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire frames and validation
//! - [`rate_limit`] — sliding-window per-user accounting
//! - [`registry`] — session/subscription bookkeeping and the `Transport` seam
//! - [`fabric`] — routing, fan-out, heartbeat, shutdown
//! - [`server`] — WebSocket accept loop with token auth

pub mod error;
pub mod fabric;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod server;

pub use error::FabricError;
pub use fabric::{FabricConfig, SessionFabric};
pub use protocol::{
    connection_frame, heartbeat_frame, BroadcastFrame, BroadcastType, ClientFrame,
};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use registry::{Connection, Session, SessionRegistry, Transport};
pub use server::{CollabServer, InsecureTokenDecoder, ServerConfig, TokenDecoder};
