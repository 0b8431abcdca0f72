//! Push-channel session lifecycle.
//!
//! One manager owns one session bound to one auth token at a time. The
//! transport itself is abstracted behind [`PushTransport`] so the engine can
//! run against a WebSocket in production and an in-memory channel in tests.

pub mod manager;
pub mod state;

pub use manager::{ConnectionManager, PushSession, PushTransport};
pub use state::ConnectionState;
