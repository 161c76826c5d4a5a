//! wsbridge - WebSocket to TCP byte-stream relay with reconnecting backend.
//!
//! This crate bridges WebSocket clients (such as browser-based VNC viewers)
//! to a plain TCP backend. The backend side reconnects on its own with
//! capped exponential backoff, buffering client data during the outage, so
//! a backend restart does not cost the client its connection.

pub mod backoff;
pub mod buffer;
pub mod cli;
pub mod connector;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use backoff::{ReconnectPolicy, ReconnectState};
pub use buffer::{FrameBuffer, DEFAULT_MAX_BUFFER_BYTES};
pub use cli::{Cli, Config};
pub use connector::{BackendConn, BackendConnector};
pub use error::{Error, Result};
pub use registry::{SessionRegistry, StatsSnapshot};
pub use server::{RelayServer, WS_PATHS};
pub use session::{RelaySession, SessionState};
