#![forbid(unsafe_code)]

//! rfbrelay server
//!
//! Routes WebSocket clients to live VNC bridges, recorded-session replay, or
//! an external player process. The relay engine itself lives in
//! `rfbrelay-core`; this crate adds the CLI, configuration, the accept loop
//! and the session event log.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod route;
pub mod server;
pub mod telemetry;

pub use cli::{run, run_from_env};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use route::{Route, RouteRejection};
pub use server::{ConnectionCounter, Server};
