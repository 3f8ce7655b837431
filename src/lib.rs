//! Execution gateway for line-protocol tools.
//!
//! A catalog of declared tools is exposed behind a uniform endpoint. Each
//! accepted request spawns the tool in its configured runtime (native child
//! process or container CLI), feeds the request body as a single JSON line,
//! and streams the tool's output lines back to the caller, either as
//! server-sent events over HTTP or as JSON envelopes over a duplex line
//! stream. Teardown of the tool and its descendants is guaranteed on peer
//! disconnect, per-tool timeout, and process shutdown.

pub mod api;
pub mod config;
pub mod observability;
pub mod process;
pub mod runner;
pub mod runtime;
pub mod sandbox;
pub mod service;
pub mod stdio;

pub use config::{Config, Tool};
pub use service::{GatewayError, LineSink, Service};
