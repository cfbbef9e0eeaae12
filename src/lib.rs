//! Multi-target, multi-worker I/O load generator and measurement engine.
//!
//! A [`plan::Plan`] owns every [`target::Target`]; each target is served
//! by one or more [`worker::Worker`]s, each running on its own OS thread
//! and passing every operation through the nine-stage
//! [`pipeline::run_before_io`] before issuing it.

pub mod barrier;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod io_target;
pub mod net;
pub mod pipeline;
pub mod plan;
pub mod run_state;
pub mod target;
pub mod wire;
pub mod worker;

pub use error::{Result, XddError};
