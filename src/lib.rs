#![forbid(unsafe_code)]

//! `agent-conduit` — supervises agent subprocesses speaking a line-framed
//! control protocol over stdio, and bridges their client callbacks between a
//! connected front-end peer and a local fallback implementation.

pub mod acp;
pub mod audit;
pub mod config;
pub mod connection;
pub mod errors;
pub mod gateway;
pub mod handler;
pub mod local;
pub mod manager;
pub mod policy;
pub mod router;
pub mod terminal;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
