//! Agent-control protocol plumbing.
//!
//! Everything under this module is transport-level: line framing, the wire
//! types for the protocol subset this bridge moves, and a symmetric
//! JSON-RPC peer that both sides of the bridge reuse.
//!
//! - `codec`: NDJSON line framing with a maximum-line guard.
//! - `types`: serde types for the handshake, session, file, terminal, and
//!   permission messages.
//! - `rpc`: request/response correlation plus inbound dispatch over any
//!   framed duplex — the agent's stdio pipes or a peer socket alike.

pub mod codec;
pub mod rpc;
pub mod types;
