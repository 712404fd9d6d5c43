//! Purpose: Library behind the `distgen` CLI: keyspace enumeration, digests and block distribution.
//! Exports: `core` (codec, enumerator, planner, digests, errors), `api` (queues, sinks, workers).
//! Role: Everything the binary does is reachable here so tests can drive it without a process.
//! Invariants: `core` is pure and synchronous; all I/O and threads live in `api`.
//! Invariants: Components take their collaborators explicitly; there is no global state.
pub mod api;
pub mod core;
