//! Tracelink ties a Dynamic Binary Instrumentation engine to a symbolic
//! analysis engine.
//!
//! The host DBI engine drives guest execution and reports events (executed
//! instructions, memory accesses, image loads, syscalls, signals) into a
//! [`tracer::Tracer`]. The tracer keeps the concrete machine state, asks an
//! external [`engine::SymbolicEngine`] to disassemble and build semantics
//! for every analyzed instruction, and lets an external
//! [`dispatch::Dispatcher`] (typically a scripting layer) observe and steer
//! the process, including rewinding concrete memory through the
//! [`snapshot::Snapshot`] engine.
//!
//! Tracelink does not execute code itself and does not own a symbolic
//! engine. Both sides are traits: implement [`host::Host`] over your DBI
//! engine and [`engine::SymbolicEngine`] over your analysis backend, then
//! feed events into the tracer.

#[macro_use]
extern crate log;

pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod filter;
pub mod host;
pub mod image;
pub mod instruction;
pub mod session;
pub mod snapshot;
pub mod tracer;
pub mod trigger;

#[cfg(test)]
mod tests;

pub use crate::error::Error;

/// A thread identifier as reported by the host DBI engine.
pub type ThreadId = u32;
