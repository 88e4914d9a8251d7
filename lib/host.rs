//! The surface of the host DBI engine consumed by the tracer.

use crate::context::RegisterState;
use crate::{Error, ThreadId};

/// Operations the host DBI engine must provide.
///
/// The host also owes the tracer an event contract:
///
/// * `Tracer::instrument` is consulted once per static code location before
///   any instrumentation is planted there.
/// * Memory-access capture events fire before the owning instruction's
///   before event, and the snapshot pre-write event fires before any write
///   completes.
/// * Instructions classified as system calls get no after event; their
///   post-state is reported through the syscall-exit event instead.
pub trait Host {
    /// Read one byte of live process memory.
    fn read_byte(&self, address: u64) -> Result<u8, Error>;

    /// Write one byte of live process memory.
    fn write_byte(&mut self, address: u64, value: u8) -> Result<(), Error>;

    /// Replace the register state of the given thread.
    fn apply_registers(&mut self, thread: ThreadId, registers: &RegisterState)
        -> Result<(), Error>;
}
