//! The last observed concrete machine state, and queued context overrides.

use crate::host::Host;
use crate::{Error, ThreadId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named-register snapshot of one thread's state.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegisterState {
    registers: BTreeMap<String, u64>,
}

impl RegisterState {
    /// Create a new, empty register state.
    pub fn new() -> RegisterState {
        RegisterState::default()
    }

    /// Set the value of the given register.
    pub fn set<S: Into<String>>(&mut self, register: S, value: u64) {
        self.registers.insert(register.into(), value);
    }

    /// Get the value of the given register.
    pub fn get(&self, register: &str) -> Option<u64> {
        self.registers.get(register).copied()
    }

    /// Get every register in this state.
    pub fn registers(&self) -> &BTreeMap<String, u64> {
        &self.registers
    }
}

/// The concrete context cache.
///
/// Holds the most recent register state reported by the host at a callback
/// entry, plus an optionally queued override context. A user hook queues an
/// override to force a specific concrete state; the pipeline consumes it
/// and skips the ordinary before-IR/before hooks for that one instruction.
#[derive(Clone, Debug, Default)]
pub struct ConcreteContext {
    last: RegisterState,
    queued: Option<RegisterState>,
}

impl ConcreteContext {
    /// Create a new concrete context cache.
    pub fn new() -> ConcreteContext {
        ConcreteContext::default()
    }

    /// Record the register state reported at the current callback entry.
    pub fn update(&mut self, registers: RegisterState) {
        self.last = registers;
    }

    /// Get the register state observed at the last callback entry.
    pub fn last(&self) -> &RegisterState {
        &self.last
    }

    /// Queue a context override to be applied by the pipeline.
    pub fn queue(&mut self, registers: RegisterState) {
        self.queued = Some(registers);
    }

    /// Is a context override queued?
    pub fn must_be_executed(&self) -> bool {
        self.queued.is_some()
    }

    /// Drop a queued override without applying it. The pipeline does this
    /// exactly once after an override has been consumed.
    pub fn clear_queued(&mut self) {
        self.queued = None;
    }

    /// Apply the queued override to the live thread state and clear the
    /// queue.
    pub fn execute<H: Host>(&mut self, host: &mut H, thread: ThreadId) -> Result<(), Error> {
        let registers = self.queued.take().ok_or(Error::NoQueuedContext)?;
        host.apply_registers(thread, &registers)?;
        self.last = registers;
        Ok(())
    }

    /// Read up to 16 bytes of live process memory as a little-endian value.
    pub fn current_memory_value<H: Host>(
        &self,
        host: &H,
        address: u64,
        size: usize,
    ) -> Result<u128, Error> {
        if size == 0 || size > 16 {
            return Err(Error::InvalidMemoryAccess { address, size });
        }
        let mut value: u128 = 0;
        for i in (0..size).rev() {
            value = (value << 8) | u128::from(host.read_byte(address + i as u64)?);
        }
        Ok(value)
    }
}
