//! Rewind concrete memory and registers to a prior checkpoint.
//!
//! Bytes are captured from a pre-write hook, before the write completes,
//! so taking the checkpoint never perturbs the values it records.

use crate::context::RegisterState;
use crate::host::Host;
use crate::{Error, ThreadId};
use std::collections::BTreeMap;

/// A concrete-state checkpoint.
///
/// While locked, no modifications are recorded. Only the first write to an
/// address is recorded, so a restore returns to the pre-checkpoint value
/// rather than an intermediate one.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    locked: bool,
    must_restore: bool,
    memory: BTreeMap<u64, u8>,
    registers: RegisterState,
}

impl Snapshot {
    /// Create a new snapshot engine. It starts locked: nothing is recorded
    /// until a checkpoint is taken.
    pub fn new() -> Snapshot {
        Snapshot {
            locked: true,
            must_restore: false,
            memory: BTreeMap::new(),
            registers: RegisterState::new(),
        }
    }

    /// Take a checkpoint: capture the given register state, drop any
    /// previously recorded bytes and start recording.
    pub fn take(&mut self, registers: RegisterState) {
        self.registers = registers;
        self.memory.clear();
        self.locked = false;
    }

    /// Record the original value of a byte about to be overwritten.
    /// First-write-wins: later writes to the same address do not replace
    /// the recorded value.
    pub fn add_modification(&mut self, address: u64, original: u8) {
        if !self.locked {
            self.memory.entry(address).or_insert(original);
        }
    }

    /// Has a restore been requested?
    pub fn must_be_restored(&self) -> bool {
        self.must_restore
    }

    /// Request that the pipeline restore this checkpoint at its next
    /// opportunity.
    pub fn request_restore(&mut self) {
        self.must_restore = true;
    }

    /// Write every recorded byte back into live memory, reapply the
    /// captured registers to the given thread, then forget the recorded
    /// bytes and the pending-restore flag. The lock state is unchanged.
    pub fn restore<H: Host>(&mut self, host: &mut H, thread: ThreadId) -> Result<(), Error> {
        for (address, byte) in &self.memory {
            host.write_byte(*address, *byte)?;
        }
        host.apply_registers(thread, &self.registers)?;
        self.memory.clear();
        self.must_restore = false;
        Ok(())
    }

    /// Get the number of recorded modifications.
    pub fn modifications(&self) -> usize {
        self.memory.len()
    }

    /// Stop recording modifications.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Resume recording modifications.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Is recording disabled?
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}
