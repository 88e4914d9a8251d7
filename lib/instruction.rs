//! Instructions as observed by the host DBI engine.
//!
//! One `Instruction` exists per unique code location. The host creates it
//! the first time the location is instrumented and then reuses it for every
//! dynamic execution, so all dynamic fields are reset at the start and end
//! of each execution. Captured memory operands are the exception: they are
//! attached before the before-sequence runs and must survive
//! `partial_reset`.

use crate::ThreadId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The direction of a concrete memory access.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AccessKind {
    Read,
    Write,
}

/// A concrete memory access captured before its owning instruction
/// executes.
///
/// For a write, `value` is the pre-image: the bytes present at the address
/// before the write completes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemoryAccess {
    address: u64,
    size: usize,
    value: u128,
    kind: AccessKind,
}

impl MemoryAccess {
    /// Create a new memory access.
    pub fn new(address: u64, size: usize, value: u128, kind: AccessKind) -> MemoryAccess {
        MemoryAccess {
            address,
            size,
            value,
            kind,
        }
    }

    /// Get the address of this access.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Get the width of this access in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the concrete value observed at the address.
    pub fn value(&self) -> u128 {
        self.value
    }

    /// Get the direction of this access.
    pub fn kind(&self) -> AccessKind {
        self.kind
    }
}

impl fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            AccessKind::Read => "R",
            AccessKind::Write => "W",
        };
        write!(f, "{} {:x}:{} = {:x}", kind, self.address, self.size, self.value)
    }
}

/// The shape of a decoded operand, as reported by the symbolic engine's
/// disassembler.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OperandKind {
    Register(String),
    Immediate(u64),
    Memory { size: usize },
}

/// A decoded operand with its trust flag.
///
/// A trusted operand carries a concrete value supplied by the tracer; the
/// symbolic engine must not treat it as unknown. Trust is granted for the
/// duration of one before-sequence only.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Operand {
    kind: OperandKind,
    trusted: bool,
}

impl Operand {
    /// Create a new, untrusted operand.
    pub fn new(kind: OperandKind) -> Operand {
        Operand {
            kind,
            trusted: false,
        }
    }

    /// Get the kind of this operand.
    pub fn kind(&self) -> &OperandKind {
        &self.kind
    }

    /// Is this operand's concrete value trusted?
    pub fn trusted(&self) -> bool {
        self.trusted
    }

    /// Set the trust flag for this operand.
    pub fn set_trust(&mut self, trusted: bool) {
        self.trusted = trusted;
    }
}

/// Where an instruction execution instance stands in the before/after
/// callback sequence.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Phase {
    #[default]
    Idle,
    PreCapture,
    Disassembled,
    SemanticsBuilt,
    PostHooks,
}

/// An instruction observed by the host DBI engine.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instruction {
    address: u64,
    opcodes: Vec<u8>,
    thread: ThreadId,
    operands: Vec<Operand>,
    memory_accesses: Vec<MemoryAccess>,
    phase: Phase,
}

impl Instruction {
    /// Create a new, empty instruction.
    pub fn new() -> Instruction {
        Instruction::default()
    }

    /// Get the virtual address of this instruction.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Set the virtual address of this instruction.
    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    /// Get the opcode bytes of this instruction.
    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    /// Set the opcode bytes of this instruction.
    pub fn set_opcodes(&mut self, opcodes: &[u8]) {
        self.opcodes = opcodes.to_vec();
    }

    /// Get the id of the thread executing this instruction.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Set the id of the thread executing this instruction.
    pub fn set_thread(&mut self, thread: ThreadId) {
        self.thread = thread;
    }

    /// Get the decoded operands of this instruction.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Replace the decoded operands of this instruction. Called by the
    /// symbolic engine's disassembler.
    pub fn set_operands(&mut self, operands: Vec<Operand>) {
        self.operands = operands;
    }

    /// Set the trust flag on every operand.
    pub fn trust_operands(&mut self, trusted: bool) {
        for operand in &mut self.operands {
            operand.set_trust(trusted);
        }
    }

    /// Get the memory accesses captured for the pending execution.
    pub fn memory_accesses(&self) -> &[MemoryAccess] {
        &self.memory_accesses
    }

    /// Attach a captured memory access to this instruction.
    ///
    /// Reads are kept ahead of writes regardless of arrival order, so an
    /// instruction that reads and writes the same location always sees the
    /// pre-write value on its read.
    pub fn record_access(&mut self, access: MemoryAccess) {
        match access.kind() {
            AccessKind::Read => {
                let at = self
                    .memory_accesses
                    .iter()
                    .position(|a| a.kind() == AccessKind::Write)
                    .unwrap_or(self.memory_accesses.len());
                self.memory_accesses.insert(at, access);
            }
            AccessKind::Write => self.memory_accesses.push(access),
        }
    }

    /// Drop the captured memory accesses. Called once semantics have been
    /// built from them.
    pub fn clear_memory_accesses(&mut self) {
        self.memory_accesses.clear();
    }

    /// Get the execution phase of this instruction.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Set the execution phase of this instruction.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Clear every dynamic field, including captured memory accesses. The
    /// host's instrumentation cache reuses this object across executions,
    /// so no per-execution state may survive.
    pub fn reset(&mut self) {
        self.opcodes.clear();
        self.operands.clear();
        self.memory_accesses.clear();
        self.address = 0;
        self.thread = 0;
        self.phase = Phase::Idle;
    }

    /// Clear decoded state ahead of a new execution, preserving memory
    /// accesses already captured for that execution.
    pub fn partial_reset(&mut self) {
        self.opcodes.clear();
        self.operands.clear();
        self.phase = Phase::Idle;
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.address)?;
        for byte in &self.opcodes {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}
