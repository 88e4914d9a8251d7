//! The user-callback dispatcher consumed by the tracer.
//!
//! A dispatcher is typically a scripting layer: it locates a user-supplied
//! function for each named hook and invokes it, or does nothing when none
//! is registered. Hooks steer the tracer by returning side-effect
//! requests rather than by touching tracer state directly, which keeps the
//! before/after sequencing auditable.

use crate::context::RegisterState;
use crate::instruction::Instruction;
use crate::ThreadId;
use serde::{Deserialize, Serialize};

/// A side effect requested by a user hook.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Request {
    /// Queue a concrete context override. The pipeline applies it to the
    /// live thread state and skips the ordinary before-IR/before hooks for
    /// one instruction.
    QueueContext(RegisterState),
    /// Take a concrete-state checkpoint at the current point.
    TakeSnapshot,
    /// Rewind memory and registers to the last checkpoint at the
    /// pipeline's next opportunity.
    RestoreSnapshot,
    /// Stop recording checkpoint modifications.
    LockSnapshot,
    /// Resume recording checkpoint modifications.
    UnlockSnapshot,
}

/// A stable, comparable identifier for a routine hook.
///
/// The dispatcher mints handles when the user registers a routine
/// callback; the tracer only stores and echoes them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct RoutineHandle(u64);

impl RoutineHandle {
    pub fn new(handle: u64) -> RoutineHandle {
        RoutineHandle(handle)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Named user hooks invoked by the tracer.
///
/// Every method has a no-op default, so a dispatcher implements only the
/// hooks its user registered.
pub trait Dispatcher {
    /// Runs at every instruction-before event, before the analysis gate is
    /// consulted, so configuration work can happen unconditionally.
    fn pre_processing(&mut self, instruction: &Instruction, thread: ThreadId) -> Vec<Request> {
        let _ = (instruction, thread);
        Vec::new()
    }

    /// Runs at the end of both the before and after sequences.
    fn post_processing(&mut self, instruction: &Instruction, thread: ThreadId) -> Vec<Request> {
        let _ = (instruction, thread);
        Vec::new()
    }

    /// Runs after disassembly, before IR semantics are built.
    fn before_ir(&mut self, instruction: &Instruction) -> Vec<Request> {
        let _ = instruction;
        Vec::new()
    }

    /// Runs after semantics are built, before the instruction executes.
    fn before(&mut self, instruction: &Instruction) -> Vec<Request> {
        let _ = instruction;
        Vec::new()
    }

    /// Runs after the instruction has executed.
    fn after(&mut self, instruction: &Instruction) -> Vec<Request> {
        let _ = instruction;
        Vec::new()
    }

    /// Runs at the entry or exit of a routine the user hooked by name.
    fn routine(&mut self, thread: ThreadId, handle: RoutineHandle) -> Vec<Request> {
        let _ = (thread, handle);
        Vec::new()
    }

    /// Runs at a syscall entry.
    fn syscall_entry(&mut self, thread: ThreadId) -> Vec<Request> {
        let _ = thread;
        Vec::new()
    }

    /// Runs at a syscall exit.
    fn syscall_exit(&mut self, thread: ThreadId) -> Vec<Request> {
        let _ = thread;
        Vec::new()
    }

    /// Runs when the process receives a catchable signal. Returning a
    /// restore request is the only way to keep the process alive.
    fn signal(&mut self, thread: ThreadId, signum: i32) -> Vec<Request> {
        let _ = (thread, signum);
        Vec::new()
    }

    /// Runs when the host loads an image.
    fn image_load(&mut self, path: &str, base: u64, size: u64) {
        let _ = (path, base, size);
    }

    /// Runs once when the traced program ends.
    fn fini(&mut self) {}
}
