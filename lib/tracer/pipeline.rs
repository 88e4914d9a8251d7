//! The per-instruction before/after callback sequences.

use crate::context::RegisterState;
use crate::dispatch::{Dispatcher, Request};
use crate::engine::SymbolicEngine;
use crate::host::Host;
use crate::instruction::{AccessKind, MemoryAccess, Phase};
use crate::tracer::Inner;
use crate::{Error, ThreadId};

impl<H: Host, E: SymbolicEngine, D: Dispatcher> Inner<H, E, D> {
    /// The before-execution sequence. Fires once per dynamic execution of
    /// an instrumented instruction.
    pub(crate) fn instruction_before(
        &mut self,
        address: u64,
        opcodes: &[u8],
        thread: ThreadId,
        registers: RegisterState,
    ) -> Result<(), Error> {
        let mut instruction = self.session.take_instruction(address);

        // Configuration hooks run unconditionally, ahead of the gate.
        let requests = self.dispatcher.pre_processing(&instruction, thread);
        self.apply_requests(requests);

        if !self.session.analyzed(thread) {
            self.session.put_instruction(address, instruction);
            return Ok(());
        }

        self.session.context_mut().update(registers);

        instruction.partial_reset();
        instruction.set_opcodes(opcodes);
        instruction.set_address(address);
        instruction.set_thread(thread);
        instruction.set_phase(Phase::PreCapture);

        self.engine
            .disassemble(&mut instruction)
            .map_err(|e| Error::Disassembly(address, Box::new(e)))?;
        instruction.set_phase(Phase::Disassembled);

        // Operand values were captured by the tracer; the engine must take
        // them as concrete for the duration of this sequence.
        instruction.trust_operands(true);

        // An override queued outside this sequence suppresses the before-IR
        // hook exactly once, and the stale queued context with it.
        if self.session.context().must_be_executed() {
            self.session.context_mut().clear_queued();
        } else {
            let requests = self.dispatcher.before_ir(&instruction);
            self.apply_requests(requests);
        }

        // An override queued by the before-IR hook is applied now and
        // short-circuits semantics building for this dynamic execution.
        let overridden = self.session.context().must_be_executed();
        if overridden {
            trace!("context override applied at {:x}", address);
            instruction.reset();
            self.session.context_mut().execute(&mut self.host, thread)?;
        } else {
            self.engine
                .build_semantics(&mut instruction)
                .map_err(|e| Error::Semantics(address, Box::new(e)))?;
            instruction.clear_memory_accesses();
            instruction.set_phase(Phase::SemanticsBuilt);

            let requests = self.dispatcher.before(&instruction);
            self.apply_requests(requests);
        }

        if self.session.snapshot().must_be_restored() {
            instruction.reset();
            self.restore(thread)?;
        }

        instruction.set_phase(Phase::PostHooks);
        let requests = self.dispatcher.post_processing(&instruction, thread);
        self.apply_requests(requests);

        // Concrete values must not leak into unrelated future use.
        instruction.trust_operands(false);

        self.session.put_instruction(address, instruction);
        Ok(())
    }

    /// The after-execution sequence. The host never fires this for system
    /// calls; their post-state arrives through the syscall-exit event.
    pub(crate) fn instruction_after(
        &mut self,
        address: u64,
        thread: ThreadId,
        registers: RegisterState,
    ) -> Result<(), Error> {
        if !self.session.analyzed(thread) {
            return Ok(());
        }

        let mut instruction = self.session.take_instruction(address);
        self.session.context_mut().update(registers);

        let requests = self.dispatcher.after(&instruction);
        self.apply_requests(requests);

        let requests = self.dispatcher.post_processing(&instruction, thread);
        self.apply_requests(requests);

        // The host's instrumentation cache reuses this object for the next
        // execution of the same code location.
        instruction.reset();

        if self.session.context().must_be_executed() {
            self.session.context_mut().execute(&mut self.host, thread)?;
        }

        if self.session.snapshot().must_be_restored() {
            self.restore(thread)?;
        }

        self.session.put_instruction(address, instruction);
        Ok(())
    }

    /// Capture the concrete value of one memory operand and attach it to
    /// the owning instruction.
    pub(crate) fn save_memory_access(
        &mut self,
        instruction_address: u64,
        address: u64,
        size: usize,
        kind: AccessKind,
    ) -> Result<(), Error> {
        let value = self
            .session
            .context()
            .current_memory_value(&self.host, address, size)?;
        let mut instruction = self.session.take_instruction(instruction_address);
        instruction.record_access(MemoryAccess::new(address, size, value, kind));
        self.session.put_instruction(instruction_address, instruction);
        Ok(())
    }

    /// Record the pre-image of bytes about to be overwritten. Gated by the
    /// trigger alone: the snapshot covers every thread's writes.
    pub(crate) fn snapshot_capture(&mut self, address: u64, size: usize) -> Result<(), Error> {
        if !self.session.trigger().state() {
            return Ok(());
        }
        if self.session.snapshot().is_locked() {
            return Ok(());
        }
        for i in 0..size as u64 {
            let byte = self.host.read_byte(address + i)?;
            self.session.snapshot_mut().add_modification(address + i, byte);
        }
        Ok(())
    }

    /// Rewind memory and registers to the last checkpoint.
    pub(crate) fn restore(&mut self, thread: ThreadId) -> Result<(), Error> {
        debug!("restoring snapshot on thread {}", thread);
        self.session.snapshot_mut().restore(&mut self.host, thread)
    }

    /// Apply side-effect requests returned by a user hook.
    pub(crate) fn apply_requests(&mut self, requests: Vec<Request>) {
        for request in requests {
            match request {
                Request::QueueContext(registers) => {
                    self.session.context_mut().queue(registers)
                }
                Request::TakeSnapshot => {
                    let registers = self.session.context().last().clone();
                    self.session.snapshot_mut().take(registers);
                }
                Request::RestoreSnapshot => self.session.snapshot_mut().request_restore(),
                Request::LockSnapshot => self.session.snapshot_mut().lock(),
                Request::UnlockSnapshot => self.session.snapshot_mut().unlock(),
            }
        }
    }
}
