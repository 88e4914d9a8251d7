//! The instrumentation pipeline and event router.
//!
//! A [`Tracer`] is the single object a host DBI integration talks to. The
//! host reports a small closed set of events; the tracer sequences
//! concrete-state capture, symbolic semantics construction, user-hook
//! invocation and snapshot restoration, all inside one protected region.
//!
//! Multiple host threads may report events concurrently. Only one event is
//! handled at a time; a callback never blocks on anything but another
//! thread's callback.

mod pipeline;
mod router;

use crate::context::RegisterState;
use crate::dispatch::{Dispatcher, RoutineHandle};
use crate::engine::SymbolicEngine;
use crate::host::Host;
use crate::image::Image;
use crate::instruction::AccessKind;
use crate::session::{ImagePlan, Session};
use crate::{Error, ThreadId};
use std::sync::{Mutex, MutexGuard};

/// What the host must do after routing a signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalAction {
    /// A snapshot restore was performed; the thread may resume.
    Resume,
    /// Default safety behavior: terminate the process.
    Terminate,
}

/// A runtime event reported by the host DBI engine.
#[derive(Clone, Debug)]
pub enum Event {
    /// An instrumented instruction is about to execute.
    InstructionBefore {
        address: u64,
        opcodes: Vec<u8>,
        thread: ThreadId,
        registers: RegisterState,
    },
    /// An instrumented instruction has executed. Never reported for
    /// system calls; their post-state arrives as `SyscallExit`.
    InstructionAfter {
        address: u64,
        thread: ThreadId,
        registers: RegisterState,
    },
    /// A memory operand of the instruction at `instruction` is about to be
    /// accessed. Reported before `InstructionBefore`.
    MemoryAccess {
        instruction: u64,
        address: u64,
        size: usize,
        kind: AccessKind,
    },
    /// Program memory is about to be overwritten.
    PreWrite { address: u64, size: usize },
    /// An image was loaded.
    ImageLoad(Image),
    /// A hooked routine was entered.
    RoutineEntry {
        thread: ThreadId,
        registers: RegisterState,
        handle: RoutineHandle,
    },
    /// A hooked routine returned.
    RoutineExit {
        thread: ThreadId,
        registers: RegisterState,
        handle: RoutineHandle,
    },
    /// A system call is about to be made.
    SyscallEntry {
        thread: ThreadId,
        registers: RegisterState,
    },
    /// A system call returned.
    SyscallExit {
        thread: ThreadId,
        registers: RegisterState,
    },
    /// The process received a catchable signal.
    Signal {
        thread: ThreadId,
        signum: i32,
        registers: RegisterState,
    },
    /// The traced program ended.
    Fini,
}

/// What the host must do after an event was routed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Resume guest execution.
    Continue,
    /// Terminate the process.
    Terminate,
    /// Install the returned instrumentation, then resume.
    Plan(ImagePlan),
}

pub(crate) struct Inner<H, E, D> {
    pub(crate) host: H,
    pub(crate) engine: E,
    pub(crate) dispatcher: D,
    pub(crate) session: Session,
}

/// The bridge between a host DBI engine and a symbolic analysis engine.
pub struct Tracer<H: Host, E: SymbolicEngine, D: Dispatcher> {
    inner: Mutex<Inner<H, E, D>>,
}

impl<H: Host, E: SymbolicEngine, D: Dispatcher> Tracer<H, E, D> {
    /// Create a new tracer over the given collaborators.
    pub fn new(host: H, engine: E, dispatcher: D) -> Tracer<H, E, D> {
        Tracer {
            inner: Mutex::new(Inner {
                host,
                engine,
                dispatcher,
                session: Session::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<Inner<H, E, D>> {
        // A panic inside the protected region leaves analysis state in an
        // unknown condition. Treat it as a programming error.
        self.inner.lock().expect("instrumentation lock poisoned")
    }

    /// Start the analysis at the entry point of the next loaded image.
    pub fn start_from_entry(&self) {
        self.lock().session.start_mut().set_from_entry();
    }

    /// Start the analysis when execution reaches the named symbol.
    pub fn start_from_symbol<S: Into<String>>(&self, symbol: S) {
        self.lock().session.start_mut().set_from_symbol(symbol);
    }

    /// Start the analysis when execution reaches the given address.
    pub fn start_from_address(&self, address: u64) {
        self.lock().session.start_mut().add_address(address);
    }

    /// Start the analysis when execution reaches the given image-relative
    /// offset.
    pub fn start_from_offset(&self, offset: u64) {
        self.lock().session.start_mut().add_offset(offset);
    }

    /// Exclude images whose path contains the given substring.
    pub fn blacklist_image<S: Into<String>>(&self, substring: S) {
        self.lock().session.filter_mut().blacklist(substring);
    }

    /// Restrict instrumentation to images whose path contains the given
    /// substring. A blacklist match still wins.
    pub fn whitelist_image<S: Into<String>>(&self, substring: S) {
        self.lock().session.filter_mut().whitelist(substring);
    }

    /// Register a user hook for the entry of the named routine. The name
    /// is resolved against each image as it loads; images that do not
    /// define it are silently skipped.
    pub fn register_routine_entry<S: Into<String>>(&self, name: S, handle: RoutineHandle) {
        self.lock().session.register_routine_entry(name, handle);
    }

    /// Register a user hook for the exit of the named routine.
    pub fn register_routine_exit<S: Into<String>>(&self, name: S, handle: RoutineHandle) {
        self.lock().session.register_routine_exit(name, handle);
    }

    /// Flip the analysis trigger. The host calls this from the begin/end
    /// bracket around the configured start routine.
    pub fn toggle(&self, enabled: bool) {
        self.lock().session.trigger_mut().update(enabled);
    }

    /// Decide whether the static code location at `address` should be
    /// instrumented, evaluating the start conditions first. The host
    /// consults this once per location before planting callbacks.
    pub fn instrument(&self, address: u64, thread: ThreadId) -> bool {
        let mut inner = self.lock();
        inner.session.check_unlock(address, thread);
        if !inner.session.trigger().state() {
            return false;
        }
        if !inner.session.filter_permits(address) {
            return false;
        }
        inner.session.ensure_instruction(address);
        true
    }

    /// Route the before-execution event for an instrumented instruction.
    pub fn instruction_before(
        &self,
        address: u64,
        opcodes: &[u8],
        thread: ThreadId,
        registers: RegisterState,
    ) -> Result<(), Error> {
        self.lock()
            .instruction_before(address, opcodes, thread, registers)
    }

    /// Route the after-execution event for an instrumented instruction.
    pub fn instruction_after(
        &self,
        address: u64,
        thread: ThreadId,
        registers: RegisterState,
    ) -> Result<(), Error> {
        self.lock().instruction_after(address, thread, registers)
    }

    /// Capture the concrete value of a memory operand ahead of the owning
    /// instruction's before event.
    pub fn save_memory_access(
        &self,
        instruction: u64,
        address: u64,
        size: usize,
        kind: AccessKind,
    ) -> Result<(), Error> {
        self.lock()
            .save_memory_access(instruction, address, size, kind)
    }

    /// Record the pre-image of program memory about to be overwritten, for
    /// the snapshot engine.
    pub fn snapshot_capture(&self, address: u64, size: usize) -> Result<(), Error> {
        self.lock().snapshot_capture(address, size)
    }

    /// Route an image-load event. Always handled, whatever the trigger
    /// state, so later symbol and offset resolution works.
    pub fn image_load(&self, image: Image) -> ImagePlan {
        self.lock().image_load(image)
    }

    /// Route the entry of a hooked routine.
    pub fn routine_entry(
        &self,
        thread: ThreadId,
        registers: RegisterState,
        handle: RoutineHandle,
    ) -> Result<(), Error> {
        self.lock().routine(thread, registers, handle)
    }

    /// Route the exit of a hooked routine.
    pub fn routine_exit(
        &self,
        thread: ThreadId,
        registers: RegisterState,
        handle: RoutineHandle,
    ) -> Result<(), Error> {
        self.lock().routine(thread, registers, handle)
    }

    /// Route a syscall-entry event.
    pub fn syscall_entry(&self, thread: ThreadId, registers: RegisterState) -> Result<(), Error> {
        self.lock().syscall(thread, registers, true)
    }

    /// Route a syscall-exit event.
    pub fn syscall_exit(&self, thread: ThreadId, registers: RegisterState) -> Result<(), Error> {
        self.lock().syscall(thread, registers, false)
    }

    /// Route a signal. Termination is the default; only a restore
    /// requested by the user hook keeps the process alive.
    pub fn signal(
        &self,
        thread: ThreadId,
        signum: i32,
        registers: RegisterState,
    ) -> Result<SignalAction, Error> {
        self.lock().signal(thread, signum, registers)
    }

    /// Route the program-end event. Forwarded to the dispatcher exactly
    /// once.
    pub fn fini(&self) {
        self.lock().fini()
    }

    /// Route any runtime event through the closed event interface.
    pub fn dispatch(&self, event: Event) -> Result<Outcome, Error> {
        match event {
            Event::InstructionBefore {
                address,
                opcodes,
                thread,
                registers,
            } => {
                self.instruction_before(address, &opcodes, thread, registers)?;
                Ok(Outcome::Continue)
            }
            Event::InstructionAfter {
                address,
                thread,
                registers,
            } => {
                self.instruction_after(address, thread, registers)?;
                Ok(Outcome::Continue)
            }
            Event::MemoryAccess {
                instruction,
                address,
                size,
                kind,
            } => {
                self.save_memory_access(instruction, address, size, kind)?;
                Ok(Outcome::Continue)
            }
            Event::PreWrite { address, size } => {
                self.snapshot_capture(address, size)?;
                Ok(Outcome::Continue)
            }
            Event::ImageLoad(image) => Ok(Outcome::Plan(self.image_load(image))),
            Event::RoutineEntry {
                thread,
                registers,
                handle,
            } => {
                self.routine_entry(thread, registers, handle)?;
                Ok(Outcome::Continue)
            }
            Event::RoutineExit {
                thread,
                registers,
                handle,
            } => {
                self.routine_exit(thread, registers, handle)?;
                Ok(Outcome::Continue)
            }
            Event::SyscallEntry { thread, registers } => {
                self.syscall_entry(thread, registers)?;
                Ok(Outcome::Continue)
            }
            Event::SyscallExit { thread, registers } => {
                self.syscall_exit(thread, registers)?;
                Ok(Outcome::Continue)
            }
            Event::Signal {
                thread,
                signum,
                registers,
            } => match self.signal(thread, signum, registers)? {
                SignalAction::Resume => Ok(Outcome::Continue),
                SignalAction::Terminate => Ok(Outcome::Terminate),
            },
            Event::Fini => {
                self.fini();
                Ok(Outcome::Continue)
            }
        }
    }
}
