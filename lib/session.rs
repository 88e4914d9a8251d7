//! The owned state of one analysis session.

use crate::context::ConcreteContext;
use crate::dispatch::RoutineHandle;
use crate::filter::{ImageFilter, StartSet};
use crate::image::{Image, ImageTable};
use crate::instruction::Instruction;
use crate::snapshot::Snapshot;
use crate::trigger::Trigger;
use crate::ThreadId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Where a resolved routine hook should be planted.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RoutinePosition {
    Entry,
    Exit,
}

/// A routine hook resolved against a loaded image, for the host to plant.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResolvedRoutine {
    address: u64,
    handle: RoutineHandle,
    position: RoutinePosition,
}

impl ResolvedRoutine {
    pub fn new(address: u64, handle: RoutineHandle, position: RoutinePosition) -> ResolvedRoutine {
        ResolvedRoutine {
            address,
            handle,
            position,
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn handle(&self) -> RoutineHandle {
        self.handle
    }

    pub fn position(&self) -> RoutinePosition {
        self.position
    }
}

/// Instrumentation the host should install after an image load.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ImagePlan {
    analysis_routine: Option<u64>,
    routines: Vec<ResolvedRoutine>,
}

impl ImagePlan {
    /// The address of the configured start symbol, when this image defines
    /// it. The host brackets the routine with `Tracer::toggle(true)` at
    /// entry and `Tracer::toggle(false)` at exit.
    pub fn analysis_routine(&self) -> Option<u64> {
        self.analysis_routine
    }

    /// Routine hooks resolved in this image. Names that did not resolve
    /// are silently absent.
    pub fn routines(&self) -> &[ResolvedRoutine] {
        &self.routines
    }
}

/// All mutable state shared by the instrumentation callbacks.
///
/// A session is only ever touched from inside the tracer's protected
/// region, so none of its own operations take locks.
#[derive(Debug, Default)]
pub struct Session {
    trigger: Trigger,
    target_thread: Option<ThreadId>,
    start: StartSet,
    filter: ImageFilter,
    images: ImageTable,
    context: ConcreteContext,
    snapshot: Snapshot,
    cache: FxHashMap<u64, Instruction>,
    routine_entry_hooks: FxHashMap<String, RoutineHandle>,
    routine_exit_hooks: FxHashMap<String, RoutineHandle>,
    finished: bool,
}

impl Session {
    /// Create a new analysis session with the trigger off.
    pub fn new() -> Session {
        Session {
            snapshot: Snapshot::new(),
            ..Session::default()
        }
    }

    /// Get the analysis trigger.
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Get a mutable reference to the analysis trigger.
    pub fn trigger_mut(&mut self) -> &mut Trigger {
        &mut self.trigger
    }

    /// Get the analyzed thread, if one has been chosen.
    pub fn target_thread(&self) -> Option<ThreadId> {
        self.target_thread
    }

    /// Get a mutable reference to the configured start conditions.
    pub fn start_mut(&mut self) -> &mut StartSet {
        &mut self.start
    }

    /// Get a mutable reference to the image filter.
    pub fn filter_mut(&mut self) -> &mut ImageFilter {
        &mut self.filter
    }

    /// Get the table of loaded images.
    pub fn images(&self) -> &ImageTable {
        &self.images
    }

    /// Get the concrete context cache.
    pub fn context(&self) -> &ConcreteContext {
        &self.context
    }

    /// Get a mutable reference to the concrete context cache.
    pub fn context_mut(&mut self) -> &mut ConcreteContext {
        &mut self.context
    }

    /// Get the snapshot engine.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Get a mutable reference to the snapshot engine.
    pub fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    /// Is analysis-sensitive work enabled for the given thread?
    pub fn analyzed(&self, thread: ThreadId) -> bool {
        self.trigger.state() && self.target_thread == Some(thread)
    }

    /// Check whether the given address satisfies a start condition, and if
    /// so flip the trigger on and pin the analysis to the calling thread.
    ///
    /// One-shot: once a target thread is chosen, every further check
    /// short-circuits to false, even for addresses that would match.
    pub fn check_unlock(&mut self, address: u64, thread: ThreadId) -> bool {
        if self.target_thread.is_some() {
            return false;
        }
        if self.start.matches(address, &self.images) {
            debug!("analysis unlocked at {:x} on thread {}", address, thread);
            self.target_thread = Some(thread);
            self.trigger.update(true);
            return true;
        }
        false
    }

    /// May the instruction at the given address be instrumented, per the
    /// image blacklist/whitelist?
    pub fn filter_permits(&self, address: u64) -> bool {
        let path = self
            .images
            .image_at(address)
            .map(|image| image.path())
            .unwrap_or("");
        self.filter.permits(path)
    }

    /// Register a user hook for the entry of the named routine.
    pub fn register_routine_entry<S: Into<String>>(&mut self, name: S, handle: RoutineHandle) {
        self.routine_entry_hooks.insert(name.into(), handle);
    }

    /// Register a user hook for the exit of the named routine.
    pub fn register_routine_exit<S: Into<String>>(&mut self, name: S, handle: RoutineHandle) {
        self.routine_exit_hooks.insert(name.into(), handle);
    }

    /// Record a loaded image and work out what the host should plant in
    /// it: the one-shot entry-point start condition, the start-symbol
    /// bracket, and any routine hooks whose names resolve here.
    pub fn image_loaded(&mut self, image: Image) -> ImagePlan {
        self.start.consume_entry_request(image.entry());

        let analysis_routine = self
            .start
            .from_symbol()
            .and_then(|name| image.symbol(name))
            .map(|symbol| symbol.address());

        let mut routines = Vec::new();
        for (name, handle) in &self.routine_entry_hooks {
            if let Some(symbol) = image.symbol(name) {
                routines.push(ResolvedRoutine::new(
                    symbol.address(),
                    *handle,
                    RoutinePosition::Entry,
                ));
            }
        }
        for (name, handle) in &self.routine_exit_hooks {
            if let Some(symbol) = image.symbol(name) {
                routines.push(ResolvedRoutine::new(
                    symbol.address(),
                    *handle,
                    RoutinePosition::Exit,
                ));
            }
        }

        self.images.insert(image);

        ImagePlan {
            analysis_routine,
            routines,
        }
    }

    /// Take the cached instruction for a code location, leaving the slot
    /// empty. The caller returns it with `put_instruction` once the
    /// callback sequence is done.
    pub fn take_instruction(&mut self, address: u64) -> Instruction {
        self.cache.remove(&address).unwrap_or_default()
    }

    /// Return a cached instruction to its slot.
    pub fn put_instruction(&mut self, address: u64, instruction: Instruction) {
        self.cache.insert(address, instruction);
    }

    /// Make sure a cache slot exists for the given code location.
    pub fn ensure_instruction(&mut self, address: u64) {
        self.cache.entry(address).or_default();
    }

    /// Has the program-end event already been routed?
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Mark the program-end event as routed.
    pub fn set_finished(&mut self) {
        self.finished = true;
    }
}
