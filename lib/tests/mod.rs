//! End-to-end tests over the tracer, driven through mock collaborators.

use crate::context::RegisterState;
use crate::dispatch::{Dispatcher, Request, RoutineHandle};
use crate::engine::SymbolicEngine;
use crate::host::Host;
use crate::image::{Image, Symbol};
use crate::instruction::{AccessKind, Instruction, MemoryAccess, Operand, OperandKind};
use crate::session::ImagePlan;
use crate::tracer::{SignalAction, Tracer};
use crate::{Error, ThreadId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Flat guest memory plus the last register state applied by the tracer.
#[derive(Default)]
struct HostState {
    memory: Vec<u8>,
    applied: Option<(ThreadId, RegisterState)>,
}

#[derive(Clone, Default)]
struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    fn with_memory(size: usize) -> MockHost {
        let host = MockHost::default();
        host.state.lock().unwrap().memory = vec![0; size];
        host
    }

    fn poke(&self, address: u64, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        for (i, byte) in bytes.iter().enumerate() {
            state.memory[address as usize + i] = *byte;
        }
    }

    fn peek(&self, address: u64, size: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state.memory[address as usize..address as usize + size].to_vec()
    }

    fn applied(&self) -> Option<(ThreadId, RegisterState)> {
        self.state.lock().unwrap().applied.clone()
    }
}

impl Host for MockHost {
    fn read_byte(&self, address: u64) -> Result<u8, Error> {
        self.state
            .lock()
            .unwrap()
            .memory
            .get(address as usize)
            .copied()
            .ok_or(Error::InvalidMemoryAccess { address, size: 1 })
    }

    fn write_byte(&mut self, address: u64, value: u8) -> Result<(), Error> {
        self.state.lock().unwrap().memory[address as usize] = value;
        Ok(())
    }

    fn apply_registers(
        &mut self,
        thread: ThreadId,
        registers: &RegisterState,
    ) -> Result<(), Error> {
        self.state.lock().unwrap().applied = Some((thread, registers.clone()));
        Ok(())
    }
}

/// Records every disassembly and semantics request, along with the memory
/// accesses visible at semantics-build time.
#[derive(Clone, Default)]
struct MockEngine {
    disassembled: Arc<Mutex<Vec<u64>>>,
    built: Arc<Mutex<Vec<(u64, Vec<MemoryAccess>)>>>,
}

impl SymbolicEngine for MockEngine {
    fn disassemble(&mut self, instruction: &mut Instruction) -> Result<(), Error> {
        self.disassembled.lock().unwrap().push(instruction.address());
        instruction.set_operands(vec![Operand::new(OperandKind::Register("rax".to_string()))]);
        Ok(())
    }

    fn build_semantics(&mut self, instruction: &mut Instruction) -> Result<(), Error> {
        assert!(instruction.operands().iter().all(Operand::trusted));
        self.built.lock().unwrap().push((
            instruction.address(),
            instruction.memory_accesses().to_vec(),
        ));
        Ok(())
    }
}

/// Scripted hook responses, drained one invocation at a time, plus a log
/// of every hook that fired.
#[derive(Clone, Default)]
struct MockDispatcher {
    log: Arc<Mutex<Vec<(&'static str, u64)>>>,
    pre: Arc<Mutex<VecDeque<Vec<Request>>>>,
    before_ir: Arc<Mutex<VecDeque<Vec<Request>>>>,
    before: Arc<Mutex<VecDeque<Vec<Request>>>>,
    after: Arc<Mutex<VecDeque<Vec<Request>>>>,
    syscall: Arc<Mutex<VecDeque<Vec<Request>>>>,
    on_signal: Arc<Mutex<VecDeque<Vec<Request>>>>,
}

impl MockDispatcher {
    fn hooks(&self, name: &str) -> Vec<u64> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(hook, _)| *hook == name)
            .map(|(_, arg)| *arg)
            .collect()
    }

    fn script(queue: &Arc<Mutex<VecDeque<Vec<Request>>>>, requests: Vec<Request>) {
        queue.lock().unwrap().push_back(requests);
    }

    fn drain(queue: &Arc<Mutex<VecDeque<Vec<Request>>>>) -> Vec<Request> {
        queue.lock().unwrap().pop_front().unwrap_or_default()
    }
}

impl Dispatcher for MockDispatcher {
    fn pre_processing(&mut self, _: &Instruction, thread: ThreadId) -> Vec<Request> {
        self.log.lock().unwrap().push(("pre", thread as u64));
        MockDispatcher::drain(&self.pre)
    }

    fn post_processing(&mut self, instruction: &Instruction, _: ThreadId) -> Vec<Request> {
        self.log.lock().unwrap().push(("post", instruction.address()));
        Vec::new()
    }

    fn before_ir(&mut self, instruction: &Instruction) -> Vec<Request> {
        self.log
            .lock()
            .unwrap()
            .push(("before_ir", instruction.address()));
        MockDispatcher::drain(&self.before_ir)
    }

    fn before(&mut self, instruction: &Instruction) -> Vec<Request> {
        self.log.lock().unwrap().push(("before", instruction.address()));
        MockDispatcher::drain(&self.before)
    }

    fn after(&mut self, instruction: &Instruction) -> Vec<Request> {
        self.log.lock().unwrap().push(("after", instruction.address()));
        MockDispatcher::drain(&self.after)
    }

    fn routine(&mut self, _: ThreadId, handle: RoutineHandle) -> Vec<Request> {
        self.log.lock().unwrap().push(("routine", handle.value()));
        Vec::new()
    }

    fn syscall_entry(&mut self, thread: ThreadId) -> Vec<Request> {
        self.log.lock().unwrap().push(("syscall_entry", thread as u64));
        MockDispatcher::drain(&self.syscall)
    }

    fn syscall_exit(&mut self, thread: ThreadId) -> Vec<Request> {
        self.log.lock().unwrap().push(("syscall_exit", thread as u64));
        Vec::new()
    }

    fn signal(&mut self, _: ThreadId, signum: i32) -> Vec<Request> {
        self.log.lock().unwrap().push(("signal", signum as u64));
        MockDispatcher::drain(&self.on_signal)
    }

    fn image_load(&mut self, _: &str, base: u64, _: u64) {
        self.log.lock().unwrap().push(("image", base));
    }

    fn fini(&mut self) {
        self.log.lock().unwrap().push(("fini", 0));
    }
}

fn tracer() -> (Tracer<MockHost, MockEngine, MockDispatcher>, MockHost, MockEngine, MockDispatcher)
{
    let host = MockHost::with_memory(0x4000);
    let engine = MockEngine::default();
    let dispatcher = MockDispatcher::default();
    let tracer = Tracer::new(host.clone(), engine.clone(), dispatcher.clone());
    (tracer, host, engine, dispatcher)
}

fn execute(
    tracer: &Tracer<MockHost, MockEngine, MockDispatcher>,
    address: u64,
    thread: ThreadId,
) {
    tracer
        .instruction_before(address, &[0x90], thread, RegisterState::new())
        .unwrap();
    tracer
        .instruction_after(address, thread, RegisterState::new())
        .unwrap();
}

#[test]
fn trigger_gates_all_hooks_until_the_start_address() {
    let (tracer, _, engine, dispatcher) = tracer();
    tracer.start_from_address(0x4000);

    // Fifty instructions ahead of the start condition: nothing gets
    // instrumented and no hook fires.
    for i in 0..50 {
        assert!(!tracer.instrument(0x3000 + i * 4, 1));
    }
    assert!(dispatcher.log.lock().unwrap().is_empty());
    assert!(engine.disassembled.lock().unwrap().is_empty());

    // The start address unlocks the analysis on the calling thread.
    assert!(tracer.instrument(0x4000, 1));
    assert!(tracer.instrument(0x4004, 1));

    execute(&tracer, 0x4004, 1);
    assert_eq!(dispatcher.hooks("before"), vec![0x4004]);
    assert_eq!(dispatcher.hooks("after"), vec![0x4004]);
    assert_eq!(*engine.disassembled.lock().unwrap(), vec![0x4004]);
}

#[test]
fn wrong_thread_is_gated() {
    let (tracer, _, engine, dispatcher) = tracer();
    tracer.start_from_address(0x4000);
    assert!(tracer.instrument(0x4000, 1));

    execute(&tracer, 0x4000, 2);
    // The pre-processing hook runs unconditionally; nothing else does.
    assert_eq!(dispatcher.hooks("pre"), vec![2]);
    assert!(dispatcher.hooks("before").is_empty());
    assert!(dispatcher.hooks("after").is_empty());
    assert!(engine.disassembled.lock().unwrap().is_empty());
}

#[test]
fn reads_reach_the_engine_before_write_preimages() {
    let (tracer, host, engine, _) = tracer();
    tracer.start_from_address(0x1000);
    assert!(tracer.instrument(0x1000, 1));

    host.poke(0x2000, &[0x44, 0x33, 0x22, 0x11]);

    // The host reports the write pre-image ahead of the read; the
    // instruction must still see the read first.
    tracer
        .save_memory_access(0x1000, 0x2000, 4, AccessKind::Write)
        .unwrap();
    tracer
        .save_memory_access(0x1000, 0x2000, 4, AccessKind::Read)
        .unwrap();
    execute(&tracer, 0x1000, 1);

    let built = engine.built.lock().unwrap();
    let accesses = &built[0].1;
    assert_eq!(accesses.len(), 2);
    assert_eq!(accesses[0].kind(), AccessKind::Read);
    assert_eq!(accesses[0].value(), 0x11223344);
    assert_eq!(accesses[1].kind(), AccessKind::Write);

    // Accesses are consumed by semantics building: the next execution
    // starts with none.
    drop(built);
    execute(&tracer, 0x1000, 1);
    let built = engine.built.lock().unwrap();
    assert!(built[1].1.is_empty());
}

#[test]
fn snapshot_scenario_restores_overwritten_bytes() {
    let (tracer, host, _, dispatcher) = tracer();
    tracer.start_from_address(0x1000);
    assert!(tracer.instrument(0x1000, 1));

    // The script takes a snapshot at the first before hook.
    MockDispatcher::script(&dispatcher.before, vec![Request::TakeSnapshot]);
    execute(&tracer, 0x1000, 1);

    // A 4-byte write of 0xAAAAAAAA at 0x1000 over zeroes, pre-write hook
    // first, as the host fires it.
    tracer.snapshot_capture(0x1000, 4).unwrap();
    host.poke(0x1000, &[0xaa, 0xaa, 0xaa, 0xaa]);

    // The script requests a restore from the next after hook.
    MockDispatcher::script(&dispatcher.after, vec![Request::RestoreSnapshot]);
    execute(&tracer, 0x1000, 1);

    assert_eq!(host.peek(0x1000, 4), vec![0, 0, 0, 0]);
}

#[test]
fn snapshot_restore_is_first_write_wins() {
    let (tracer, host, _, dispatcher) = tracer();
    tracer.start_from_address(0x1000);
    assert!(tracer.instrument(0x1000, 1));

    host.poke(0x1000, &[0x11]);
    MockDispatcher::script(&dispatcher.pre, vec![Request::TakeSnapshot]);
    execute(&tracer, 0x1000, 1);

    tracer.snapshot_capture(0x1000, 1).unwrap();
    host.poke(0x1000, &[0x22]);
    tracer.snapshot_capture(0x1000, 1).unwrap();
    host.poke(0x1000, &[0x33]);

    MockDispatcher::script(&dispatcher.after, vec![Request::RestoreSnapshot]);
    execute(&tracer, 0x1000, 1);

    assert_eq!(host.peek(0x1000, 1), vec![0x11]);
}

#[test]
fn locked_snapshot_captures_nothing() {
    let (tracer, host, _, dispatcher) = tracer();
    tracer.start_from_address(0x1000);
    assert!(tracer.instrument(0x1000, 1));

    MockDispatcher::script(
        &dispatcher.pre,
        vec![Request::TakeSnapshot, Request::LockSnapshot],
    );
    execute(&tracer, 0x1000, 1);

    tracer.snapshot_capture(0x1000, 1).unwrap();
    host.poke(0x1000, &[0x77]);

    MockDispatcher::script(&dispatcher.after, vec![Request::RestoreSnapshot]);
    execute(&tracer, 0x1000, 1);

    // Nothing was recorded, so the write survives the restore.
    assert_eq!(host.peek(0x1000, 1), vec![0x77]);
}

#[test]
fn context_override_skips_semantics_and_the_before_hook() {
    let (tracer, host, engine, dispatcher) = tracer();
    tracer.start_from_address(0x1000);
    assert!(tracer.instrument(0x1000, 1));

    let mut forced = RegisterState::new();
    forced.set("rip", 0x2000);
    MockDispatcher::script(
        &dispatcher.before_ir,
        vec![Request::QueueContext(forced.clone())],
    );

    execute(&tracer, 0x1000, 1);

    // The override was applied to the live thread state.
    let (thread, applied) = host.applied().unwrap();
    assert_eq!(thread, 1);
    assert_eq!(applied.get("rip"), Some(0x2000));

    // Semantics building and the before hook were short-circuited.
    assert!(engine.built.lock().unwrap().is_empty());
    assert!(dispatcher.hooks("before").is_empty());
    assert_eq!(dispatcher.hooks("before_ir"), vec![0x1000]);

    // The next execution is back to normal.
    execute(&tracer, 0x1000, 1);
    assert_eq!(engine.built.lock().unwrap().len(), 1);
    assert_eq!(dispatcher.hooks("before"), vec![0x1000]);
}

#[test]
fn externally_queued_override_suppresses_before_ir_once() {
    let (tracer, _, _, dispatcher) = tracer();
    tracer.start_from_address(0x1000);
    assert!(tracer.instrument(0x1000, 1));

    // A syscall hook queues an override between two instructions.
    MockDispatcher::script(
        &dispatcher.syscall,
        vec![Request::QueueContext(RegisterState::new())],
    );
    tracer.syscall_entry(1, RegisterState::new()).unwrap();

    execute(&tracer, 0x1000, 1);
    execute(&tracer, 0x1000, 1);

    // The first execution swallowed the pending override in place of its
    // before-IR hook; the second ran it again.
    assert_eq!(dispatcher.hooks("before_ir"), vec![0x1000]);
    assert_eq!(dispatcher.hooks("before"), vec![0x1000, 0x1000]);
}

#[test]
fn blacklisted_image_is_never_instrumented() {
    let (tracer, _, _, _) = tracer();
    tracer.blacklist_image("libfoo");
    tracer.whitelist_image("libfoo");
    tracer.whitelist_image("target");
    tracer.start_from_address(0x401000);

    tracer.image_load(Image::new("/bin/target", 0x400000, 0x10000, 0x400100, vec![]));
    tracer.image_load(Image::new("/lib/libfoo.so", 0x700000, 0x10000, 0x700100, vec![]));

    assert!(tracer.instrument(0x401000, 1));
    // Blacklist beats the whitelist match on the same path.
    assert!(!tracer.instrument(0x700200, 1));
    // Permitted image, trigger already on.
    assert!(tracer.instrument(0x402000, 1));
}

#[test]
fn symbol_start_condition_unlocks_at_the_symbol() {
    let (tracer, _, _, dispatcher) = tracer();
    tracer.start_from_symbol("main");

    let plan = tracer.image_load(Image::new(
        "/bin/target",
        0x400000,
        0x10000,
        0x400100,
        vec![Symbol::new("main", 0x401000)],
    ));
    assert_eq!(plan.analysis_routine(), Some(0x401000));
    assert_eq!(dispatcher.hooks("image"), vec![0x400000]);

    assert!(!tracer.instrument(0x400500, 1));
    assert!(tracer.instrument(0x401000, 1));
}

#[test]
fn routine_hooks_resolve_and_route() {
    let (tracer, _, _, dispatcher) = tracer();
    tracer.start_from_address(0x401000);
    tracer.register_routine_entry("malloc", RoutineHandle::new(7));
    tracer.register_routine_entry("missing", RoutineHandle::new(9));

    let plan = tracer.image_load(Image::new(
        "/bin/target",
        0x400000,
        0x10000,
        0x400100,
        vec![Symbol::new("malloc", 0x403000)],
    ));
    // The unresolvable name is silently skipped.
    assert_eq!(plan.routines().len(), 1);

    assert!(tracer.instrument(0x401000, 1));
    tracer
        .routine_entry(1, RegisterState::new(), RoutineHandle::new(7))
        .unwrap();
    // Wrong thread: gated.
    tracer
        .routine_entry(2, RegisterState::new(), RoutineHandle::new(7))
        .unwrap();
    assert_eq!(dispatcher.hooks("routine"), vec![7]);
}

#[test]
fn signal_without_restore_terminates() {
    let (tracer, _, _, dispatcher) = tracer();
    let action = tracer.signal(1, 11, RegisterState::new()).unwrap();
    assert_eq!(action, SignalAction::Terminate);
    // Signals route even with the trigger off.
    assert_eq!(dispatcher.hooks("signal"), vec![11]);
}

#[test]
fn signal_with_restore_resumes() {
    let (tracer, host, _, dispatcher) = tracer();
    tracer.start_from_address(0x1000);
    assert!(tracer.instrument(0x1000, 1));

    MockDispatcher::script(&dispatcher.pre, vec![Request::TakeSnapshot]);
    execute(&tracer, 0x1000, 1);

    tracer.snapshot_capture(0x1000, 1).unwrap();
    host.poke(0x1000, &[0xff]);

    MockDispatcher::script(&dispatcher.on_signal, vec![Request::RestoreSnapshot]);
    let action = tracer.signal(1, 11, RegisterState::new()).unwrap();
    assert_eq!(action, SignalAction::Resume);
    assert_eq!(host.peek(0x1000, 1), vec![0x00]);
}

#[test]
fn events_route_through_the_closed_interface() {
    use crate::tracer::{Event, Outcome};

    let (tracer, _, _, dispatcher) = tracer();
    tracer.start_from_address(0x4000);

    let outcome = tracer
        .dispatch(Event::ImageLoad(Image::new(
            "/bin/target",
            0x400000,
            0x10000,
            0x400100,
            vec![],
        )))
        .unwrap();
    assert_eq!(outcome, Outcome::Plan(ImagePlan::default()));

    assert!(tracer.instrument(0x4000, 1));
    let outcome = tracer
        .dispatch(Event::InstructionBefore {
            address: 0x4000,
            opcodes: vec![0x90],
            thread: 1,
            registers: RegisterState::new(),
        })
        .unwrap();
    assert_eq!(outcome, Outcome::Continue);
    assert_eq!(dispatcher.hooks("before"), vec![0x4000]);

    let outcome = tracer
        .dispatch(Event::Signal {
            thread: 1,
            signum: 4,
            registers: RegisterState::new(),
        })
        .unwrap();
    assert_eq!(outcome, Outcome::Terminate);
}

#[test]
fn fini_routes_once() {
    let (tracer, _, _, dispatcher) = tracer();
    tracer.fini();
    tracer.fini();
    assert_eq!(dispatcher.hooks("fini"), vec![0]);
}
