//! Routing of DBI-level events into the user-callback dispatcher.

use crate::context::RegisterState;
use crate::dispatch::{Dispatcher, RoutineHandle};
use crate::engine::SymbolicEngine;
use crate::host::Host;
use crate::image::Image;
use crate::session::ImagePlan;
use crate::tracer::{Inner, SignalAction};
use crate::{Error, ThreadId};

impl<H: Host, E: SymbolicEngine, D: Dispatcher> Inner<H, E, D> {
    /// Route an image load. Never gated: images must be tracked before the
    /// analysis starts for symbol and offset resolution to work later.
    pub(crate) fn image_load(&mut self, image: Image) -> ImagePlan {
        info!("image {} loaded", image);
        let path = image.path().to_string();
        let base = image.base();
        let size = image.size();
        let plan = self.session.image_loaded(image);
        self.dispatcher.image_load(&path, base, size);
        plan
    }

    /// Route a routine entry or exit.
    pub(crate) fn routine(
        &mut self,
        thread: ThreadId,
        registers: RegisterState,
        handle: RoutineHandle,
    ) -> Result<(), Error> {
        if !self.session.analyzed(thread) {
            return Ok(());
        }
        self.session.context_mut().update(registers);
        let requests = self.dispatcher.routine(thread, handle);
        self.apply_requests(requests);
        Ok(())
    }

    /// Route a syscall entry or exit.
    pub(crate) fn syscall(
        &mut self,
        thread: ThreadId,
        registers: RegisterState,
        entry: bool,
    ) -> Result<(), Error> {
        if !self.session.analyzed(thread) {
            return Ok(());
        }
        self.session.context_mut().update(registers);
        let requests = if entry {
            self.dispatcher.syscall_entry(thread)
        } else {
            self.dispatcher.syscall_exit(thread)
        };
        self.apply_requests(requests);
        Ok(())
    }

    /// Route a signal. Never gated: a crash can happen before the analysis
    /// starts. Unless the user hook requested a restore, the process must
    /// terminate.
    pub(crate) fn signal(
        &mut self,
        thread: ThreadId,
        signum: i32,
        registers: RegisterState,
    ) -> Result<SignalAction, Error> {
        warn!("signal {} on thread {}", signum, thread);
        self.session.context_mut().update(registers);
        let requests = self.dispatcher.signal(thread, signum);
        self.apply_requests(requests);

        if self.session.snapshot().must_be_restored() {
            self.restore(thread)?;
            return Ok(SignalAction::Resume);
        }
        Ok(SignalAction::Terminate)
    }

    /// Route the program-end event, exactly once.
    pub(crate) fn fini(&mut self) {
        if self.session.finished() {
            return;
        }
        self.session.set_finished();
        self.dispatcher.fini();
    }
}
