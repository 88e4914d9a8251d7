//! The gate that decides whether instrumentation callbacks do analysis work.

/// A process-wide boolean gate.
///
/// While the trigger is off, instrumentation callbacks return without
/// touching concrete or symbolic state. The trigger is only ever flipped
/// inside the tracer's protected region, either by a start-condition match
/// or by explicit begin/end bracketing around a designated routine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Trigger {
    state: bool,
}

impl Trigger {
    /// Create a new trigger, initially off.
    pub fn new() -> Trigger {
        Trigger { state: false }
    }

    /// Get the current state of this trigger.
    pub fn state(&self) -> bool {
        self.state
    }

    /// Set the state of this trigger.
    pub fn update(&mut self, state: bool) {
        self.state = state;
    }
}
