//! Replication lifecycle state machine.
//!
//! The machine is a pure transition table: no I/O, no side effects. The
//! engine fires triggers and performs the entry/exit work itself, so the
//! table can be tested exhaustively in isolation.

/// The lifecycle state of a replication.
///
/// `Running` is a single state that internally cycles between waiting for
/// changes and processing them; those sub-phases are observable only through
/// triggers and events. A continuously idle replication is still `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationState {
    /// Created, not yet started.
    Initial,
    /// Actively replicating or idle awaiting changes.
    Running,
    /// Network use suspended; can return to `Running`.
    Offline,
    /// Terminal. A stopped replication is never restarted.
    Stopped,
}

/// The inputs a replication state machine responds to.
///
/// Triggers are the sole unit of state-machine input; nothing assigns a
/// state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationTrigger {
    /// Begin change discovery.
    Start,
    /// The change feed is caught up; enter the idle sub-phase.
    WaitingForChanges,
    /// Re-attempt a previously failed batch.
    RetryFailedRevs,
    /// The feed produced a batch of pending changes.
    GotChanges,
    /// The current batch was applied and checkpointed.
    ProcessedChanges,
    /// Suspend network use.
    GoOffline,
    /// Resume from the last committed checkpoint.
    GoOnline,
    /// Drain the in-flight batch, persist its checkpoint, then stop.
    StopGraceful,
    /// Abort in-flight work and stop without draining.
    StopImmediate,
}

/// An accepted state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the trigger.
    pub from: ReplicationState,
    /// State after the trigger.
    pub to: ReplicationState,
    /// Trigger that caused the change.
    pub trigger: ReplicationTrigger,
}

/// The trigger-driven replication state machine.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: ReplicationState,
}

impl StateMachine {
    /// Creates a machine in the `Initial` state.
    pub fn new() -> Self {
        Self {
            current: ReplicationState::Initial,
        }
    }

    /// Returns the current state.
    pub fn current(&self) -> ReplicationState {
        self.current
    }

    /// Fires a trigger.
    ///
    /// Returns the resulting [`Transition`] if the trigger is legal in the
    /// current state. An illegal trigger is a no-op: `None` is returned, the
    /// state is unchanged, and no event should be emitted. Rejection is not
    /// an error.
    pub fn fire(&mut self, trigger: ReplicationTrigger) -> Option<Transition> {
        let to = next_state(self.current, trigger)?;
        let transition = Transition {
            from: self.current,
            to,
            trigger,
        };
        self.current = to;
        Some(transition)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative transition table.
fn next_state(
    state: ReplicationState,
    trigger: ReplicationTrigger,
) -> Option<ReplicationState> {
    use ReplicationState::*;
    use ReplicationTrigger::*;

    match (state, trigger) {
        (Initial, Start) => Some(Running),
        (Running, WaitingForChanges) => Some(Running),
        (Running, GotChanges) => Some(Running),
        (Running, ProcessedChanges) => Some(Running),
        (Running | Offline, RetryFailedRevs) => Some(Running),
        (Running, GoOffline) => Some(Offline),
        (Offline, GoOnline) => Some(Running),
        (Initial | Running | Offline, StopGraceful) => Some(Stopped),
        (Initial | Running | Offline, StopImmediate) => Some(Stopped),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ReplicationState::*;
    use ReplicationTrigger::*;

    const ALL_TRIGGERS: [ReplicationTrigger; 9] = [
        Start,
        WaitingForChanges,
        RetryFailedRevs,
        GotChanges,
        ProcessedChanges,
        GoOffline,
        GoOnline,
        StopGraceful,
        StopImmediate,
    ];

    #[test]
    fn start_is_only_legal_from_initial() {
        let mut machine = StateMachine::new();
        let transition = machine.fire(Start).unwrap();
        assert_eq!(transition.from, Initial);
        assert_eq!(transition.to, Running);

        // Starting twice is rejected.
        assert!(machine.fire(Start).is_none());
        assert_eq!(machine.current(), Running);
    }

    #[test]
    fn running_self_loops_produce_transitions() {
        let mut machine = StateMachine::new();
        machine.fire(Start).unwrap();

        for trigger in [WaitingForChanges, GotChanges, ProcessedChanges, RetryFailedRevs] {
            let transition = machine.fire(trigger).unwrap();
            assert_eq!(transition.from, Running);
            assert_eq!(transition.to, Running);
            assert_eq!(transition.trigger, trigger);
        }
    }

    #[test]
    fn offline_round_trip() {
        let mut machine = StateMachine::new();
        machine.fire(Start).unwrap();

        assert_eq!(machine.fire(GoOffline).unwrap().to, Offline);
        // Batch triggers are illegal while offline.
        assert!(machine.fire(GotChanges).is_none());
        assert!(machine.fire(WaitingForChanges).is_none());
        // But a retry may bring the machine back to running.
        assert_eq!(machine.fire(RetryFailedRevs).unwrap().to, Running);

        machine.fire(GoOffline).unwrap();
        assert_eq!(machine.fire(GoOnline).unwrap().to, Running);
    }

    #[test]
    fn stop_is_legal_from_every_non_terminal_state() {
        for stop in [StopGraceful, StopImmediate] {
            // From Initial.
            let mut machine = StateMachine::new();
            assert_eq!(machine.fire(stop).unwrap().to, Stopped);

            // From Running.
            let mut machine = StateMachine::new();
            machine.fire(Start).unwrap();
            assert_eq!(machine.fire(stop).unwrap().to, Stopped);

            // From Offline.
            let mut machine = StateMachine::new();
            machine.fire(Start).unwrap();
            machine.fire(GoOffline).unwrap();
            assert_eq!(machine.fire(stop).unwrap().to, Stopped);
        }
    }

    #[test]
    fn stopped_is_terminal() {
        let mut machine = StateMachine::new();
        machine.fire(Start).unwrap();
        machine.fire(StopGraceful).unwrap();

        for trigger in ALL_TRIGGERS {
            assert!(machine.fire(trigger).is_none());
            assert_eq!(machine.current(), Stopped);
        }
    }

    #[test]
    fn rejected_triggers_leave_state_unchanged() {
        let mut machine = StateMachine::new();
        // None of these are legal before Start.
        for trigger in [GotChanges, ProcessedChanges, GoOffline, GoOnline, RetryFailedRevs] {
            assert!(machine.fire(trigger).is_none());
            assert_eq!(machine.current(), Initial);
        }
    }

    proptest! {
        /// Any trigger sequence keeps the machine inside the state set, and
        /// every accepted transition agrees with the table.
        #[test]
        fn trigger_sequences_stay_closed(indices in proptest::collection::vec(0usize..9, 0..64)) {
            let mut machine = StateMachine::new();
            for index in indices {
                let trigger = ALL_TRIGGERS[index];
                let before = machine.current();
                match machine.fire(trigger) {
                    Some(transition) => {
                        prop_assert_eq!(transition.from, before);
                        prop_assert_eq!(transition.to, machine.current());
                        prop_assert_eq!(next_state(before, trigger), Some(transition.to));
                    }
                    None => {
                        prop_assert_eq!(machine.current(), before);
                        prop_assert_eq!(next_state(before, trigger), None);
                    }
                }
                prop_assert!(matches!(
                    machine.current(),
                    Initial | Running | Offline | Stopped
                ));
            }
        }
    }
}
