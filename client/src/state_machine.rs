//! Finite-state machine with deferred transitions
//!
//! Hooks are plain function pointers receiving the machine's context and the
//! transition queue. A `goto` issued from any hook is only recorded; the
//! queue is drained at the top of the next [`StateMachine::update`], where
//! the most recent target wins.

use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("no state registered under key {0}")]
    UnknownState(String),

    #[error("a state is already registered under key {0}")]
    DuplicateState(String),
}

pub type Hook<K, C> = fn(&mut C, &mut Transitions<K>);

pub struct State<K, C> {
    key: K,
    on_start: Option<Hook<K, C>>,
    on_update: Option<Hook<K, C>>,
    on_late_update: Option<Hook<K, C>>,
    on_fixed_update: Option<Hook<K, C>>,
    on_end: Option<Hook<K, C>>,
}

impl<K: Copy, C> State<K, C> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            on_start: None,
            on_update: None,
            on_late_update: None,
            on_fixed_update: None,
            on_end: None,
        }
    }

    pub fn key(&self) -> K {
        self.key
    }

    pub fn on_start(mut self, hook: Hook<K, C>) -> Self {
        self.on_start = Some(hook);
        self
    }

    pub fn on_update(mut self, hook: Hook<K, C>) -> Self {
        self.on_update = Some(hook);
        self
    }

    pub fn on_late_update(mut self, hook: Hook<K, C>) -> Self {
        self.on_late_update = Some(hook);
        self
    }

    pub fn on_fixed_update(mut self, hook: Hook<K, C>) -> Self {
        self.on_fixed_update = Some(hook);
        self
    }

    pub fn on_end(mut self, hook: Hook<K, C>) -> Self {
        self.on_end = Some(hook);
        self
    }
}

/// Pending transition requests, handed to every hook.
#[derive(Debug)]
pub struct Transitions<K> {
    known: Vec<K>,
    queue: Vec<K>,
}

impl<K: Copy + Eq + Debug> Transitions<K> {
    fn new() -> Self {
        Self {
            known: Vec::new(),
            queue: Vec::new(),
        }
    }

    /// Requests a transition to `key` at the top of the next update.
    pub fn goto(&mut self, key: K) -> Result<(), StateMachineError> {
        if !self.known.contains(&key) {
            return Err(StateMachineError::UnknownState(format!("{:?}", key)));
        }

        self.queue.push(key);
        Ok(())
    }

    /// Target that will take effect next, if any.
    pub fn pending(&self) -> Option<K> {
        self.queue.last().copied()
    }

    fn take(&mut self) -> Option<K> {
        let next = self.queue.pop();
        self.queue.clear();
        next
    }
}

pub struct StateMachine<K, C> {
    states: Vec<State<K, C>>,
    current: Option<usize>,
    transitions: Transitions<K>,
}

impl<K: Copy + Eq + Debug, C> StateMachine<K, C> {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            current: None,
            transitions: Transitions::new(),
        }
    }

    pub fn add_state(&mut self, state: State<K, C>) -> Result<(), StateMachineError> {
        if self.transitions.known.contains(&state.key) {
            return Err(StateMachineError::DuplicateState(format!("{:?}", state.key)));
        }

        self.transitions.known.push(state.key);
        self.states.push(state);
        Ok(())
    }

    pub fn goto(&mut self, key: K) -> Result<(), StateMachineError> {
        self.transitions.goto(key)
    }

    pub fn transitions_mut(&mut self) -> &mut Transitions<K> {
        &mut self.transitions
    }

    pub fn current(&self) -> Option<K> {
        self.current.map(|index| self.states[index].key)
    }

    pub fn pending(&self) -> Option<K> {
        self.transitions.pending()
    }

    /// Applies the pending transition, then runs the current state's
    /// update hook.
    pub fn update(&mut self, ctx: &mut C) {
        self.apply_pending(ctx);

        if let Some(hook) = self.current.and_then(|index| self.states[index].on_update) {
            hook(ctx, &mut self.transitions);
        }
    }

    pub fn late_update(&mut self, ctx: &mut C) {
        if let Some(hook) = self.current.and_then(|index| self.states[index].on_late_update) {
            hook(ctx, &mut self.transitions);
        }
    }

    pub fn fixed_update(&mut self, ctx: &mut C) {
        if let Some(hook) = self.current.and_then(|index| self.states[index].on_fixed_update) {
            hook(ctx, &mut self.transitions);
        }
    }

    fn apply_pending(&mut self, ctx: &mut C) {
        let Some(next) = self.transitions.take() else {
            return;
        };
        let Some(next_index) = self.states.iter().position(|state| state.key == next) else {
            return;
        };

        if let Some(hook) = self.current.and_then(|index| self.states[index].on_end) {
            hook(ctx, &mut self.transitions);
        }

        self.current = Some(next_index);

        if let Some(hook) = self.states[next_index].on_start {
            hook(ctx, &mut self.transitions);
        }
    }
}

impl<K: Copy + Eq + Debug, C> Default for StateMachine<K, C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key {
        A,
        B,
        C,
        Missing,
    }

    #[derive(Default)]
    struct Trace {
        calls: Vec<String>,
    }

    fn machine() -> StateMachine<Key, Trace> {
        let mut machine = StateMachine::new();
        machine
            .add_state(
                State::new(Key::A)
                    .on_start(|t: &mut Trace, _| t.calls.push("A.start".into()))
                    .on_update(|t: &mut Trace, _| t.calls.push("A.update".into()))
                    .on_end(|t: &mut Trace, _| t.calls.push("A.end".into())),
            )
            .unwrap();
        machine
            .add_state(
                State::new(Key::B)
                    .on_start(|t: &mut Trace, _| t.calls.push("B.start".into()))
                    .on_update(|t: &mut Trace, _| t.calls.push("B.update".into()))
                    .on_end(|t: &mut Trace, _| t.calls.push("B.end".into())),
            )
            .unwrap();
        machine
            .add_state(
                State::new(Key::C)
                    .on_start(|t: &mut Trace, _| t.calls.push("C.start".into()))
                    .on_update(|t: &mut Trace, _| t.calls.push("C.update".into()))
                    .on_fixed_update(|t: &mut Trace, _| t.calls.push("C.fixed".into()))
                    .on_late_update(|t: &mut Trace, _| t.calls.push("C.late".into())),
            )
            .unwrap();
        machine
    }

    #[test]
    fn test_first_goto_starts_machine_on_next_update() {
        let mut machine = machine();
        let mut trace = Trace::default();

        machine.goto(Key::A).unwrap();
        assert_eq!(machine.current(), None);
        assert_eq!(machine.pending(), Some(Key::A));

        machine.update(&mut trace);
        assert_eq!(machine.current(), Some(Key::A));
        assert_eq!(trace.calls, vec!["A.start", "A.update"]);
    }

    #[test]
    fn test_last_goto_wins() {
        let mut machine = machine();
        let mut trace = Trace::default();
        machine.goto(Key::A).unwrap();
        machine.update(&mut trace);
        trace.calls.clear();

        machine.goto(Key::B).unwrap();
        machine.goto(Key::C).unwrap();
        machine.update(&mut trace);

        assert_eq!(machine.current(), Some(Key::C));
        assert_eq!(trace.calls, vec!["A.end", "C.start", "C.update"]);
    }

    #[test]
    fn test_goto_from_hook_is_deferred() {
        let mut machine: StateMachine<Key, Trace> = StateMachine::new();
        machine
            .add_state(
                State::new(Key::A)
                    .on_update(|t: &mut Trace, next| {
                        t.calls.push("A.update".into());
                        next.goto(Key::B).unwrap();
                    })
                    .on_end(|t: &mut Trace, _| t.calls.push("A.end".into())),
            )
            .unwrap();
        machine
            .add_state(
                State::new(Key::B).on_start(|t: &mut Trace, _| t.calls.push("B.start".into())),
            )
            .unwrap();
        let mut trace = Trace::default();

        machine.goto(Key::A).unwrap();
        machine.update(&mut trace);
        assert_eq!(machine.current(), Some(Key::A));
        assert_eq!(machine.pending(), Some(Key::B));

        machine.update(&mut trace);
        assert_eq!(machine.current(), Some(Key::B));
        assert_eq!(trace.calls, vec!["A.update", "A.end", "B.start"]);
    }

    #[test]
    fn test_unknown_goto_is_rejected_and_queues_nothing() {
        let mut machine = machine();
        let mut trace = Trace::default();
        machine.goto(Key::A).unwrap();
        machine.update(&mut trace);

        let result = machine.goto(Key::Missing);
        assert_eq!(
            result,
            Err(StateMachineError::UnknownState("Missing".to_string()))
        );
        assert_eq!(machine.pending(), None);

        machine.update(&mut trace);
        assert_eq!(machine.current(), Some(Key::A));
    }

    #[test]
    fn test_duplicate_state_is_rejected() {
        let mut machine = machine();
        let result = machine.add_state(State::new(Key::A));
        assert_eq!(
            result,
            Err(StateMachineError::DuplicateState("A".to_string()))
        );
    }

    #[test]
    fn test_fixed_and_late_hooks_only_run_for_current_state() {
        let mut machine = machine();
        let mut trace = Trace::default();

        machine.fixed_update(&mut trace);
        machine.late_update(&mut trace);
        assert!(trace.calls.is_empty());

        machine.goto(Key::C).unwrap();
        machine.update(&mut trace);
        machine.fixed_update(&mut trace);
        machine.late_update(&mut trace);
        assert_eq!(
            trace.calls,
            vec!["C.start", "C.update", "C.fixed", "C.late"]
        );
    }
}
