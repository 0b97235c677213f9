// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Table-driven finite state machines.
//!
//! A [FsmTable] maps every `(state, event)` pair to at most one action and next state. A [FsmInstance] binds a
//! current state to one shared table. The primitive itself knows nothing about initial or terminal states: those are
//! encoded by how instances are constructed and by which entries a table omits.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::MAX_FSM_NAME_LEN,
};
use ::std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// States and events carry a printable name for diagnostics.
pub trait FsmLabel: Copy + Eq + Hash + Debug {
    fn name(&self) -> &'static str;
}

/// Work bound to a table entry.
pub enum FsmAction<S, A> {
    /// The transition happens without side effects.
    Ignore,
    /// Runs a callback that observes the pre-transition state and may only touch `A`.
    Call(fn(S, &mut A)),
}

/// One row of a state table.
pub struct FsmEntry<S, E, A> {
    pub state: S,
    pub event: E,
    pub action: FsmAction<S, A>,
    pub next: S,
}

/// Immutable transition table shared by many instances.
pub struct FsmTable<S: FsmLabel, E: FsmLabel, A> {
    name: &'static str,
    entries: HashMap<(S, E), (FsmAction<S, A>, S)>,
}

/// Result of feeding an event into an instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FsmOutcome<S> {
    Transitioned { from: S, to: S },
    Ignored { state: S },
}

/// A named state holder bound to one table.
pub struct FsmInstance<S: FsmLabel, E: FsmLabel, A> {
    name: String,
    state: S,
    table: Rc<FsmTable<S, E, A>>,
    unexpected_events: u64,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl<S, A> FsmAction<S, A> {
    fn run(&self, state: S, args: &mut A) {
        if let FsmAction::Call(f) = self {
            f(state, args);
        }
    }
}

impl<S: FsmLabel, E: FsmLabel, A> FsmEntry<S, E, A> {
    pub fn new(state: S, event: E, action: FsmAction<S, A>, next: S) -> Self {
        Self {
            state,
            event,
            action,
            next,
        }
    }
}

impl<S: FsmLabel, E: FsmLabel, A> FsmTable<S, E, A> {
    /// Builds a table, rejecting any `(state, event)` pair that appears more than once.
    pub fn new(name: &'static str, rows: Vec<FsmEntry<S, E, A>>) -> Result<Self, Fail> {
        let mut entries: HashMap<(S, E), (FsmAction<S, A>, S)> = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: (S, E) = (row.state, row.event);
            if entries.insert(key, (row.action, row.next)).is_some() {
                let cause: String = format!(
                    "ambiguous entry in table {}: state={} event={}",
                    name,
                    key.0.name(),
                    key.1.name()
                );
                error!("new(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            }
        }
        Ok(Self { name, entries })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<S: FsmLabel, E: FsmLabel, A> FsmInstance<S, E, A> {
    /// Creates an instance in `initial` state. Names longer than the diagnostic limit are truncated.
    pub fn new(name: &str, initial: S, table: Rc<FsmTable<S, E, A>>) -> Self {
        let name: String = name.chars().take(MAX_FSM_NAME_LEN).collect();
        Self {
            name,
            state: initial,
            table,
            unexpected_events: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.chars().take(MAX_FSM_NAME_LEN).collect();
    }

    pub fn state(&self) -> S {
        self.state
    }

    /// Number of events that had no entry in the state they arrived in.
    pub fn unexpected_events(&self) -> u64 {
        self.unexpected_events
    }

    /// Dispatches `event` against the current state.
    ///
    /// The bound action runs first and the next state is assigned afterwards, whatever the action did.
    pub fn handle_event(&mut self, event: E, args: &mut A) -> FsmOutcome<S> {
        let from: S = self.state;
        let table: Rc<FsmTable<S, E, A>> = self.table.clone();
        match table.entries.get(&(from, event)) {
            Some((action, next)) => {
                action.run(from, args);
                self.state = *next;
                if from != *next {
                    debug!(
                        target: table.name,
                        "{}: {} --{}--> {}",
                        self.name,
                        from.name(),
                        event.name(),
                        next.name()
                    );
                }
                FsmOutcome::Transitioned { from, to: *next }
            },
            None => {
                self.unexpected_events += 1;
                warn!(
                    target: table.name,
                    "{}: ignoring event {} in state {}",
                    self.name,
                    event.name(),
                    from.name()
                );
                FsmOutcome::Ignored { state: from }
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
