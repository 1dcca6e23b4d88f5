//! Lifecycle state machines
//!
//! `EngineState` and `ModelState` live in watch cells so readers get cheap
//! snapshots and UIs can subscribe to changes. Mutation goes through a
//! [`Transition`], which only accepts legal moves and rolls the cell back if
//! the step is abandoned halfway (future dropped or cancelled).

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::watch;

/// State of the inference engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// State of the served model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelState {
    #[default]
    NotFetched,
    Fetching,
    Fetched,
    Activating,
    Active,
    Failed,
}

/// A state machine with a fixed table of legal moves
pub trait StateMachine: Copy + Debug + PartialEq + Send + Sync + 'static {
    fn can_move_to(self, next: Self) -> bool;
}

impl StateMachine for EngineState {
    fn can_move_to(self, next: Self) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Uninitialized | Failed, Initializing)
                | (Initializing, Ready | Failed | Uninitialized)
        )
    }
}

impl StateMachine for ModelState {
    fn can_move_to(self, next: Self) -> bool {
        use ModelState::*;
        matches!(
            (self, next),
            (NotFetched | Fetched | Failed, Fetching)
                | (NotFetched | Failed, Fetched)
                | (Fetching, Fetched | Failed | NotFetched)
                | (Fetched, Activating)
                | (Activating, Active | Failed | Fetched)
                | (NotFetched | Fetched, Failed)
        )
    }
}

/// Snapshot of both state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub engine: EngineState,
    pub model: ModelState,
}

/// Shared cell holding one state machine
pub(crate) struct StateCell<S: StateMachine> {
    tx: watch::Sender<S>,
}

impl<S: StateMachine> StateCell<S> {
    pub(crate) fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub(crate) fn get(&self) -> S {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Begin a transition into `state`. Dropping the transition without
    /// finishing it restores `rollback`.
    pub(crate) fn begin(&self, state: S, rollback: S) -> Transition<'_, S> {
        let mut transition = Transition {
            cell: self,
            rollback,
            finished: false,
        };
        transition.advance(state, rollback);
        transition
    }

    fn set(&self, next: S) {
        let prev = self.tx.send_replace(next);
        if prev != next && !prev.can_move_to(next) {
            tracing::error!("Illegal state transition {:?} -> {:?}", prev, next);
            debug_assert!(false, "illegal state transition {:?} -> {:?}", prev, next);
        }
    }
}

/// An in-progress move of a [`StateCell`]
pub(crate) struct Transition<'a, S: StateMachine> {
    cell: &'a StateCell<S>,
    rollback: S,
    finished: bool,
}

impl<S: StateMachine> Transition<'_, S> {
    /// Move to an intermediate state, updating where an abandoned step lands
    pub(crate) fn advance(&mut self, state: S, rollback: S) {
        self.cell.set(state);
        self.rollback = rollback;
    }

    /// Settle on a terminal state
    pub(crate) fn finish(mut self, state: S) {
        self.cell.set(state);
        self.finished = true;
    }

    /// Settle on the rollback state
    pub(crate) fn abandon(self) {
        let rollback = self.rollback;
        self.finish(rollback);
    }
}

impl<S: StateMachine> Drop for Transition<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Transition abandoned, rolling back to {:?}", self.rollback);
            self.cell.set(self.rollback);
        }
    }
}
