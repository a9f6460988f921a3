//! TurnRunner – convenience wrapper that serializes turns per user before handing them to the
//! [`Orchestrator`].
//!
//! The orchestrator itself assumes nobody else touches a user's state while a turn is in
//! flight. Two requests for the same user arriving together would otherwise both load the
//! same state and the later save would silently drop the earlier one's changes. The runner
//! keeps one async mutex per user id; turns for distinct users never wait on each other.
//!
//! Locks are created on demand and dropped again once no turn for that user is pending, so
//! the lock table only holds users with in-flight turns.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    error::Result,
    orchestrator::{Orchestrator, TurnOutcome},
    task::Turn,
};

/// High-level helper that runs one turn at a time per user.
#[derive(Clone)]
pub struct TurnRunner {
    orchestrator: Arc<Orchestrator>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TurnRunner {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Execute a full turn, including any auto-chained tasks, under the user's lock.
    pub async fn run(&self, turn: Turn) -> Result<TurnOutcome> {
        let user_id = turn.user_id.clone();
        let lock = self
            .locks
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let outcome = {
            let _guard = lock.lock().await;
            self.orchestrator.route(&turn).await
        };

        drop(lock);
        self.locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);

        outcome
    }

    /// Users with a turn currently running or waiting
    pub fn active_users(&self) -> usize {
        self.locks.len()
    }
}
