//! # Batched Transaction Service
//!
//! Concurrently initiated logical transactions are grouped into **cycles**:
//! up to `max_concurrent` bodies run at once, and when the last running body
//! of a cycle finishes, the whole cycle commits with a single physical
//! commit. This is optimistic group-commit, not per-transaction isolation —
//! side effects of one body are visible to its cycle siblings.
//!
//! ## Replay
//!
//! If any body in the cycle fails, everything since the last commit is
//! rolled back and **every** body of the cycle is replayed from scratch,
//! sequentially. A body that fails again during replay has its own changes
//! rolled back and its error delivered to its caller; successful bodies
//! deliver their replayed results (not the discarded originals). Bodies
//! must therefore be pure functions of database state — replay-safe and
//! free of external side effects.
//!
//! New transactions are blocked from starting while a cycle is finishing
//! (committing or replaying). No timeouts are provided; a caller that wants
//! one must wrap its own body, and a timed-out-but-running body remains
//! part of its cycle until it resolves. A body that panics poisons its
//! cycle (the cycle never finishes); bodies report failure through `Result`
//! instead.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::database::Database;
use crate::error::{DbError, Result};

type BoxedResult = Result<Box<dyn Any + Send>>;
type Body = Arc<dyn Fn(&Database) -> BoxedResult + Send + Sync>;

struct Member {
    body: Body,
    outcome: Option<BoxedResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accepting and running bodies.
    Open,
    /// Last body finished; the finisher is committing or replaying.
    Finishing,
    /// Outcomes ready; members are collecting them.
    Draining,
}

struct CycleState {
    phase: Phase,
    cycle: u64,
    running: usize,
    members: Vec<Member>,
    departed: usize,
    commit_error: Option<String>,
}

pub struct TxnService {
    state: Mutex<CycleState>,
    cv: Condvar,
    max_concurrent: usize,
}

impl TxnService {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(CycleState {
                phase: Phase::Open,
                cycle: 0,
                running: 0,
                members: Vec::new(),
                departed: 0,
                commit_error: None,
            }),
            cv: Condvar::new(),
            max_concurrent,
        }
    }

    pub fn run<R, F>(&self, db: &Database, body: F) -> Result<R>
    where
        R: Send + 'static,
        F: Fn(&Database) -> Result<R> + Send + Sync + 'static,
    {
        let body: Body =
            Arc::new(move |db| body(db).map(|r| Box::new(r) as Box<dyn Any + Send>));

        // Join the current cycle (or wait for the next one).
        let (my_cycle, my_index) = {
            let mut state = self.state.lock();
            while state.phase != Phase::Open || state.running >= self.max_concurrent {
                self.cv.wait(&mut state);
            }
            state.running += 1;
            state.members.push(Member {
                body: Arc::clone(&body),
                outcome: None,
            });
            (state.cycle, state.members.len() - 1)
        };

        let first_outcome = (body.as_ref())(db);

        let mut state = self.state.lock();
        state.members[my_index].outcome = Some(first_outcome);
        state.running -= 1;

        if state.running == 0 {
            // Last one out finishes the whole cycle.
            state.phase = Phase::Finishing;
            let failed = state
                .members
                .iter()
                .any(|m| matches!(m.outcome, Some(Err(_))));
            let bodies: Vec<Body> = state.members.iter().map(|m| Arc::clone(&m.body)).collect();
            drop(state);

            let mut replayed: Option<Vec<BoxedResult>> = None;
            let mut commit_error = None;
            if failed {
                db.rollback();
                let mut outcomes = Vec::with_capacity(bodies.len());
                for replay_body in &bodies {
                    match (replay_body.as_ref())(db) {
                        Ok(value) => match db.commit() {
                            Ok(_) => outcomes.push(Ok(value)),
                            Err(err) => outcomes.push(Err(err)),
                        },
                        Err(err) => {
                            db.rollback();
                            outcomes.push(Err(err));
                        }
                    }
                }
                replayed = Some(outcomes);
            } else if let Err(err) = db.commit() {
                commit_error = Some(err.to_string());
            }

            state = self.state.lock();
            if let Some(outcomes) = replayed {
                for (member, outcome) in state.members.iter_mut().zip(outcomes) {
                    member.outcome = Some(outcome);
                }
            }
            state.commit_error = commit_error;
            state.phase = Phase::Draining;
            self.cv.notify_all();
        } else {
            while !(state.phase == Phase::Draining && state.cycle == my_cycle) {
                self.cv.wait(&mut state);
            }
        }

        // Collect this member's outcome; the last one out reopens the
        // service for the next cycle.
        let outcome = state.members[my_index].outcome.take();
        let commit_error = state.commit_error.clone();
        state.departed += 1;
        if state.departed == state.members.len() {
            state.members.clear();
            state.departed = 0;
            state.commit_error = None;
            state.cycle += 1;
            state.phase = Phase::Open;
            self.cv.notify_all();
        }
        drop(state);

        match outcome {
            Some(Ok(value)) => {
                if let Some(message) = commit_error {
                    return Err(DbError::Bug(format!("cycle commit failed: {message}")));
                }
                match value.downcast::<R>() {
                    Ok(boxed) => Ok(*boxed),
                    Err(_) => Err(DbError::Bug("transaction result type mismatch".into())),
                }
            }
            Some(Err(err)) => Err(err),
            None => Err(DbError::Bug("transaction outcome missing".into())),
        }
    }
}
