use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;

use crate::factory::SessionFactory;
use crate::session::{SessionOutcome, SessionStatus};

/// A session running in its own task
pub struct SessionHandle {
    /// Fire (or drop) to stop the session
    pub stop: oneshot::Sender<()>,
    /// Latest status published by the session
    pub status: watch::Receiver<SessionStatus>,
    /// Resolves to the outcome once the session has torn down
    pub task: JoinHandle<SessionOutcome>,
}

/// Running sessions plus the ids of sessions still starting
///
/// An id is reserved before the (slow) start and only then turned into a
/// running handle, so two requests for the same id can't both start.
#[derive(Default)]
pub struct SessionRegistry {
    running: HashMap<String, SessionHandle>,
    starting: HashSet<String>,
}

impl SessionRegistry {
    /// Claim `id` for a session about to start. False if it is taken.
    pub fn reserve(&mut self, id: &str) -> bool {
        if self.running.contains_key(id) || self.starting.contains(id) {
            return false;
        }
        self.starting.insert(id.to_string());
        true
    }

    /// Give up a reservation whose session failed to start
    pub fn release(&mut self, id: &str) {
        self.starting.remove(id);
    }

    /// Turn a reservation into a running session
    pub fn insert(&mut self, id: String, handle: SessionHandle) {
        self.starting.remove(&id);
        self.running.insert(id, handle);
    }

    pub fn remove(&mut self, id: &str) -> Option<SessionHandle> {
        self.running.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&SessionHandle> {
        self.running.get(id)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Latest status of every running session, ordered by id
    pub fn statuses(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> = self
            .running
            .values()
            .map(|handle| handle.status.borrow().clone())
            .collect();
        statuses.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        statuses
    }

    /// Forget sessions whose task has already finished. Returns their ids.
    pub fn prune_finished(&mut self) -> Vec<String> {
        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, handle)| handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &finished {
            self.running.remove(id);
        }
        finished
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Live interview sessions (session_id → handle)
    pub sessions: Arc<RwLock<SessionRegistry>>,
    /// Builds sessions from the service configuration
    pub factory: Arc<SessionFactory>,
}

impl AppState {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(SessionRegistry::default())),
            factory: Arc::new(factory),
        }
    }
}
