//! The connection registry owns every live session for the lifetime of
//! the process. All other components mutate session state through it.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use palaver_core::ids::ConnectionId;

/// Identity attached to a session by a successful login. Either all of
/// it is present or none of it; there is no partially authenticated
/// session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The authenticated transition fires at most once per session. The
    /// dispatcher's state machine prevents a second attempt; this is the
    /// registry's own check.
    #[error("session is already authenticated")]
    AlreadyAuthenticated,
    #[error("unknown connection")]
    UnknownConnection,
}

struct Session {
    tx: mpsc::Sender<String>,
    auth: Option<Identity>,
}

/// Registry of all live connections and their session state.
///
/// A single RwLock around the session map makes every mutation and every
/// presence snapshot mutually exclusive: readers never observe a session
/// mid-transition, and `online_usernames` is a consistent point-in-time
/// view.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Session>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create an unauthenticated session for a newly accepted connection.
    pub fn register(&self, tx: mpsc::Sender<String>) -> ConnectionId {
        let id = ConnectionId::new();
        self.sessions
            .write()
            .insert(id.clone(), Session { tx, auth: None });
        id
    }

    /// Transition a session to authenticated. Fires at most once.
    pub fn authenticate(
        &self,
        id: &ConnectionId,
        identity: Identity,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or(RegistryError::UnknownConnection)?;
        if session.auth.is_some() {
            return Err(RegistryError::AlreadyAuthenticated);
        }
        session.auth = Some(identity);
        Ok(())
    }

    /// Remove a session. Idempotent. Returns whether the removed session
    /// was authenticated, so the caller knows a presence recompute is due.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.sessions
            .write()
            .remove(id)
            .map(|s| s.auth.is_some())
            .unwrap_or(false)
    }

    /// Identity of a session, if it is authenticated.
    pub fn identity(&self, id: &ConnectionId) -> Option<Identity> {
        self.sessions.read().get(id).and_then(|s| s.auth.clone())
    }

    /// Deduplicated usernames of all authenticated sessions, sorted
    /// case-insensitively. Consistent even while registrations and
    /// removals race on other tasks.
    pub fn online_usernames(&self) -> Vec<String> {
        let sessions = self.sessions.read();
        let distinct: BTreeSet<String> = sessions
            .values()
            .filter_map(|s| s.auth.as_ref().map(|a| a.username.clone()))
            .collect();
        drop(sessions);

        let mut names: Vec<String> = distinct.into_iter().collect();
        names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
        names
    }

    /// Snapshot of every connection's outbound sender, for broadcast
    /// fan-out.
    pub fn senders(&self) -> Vec<(ConnectionId, mpsc::Sender<String>)> {
        self.sessions
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.tx.clone()))
            .collect()
    }

    /// Queue a payload on one connection. Returns false when the
    /// connection is gone or its outbound queue rejects the send.
    pub fn send_to(&self, id: &ConnectionId, payload: String) -> bool {
        let tx = self.sessions.read().get(id).map(|s| s.tx.clone());
        match tx {
            Some(tx) => tx.try_send(payload).is_ok(),
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
