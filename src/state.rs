//! Application state: the flows, the persistence store, live sessions and the catalog.
//!
//! Sessions live in memory while a client uses them; what outlives the process
//! (chat history, progress) goes through the store, so reopening a known id
//! after a restart picks up where the learner left off.
//!
//! A live session is shared by every socket and HTTP client using its id.
//! Sockets hold it explicitly; HTTP use only refreshes `last_seen`. The idle
//! sweeper evicts sessions with no socket attached once they go quiet.

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::catalog::Catalog;
use crate::flows::Flows;
use crate::session::{check_session_id, InvalidSessionId, Session};
use crate::store::KvStore;

struct LiveSession {
    session: Arc<Session>,
    sockets: usize,
    last_seen: Instant,
}

pub struct AppState {
    pub flows: Arc<Flows>,
    pub store: Arc<dyn KvStore>,
    pub catalog: Catalog,
    sessions: RwLock<HashMap<String, LiveSession>>,
}

impl AppState {
    pub fn new(flows: Flows, store: Arc<dyn KvStore>, catalog: Catalog) -> Self {
        info!(
            target: "codegym_backend",
            paths = catalog.paths.len(),
            topics = catalog.topic_count(),
            "Application state ready"
        );
        Self {
            flows: Arc::new(flows),
            store,
            catalog,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the live session for `id`, or open one (resuming persisted data).
    #[instrument(level = "info", skip(self))]
    pub async fn open_session(&self, id: Option<String>) -> Result<Arc<Session>, InvalidSessionId> {
        self.acquire(id, false).await
    }

    /// Like `open_session`, and counts the caller as a holder until `detach_session`.
    #[instrument(level = "info", skip(self))]
    pub async fn attach_session(&self, id: Option<String>) -> Result<Arc<Session>, InvalidSessionId> {
        self.acquire(id, true).await
    }

    async fn acquire(&self, id: Option<String>, socket: bool) -> Result<Arc<Session>, InvalidSessionId> {
        let id = id.filter(|s| !s.trim().is_empty());
        if let Some(id) = id.as_deref() {
            check_session_id(id)?;
        }
        let mut sessions = self.sessions.write().await;
        if let Some(live) = id.as_deref().and_then(|id| sessions.get_mut(id)) {
            debug!(target: "session", id = %live.session.id(), socket, "Reusing live session");
            live.last_seen = Instant::now();
            live.sockets += usize::from(socket);
            return Ok(live.session.clone());
        }
        let session = Session::open(id, self.flows.clone(), self.store.clone());
        sessions.insert(
            session.id().to_string(),
            LiveSession { session: session.clone(), sockets: usize::from(socket), last_seen: Instant::now() },
        );
        Ok(session)
    }

    /// Live session by id. Counts as activity for idle expiry.
    pub async fn session(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let live = sessions.get_mut(id)?;
        live.last_seen = Instant::now();
        Some(live.session.clone())
    }

    /// A socket let go of the session. It stays live for other holders and
    /// until the idle sweep; persisted data is kept either way.
    #[instrument(level = "info", skip(self))]
    pub async fn detach_session(&self, id: &str) {
        if let Some(live) = self.sessions.write().await.get_mut(id) {
            live.sockets = live.sockets.saturating_sub(1);
            live.last_seen = Instant::now();
            debug!(target: "session", %id, sockets = live.sockets, "Socket detached");
        }
    }

    /// Evict sessions with no socket attached that have been quiet for `idle`.
    pub async fn sweep_idle(&self, idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, live| live.sockets > 0 || live.last_seen.elapsed() < idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(target: "session", evicted, remaining = sessions.len(), "Idle sessions evicted");
        }
        evicted
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Run `sweep_idle` every `every` for as long as the state is alive.
pub fn spawn_idle_sweeper(state: Arc<AppState>, idle: Duration, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        loop {
            ticks.tick().await;
            state.sweep_idle(idle).await;
        }
    })
}
