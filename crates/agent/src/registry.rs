use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use docwright_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use docwright_core::domain::session::{Session, SessionId};
use docwright_core::errors::SessionError;
use docwright_core::flows::{
    DocumentSessionFlow, FlowContext, FlowEngine, SessionEvent, SessionState,
};
use tokio::sync::{Mutex as SessionLock, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type SessionHandle = Arc<SessionLock<Session>>;

const DEFAULT_TOMBSTONE_CAPACITY: usize = 10_000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<SessionId>,
    pub skipped_busy: usize,
}

#[derive(Default)]
struct Tombstones {
    order: VecDeque<SessionId>,
    members: HashSet<SessionId>,
}

impl Tombstones {
    fn insert(&mut self, id: SessionId, capacity: usize) {
        if !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

/// Owns every live session. Each session sits behind its own async lock so
/// operations on one session are totally ordered while unrelated sessions
/// proceed in parallel. Expired sessions leave a bounded tombstone so late
/// callers see `SessionExpired` rather than `SessionNotFound`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    tombstones: Mutex<Tombstones>,
    tombstone_capacity: usize,
    ttl: Duration,
    flow: FlowEngine<DocumentSessionFlow>,
    audit: Arc<dyn AuditSink>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_tombstone_capacity(ttl, audit, DEFAULT_TOMBSTONE_CAPACITY)
    }

    pub fn with_tombstone_capacity(
        ttl: Duration,
        audit: Arc<dyn AuditSink>,
        tombstone_capacity: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tombstones: Mutex::new(Tombstones::default()),
            tombstone_capacity,
            ttl,
            flow: FlowEngine::default(),
            audit,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create(&self, session: Session) -> SessionHandle {
        let id = session.id.clone();
        let handle = Arc::new(SessionLock::new(session));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionHandle, SessionError> {
        let found = self.sessions.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned();
        match found {
            Some(handle) => Ok(handle),
            None if self.is_tombstoned(id) => {
                Err(SessionError::SessionExpired { session_id: id.to_string() })
            }
            None => Err(SessionError::SessionNotFound { session_id: id.to_string() }),
        }
    }

    pub fn delete(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner).remove(id)
    }

    /// Acquires the session's exclusive lock. A session idle past the TTL is
    /// expired on the spot and reported as `SessionExpired`.
    pub async fn checkout(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<OwnedMutexGuard<Session>, SessionError> {
        let handle = self.get(id)?;
        let mut session = handle.lock_owned().await;

        if session.state() == SessionState::Expired {
            return Err(SessionError::SessionExpired { session_id: id.to_string() });
        }
        if self.is_stale(&session, now) {
            self.expire(&mut session, "checkout");
            return Err(SessionError::SessionExpired { session_id: id.to_string() });
        }
        Ok(session)
    }

    /// Removes sessions idle past the TTL. Sessions whose lock is held are
    /// skipped and revisited on the next pass.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let handles: Vec<(SessionId, SessionHandle)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();

        let mut report = SweepReport::default();
        for (id, handle) in handles {
            let Ok(mut session) = handle.try_lock() else {
                report.skipped_busy += 1;
                continue;
            };
            if session.state() == SessionState::Expired || self.is_stale(&session, now) {
                self.expire(&mut session, "sweep");
                report.evicted.push(id);
            }
        }

        if !report.evicted.is_empty() || report.skipped_busy > 0 {
            info!(
                event_name = "registry.sweep.completed",
                evicted = report.evicted.len(),
                skipped_busy = report.skipped_busy,
                remaining = self.len(),
                "session sweep completed"
            );
        }
        report
    }

    /// Runs [`SessionRegistry::sweep`] on a fixed interval until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = self.sweep(Utc::now());
                debug!(
                    event_name = "registry.sweep.tick",
                    evicted = report.evicted.len(),
                    "sweeper tick"
                );
            }
        })
    }

    fn is_stale(&self, session: &Session, now: DateTime<Utc>) -> bool {
        match (now - session.last_activity).to_std() {
            Ok(idle) => idle > self.ttl,
            Err(_) => false,
        }
    }

    fn is_tombstoned(&self, id: &SessionId) -> bool {
        self.tombstones.lock().unwrap_or_else(PoisonError::into_inner).members.contains(id)
    }

    /// Caller holds the session lock.
    fn expire(&self, session: &mut Session, trigger: &'static str) {
        let audit = AuditContext::new(
            Some(session.id.clone()),
            Some(session.doc_type_id.clone()),
            format!("sweep-{}", session.id),
            "session-registry",
        );

        if session.state() != SessionState::Expired {
            let applied = self
                .flow
                .apply_with_audit(
                    &session.state(),
                    &SessionEvent::TtlElapsed,
                    &FlowContext::default(),
                    self.audit.as_ref(),
                    &audit,
                )
                .map_err(|error| error.to_string())
                .and_then(|outcome| {
                    session.apply_transition(outcome).map_err(|error| error.to_string())
                });
            if let Err(error) = applied {
                warn!(
                    event_name = "registry.expire.transition_failed",
                    session_id = %session.id,
                    error = %error,
                    "could not record expiry transition"
                );
            }
        }

        self.delete(&session.id);
        self.tombstones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), self.tombstone_capacity);

        self.audit.emit(
            AuditEvent::new(
                &audit,
                "registry.session_evicted",
                AuditCategory::Registry,
                AuditOutcome::Success,
            )
            .with_metadata("trigger", trigger),
        );
        info!(
            event_name = "registry.session.evicted",
            session_id = %session.id,
            doc_type = %session.doc_type_id,
            trigger,
            "session expired"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use docwright_core::audit::InMemoryAuditSink;
    use docwright_core::domain::session::{Session, SessionId};
    use docwright_core::errors::SessionError;
    use docwright_core::flows::SessionState;

    use super::SessionRegistry;

    fn registry(sink: &InMemoryAuditSink) -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(60), Arc::new(sink.clone()))
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let registry = registry(&InMemoryAuditSink::default());
        let error = registry.get(&SessionId("missing".to_string())).err().expect("not found");
        assert!(matches!(error, SessionError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions_and_leaves_tombstones() {
        let sink = InMemoryAuditSink::default();
        let registry = registry(&sink);
        let now = Utc::now();
        let idle = SessionId("idle".to_string());
        let fresh = SessionId("fresh".to_string());
        registry.create(Session::new(idle.clone(), "nda", now - TimeDelta::seconds(120)));
        registry.create(Session::new(fresh.clone(), "nda", now));

        let report = registry.sweep(now);
        assert_eq!(report.evicted, vec![idle.clone()]);
        assert_eq!(registry.len(), 1);

        let error = registry.checkout(&idle, now).await.err().expect("expired");
        assert!(matches!(error, SessionError::SessionExpired { .. }));
        assert!(registry.checkout(&fresh, now).await.is_ok());
        assert_eq!(sink.events_of_type("registry.session_evicted").len(), 1);
        assert_eq!(sink.events_of_type("flow.transition_applied").len(), 1);
    }

    #[tokio::test]
    async fn sweep_skips_sessions_that_are_mid_operation() {
        let registry = registry(&InMemoryAuditSink::default());
        let now = Utc::now();
        let id = SessionId("busy".to_string());
        let handle =
            registry.create(Session::new(id.clone(), "nda", now - TimeDelta::seconds(120)));

        let guard = handle.lock().await;
        let report = registry.sweep(now);
        assert!(report.evicted.is_empty());
        assert_eq!(report.skipped_busy, 1);
        drop(guard);

        let report = registry.sweep(now);
        assert_eq!(report.evicted, vec![id]);
    }

    #[tokio::test]
    async fn stale_session_expires_on_checkout() {
        let registry = registry(&InMemoryAuditSink::default());
        let now = Utc::now();
        let id = SessionId("stale".to_string());
        let handle =
            registry.create(Session::new(id.clone(), "nda", now - TimeDelta::seconds(61)));

        let error = registry.checkout(&id, now).await.err().expect("expired");
        assert!(matches!(error, SessionError::SessionExpired { .. }));
        assert_eq!(handle.lock().await.state(), SessionState::Expired);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn tombstones_are_bounded() {
        let registry = SessionRegistry::with_tombstone_capacity(
            Duration::from_secs(1),
            Arc::new(InMemoryAuditSink::default()),
            2,
        );
        let now = Utc::now();
        for name in ["a", "b", "c"] {
            registry.create(Session::new(
                SessionId(name.to_string()),
                "nda",
                now - TimeDelta::seconds(10),
            ));
        }
        assert_eq!(registry.sweep(now).evicted.len(), 3);

        let expired = ["a", "b", "c"]
            .iter()
            .filter(|name| {
                matches!(
                    registry.get(&SessionId(name.to_string())),
                    Err(SessionError::SessionExpired { .. })
                )
            })
            .count();
        assert_eq!(expired, 2);
    }
}
