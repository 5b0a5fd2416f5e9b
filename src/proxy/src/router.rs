//! The session-routing contract: what decides which backend a query goes to,
//! what to do with a client-visible reply, and how to recover from a backend
//! failure.
//!
//! This is distinct from [`crate::backend::router::BackendRouter`], which is
//! a backend-*selection* policy (how to pick one backend instance out of a
//! pool given a load-balancing strategy) — one possible building block a
//! `Router` implementation can use underneath, not the contract itself.

use crate::classifier::Classification;
use crate::error::ProxyError;
use crate::protocol::mysql::packet::Packet;
use crate::session::reply_tracker::ReplyProgress;
use async_trait::async_trait;

/// Identifies a single backend connection a session is (or was) talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRef(pub String);

impl BackendRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub connection_id: u32,
    pub username: String,
    pub database: Option<String>,
}

/// What the router decided to do after a backend-facing error.
#[derive(Debug)]
pub enum Recovery {
    /// Retry on the same backend; the error was transient (e.g. a single
    /// dropped packet on an otherwise healthy connection).
    RetrySame,
    /// Adopt a new backend connection and replay this session's history onto
    /// it before resuming.
    MigrateAndReplay,
    /// Give up and surface the error to the client as-is.
    Fatal(ProxyError),
}

/// A coarse classification of a backend-facing failure, independent of the
/// concrete `ProxyError` variant, so routing policy can be written against a
/// small enum instead of matching every error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

#[async_trait]
pub trait Router: Send + Sync {
    type Session: Send;

    async fn new_session(&self, info: SessionInfo) -> Self::Session;

    async fn route_query(
        &self,
        session: &mut Self::Session,
        buf: &Packet,
        class: &Classification,
    ) -> Result<(), ProxyError>;

    async fn client_reply(
        &self,
        session: &mut Self::Session,
        buf: &Packet,
        progress: ReplyProgress,
        backend: BackendRef,
    ) -> Result<(), ProxyError>;

    async fn handle_error(
        &self,
        session: &mut Self::Session,
        kind: ErrorKind,
        backend: BackendRef,
    ) -> Recovery;

    async fn close_session(&self, session: Self::Session);
}

/// The proxy's default router: one backend pinned for the session's whole
/// lifetime, as already implemented by
/// [`crate::server::haentgl_server::HaentglServer`]'s connect-once flow. It
/// classifies and tracks but never migrates mid-session, since the current
/// pool has no cross-backend replay wiring (see DESIGN.md).
#[derive(Debug, Default, Clone, Copy)]
pub struct PinnedBackendRouter;

#[async_trait]
impl Router for PinnedBackendRouter {
    type Session = SessionInfo;

    async fn new_session(&self, info: SessionInfo) -> Self::Session {
        info
    }

    async fn route_query(
        &self,
        _session: &mut Self::Session,
        _buf: &Packet,
        _class: &Classification,
    ) -> Result<(), ProxyError> {
        Ok(())
    }

    async fn client_reply(
        &self,
        _session: &mut Self::Session,
        _buf: &Packet,
        _progress: ReplyProgress,
        _backend: BackendRef,
    ) -> Result<(), ProxyError> {
        Ok(())
    }

    async fn handle_error(
        &self,
        _session: &mut Self::Session,
        kind: ErrorKind,
        backend: BackendRef,
    ) -> Recovery {
        match kind {
            ErrorKind::Transient => Recovery::RetrySame,
            ErrorKind::Permanent => Recovery::Fatal(ProxyError::BackendRefused {
                backend: backend.as_str().to_string(),
            }),
        }
    }

    async fn close_session(&self, _session: Self::Session) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_default;

    #[tokio::test]
    async fn pinned_router_routes_every_query_without_error() {
        let router = PinnedBackendRouter;
        let mut session = router
            .new_session(SessionInfo {
                connection_id: 1,
                username: "root".to_string(),
                database: None,
            })
            .await;
        let class = classify_default("SELECT 1");
        let buf = Packet::from_vec(vec![3, b'S', b'E', b'L']);
        assert!(router.route_query(&mut session, &buf, &class).await.is_ok());
    }

    #[tokio::test]
    async fn transient_errors_recover_by_retrying_same_backend() {
        let router = PinnedBackendRouter;
        let mut session = router
            .new_session(SessionInfo {
                connection_id: 1,
                username: "root".to_string(),
                database: None,
            })
            .await;
        let recovery = router
            .handle_error(&mut session, ErrorKind::Transient, BackendRef("b1".to_string()))
            .await;
        assert!(matches!(recovery, Recovery::RetrySame));
    }
}
