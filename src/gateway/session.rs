//! A connection attempt waiting for its admission decision.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

/// Why a session was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Name does not follow the agent naming convention.
    NotAgentIdentity,
    /// Credential absent, inactive, or refused.
    NotRegistered,
    /// The check could not be completed.
    VerificationUnavailable,
}

impl RejectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAgentIdentity => "not_agent_identity",
            Self::NotRegistered => "not_registered",
            Self::VerificationUnavailable => "verification_unavailable",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal decision for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Admit {
        credential_id: Option<u64>,
        welcome: String,
    },
    Reject {
        kind: RejectionKind,
        message: String,
    },
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }
}

/// Why `ConnectingSession::try_decide` left a session unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecideRefused {
    Disconnected,
    AlreadyDecided,
}

/// One in-progress connection.
///
/// Owned by the host. The host calls [`mark_disconnected`](Self::mark_disconnected)
/// when the socket closes; the gateway only keeps a `Weak` reference.
#[derive(Debug)]
pub struct ConnectingSession {
    id: Uuid,
    identity: String,
    origin: SocketAddr,
    opened_at: DateTime<Utc>,
    live: AtomicBool,
    decision: OnceLock<Decision>,
    decision_tx: watch::Sender<Option<Decision>>,
}

impl ConnectingSession {
    pub fn new(identity: impl Into<String>, origin: SocketAddr) -> Arc<Self> {
        let (decision_tx, _) = watch::channel(None);
        Arc::new(Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            origin,
            opened_at: Utc::now(),
            live: AtomicBool::new(true),
            decision: OnceLock::new(),
            decision_tx,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Called by the host when the underlying connection closes.
    ///
    /// Takes the watch lock, so a decision either lands before this or not at
    /// all. Wakes anyone in `wait_decision`.
    pub fn mark_disconnected(&self) {
        self.decision_tx
            .send_modify(|_| self.live.store(false, Ordering::Release));
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Decision>> {
        self.decision_tx.subscribe()
    }

    /// Wait until a decision is applied or the session disconnects.
    ///
    /// Returns `None` if the session went away undecided.
    pub async fn wait_decision(&self) -> Option<Decision> {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|decision| decision.is_some() || !self.is_live())
            .await;
        match result {
            Ok(decision) => decision.clone(),
            Err(_) => self.decision.get().cloned(),
        }
    }

    /// Store the terminal decision if the session is still live and undecided.
    pub(crate) fn try_decide(&self, decision: Decision) -> Result<(), DecideRefused> {
        let mut refused = None;
        self.decision_tx.send_if_modified(|slot| {
            if !self.is_live() {
                refused = Some(DecideRefused::Disconnected);
                return false;
            }
            if self.decision.set(decision).is_err() {
                refused = Some(DecideRefused::AlreadyDecided);
                return false;
            }
            *slot = self.decision.get().cloned();
            true
        });
        refused.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> SocketAddr {
        "127.0.0.1:25565".parse().unwrap()
    }

    fn reject() -> Decision {
        Decision::Reject {
            kind: RejectionKind::NotRegistered,
            message: "register first".to_string(),
        }
    }

    #[test]
    fn decision_is_single_assignment() {
        let session = ConnectingSession::new("Agent_Rex", origin());
        assert_eq!(session.try_decide(reject()), Ok(()));
        assert_eq!(
            session.try_decide(Decision::Admit {
                credential_id: Some(1),
                welcome: "hi".to_string(),
            }),
            Err(DecideRefused::AlreadyDecided)
        );
        assert_eq!(session.decision(), Some(&reject()));
    }

    #[test]
    fn disconnected_session_refuses_a_decision() {
        let session = ConnectingSession::new("Agent_Rex", origin());
        let rx = session.subscribe();
        session.mark_disconnected();

        assert_eq!(
            session.try_decide(reject()),
            Err(DecideRefused::Disconnected)
        );
        assert_eq!(session.decision(), None);
        assert_eq!(*rx.borrow(), None);
    }

    #[test]
    fn wait_decision_pends_until_decided() {
        let session = ConnectingSession::new("Agent_Rex", origin());
        let mut wait = tokio_test::task::spawn(session.wait_decision());
        tokio_test::assert_pending!(wait.poll());

        session.try_decide(reject()).unwrap();
        assert!(wait.is_woken());
        assert_eq!(tokio_test::assert_ready!(wait.poll()), Some(reject()));
    }

    #[tokio::test]
    async fn waiter_sees_decision() {
        let session = ConnectingSession::new("Agent_Rex", origin());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_decision().await })
        };
        tokio::task::yield_now().await;
        session.try_decide(reject()).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(reject()));
    }

    #[tokio::test]
    async fn waiter_released_on_disconnect() {
        let session = ConnectingSession::new("Agent_Rex", origin());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_decision().await })
        };
        tokio::task::yield_now().await;
        session.mark_disconnected();
        assert_eq!(waiter.await.unwrap(), None);
        assert!(!session.is_live());
    }

    #[test]
    fn rejection_kind_serializes_snake_case() {
        let json = serde_json::to_value(RejectionKind::VerificationUnavailable).unwrap();
        assert_eq!(json, "verification_unavailable");
    }
}
