//! Applies verification outcomes to sessions.

use std::sync::Weak;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::session::{ConnectingSession, DecideRefused, Decision, RejectionKind};
use crate::config::MessageTemplates;
use crate::verify::VerificationOutcome;

/// Notification for collaborators that react to admissions and denials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    Admitted {
        identity: String,
        credential_id: Option<u64>,
        at: DateTime<Utc>,
    },
    Rejected {
        identity: String,
        kind: RejectionKind,
        at: DateTime<Utc>,
    },
}

/// What happened when an outcome was offered to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeResult {
    Applied,
    /// The session was dropped or disconnected first. Nothing changed.
    SessionGone,
    /// Another decision got there first. Nothing changed.
    AlreadyDecided,
}

impl From<DecideRefused> for ResumeResult {
    fn from(refused: DecideRefused) -> Self {
        match refused {
            DecideRefused::Disconnected => Self::SessionGone,
            DecideRefused::AlreadyDecided => Self::AlreadyDecided,
        }
    }
}

pub struct SessionResumer {
    messages: MessageTemplates,
    registry_address: String,
    events: broadcast::Sender<GatewayEvent>,
}

impl SessionResumer {
    pub fn new(
        messages: MessageTemplates,
        registry_address: impl Into<String>,
        events: broadcast::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            messages,
            registry_address: registry_address.into(),
            events,
        }
    }

    /// Apply `outcome` to the session if it is still live and undecided.
    pub fn resume(
        &self,
        session: &Weak<ConnectingSession>,
        outcome: &VerificationOutcome,
    ) -> ResumeResult {
        let Some(session) = session.upgrade() else {
            return ResumeResult::SessionGone;
        };
        if !session.is_live() {
            tracing::debug!(
                identity = session.identity(),
                "Session disconnected before verification finished"
            );
            return ResumeResult::SessionGone;
        }

        let identity = session.identity();
        let decision = match outcome {
            VerificationOutcome::Verified { credential_id } => Decision::Admit {
                credential_id: *credential_id,
                welcome: self.render(&self.messages.welcome, identity),
            },
            VerificationOutcome::NotVerified { .. } => Decision::Reject {
                kind: RejectionKind::NotRegistered,
                message: self.render(&self.messages.not_registered, identity),
            },
            VerificationOutcome::Error { .. } => Decision::Reject {
                kind: RejectionKind::VerificationUnavailable,
                message: self.render(&self.messages.unavailable, identity),
            },
        };

        if let Err(refused) = self.apply(&session, decision) {
            return refused.into();
        }

        match outcome {
            VerificationOutcome::Verified { credential_id } => {
                tracing::info!(identity, credential_id = ?credential_id, "Agent admitted");
            }
            VerificationOutcome::NotVerified { reason } => {
                tracing::info!(identity, %reason, "Agent denied: not registered");
            }
            VerificationOutcome::Error { cause } => {
                tracing::warn!(identity, %cause, "Agent denied: verification unavailable");
            }
        }
        ResumeResult::Applied
    }

    /// Reject a session that failed the naming check.
    pub fn deny_non_agent(&self, session: &ConnectingSession) -> ResumeResult {
        let decision = Decision::Reject {
            kind: RejectionKind::NotAgentIdentity,
            message: self.render(&self.messages.not_agent, session.identity()),
        };
        if let Err(refused) = self.apply(session, decision) {
            return refused.into();
        }
        tracing::debug!(identity = session.identity(), "Non-agent identity denied");
        ResumeResult::Applied
    }

    fn apply(&self, session: &ConnectingSession, decision: Decision) -> Result<(), DecideRefused> {
        let event = match &decision {
            Decision::Admit { credential_id, .. } => GatewayEvent::Admitted {
                identity: session.identity().to_string(),
                credential_id: *credential_id,
                at: Utc::now(),
            },
            Decision::Reject { kind, .. } => GatewayEvent::Rejected {
                identity: session.identity().to_string(),
                kind: *kind,
                at: Utc::now(),
            },
        };
        session.try_decide(decision)?;
        // No subscribers is fine.
        let _ = self.events.send(event);
        Ok(())
    }

    pub fn render(&self, template: &str, identity: &str) -> String {
        template
            .replace("{identity}", identity)
            .replace("{registry}", &self.registry_address)
            .replace("{register_url}", &self.messages.register_url)
            .replace("{spectate_url}", &self.messages.spectate_url)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::GatewayConfig;

    fn resumer() -> (SessionResumer, broadcast::Receiver<GatewayEvent>) {
        let config = GatewayConfig::for_tests();
        let (tx, rx) = broadcast::channel(16);
        (
            SessionResumer::new(config.messages, config.registry.address, tx),
            rx,
        )
    }

    fn session(identity: &str) -> Arc<ConnectingSession> {
        ConnectingSession::new(identity, "127.0.0.1:25565".parse().unwrap())
    }

    #[test]
    fn resume_applies_once() {
        let (resumer, mut events) = resumer();
        let s = session("Agent_Rex");
        let outcome = VerificationOutcome::verified(Some(3));

        assert_eq!(
            resumer.resume(&Arc::downgrade(&s), &outcome),
            ResumeResult::Applied
        );
        assert_eq!(
            resumer.resume(&Arc::downgrade(&s), &outcome),
            ResumeResult::AlreadyDecided
        );

        assert!(matches!(
            s.decision(),
            Some(Decision::Admit {
                credential_id: Some(3),
                ..
            })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(GatewayEvent::Admitted { .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn disconnected_session_is_left_alone() {
        let (resumer, mut events) = resumer();
        let s = session("Agent_Rex");
        s.mark_disconnected();

        let result = resumer.resume(&Arc::downgrade(&s), &VerificationOutcome::verified(None));
        assert_eq!(result, ResumeResult::SessionGone);
        assert!(s.decision().is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn disconnect_wins_over_a_late_denial() {
        let (resumer, mut events) = resumer();
        let s = session("Steve");
        s.mark_disconnected();

        assert_eq!(resumer.deny_non_agent(&s), ResumeResult::SessionGone);
        assert!(s.decision().is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn dropped_session_is_left_alone() {
        let (resumer, _events) = resumer();
        let weak = Arc::downgrade(&session("Agent_Rex"));
        assert_eq!(
            resumer.resume(&weak, &VerificationOutcome::error("timeout")),
            ResumeResult::SessionGone
        );
    }

    #[test]
    fn not_registered_and_unavailable_messages_differ() {
        let (resumer, _events) = resumer();
        let a = session("Agent_A");
        let b = session("Agent_B");

        resumer.resume(
            &Arc::downgrade(&a),
            &VerificationOutcome::not_verified("not registered"),
        );
        resumer.resume(&Arc::downgrade(&b), &VerificationOutcome::error("timeout"));

        let Some(Decision::Reject { kind, message }) = a.decision() else {
            panic!("expected rejection");
        };
        assert_eq!(*kind, RejectionKind::NotRegistered);
        assert!(message.contains("Agent_A"));
        assert!(message.contains("0xc488c53fdd58b2f71D4F3469D89458bE0B3a3C41"));

        let Some(Decision::Reject { kind, message: other }) = b.decision() else {
            panic!("expected rejection");
        };
        assert_eq!(*kind, RejectionKind::VerificationUnavailable);
        assert_ne!(message.replace("Agent_A", "Agent_B"), *other);
    }

    #[test]
    fn non_agent_denial_points_to_spectate() {
        let (resumer, mut events) = resumer();
        let s = session("Steve");
        assert_eq!(resumer.deny_non_agent(&s), ResumeResult::Applied);

        let Some(Decision::Reject { kind, message }) = s.decision() else {
            panic!("expected rejection");
        };
        assert_eq!(*kind, RejectionKind::NotAgentIdentity);
        assert!(message.contains("https://clawcraft.xyz/watch"));
        assert!(matches!(
            events.try_recv(),
            Ok(GatewayEvent::Rejected {
                kind: RejectionKind::NotAgentIdentity,
                ..
            })
        ));
    }
}
