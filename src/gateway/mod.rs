//! Verification gateway: classify, verify off the accept path, resume.
//!
//! The host calls [`VerificationGateway::on_connection_attempt`] once per
//! incoming connection. Non-agent names are denied inline. Candidates get one
//! verification task on the gateway's worker pool, and the outcome is applied
//! through the [`SessionResumer`] once the task finishes.

pub mod resumer;
pub mod session;

use std::sync::{Arc, RwLock};

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::classifier::{Classification, NameClassifier};
use crate::config::GatewayConfig;
use crate::error::Error;
use crate::verify::{VerificationOutcome, VerificationStrategy, build_strategy};

pub use self::resumer::{GatewayEvent, ResumeResult, SessionResumer};
pub use self::session::{ConnectingSession, Decision, RejectionKind};

const EVENT_CAPACITY: usize = 256;

/// Everything derived from one configuration snapshot.
pub struct GatewayRuntime {
    pub config: Arc<GatewayConfig>,
    pub classifier: NameClassifier,
    pub strategy: Arc<dyn VerificationStrategy>,
    pub resumer: Arc<SessionResumer>,
}

/// Result of handing a connection to the gateway.
#[derive(Debug)]
pub enum Attempt {
    /// Denied inline by the naming check.
    Rejected,
    /// Verification is running. The handle completes after the outcome has
    /// been offered to the session.
    Dispatched(JoinHandle<()>),
}

pub struct VerificationGateway {
    runtime: RwLock<Arc<GatewayRuntime>>,
    workers: Arc<Semaphore>,
    handle: Handle,
    events: broadcast::Sender<GatewayEvent>,
}

impl VerificationGateway {
    /// Build a gateway using the strategy selected by `config`.
    pub fn new(config: GatewayConfig, handle: Handle) -> Result<Self, Error> {
        let strategy = build_strategy(&config)?;
        Ok(Self::with_strategy(config, strategy, handle))
    }

    pub fn with_strategy(
        config: GatewayConfig,
        strategy: Arc<dyn VerificationStrategy>,
        handle: Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let workers = Arc::new(Semaphore::new(config.max_concurrent));
        let runtime = build_runtime(config, strategy, &events);
        tracing::info!(
            strategy = runtime.strategy.name(),
            max_concurrent = runtime.config.max_concurrent,
            "Verification gateway ready"
        );
        Self {
            runtime: RwLock::new(Arc::new(runtime)),
            workers,
            handle,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.runtime().config.clone()
    }

    fn runtime(&self) -> Arc<GatewayRuntime> {
        self.runtime
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the whole configuration.
    ///
    /// Verifications already in flight finish under the runtime they started
    /// with. The worker pool keeps the size it was created with.
    pub fn reload(&self, config: GatewayConfig) -> Result<(), Error> {
        let strategy = build_strategy(&config)?;
        self.reload_with_strategy(config, strategy);
        Ok(())
    }

    pub fn reload_with_strategy(
        &self,
        config: GatewayConfig,
        strategy: Arc<dyn VerificationStrategy>,
    ) {
        let runtime = Arc::new(build_runtime(config, strategy, &self.events));
        let previous = std::mem::replace(
            &mut *self
                .runtime
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            runtime.clone(),
        );
        if previous.config.max_concurrent != runtime.config.max_concurrent {
            tracing::warn!(
                current = previous.config.max_concurrent,
                requested = runtime.config.max_concurrent,
                "max_concurrent changes take effect on restart"
            );
        }
        tracing::info!(
            strategy = runtime.strategy.name(),
            "Gateway configuration reloaded"
        );
    }

    /// Handle one connection attempt. Never blocks on I/O.
    pub fn on_connection_attempt(&self, session: &Arc<ConnectingSession>) -> Attempt {
        let runtime = self.runtime();

        if runtime.classifier.classify(session.identity()) == Classification::Rejected {
            runtime.resumer.deny_non_agent(session);
            return Attempt::Rejected;
        }

        tracing::debug!(
            identity = session.identity(),
            origin = %session.origin(),
            session_id = %session.id(),
            strategy = runtime.strategy.name(),
            "Dispatching verification"
        );

        let weak = Arc::downgrade(session);
        let identity = session.identity().to_string();
        let workers = self.workers.clone();
        let task = self.handle.spawn(async move {
            let outcome = run_verification(&runtime, &workers, identity).await;
            runtime.resumer.resume(&weak, &outcome);
        });
        Attempt::Dispatched(task)
    }
}

fn build_runtime(
    config: GatewayConfig,
    strategy: Arc<dyn VerificationStrategy>,
    events: &broadcast::Sender<GatewayEvent>,
) -> GatewayRuntime {
    let classifier = NameClassifier::new(&config.naming);
    let resumer = Arc::new(SessionResumer::new(
        config.messages.clone(),
        config.registry.address.clone(),
        events.clone(),
    ));
    GatewayRuntime {
        config: Arc::new(config),
        classifier,
        strategy,
        resumer,
    }
}

/// Run the strategy under the worker pool and the overall deadline.
///
/// Always produces an outcome: a pool shutdown, a panic in the strategy or an
/// expired deadline all become [`VerificationOutcome::Error`].
async fn run_verification(
    runtime: &GatewayRuntime,
    workers: &Arc<Semaphore>,
    identity: String,
) -> VerificationOutcome {
    let deadline = Instant::now() + runtime.config.deadline;

    let _permit = match tokio::time::timeout_at(deadline, workers.clone().acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => return VerificationOutcome::error("verification pool closed"),
        Err(_) => {
            tracing::warn!(%identity, "No verification worker available before deadline");
            return VerificationOutcome::error("verification timed out");
        }
    };

    let strategy = runtime.strategy.clone();
    let mut task = tokio::spawn({
        let identity = identity.clone();
        async move { strategy.verify(&identity).await }
    });

    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::error!(%identity, error = %e, "Verification task failed");
            VerificationOutcome::error("verification task failed")
        }
        Err(_) => {
            task.abort();
            tracing::warn!(
                %identity,
                deadline = ?runtime.config.deadline,
                "Verification deadline exceeded"
            );
            VerificationOutcome::error("verification timed out")
        }
    }
}
