//! Fixed-interval fan-out of check requests

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::correlator::{CallbackCorrelator, PendingCallback};
use super::messages::{OutgoingMessage, ValidationTask};
use super::registry::ValidatorRegistry;
use super::CoordinatorMetrics;
use crate::database::{PersistenceGateway, StoreError};

/// Outcome of one dispatch round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchRound {
    pub evicted: usize,
    pub dispatched: usize,
    /// Sends that failed because the session had already closed
    pub dropped: usize,
}

pub struct TaskDispatcher {
    registry: Arc<ValidatorRegistry>,
    correlator: Arc<CallbackCorrelator>,
    store: Arc<dyn PersistenceGateway>,
    metrics: Arc<CoordinatorMetrics>,
    reward: i64,
    interval: Duration,
    callback_ttl: Duration,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        correlator: Arc<CallbackCorrelator>,
        store: Arc<dyn PersistenceGateway>,
        metrics: Arc<CoordinatorMetrics>,
        reward: i64,
        interval: Duration,
        callback_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            correlator,
            store,
            metrics,
            reward,
            interval,
            callback_ttl,
        }
    }

    /// Evict stale callbacks, then send one check per (enabled target, session)
    pub async fn dispatch_once(&self) -> Result<DispatchRound, StoreError> {
        let mut round = DispatchRound {
            evicted: self.correlator.evict_older_than(self.callback_ttl).await,
            ..Default::default()
        };
        if round.evicted > 0 {
            self.metrics
                .evicted_callbacks
                .fetch_add(round.evicted as u64, Ordering::Relaxed);
            debug!(evicted = round.evicted, "Evicted unanswered callbacks");
        }

        let targets = self.store.enabled_targets().await?;
        let sessions = self.registry.active_sessions().await;

        for target in &targets {
            for session in &sessions {
                let token = self
                    .correlator
                    .register(PendingCallback {
                        target_id: target.id,
                        url: target.url.clone(),
                        validator_id: session.validator_id,
                        reward: self.reward,
                        registered_at: Instant::now(),
                    })
                    .await;

                let sent = session.send(OutgoingMessage::Validate(ValidationTask {
                    url: target.url.clone(),
                    callback_id: token.to_string(),
                }));

                if sent {
                    round.dispatched += 1;
                } else {
                    debug!(session = session.id, target_id = target.id, "Session closed, dropping check");
                    self.correlator.discard(&token).await;
                    round.dropped += 1;
                }
            }
        }

        self.metrics
            .dispatched_checks
            .fetch_add(round.dispatched as u64, Ordering::Relaxed);

        Ok(round)
    }

    /// Dispatch forever on the configured interval
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.interval);
        info!(
            "Task dispatcher started: interval={}s, callback ttl={}s",
            self.interval.as_secs(),
            self.callback_ttl.as_secs()
        );

        loop {
            interval.tick().await;

            match self.dispatch_once().await {
                Ok(round) => {
                    debug!(
                        dispatched = round.dispatched,
                        dropped = round.dropped,
                        evicted = round.evicted,
                        "Dispatch round complete"
                    );
                }
                Err(e) => {
                    error!("Dispatch round failed: {}", e);
                }
            }
        }
    }
}
