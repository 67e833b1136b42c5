//! Validator coordination
//!
//! Keeps live validator sessions, fans out uptime checks on a fixed
//! interval and turns signed replies into ticks and ledger credit.
//!
//! - `registry` - connected sessions
//! - `correlator` - pending callbacks keyed by correlation token
//! - `dispatcher` - periodic fan-out
//! - `messages` - JSON wire frames
//! - `location` - peer IP to region lookup
//!
//! Frames that fail verification are dropped without a reply and counted.

pub mod correlator;
pub mod dispatcher;
pub mod location;
pub mod messages;
pub mod registry;

use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use correlator::{CallbackCorrelator, PendingCallback};
pub use dispatcher::{DispatchRound, TaskDispatcher};
pub use location::LocationResolver;
pub use messages::{
    IncomingMessage, OutgoingMessage, SignUpAck, SignUpRequest, ValidationReply, ValidationTask,
};
pub use registry::{SessionHandle, SessionId, ValidatorRegistry};

use crate::config::CoordinatorConfig;
use crate::crypto::SignatureVerifier;
use crate::database::{NewTick, PersistenceGateway, Tick, Validator, ValidatorSignup};

/// Process-wide coordinator counters
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub discarded_messages: AtomicU64,
    pub evicted_callbacks: AtomicU64,
    pub dispatched_checks: AtomicU64,
    pub recorded_ticks: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    pub active_sessions: usize,
    pub pending_callbacks: usize,
    pub discarded_messages: u64,
    pub evicted_callbacks: u64,
    pub dispatched_checks: u64,
    pub recorded_ticks: u64,
}

/// One open transport connection, signed up or not
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: SessionId,
    pub peer: IpAddr,
    sender: UnboundedSender<OutgoingMessage>,
}

/// What happened to a validation reply
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Recorded(Tick),
    /// Verification failed or the session never signed up
    Discarded,
    /// Token already resolved, evicted, or dispatched to someone else
    Unmatched,
    /// Verified and matched but the write failed
    Failed,
}

pub struct Coordinator {
    registry: Arc<ValidatorRegistry>,
    correlator: Arc<CallbackCorrelator>,
    store: Arc<dyn PersistenceGateway>,
    locator: LocationResolver,
    metrics: Arc<CoordinatorMetrics>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(store: Arc<dyn PersistenceGateway>, config: CoordinatorConfig) -> Self {
        let locator = if config.geolocation_enabled {
            LocationResolver::new(config.geolocation_timeout_secs)
        } else {
            LocationResolver::disabled()
        };
        Self::with_locator(store, locator, config)
    }

    pub fn with_locator(
        store: Arc<dyn PersistenceGateway>,
        locator: LocationResolver,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry: Arc::new(ValidatorRegistry::new()),
            correlator: Arc::new(CallbackCorrelator::new()),
            store,
            locator,
            metrics: Arc::new(CoordinatorMetrics::default()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    pub fn correlator(&self) -> &Arc<CallbackCorrelator> {
        &self.correlator
    }

    /// Dispatcher sharing this coordinator's registry, correlator and counters
    pub fn dispatcher(&self) -> TaskDispatcher {
        TaskDispatcher::new(
            self.registry.clone(),
            self.correlator.clone(),
            self.store.clone(),
            self.metrics.clone(),
            self.config.reward_per_check,
            Duration::from_secs(self.config.dispatch_interval_secs),
            Duration::from_secs(self.config.callback_ttl_secs),
        )
    }

    /// Allocate a session id for a freshly accepted connection
    pub fn open_connection(
        &self,
        peer: IpAddr,
        sender: UnboundedSender<OutgoingMessage>,
    ) -> Connection {
        let id = self.registry.next_session_id();
        debug!(session = id, peer = %peer, "Validator connection opened");
        Connection { id, peer, sender }
    }

    /// Parse and route one text frame
    pub async fn handle_frame(&self, connection: &Connection, text: &str) {
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(IncomingMessage::SignUp(request)) => {
                self.sign_up(connection, &request).await;
            }
            Ok(IncomingMessage::Validate(reply)) => {
                self.ingest(connection.id, &reply).await;
            }
            Err(e) => {
                debug!(session = connection.id, error = %e, "Malformed frame dropped");
                self.discard();
            }
        }
    }

    /// Verify a signup, persist the validator and register the session.
    /// Returns None (and sends nothing) when the request is rejected.
    pub async fn sign_up(
        &self,
        connection: &Connection,
        request: &SignUpRequest,
    ) -> Option<Validator> {
        if !SignatureVerifier::verify_encoded(
            &request.expected_message(),
            &request.public_key,
            &request.signed_message,
        ) {
            warn!(session = connection.id, "Signup rejected: signature did not verify");
            self.discard();
            return None;
        }

        let location = self.locator.resolve(connection.peer).await;

        let validator = match self
            .store
            .upsert_validator(&ValidatorSignup {
                public_key: request.public_key.clone(),
                ip_address: connection.peer.to_string(),
                location,
            })
            .await
        {
            Ok(validator) => validator,
            Err(e) => {
                error!(session = connection.id, error = %e, "Failed to persist validator signup");
                return None;
            }
        };

        self.registry
            .register(SessionHandle::new(
                connection.id,
                validator.id,
                validator.public_key.clone(),
                connection.sender.clone(),
            ))
            .await;

        let _ = connection.sender.send(OutgoingMessage::SignUp(SignUpAck {
            validator_id: validator.id,
            callback_id: request.callback_id.clone(),
        }));

        info!(
            validator_id = %validator.id,
            session = connection.id,
            location = %validator.location,
            "Validator signed up"
        );
        Some(validator)
    }

    /// Verify a reply against the key recorded for its session, resolve the
    /// callback and credit the validator
    pub async fn ingest(&self, session_id: SessionId, reply: &ValidationReply) -> IngestOutcome {
        let Some(session) = self.registry.session(session_id).await else {
            debug!(session = session_id, "Reply from a session that never signed up");
            self.discard();
            return IngestOutcome::Discarded;
        };

        if !SignatureVerifier::verify_encoded(
            &reply.expected_message(),
            &session.public_key,
            &reply.signed_message,
        ) {
            warn!(validator_id = %session.validator_id, "Reply rejected: signature did not verify");
            self.discard();
            return IngestOutcome::Discarded;
        }

        let Ok(token) = Uuid::parse_str(&reply.callback_id) else {
            self.discard();
            return IngestOutcome::Discarded;
        };

        let Some(callback) = self.correlator.take_for(&token, session.validator_id).await else {
            debug!(validator_id = %session.validator_id, callback = %token, "No pending callback");
            return IngestOutcome::Unmatched;
        };

        let location = match self.store.get_validator(callback.validator_id).await {
            Ok(Some(validator)) => validator.location,
            Ok(None) => location::UNKNOWN.to_string(),
            Err(e) => {
                warn!(validator_id = %callback.validator_id, error = %e, "Location lookup failed");
                location::UNKNOWN.to_string()
            }
        };

        let tick = NewTick {
            target_id: callback.target_id,
            validator_id: callback.validator_id,
            status: reply.status,
            latency_ms: reply.latency_ms(),
            location,
        };

        match self.store.record_tick(&tick, callback.reward).await {
            Ok(recorded) => {
                self.metrics.recorded_ticks.fetch_add(1, Ordering::Relaxed);
                debug!(
                    validator_id = %recorded.validator_id,
                    target_id = %recorded.target_id,
                    url = %callback.url,
                    status = %recorded.status,
                    "Tick recorded"
                );
                IngestOutcome::Recorded(recorded)
            }
            Err(e) => {
                error!(
                    validator_id = %callback.validator_id,
                    target_id = %callback.target_id,
                    url = %callback.url,
                    error = %e,
                    "Failed to record tick"
                );
                IngestOutcome::Failed
            }
        }
    }

    /// Forget a closed connection
    pub async fn disconnect(&self, connection: &Connection) {
        if let Some(handle) = self.registry.unregister(connection.id).await {
            info!(validator_id = %handle.validator_id, session = connection.id, "Validator disconnected");
        }
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            active_sessions: self.registry.len().await,
            pending_callbacks: self.correlator.len().await,
            discarded_messages: self.metrics.discarded_messages.load(Ordering::Relaxed),
            evicted_callbacks: self.metrics.evicted_callbacks.load(Ordering::Relaxed),
            dispatched_checks: self.metrics.dispatched_checks.load(Ordering::Relaxed),
            recorded_ticks: self.metrics.recorded_ticks.load(Ordering::Relaxed),
        }
    }

    fn discard(&self) {
        self.metrics.discarded_messages.fetch_add(1, Ordering::Relaxed);
    }
}
