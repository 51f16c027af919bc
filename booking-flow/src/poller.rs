//! Payment confirmation polling.
//!
//! Each verification is a small state machine, `Pending` → one of
//! `Success`, `Failed` or `Timeout`, driven by its own tokio task. The task
//! sends one request, waits for the answer, and only then schedules the next
//! attempt, so a verification never has two requests in flight.
//!
//! Verifications live in an owned registry inside [`PaymentPoller`] only while
//! they are pending: reaching a terminal status removes the entry, and so does
//! stopping it. Stopping also wakes the pending timer; a request that is
//! already in flight is allowed to finish, but its answer is dropped. Every
//! verification resolves through at most one of the three terminal callbacks,
//! and none of them runs once `stop` has returned.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::{NetworkErrorPolicy, PollerConfig},
    service::Service,
    verification::{RemoteStatus, VerificationEndpoint},
};

/// Opaque handle returned by [`PaymentPoller::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationId(Uuid);

impl VerificationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for VerificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Success,
    Failed,
    Timeout,
}

impl VerificationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }
}

/// Snapshot of one verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub id: VerificationId,
    pub reference: String,
    /// `None` for payments not tied to a single service.
    pub service_type: Option<Service>,
    pub status: VerificationStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a verification ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("payment was declined{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Declined { message: Option<String> },

    #[error("could not reach payment verification: {0}")]
    Transport(String),
}

type SuccessFn = Box<dyn FnOnce(Option<Value>) + Send>;
type FailureFn = Box<dyn FnOnce(VerificationFailure) + Send>;
type TimeoutFn = Box<dyn FnOnce() + Send>;
type PendingFn = Box<dyn FnMut(u32) + Send>;

/// Terminal callbacks for one verification. Exactly one of success, failure
/// or timeout runs, unless the verification is stopped first.
///
/// Callbacks run while the verification is held live, so `stop` called from
/// another thread waits for them. A callback must not stop its own
/// verification.
#[derive(Default)]
pub struct VerificationCallbacks {
    on_success: Option<SuccessFn>,
    on_failure: Option<FailureFn>,
    on_timeout: Option<TimeoutFn>,
    on_pending: Option<PendingFn>,
}

impl VerificationCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl FnOnce(Option<Value>) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnOnce(VerificationFailure) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    /// Called with the attempt count after each pending answer that will be
    /// retried.
    pub fn on_pending(mut self, f: impl FnMut(u32) + Send + 'static) -> Self {
        self.on_pending = Some(Box::new(f));
        self
    }
}

/// What to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub reference: String,
    pub service_type: Option<Service>,
}

impl VerificationRequest {
    pub fn new(reference: impl Into<String>, service_type: Option<Service>) -> Self {
        Self {
            reference: reference.into(),
            service_type,
        }
    }
}

struct Entry {
    record: PaymentVerification,
    live: Arc<Mutex<bool>>,
    wake: Arc<Notify>,
}

fn lock_live(live: &Mutex<bool>) -> MutexGuard<'_, bool> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

type Registry = DashMap<VerificationId, Entry>;

/// Registry of running payment verifications.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct PaymentPoller {
    endpoint: Arc<dyn VerificationEndpoint>,
    config: PollerConfig,
    registry: Arc<Registry>,
}

impl PaymentPoller {
    pub fn new(endpoint: Arc<dyn VerificationEndpoint>, config: PollerConfig) -> Self {
        Self {
            endpoint,
            config,
            registry: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Start polling `request.reference`. The first request goes out as soon
    /// as the spawned task runs. Must be called within a tokio runtime.
    pub fn start(
        &self,
        request: VerificationRequest,
        callbacks: VerificationCallbacks,
    ) -> VerificationId {
        let id = VerificationId::new();
        let now = Utc::now();
        let live = Arc::new(Mutex::new(true));
        let wake = Arc::new(Notify::new());

        self.registry.insert(
            id,
            Entry {
                record: PaymentVerification {
                    id,
                    reference: request.reference.clone(),
                    service_type: request.service_type,
                    status: VerificationStatus::Pending,
                    attempt_count: 0,
                    max_attempts: self.config.max_attempts,
                    interval_ms: self.config.interval.as_millis() as u64,
                    started_at: now,
                    updated_at: now,
                },
                live: live.clone(),
                wake: wake.clone(),
            },
        );

        let span = info_span!(
            "payment_verification",
            verification_id = %id,
            reference = %request.reference,
        );
        let run = Verification {
            id,
            request,
            endpoint: self.endpoint.clone(),
            config: self.config,
            registry: self.registry.clone(),
            live,
            wake,
        };
        tokio::spawn(run.poll(callbacks).instrument(span));

        info!(verification_id = %id, "Payment verification started");
        id
    }

    /// Cancel one verification. Unknown or finished ids are ignored. If a
    /// callback for `id` is running on another thread this waits for it.
    pub fn stop(&self, id: VerificationId) {
        if let Some((_, entry)) = self.registry.remove(&id) {
            *lock_live(&entry.live) = false;
            entry.wake.notify_one();
            debug!(verification_id = %id, "Payment verification stopped");
        }
    }

    pub fn stop_all(&self) {
        let ids: Vec<VerificationId> = self.registry.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.stop(id);
        }
    }

    pub fn status(&self, id: VerificationId) -> Option<PaymentVerification> {
        self.registry.get(&id).map(|entry| entry.record.clone())
    }

    /// Number of verifications still waiting for a terminal answer.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }
}

/// The per-verification task.
struct Verification {
    id: VerificationId,
    request: VerificationRequest,
    endpoint: Arc<dyn VerificationEndpoint>,
    config: PollerConfig,
    registry: Arc<Registry>,
    live: Arc<Mutex<bool>>,
    wake: Arc<Notify>,
}

impl Verification {
    fn is_live(&self) -> bool {
        *lock_live(&self.live)
    }

    /// Record one more pending answer and notify, unless stopped.
    fn pending(&self, attempts: u32, on_pending: Option<&mut PendingFn>) -> bool {
        let live = lock_live(&self.live);
        if !*live {
            return false;
        }
        if let Some(mut entry) = self.registry.get_mut(&self.id) {
            entry.record.attempt_count = attempts;
            entry.record.updated_at = Utc::now();
        }
        if let Some(f) = on_pending {
            f(attempts);
        }
        drop(live);
        true
    }

    /// Take the terminal transition and run `deliver`, unless stopped first.
    /// The entry leaves the registry once delivery is done.
    fn finish(&self, status: VerificationStatus, attempts: u32, deliver: impl FnOnce()) {
        let mut live = lock_live(&self.live);
        if !*live {
            debug!(?status, "Verification already stopped, dropping outcome");
            return;
        }
        *live = false;

        if let Some(mut entry) = self.registry.get_mut(&self.id) {
            entry.record.status = status;
            entry.record.attempt_count = attempts;
            entry.record.updated_at = Utc::now();
        }
        deliver();
        self.registry.remove(&self.id);
    }

    async fn poll(self, mut callbacks: VerificationCallbacks) {
        let mut attempts = 0u32;

        loop {
            if !self.is_live() {
                return;
            }

            debug!(attempt = attempts + 1, "Checking payment status");
            let outcome = self
                .endpoint
                .verify(&self.request.reference, self.request.service_type)
                .await;

            if !self.is_live() {
                debug!("Verification stopped while a request was in flight, discarding answer");
                return;
            }

            match outcome {
                Ok(response) => match response.status {
                    RemoteStatus::Success => {
                        let data = response.data;
                        self.finish(VerificationStatus::Success, attempts + 1, || {
                            info!(attempts = attempts + 1, "Payment confirmed");
                            if let Some(f) = callbacks.on_success.take() {
                                f(data);
                            }
                        });
                        return;
                    }
                    RemoteStatus::Failed => {
                        let message = response.message;
                        self.finish(VerificationStatus::Failed, attempts + 1, || {
                            warn!(message = ?message, "Payment declined");
                            if let Some(f) = callbacks.on_failure.take() {
                                f(VerificationFailure::Declined { message });
                            }
                        });
                        return;
                    }
                    RemoteStatus::Pending => {}
                },
                Err(e) => match self.config.network_errors {
                    NetworkErrorPolicy::FailFast => {
                        self.finish(VerificationStatus::Failed, attempts + 1, || {
                            warn!(error = %e, "Payment verification request failed");
                            if let Some(f) = callbacks.on_failure.take() {
                                f(VerificationFailure::Transport(e.to_string()));
                            }
                        });
                        return;
                    }
                    NetworkErrorPolicy::Retry => {
                        warn!(error = %e, "Payment verification request failed, will retry");
                    }
                },
            }

            attempts += 1;
            if attempts >= self.config.max_attempts {
                self.finish(VerificationStatus::Timeout, attempts, || {
                    warn!(attempts, "Payment still pending after all attempts");
                    if let Some(f) = callbacks.on_timeout.take() {
                        f();
                    }
                });
                return;
            }

            if !self.pending(attempts, callbacks.on_pending.as_mut()) {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.wake.notified() => return,
            }
        }
    }
}
