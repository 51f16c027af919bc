//! The page a user lands on after paying: find the payment reference, poll
//! until the gateway settles, then hand over to the success view.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use url::form_urlencoded;

use crate::{
    error::{BookingError, Result},
    navigator::Navigator,
    poller::{PaymentPoller, VerificationCallbacks, VerificationId, VerificationRequest},
    route,
    service::Service,
    storage,
    store::BookingDataStore,
};

/// Gateways disagree on the parameter name; the first match wins.
pub const REFERENCE_PARAMS: [&str; 2] = ["reference", "trxref"];

/// Universal success view shared by every service.
pub const SUCCESS_PATH: &str = "/booking/success";

pub fn reference_from_query(query: &str) -> Option<String> {
    let query = query.trim_start_matches('?');
    REFERENCE_PARAMS.iter().find_map(|name| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| key == name && !value.trim().is_empty())
            .map(|(_, value)| value.into_owned())
    })
}

fn service_from_query(query: &str) -> Option<Service> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(key, _)| key == "service")
        .and_then(|(_, value)| Service::from_slug(&value))
}

pub fn success_url(service: Option<Service>, reference: &str) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(service) = service {
        query.append_pair("service", service.slug());
    }
    query.append_pair("reference", reference);
    format!("{SUCCESS_PATH}?{}", query.finish())
}

/// What the confirmation page shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ConfirmationState {
    Checking { attempt: u32 },
    Confirmed { details: Option<Value> },
    Failed { reason: String },
    /// Attempts ran out without an answer. The payment may still have gone
    /// through.
    StillProcessing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationAction {
    RetryVerification,
    BackToSearch,
    ContinueAnyway,
}

impl ConfirmationAction {
    pub const ALL: [ConfirmationAction; 3] = [
        ConfirmationAction::RetryVerification,
        ConfirmationAction::BackToSearch,
        ConfirmationAction::ContinueAnyway,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ConfirmationAction::RetryVerification => "retry-verification",
            ConfirmationAction::BackToSearch => "back-to-search",
            ConfirmationAction::ContinueAnyway => "continue-anyway",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.slug() == slug)
    }
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationState::Checking { .. })
    }

    pub fn message(&self) -> String {
        match self {
            ConfirmationState::Checking { attempt: 0 } => {
                "Confirming your payment...".to_string()
            }
            ConfirmationState::Checking { attempt } => {
                format!("Still confirming your payment (check {})...", attempt + 1)
            }
            ConfirmationState::Confirmed { .. } => "Payment confirmed.".to_string(),
            ConfirmationState::Failed { reason } => {
                format!("We could not confirm your payment: {reason}")
            }
            ConfirmationState::StillProcessing => "Your payment is still being processed. \
                 It may already have succeeded; you will receive a confirmation once it clears."
                .to_string(),
        }
    }

    pub fn actions(&self) -> &'static [ConfirmationAction] {
        match self {
            ConfirmationState::Checking { .. } | ConfirmationState::Confirmed { .. } => &[],
            ConfirmationState::Failed { .. } => &[
                ConfirmationAction::RetryVerification,
                ConfirmationAction::BackToSearch,
            ],
            ConfirmationState::StillProcessing => &[
                ConfirmationAction::ContinueAnyway,
                ConfirmationAction::RetryVerification,
            ],
        }
    }
}

/// Wires the poller to booking storage and navigation.
#[derive(Clone)]
pub struct PaymentConfirmation {
    poller: PaymentPoller,
    store: Arc<BookingDataStore>,
    navigator: Arc<dyn Navigator>,
}

impl PaymentConfirmation {
    pub fn new(
        poller: PaymentPoller,
        store: Arc<BookingDataStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            poller,
            store,
            navigator,
        }
    }

    /// Mount the page for `query` (the raw query string). The reference comes
    /// from the query, falling back to the one persisted before the user left
    /// for the gateway.
    pub fn mount(&self, query: &str, service: Option<Service>) -> Result<ConfirmationHandle> {
        let service = service.or_else(|| service_from_query(query));
        let reference = reference_from_query(query)
            .or_else(|| self.store.load_reference(service))
            .ok_or(BookingError::MissingReference)?;

        let (tx, rx) = watch::channel(ConfirmationState::Checking { attempt: 0 });
        let tx = Arc::new(tx);
        let id = self.begin(&reference, service, tx.clone());

        Ok(ConfirmationHandle {
            page: self.clone(),
            id,
            reference,
            service,
            tx,
            rx,
        })
    }

    fn begin(
        &self,
        reference: &str,
        service: Option<Service>,
        tx: Arc<watch::Sender<ConfirmationState>>,
    ) -> VerificationId {
        let store = self.store.clone();
        let navigator = self.navigator.clone();
        let confirmed_ref = reference.to_string();
        let (on_pending, on_success, on_failure, on_timeout) =
            (tx.clone(), tx.clone(), tx.clone(), tx);

        let callbacks = VerificationCallbacks::new()
            .on_pending(move |attempt| {
                on_pending.send_replace(ConfirmationState::Checking { attempt });
            })
            .on_success(move |details| {
                match service {
                    Some(service) => {
                        if let Err(e) = store.complete(service) {
                            warn!(%service, error = %e, "Failed to clear completed booking");
                        }
                    }
                    None => {
                        if let Err(e) = store.storage().remove_item(storage::keys::PAYMENT_REFERENCE) {
                            warn!(error = %e, "Failed to clear payment reference");
                        }
                    }
                }
                on_success.send_replace(ConfirmationState::Confirmed { details });
                navigator.push(&success_url(service, &confirmed_ref));
            })
            .on_failure(move |failure| {
                on_failure.send_replace(ConfirmationState::Failed {
                    reason: failure.to_string(),
                });
            })
            .on_timeout(move || {
                on_timeout.send_replace(ConfirmationState::StillProcessing);
            });

        info!(reference, service = ?service, "Confirmation page mounted");
        self.poller
            .start(VerificationRequest::new(reference, service), callbacks)
    }
}

/// A mounted confirmation page. Dropping it stops polling.
pub struct ConfirmationHandle {
    page: PaymentConfirmation,
    id: VerificationId,
    reference: String,
    service: Option<Service>,
    tx: Arc<watch::Sender<ConfirmationState>>,
    rx: watch::Receiver<ConfirmationState>,
}

impl ConfirmationHandle {
    pub fn verification_id(&self) -> VerificationId {
        self.id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn state(&self) -> ConfirmationState {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConfirmationState> {
        self.rx.clone()
    }

    /// Wait until the page reaches a terminal state.
    pub async fn outcome(&mut self) -> ConfirmationState {
        let terminal = self
            .rx
            .wait_for(ConfirmationState::is_terminal)
            .await
            .map(|state| state.clone())
            .ok();
        terminal.unwrap_or_else(|| self.rx.borrow().clone())
    }

    /// Poll again from scratch after a failure or timeout.
    pub fn retry(&mut self) {
        self.page.poller.stop(self.id);
        self.tx
            .send_replace(ConfirmationState::Checking { attempt: 0 });
        self.id = self
            .page
            .begin(&self.reference, self.service, self.tx.clone());
    }

    /// Leave for the success view without a confirmed answer.
    pub fn continue_anyway(&self) {
        self.page.poller.stop(self.id);
        self.page
            .navigator
            .push(&success_url(self.service, &self.reference));
    }

    pub fn back_to_search(&self) {
        self.page.poller.stop(self.id);
        if let Some(service) = self.service {
            self.page.navigator.push(&route::service_root(service));
        }
    }

    /// Run `action` if the current state offers it.
    pub fn perform(&mut self, action: ConfirmationAction) -> bool {
        if !self.state().actions().contains(&action) {
            return false;
        }
        match action {
            ConfirmationAction::RetryVerification => self.retry(),
            ConfirmationAction::BackToSearch => self.back_to_search(),
            ConfirmationAction::ContinueAnyway => self.continue_anyway(),
        }
        true
    }

    pub fn unmount(self) {}
}

impl Drop for ConfirmationHandle {
    fn drop(&mut self) {
        self.page.poller.stop(self.id);
    }
}
