use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
};
use booking_flow::{
    BookingData, BookingDataStore, BookingError, ConfirmationAction, ConfirmationHandle,
    ConfirmationState, GuardOptions, InMemoryClientStorage, MemoryNavigator, NavigationGuard,
    Navigator, PaymentConfirmation, PaymentPoller, PaymentVerification, RouteDecision, Service,
    Step, VerificationId,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long unattended state is kept in memory.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    /// A session nobody has used for this long is dropped with its pages.
    pub session_idle: Duration,
    /// A settled confirmation page is dropped once unread for this long.
    pub settled_page: Duration,
}

/// A confirmation page mounted on behalf of an HTTP client.
struct MountedPage {
    handle: ConfirmationHandle,
    navigator: Arc<MemoryNavigator>,
    last_seen: Instant,
}

/// One browser's client-local state: its booking data and the confirmation
/// pages it has open. Lives in memory only.
struct Session {
    store: Arc<BookingDataStore>,
    pages: DashMap<Uuid, MountedPage>,
    last_seen: Mutex<Instant>,
}

impl Session {
    fn new() -> Self {
        Self {
            store: Arc::new(BookingDataStore::new(Arc::new(InMemoryClientStorage::new()))),
            pages: DashMap::new(),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_seen)
    }
}

#[derive(Clone)]
pub struct AppState {
    poller: PaymentPoller,
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
    retention: Retention,
}

impl AppState {
    pub fn new(poller: PaymentPoller, retention: Retention) -> Self {
        Self {
            poller,
            sessions: Arc::new(DashMap::new()),
            retention,
        }
    }

    fn session(&self, raw: &str) -> Result<Arc<Session>, StatusCode> {
        let id = Uuid::parse_str(raw).map_err(|_| StatusCode::BAD_REQUEST)?;
        let session = self
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StatusCode::NOT_FOUND)?;
        session.touch();
        Ok(session)
    }

    /// Drop idle sessions, and settled confirmation pages nobody reads any
    /// more. Dropping a page stops its polling.
    pub fn sweep(&self) {
        let now = Instant::now();
        let retention = self.retention;

        self.sessions.retain(|session_id, session| {
            if session.idle_for(now) >= retention.session_idle {
                info!(%session_id, pages = session.pages.len(), "Session expired");
                return false;
            }
            session.pages.retain(|page_id, page| {
                let settled = page.handle.state().is_terminal();
                let keep = !settled
                    || now.saturating_duration_since(page.last_seen) < retention.settled_page;
                if !keep {
                    debug!(%session_id, %page_id, "Settled confirmation page evicted");
                }
                keep
            });
            true
        });
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                state.sweep();
            }
        })
    }

    /// Drop every session, which stops their polling.
    pub fn shutdown(&self) {
        self.sessions.clear();
        self.poller.stop_all();
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}", delete(end_session))
        .route("/sessions/{session_id}/routes/validate", post(validate_route))
        .route(
            "/sessions/{session_id}/bookings/{service}",
            get(get_booking).put(save_booking).delete(clear_booking),
        )
        .route(
            "/sessions/{session_id}/payments/verifications",
            post(start_verification),
        )
        .route(
            "/sessions/{session_id}/payments/verifications/{page_id}",
            get(get_verification).delete(stop_verification),
        )
        .route(
            "/sessions/{session_id}/payments/verifications/{page_id}/{action}",
            post(perform_action),
        )
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: Uuid,
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionResponse>) {
    let session_id = Uuid::new_v4();
    state.sessions.insert(session_id, Arc::new(Session::new()));
    info!(%session_id, "Session created");
    (StatusCode::CREATED, Json(SessionResponse { session_id }))
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let id = Uuid::parse_str(&session_id).map_err(|_| StatusCode::BAD_REQUEST)?;
    if state.sessions.remove(&id).is_some() {
        info!(session_id = %id, "Session ended by client");
    }
    Ok(StatusCode::NO_CONTENT)
}

fn parse_service(raw: &str) -> Result<Service, StatusCode> {
    raw.parse().map_err(|e: BookingError| {
        info!(error = %e, "Unknown service requested");
        StatusCode::NOT_FOUND
    })
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    path: String,
    allowed_steps: Option<Vec<Step>>,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    decision: &'static str,
    step: Option<Step>,
    redirect_to: Option<String>,
    last_accessible_step: Option<Step>,
}

async fn validate_route(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, StatusCode> {
    let session = state.session(&session_id)?;
    let mut options = GuardOptions::new();
    if let Some(steps) = request.allowed_steps {
        options = options.allow_steps(steps);
    }
    let navigator = Arc::new(MemoryNavigator::new());
    let mut guard = NavigationGuard::new(session.store.clone(), navigator, options);

    let decision = guard.on_route_change(&request.path);
    let response = match decision {
        RouteDecision::Unresolved => ValidateResponse {
            decision: "unresolved",
            step: None,
            redirect_to: None,
            last_accessible_step: guard.find_last_accessible_step(),
        },
        RouteDecision::Allowed(step) => ValidateResponse {
            decision: "allowed",
            step: Some(step),
            redirect_to: None,
            last_accessible_step: guard.find_last_accessible_step(),
        },
        RouteDecision::Redirect { blocked, to } => ValidateResponse {
            decision: "redirect",
            step: Some(blocked),
            last_accessible_step: guard.current_step(),
            redirect_to: Some(to),
        },
    };

    info!(
        %session_id,
        path = %request.path,
        decision = response.decision,
        "Route validated"
    );
    Ok(Json(response))
}

async fn get_booking(
    State(state): State<AppState>,
    Path((session_id, service)): Path<(String, String)>,
) -> Result<Json<BookingData>, StatusCode> {
    let session = state.session(&session_id)?;
    let service = parse_service(&service)?;
    Ok(Json(session.store.load(service)))
}

async fn save_booking(
    State(state): State<AppState>,
    Path((session_id, service)): Path<(String, String)>,
    Json(fields): Json<Map<String, Value>>,
) -> Result<Json<BookingData>, StatusCode> {
    let session = state.session(&session_id)?;
    let service = parse_service(&service)?;
    match session.store.save(service, BookingData::from_map(fields)) {
        Ok(data) => Ok(Json(data)),
        Err(e) => {
            error!(%session_id, %service, error = %e, "Failed to save booking data");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn clear_booking(
    State(state): State<AppState>,
    Path((session_id, service)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    let session = state.session(&session_id)?;
    let service = parse_service(&service)?;
    match session.store.start_new_search(service) {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!(%session_id, %service, error = %e, "Failed to clear booking data");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
struct StartVerificationRequest {
    /// Raw query string the gateway redirected back with.
    #[serde(default)]
    query: String,
    service: Option<Service>,
}

#[derive(Debug, Serialize)]
struct StartVerificationResponse {
    page_id: Uuid,
    verification_id: VerificationId,
    reference: String,
}

async fn start_verification(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<StartVerificationRequest>,
) -> Result<(StatusCode, Json<StartVerificationResponse>), StatusCode> {
    let session = state.session(&session_id)?;
    let navigator = Arc::new(MemoryNavigator::new());
    let page = PaymentConfirmation::new(
        state.poller.clone(),
        session.store.clone(),
        navigator.clone(),
    );

    let handle = match page.mount(&request.query, request.service) {
        Ok(handle) => handle,
        Err(BookingError::MissingReference) => {
            warn!(%session_id, service = ?request.service, "No payment reference supplied");
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
        Err(e) => {
            error!(%session_id, error = %e, "Failed to start payment verification");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let page_id = Uuid::new_v4();
    let verification_id = handle.verification_id();
    let reference = handle.reference().to_string();
    session.pages.insert(
        page_id,
        MountedPage {
            handle,
            navigator,
            last_seen: Instant::now(),
        },
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartVerificationResponse {
            page_id,
            verification_id,
            reference,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct VerificationView {
    page_id: Uuid,
    verification_id: VerificationId,
    /// Present while the gateway is still being polled.
    verification: Option<PaymentVerification>,
    #[serde(flatten)]
    state: ConfirmationState,
    message: String,
    actions: &'static [ConfirmationAction],
    redirect_to: Option<String>,
}

impl VerificationView {
    fn of(poller: &PaymentPoller, page_id: Uuid, page: &MountedPage) -> Self {
        let current = page.handle.state();
        Self {
            page_id,
            verification_id: page.handle.verification_id(),
            verification: poller.status(page.handle.verification_id()),
            message: current.message(),
            actions: current.actions(),
            redirect_to: page.navigator.current(),
            state: current,
        }
    }
}

fn parse_page_id(raw: &str) -> Result<Uuid, StatusCode> {
    Uuid::parse_str(raw).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn get_verification(
    State(state): State<AppState>,
    Path((session_id, page_id)): Path<(String, String)>,
) -> Result<Json<VerificationView>, StatusCode> {
    let session = state.session(&session_id)?;
    let page_id = parse_page_id(&page_id)?;
    let mut page = session.pages.get_mut(&page_id).ok_or(StatusCode::NOT_FOUND)?;
    page.last_seen = Instant::now();
    Ok(Json(VerificationView::of(&state.poller, page_id, &page)))
}

async fn stop_verification(
    State(state): State<AppState>,
    Path((session_id, page_id)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    let session = state.session(&session_id)?;
    let page_id = parse_page_id(&page_id)?;
    if session.pages.remove(&page_id).is_some() {
        info!(%session_id, %page_id, "Confirmation page closed by client");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn perform_action(
    State(state): State<AppState>,
    Path((session_id, page_id, action)): Path<(String, String, String)>,
) -> Result<Json<VerificationView>, StatusCode> {
    let session = state.session(&session_id)?;
    let page_id = parse_page_id(&page_id)?;
    let action = ConfirmationAction::from_slug(&action).ok_or(StatusCode::NOT_FOUND)?;
    let mut page = session.pages.get_mut(&page_id).ok_or(StatusCode::NOT_FOUND)?;

    if !page.handle.perform(action) {
        info!(%session_id, %page_id, action = action.slug(), "Action not offered in current state");
        return Err(StatusCode::CONFLICT);
    }
    page.last_seen = Instant::now();
    info!(%session_id, %page_id, action = action.slug(), "Confirmation action performed");
    Ok(Json(VerificationView::of(&state.poller, page_id, &page)))
}
