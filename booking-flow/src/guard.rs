use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    navigator::Navigator,
    route::{self, BookingRoute},
    service::{Service, Step},
    store::BookingDataStore,
    topology::flow,
};

/// Called with `(target, current)` whenever a step is refused.
pub type BlockedCallback = Arc<dyn Fn(Step, Option<Step>) + Send + Sync>;

/// Per-guard configuration.
#[derive(Clone, Default)]
pub struct GuardOptions {
    /// Force the service instead of deriving it from the path.
    pub service: Option<Service>,
    /// When set, only these steps (plus the entry step) may be entered.
    pub allowed_steps: Option<Vec<Step>>,
    pub on_navigation_blocked: Option<BlockedCallback>,
}

impl GuardOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }

    pub fn allow_steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.allowed_steps = Some(steps.into_iter().collect());
        self
    }

    pub fn on_navigation_blocked<F>(mut self, callback: F) -> Self
    where
        F: Fn(Step, Option<Step>) + Send + Sync + 'static,
    {
        self.on_navigation_blocked = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for GuardOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardOptions")
            .field("service", &self.service)
            .field("allowed_steps", &self.allowed_steps)
            .field("on_navigation_blocked", &self.on_navigation_blocked.is_some())
            .finish()
    }
}

/// Outcome of checking a path against the booking data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// The path is not a booking step; nothing to enforce.
    Unresolved,
    Allowed(Step),
    /// `blocked` may not be entered yet; go to `to` instead.
    Redirect { blocked: Step, to: String },
}

/// Keeps the user on a step whose prerequisites are satisfied.
///
/// Holds the route it last saw. `on_route_change` classifies a new path and
/// redirects at most once; the `navigate_*` helpers move through the
/// service's step order. None of the public methods fail: an unknown route
/// is a no-op and a refused step is a callback plus a redirect.
pub struct NavigationGuard {
    store: Arc<BookingDataStore>,
    navigator: Arc<dyn Navigator>,
    options: GuardOptions,
    route: Option<BookingRoute>,
}

impl NavigationGuard {
    pub fn new(
        store: Arc<BookingDataStore>,
        navigator: Arc<dyn Navigator>,
        options: GuardOptions,
    ) -> Self {
        Self {
            store,
            navigator,
            options,
            route: None,
        }
    }

    /// Resolve `path` against the configured service override.
    fn resolve(&self, path: &str) -> Option<BookingRoute> {
        let parsed = route::parse(path);
        match (self.options.service, parsed) {
            (None, parsed) => parsed,
            (Some(service), Some(parsed)) if parsed.service == service => Some(parsed),
            (Some(service), _) => Some(BookingRoute {
                service,
                step: None,
                resource_id: None,
            }),
        }
    }

    pub fn service(&self) -> Option<Service> {
        self.route.as_ref().map(|r| r.service).or(self.options.service)
    }

    pub fn current_step(&self) -> Option<Step> {
        self.route.as_ref().and_then(|r| r.step)
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.route.as_ref().and_then(|r| r.resource_id.as_deref())
    }

    fn can_reach(&self, service: Service, resource_id: Option<&str>, step: Step) -> bool {
        let flow = flow(service);
        if step == flow.entry_step() {
            return true;
        }
        let listed = self
            .options
            .allowed_steps
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&step));
        if !listed {
            return false;
        }
        self.store
            .has_required_data_for_step(step, service, resource_id)
    }

    fn last_reachable(&self, service: Service, resource_id: Option<&str>) -> Option<Step> {
        flow(service)
            .steps()
            .rev()
            .find(|step| self.can_reach(service, resource_id, *step))
    }

    /// Whether `step` of the current service may be entered right now.
    pub fn can_navigate_to_step(&self, step: Step) -> bool {
        match self.service() {
            Some(service) => self.can_reach(service, self.resource_id(), step),
            None => false,
        }
    }

    /// Furthest step in the current service that may be entered. `None` only
    /// when no service is known.
    pub fn find_last_accessible_step(&self) -> Option<Step> {
        let service = self.service()?;
        self.last_reachable(service, self.resource_id())
    }

    /// Classify `path` without side effects.
    pub fn validate_route(&self, path: &str) -> RouteDecision {
        let Some(BookingRoute {
            service,
            step: Some(step),
            resource_id,
        }) = self.resolve(path)
        else {
            return RouteDecision::Unresolved;
        };

        let resource_id = resource_id.as_deref();
        if self.can_reach(service, resource_id, step) {
            return RouteDecision::Allowed(step);
        }

        let to = self
            .last_reachable(service, resource_id)
            .map(|fallback| route::get_step_url(service, fallback, resource_id))
            .unwrap_or_else(|| route::service_root(service));
        RouteDecision::Redirect { blocked: step, to }
    }

    /// React to the router landing on `path`.
    pub fn on_route_change(&mut self, path: &str) -> RouteDecision {
        let previous_step = self.current_step();
        self.route = self.resolve(path);

        let decision = self.validate_route(path);
        if let RouteDecision::Redirect { blocked, to } = &decision {
            info!(
                service = ?self.service(),
                step = %blocked,
                redirect = %to,
                "Booking step blocked, redirecting"
            );
            self.notify_blocked(*blocked, previous_step);
            self.navigator.replace(to);
            self.route = self.resolve(to);
        }
        decision
    }

    fn notify_blocked(&self, target: Step, current: Option<Step>) {
        if let Some(callback) = &self.options.on_navigation_blocked {
            callback(target, current);
        }
    }

    /// Push the canonical URL for `step`. Unless `force` is set the step
    /// must pass [`Self::can_navigate_to_step`].
    pub fn navigate_to_step(&mut self, step: Step, force: bool) -> bool {
        let Some(service) = self.service() else {
            debug!(%step, "No booking service resolved, ignoring navigation");
            return false;
        };
        if !flow(service).contains(step) {
            debug!(%service, %step, "Step is not part of this service");
            return false;
        }

        if !force && !self.can_navigate_to_step(step) {
            info!(%service, %step, "Navigation to booking step denied");
            self.notify_blocked(step, self.current_step());
            return false;
        }

        let url = route::get_step_url(service, step, self.resource_id());
        self.navigator.push(&url);
        self.route = self.resolve(&url);
        true
    }

    /// Advance one step, subject to validation.
    pub fn navigate_to_next_step(&mut self) -> bool {
        let next = self
            .service()
            .zip(self.current_step())
            .and_then(|(service, step)| flow(service).next(step));
        match next {
            Some(step) => self.navigate_to_step(step, false),
            None => false,
        }
    }

    /// Go back one step. Always allowed so earlier input can be corrected.
    pub fn navigate_to_previous_step(&mut self) -> bool {
        let previous = self
            .service()
            .zip(self.current_step())
            .and_then(|(service, step)| flow(service).previous(step));
        match previous {
            Some(step) => self.navigate_to_step(step, true),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{BookingData, fields},
        navigator::MemoryNavigator,
        storage::InMemoryClientStorage,
    };
    use serde_json::json;
    use std::sync::Mutex;

    fn setup(options: GuardOptions) -> (NavigationGuard, Arc<BookingDataStore>, Arc<MemoryNavigator>) {
        let store = Arc::new(BookingDataStore::new(Arc::new(InMemoryClientStorage::new())));
        let navigator = Arc::new(MemoryNavigator::new());
        let guard = NavigationGuard::new(store.clone(), navigator.clone(), options);
        (guard, store, navigator)
    }

    fn save(store: &BookingDataStore, service: Service, pairs: &[(&str, serde_json::Value)]) {
        let mut data = BookingData::new();
        for (key, value) in pairs {
            data.set(*key, value).unwrap();
        }
        store.save(service, data).unwrap();
    }

    #[test]
    fn unparseable_routes_are_left_alone() {
        let (mut guard, _, navigator) = setup(GuardOptions::new());
        assert_eq!(guard.on_route_change("/articles/best-beaches"), RouteDecision::Unresolved);
        assert_eq!(guard.on_route_change("/lodging/h-1/unknown"), RouteDecision::Unresolved);
        assert!(navigator.history().is_empty());
        assert_eq!(guard.find_last_accessible_step(), Some(Step::Details));
    }

    #[test]
    fn no_service_means_nothing_is_accessible() {
        let (mut guard, _, _) = setup(GuardOptions::new());
        guard.on_route_change("/deals");
        assert_eq!(guard.find_last_accessible_step(), None);
        assert!(!guard.can_navigate_to_step(Step::Search));
        assert!(!guard.navigate_to_next_step());
    }

    #[test]
    fn entry_step_is_always_reachable() {
        let (mut guard, store, _) = setup(GuardOptions::new().allow_steps(Vec::new()));
        store
            .storage()
            .set_item("booking:insurance", "garbage")
            .unwrap();
        assert_eq!(guard.on_route_change("/insurance/plans"), RouteDecision::Allowed(Step::Plans));
        assert!(guard.can_navigate_to_step(Step::Plans));
    }

    #[test]
    fn blocked_route_redirects_to_last_satisfied_step() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let options = GuardOptions::new()
            .on_navigation_blocked(move |target, current| recorded.lock().unwrap().push((target, current)));
        let (mut guard, store, navigator) = setup(options);
        save(&store, Service::Visa, &[(fields::VISA_TYPE, json!("tourist"))]);

        guard.on_route_change("/visa/personal");
        let decision = guard.on_route_change("/visa/review");

        assert_eq!(
            decision,
            RouteDecision::Redirect {
                blocked: Step::Review,
                to: "/visa/personal".to_string()
            }
        );
        assert_eq!(navigator.current().as_deref(), Some("/visa/personal"));
        assert_eq!(guard.current_step(), Some(Step::Personal));
        assert_eq!(*calls.lock().unwrap(), vec![(Step::Review, Some(Step::Personal))]);
    }

    #[test]
    fn allow_list_narrows_reachable_steps() {
        let (mut guard, store, _) = setup(GuardOptions::new().allow_steps([Step::TripDetails]));
        save(
            &store,
            Service::Insurance,
            &[
                (fields::SELECTED_PLAN, json!("gold")),
                (fields::TRIP_DETAILS, json!({"destination": "Lisbon"})),
            ],
        );
        guard.on_route_change("/insurance/trip-details");

        assert!(guard.can_navigate_to_step(Step::TripDetails));
        assert!(!guard.can_navigate_to_step(Step::Travelers));
        assert_eq!(guard.find_last_accessible_step(), Some(Step::TripDetails));
    }

    #[test]
    fn forward_navigation_is_validated() {
        let blocked = Arc::new(Mutex::new(None));
        let seen = blocked.clone();
        let options = GuardOptions::new()
            .on_navigation_blocked(move |target, current| *seen.lock().unwrap() = Some((target, current)));
        let (mut guard, store, navigator) = setup(options);

        guard.on_route_change("/lodging/h-9");
        assert!(!guard.navigate_to_next_step());
        assert_eq!(*blocked.lock().unwrap(), Some((Step::Guests, Some(Step::Details))));
        assert!(navigator.history().is_empty());

        save(&store, Service::Lodging, &[(fields::SELECTED_ROOM, json!("deluxe"))]);
        assert!(guard.navigate_to_next_step());
        assert_eq!(navigator.current().as_deref(), Some("/lodging/h-9/guests"));
        assert_eq!(guard.current_step(), Some(Step::Guests));
    }

    #[test]
    fn forced_navigation_skips_the_gate() {
        let (mut guard, _, navigator) = setup(GuardOptions::new());
        guard.on_route_change("/visa/start");

        assert!(!guard.navigate_to_step(Step::Payment, false));
        assert!(guard.navigate_to_step(Step::Payment, true));
        assert_eq!(navigator.current().as_deref(), Some("/visa/payment"));
        assert!(!guard.navigate_to_step(Step::Guests, true));
    }

    #[test]
    fn service_override_ignores_other_services() {
        let (mut guard, _, navigator) = setup(GuardOptions::new().service(Service::Visa));
        assert_eq!(guard.on_route_change("/insurance/review"), RouteDecision::Unresolved);
        assert!(navigator.history().is_empty());
        assert_eq!(guard.service(), Some(Service::Visa));
        assert_eq!(guard.find_last_accessible_step(), Some(Step::Start));
    }
}
