pub mod config;
pub mod confirmation;
pub mod data;
pub mod error;
pub mod guard;
pub mod navigator;
pub mod poller;
pub mod route;
pub mod service;
pub mod storage;
pub mod store;
pub mod topology;
pub mod verification;

// Re-export commonly used types
pub use config::{NetworkErrorPolicy, PollerConfig};
pub use confirmation::{
    ConfirmationAction, ConfirmationHandle, ConfirmationState, PaymentConfirmation,
};
pub use data::{BookingData, fields};
pub use error::{BookingError, Result};
pub use guard::{GuardOptions, NavigationGuard, RouteDecision};
pub use navigator::{MemoryNavigator, Navigator};
pub use poller::{
    PaymentPoller, PaymentVerification, VerificationCallbacks, VerificationFailure, VerificationId,
    VerificationRequest, VerificationStatus,
};
pub use route::{
    BookingRoute, get_booking_step, get_resource_id_from_route, get_service_type, get_step_url,
};
pub use service::{Service, Step};
pub use storage::{ClientStorage, FileClientStorage, InMemoryClientStorage};
pub use store::BookingDataStore;
pub use topology::{ServiceFlow, flow};
#[cfg(feature = "http")]
pub use verification::HttpVerificationEndpoint;
pub use verification::{RemoteStatus, VerificationEndpoint, VerificationResponse};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_lodging_walkthrough() {
        let store = Arc::new(BookingDataStore::new(Arc::new(InMemoryClientStorage::new())));
        let navigator = Arc::new(MemoryNavigator::new());
        let mut guard = NavigationGuard::new(store.clone(), navigator.clone(), GuardOptions::new());

        assert_eq!(guard.on_route_change("/lodging"), RouteDecision::Allowed(Step::Search));
        assert_eq!(
            guard.on_route_change("/lodging/h-3"),
            RouteDecision::Allowed(Step::Details)
        );

        let mut room = BookingData::new();
        room.set(fields::SELECTED_ROOM, json!({"type": "double"})).unwrap();
        store.save(Service::Lodging, room).unwrap();
        assert!(guard.navigate_to_next_step());

        let mut guests = BookingData::new();
        guests.set(fields::GUEST_INFO, json!({"adults": 2})).unwrap();
        store.save(Service::Lodging, guests).unwrap();
        assert!(guard.navigate_to_next_step());

        assert_eq!(navigator.current().as_deref(), Some("/lodging/h-3/payment"));
        assert_eq!(guard.current_step(), Some(Step::Payment));
        assert!(!guard.navigate_to_next_step());
        assert_eq!(guard.find_last_accessible_step(), Some(Step::Payment));
    }

    #[test]
    fn test_storage() {
        let storage = Arc::new(InMemoryClientStorage::new());
        let store = BookingDataStore::new(storage.clone());

        let mut data = BookingData::new();
        data.set(fields::SELECTED_PLAN, "silver").unwrap();
        store.save(Service::Insurance, data).unwrap();

        let raw = storage.get_item("booking:insurance").unwrap().unwrap();
        assert_eq!(raw, r#"{"selectedPlan":"silver"}"#);

        store.clear(Service::Insurance).unwrap();
        assert!(storage.get_item("booking:insurance").unwrap().is_none());
    }
}
