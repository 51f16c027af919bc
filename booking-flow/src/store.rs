use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::{
    data::BookingData,
    error::Result,
    service::{Service, Step},
    storage::{self, ClientStorage, keys},
    topology::flow,
};

/// Per-service booking data persisted in client storage.
///
/// Reads are tolerant: missing, unreadable or malformed records load as an
/// empty [`BookingData`]. Writes for one service are serialized so that two
/// concurrent step submissions cannot lose each other's fields.
pub struct BookingDataStore {
    storage: Arc<dyn ClientStorage>,
    locks: [Mutex<()>; Service::ALL.len()],
}

impl BookingDataStore {
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        Self {
            storage,
            locks: Default::default(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ClientStorage> {
        &self.storage
    }

    fn lock(&self, service: Service) -> MutexGuard<'_, ()> {
        self.locks[service as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn load(&self, service: Service) -> BookingData {
        let key = keys::booking_data(service);
        let raw = match self.storage.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BookingData::new(),
            Err(e) => {
                warn!(%service, error = %e, "Failed to read booking data, treating as empty");
                return BookingData::new();
            }
        };

        BookingData::parse_lenient(&raw).unwrap_or_else(|| {
            warn!(%service, "Stored booking data is corrupted, treating as empty");
            BookingData::new()
        })
    }

    /// Merge `partial` into the stored record and return the result.
    pub fn save(&self, service: Service, partial: BookingData) -> Result<BookingData> {
        let _guard = self.lock(service);
        let mut data = self.load(service);
        data.merge(partial);
        self.storage
            .set_item(&keys::booking_data(service), &data.to_json()?)?;
        debug!(%service, "Booking data saved");
        Ok(data)
    }

    pub fn clear(&self, service: Service) -> Result<()> {
        let _guard = self.lock(service);
        self.storage.remove_item(&keys::booking_data(service))?;
        debug!(%service, "Booking data cleared");
        Ok(())
    }

    /// Drop everything collected for `service`, including any pending
    /// payment references.
    pub fn start_new_search(&self, service: Service) -> Result<()> {
        self.clear(service)?;
        storage::clear_references(self.storage.as_ref(), service)
    }

    /// Booking finished: return the final record and forget it.
    pub fn complete(&self, service: Service) -> Result<BookingData> {
        let data = self.load(service);
        self.start_new_search(service)?;
        Ok(data)
    }

    pub fn has_required_data_for_step(
        &self,
        step: Step,
        service: Service,
        resource_id: Option<&str>,
    ) -> bool {
        let data = self.load(service);
        flow(service).has_required_data(step, &data, resource_id)
    }

    /// Persist the reference handed out by the gateway so a confirmation
    /// page can resume after a full page navigation.
    pub fn save_reference(&self, service: Service, reference: &str) -> Result<()> {
        self.storage
            .set_item(&keys::booking_reference(service), reference)?;
        self.storage.set_item(keys::PAYMENT_REFERENCE, reference)
    }

    /// Most specific persisted reference: the service's own key first, then
    /// the shared payment key.
    pub fn load_reference(&self, service: Option<Service>) -> Option<String> {
        let service_key = service.map(keys::booking_reference);
        let candidates = service_key
            .as_deref()
            .into_iter()
            .chain(std::iter::once(keys::PAYMENT_REFERENCE));

        for key in candidates {
            match self.storage.get_item(key) {
                Ok(Some(reference)) if !reference.trim().is_empty() => return Some(reference),
                Ok(_) => {}
                Err(e) => warn!(key, error = %e, "Failed to read payment reference"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::fields, storage::InMemoryClientStorage};
    use serde_json::json;

    fn store() -> (BookingDataStore, Arc<InMemoryClientStorage>) {
        let storage = Arc::new(InMemoryClientStorage::new());
        (BookingDataStore::new(storage.clone()), storage)
    }

    #[test]
    fn corrupted_record_loads_empty() {
        let (store, storage) = store();
        storage
            .set_item(&keys::booking_data(Service::Lodging), "{\"selectedRoom\":")
            .unwrap();
        assert!(store.load(Service::Lodging).is_empty());
        assert!(store.has_required_data_for_step(Step::Search, Service::Lodging, None));
    }

    #[test]
    fn save_merges_per_service() {
        let (store, _) = store();
        let mut first = BookingData::new();
        first.set(fields::VISA_TYPE, "tourist").unwrap();
        store.save(Service::Visa, first).unwrap();

        let mut second = BookingData::new();
        second.set(fields::PERSONAL_INFO, json!({"name": "Ada"})).unwrap();
        second.set(fields::VISA_TYPE, "business").unwrap();
        let merged = store.save(Service::Visa, second).unwrap();

        assert_eq!(merged.get::<String>(fields::VISA_TYPE).as_deref(), Some("business"));
        assert_eq!(store.load(Service::Visa), merged);
        assert!(store.load(Service::Insurance).is_empty());
    }

    #[test]
    fn concurrent_saves_keep_every_field() {
        let (store, _) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut data = BookingData::new();
                    data.set(format!("field{i}"), i).unwrap();
                    store.save(Service::Insurance, data).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let data = store.load(Service::Insurance);
        for i in 0..8 {
            assert_eq!(data.get::<i32>(&format!("field{i}")), Some(i));
        }
    }

    #[test]
    fn completing_clears_data_and_references() {
        let (store, _) = store();
        let mut data = BookingData::new();
        data.set(fields::SELECTED_PLAN, "gold").unwrap();
        store.save(Service::Insurance, data).unwrap();
        store.save_reference(Service::Insurance, "INS-77").unwrap();
        assert_eq!(store.load_reference(Some(Service::Insurance)).as_deref(), Some("INS-77"));

        let last = store.complete(Service::Insurance).unwrap();
        assert_eq!(last.get::<String>(fields::SELECTED_PLAN).as_deref(), Some("gold"));
        assert!(store.load(Service::Insurance).is_empty());
        assert_eq!(store.load_reference(Some(Service::Insurance)), None);
        assert_eq!(store.load_reference(None), None);
    }
}
