use dashmap::DashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::service::Service;

/// Storage keys shared by the store and the confirmation flow.
pub mod keys {
    use crate::service::Service;

    /// Reference persisted before leaving for the payment gateway.
    pub const PAYMENT_REFERENCE: &str = "payment:reference";

    pub fn booking_data(service: Service) -> String {
        format!("booking:{}", service.slug())
    }

    pub fn booking_reference(service: Service) -> String {
        format!("booking:{}:reference", service.slug())
    }
}

/// Key/value string storage with local-storage semantics: synchronous,
/// per-client, values are opaque strings.
pub trait ClientStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory implementation of ClientStorage
#[derive(Clone, Default)]
pub struct InMemoryClientStorage {
    items: Arc<DashMap<String, String>>,
}

impl InMemoryClientStorage {
    pub fn new() -> Self {
        Self {
            items: Arc::new(DashMap::new()),
        }
    }
}

impl ClientStorage for InMemoryClientStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.get(key).map(|entry| entry.clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }
}

/// Directory-backed ClientStorage, one file per key.
#[derive(Debug, Clone)]
pub struct FileClientStorage {
    root: PathBuf,
}

impl FileClientStorage {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{name}.json"))
    }
}

impl ClientStorage for FileClientStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Remove the short-lived reference keys for a service.
pub fn clear_references(storage: &dyn ClientStorage, service: Service) -> Result<()> {
    storage.remove_item(&keys::booking_reference(service))?;
    storage.remove_item(keys::PAYMENT_REFERENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn ClientStorage) {
        assert_eq!(storage.get_item("booking:visa").unwrap(), None);

        storage.set_item("booking:visa", r#"{"visaType":"tourist"}"#).unwrap();
        assert_eq!(
            storage.get_item("booking:visa").unwrap().as_deref(),
            Some(r#"{"visaType":"tourist"}"#)
        );

        storage.remove_item("booking:visa").unwrap();
        storage.remove_item("booking:visa").unwrap();
        assert_eq!(storage.get_item("booking:visa").unwrap(), None);
    }

    #[test]
    fn in_memory_storage() {
        exercise(&InMemoryClientStorage::new());
    }

    #[test]
    fn file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileClientStorage::open(dir.path()).unwrap();
        exercise(&storage);

        storage.set_item(&keys::booking_reference(Service::Visa), "REF-1").unwrap();
        storage.set_item(&keys::booking_data(Service::Visa), "{}").unwrap();
        assert_eq!(
            storage.get_item("booking:visa:reference").unwrap().as_deref(),
            Some("REF-1")
        );
        assert_eq!(storage.get_item("booking:visa").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn clearing_references() {
        let storage = InMemoryClientStorage::new();
        storage.set_item(keys::PAYMENT_REFERENCE, "PAY-1").unwrap();
        storage.set_item(&keys::booking_reference(Service::Insurance), "INS-1").unwrap();

        clear_references(&storage, Service::Insurance).unwrap();
        assert_eq!(storage.get_item(keys::PAYMENT_REFERENCE).unwrap(), None);
        assert_eq!(
            storage.get_item(&keys::booking_reference(Service::Insurance)).unwrap(),
            None
        );
    }
}
