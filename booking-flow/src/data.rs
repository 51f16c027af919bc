use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Field names written by the individual step submissions.
pub mod fields {
    pub const SELECTED_ROOM: &str = "selectedRoom";
    pub const GUEST_INFO: &str = "guestInfo";
    pub const RENTAL_PERIOD: &str = "rentalPeriod";
    pub const DRIVER_INFO: &str = "driverInfo";
    pub const VISA_TYPE: &str = "visaType";
    pub const PERSONAL_INFO: &str = "personalInfo";
    pub const PASSPORT_INFO: &str = "passportInfo";
    pub const APPOINTMENT: &str = "appointment";
    pub const SELECTED_PLAN: &str = "selectedPlan";
    pub const TRIP_DETAILS: &str = "tripDetails";
    pub const TRAVELERS: &str = "travelers";
    pub const PAYMENT_METHOD: &str = "paymentMethod";
    pub const BOOKING_REFERENCE: &str = "bookingReference";
}

/// Accumulated form data for one service's booking flow.
///
/// A flat JSON object. Steps only ever add or overwrite top-level fields, so
/// merging is a shallow last-write-wins over keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingData {
    fields: Map<String, Value>,
}

impl BookingData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Parse persisted JSON. Anything that is not a JSON object counts as
    /// empty; callers never see a parse error.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(fields)) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.fields.insert(key.into(), value);
        Ok(())
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.fields
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// True when `key` holds something a step could have submitted: not
    /// null, not an empty string, not an empty object or array.
    pub fn has(&self, key: &str) -> bool {
        match self.fields.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }

    pub fn has_all(&self, keys: &[&str]) -> bool {
        keys.iter().all(|key| self.has(key))
    }

    /// Shallow merge; fields in `other` replace fields already present.
    pub fn merge(&mut self, other: BookingData) {
        self.fields.extend(other.fields);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}
