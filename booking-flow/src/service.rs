use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BookingError;

/// The independent booking domains. Each one owns a single linear step order
/// (see [`crate::topology`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    Lodging,
    VehicleRental,
    Visa,
    Insurance,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::Lodging,
        Service::VehicleRental,
        Service::Visa,
        Service::Insurance,
    ];

    /// Leading path segment and storage key-space for this service.
    pub fn slug(self) -> &'static str {
        match self {
            Service::Lodging => "lodging",
            Service::VehicleRental => "vehicle-rental",
            Service::Visa => "visa",
            Service::Insurance => "insurance",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|service| service.slug() == slug)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Service {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slug(s).ok_or_else(|| BookingError::UnknownService(s.to_string()))
    }
}

/// A named stage of a booking flow. Not every step belongs to every service;
/// membership and order come from the topology table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Search,
    Details,
    Guests,
    Contact,
    Start,
    Personal,
    Passport,
    Appointment,
    Plans,
    TripDetails,
    Travelers,
    Review,
    Payment,
    Success,
}

impl Step {
    const ALL: [Step; 14] = [
        Step::Search,
        Step::Details,
        Step::Guests,
        Step::Contact,
        Step::Start,
        Step::Personal,
        Step::Passport,
        Step::Appointment,
        Step::Plans,
        Step::TripDetails,
        Step::Travelers,
        Step::Review,
        Step::Payment,
        Step::Success,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Step::Search => "search",
            Step::Details => "details",
            Step::Guests => "guests",
            Step::Contact => "contact",
            Step::Start => "start",
            Step::Personal => "personal",
            Step::Passport => "passport",
            Step::Appointment => "appointment",
            Step::Plans => "plans",
            Step::TripDetails => "trip-details",
            Step::Travelers => "travelers",
            Step::Review => "review",
            Step::Payment => "payment",
            Step::Success => "success",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.slug() == slug)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Step {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slug(s).ok_or_else(|| BookingError::UnknownStep(s.to_string()))
    }
}
