//! Static step table for every [`Service`].
//!
//! This is the single source of truth for step order, URL shape and the data
//! each step needs before it may be entered. The router, the navigation guard
//! and the next/previous helpers all read from here.

use crate::data::{BookingData, fields};
use crate::service::{Service, Step};

/// How a step is addressed in a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlTemplate {
    /// `/<service>`
    Root,
    /// `/<service>/<resourceId>`
    Resource,
    /// `/<service>/<resourceId>/<step>`
    ResourceStep,
    /// `/<service>/<step>`
    Step,
}

impl UrlTemplate {
    pub fn needs_resource(self) -> bool {
        matches!(self, UrlTemplate::Resource | UrlTemplate::ResourceStep)
    }
}

/// One row of the topology table.
#[derive(Debug, Clone, Copy)]
pub struct StepDef {
    pub step: Step,
    pub url: UrlTemplate,
    /// Fields that must be populated in the service's [`BookingData`].
    pub required_fields: &'static [&'static str],
}

impl StepDef {
    const fn new(step: Step, url: UrlTemplate, required_fields: &'static [&'static str]) -> Self {
        Self {
            step,
            url,
            required_fields,
        }
    }

    /// Data-completeness predicate for this step. Resource-addressed steps
    /// additionally need a resource id from the route.
    pub fn is_satisfied(&self, data: &BookingData, resource_id: Option<&str>) -> bool {
        if self.url.needs_resource() && resource_id.is_none_or(|id| id.trim().is_empty()) {
            return false;
        }
        data.has_all(self.required_fields)
    }
}

/// Ordered steps of one service.
#[derive(Debug)]
pub struct ServiceFlow {
    pub service: Service,
    /// Steps past the entry step live under a concrete resource id.
    pub resource_scoped: bool,
    steps: &'static [StepDef],
}

use UrlTemplate::{Resource, ResourceStep, Root};

static LODGING: ServiceFlow = ServiceFlow {
    service: Service::Lodging,
    resource_scoped: true,
    steps: &[
        StepDef::new(Step::Search, Root, &[]),
        StepDef::new(Step::Details, Resource, &[]),
        StepDef::new(Step::Guests, ResourceStep, &[fields::SELECTED_ROOM]),
        StepDef::new(
            Step::Payment,
            ResourceStep,
            &[fields::SELECTED_ROOM, fields::GUEST_INFO],
        ),
        StepDef::new(Step::Success, ResourceStep, &[fields::BOOKING_REFERENCE]),
    ],
};

static VEHICLE_RENTAL: ServiceFlow = ServiceFlow {
    service: Service::VehicleRental,
    resource_scoped: true,
    steps: &[
        StepDef::new(Step::Search, Root, &[]),
        StepDef::new(Step::Details, Resource, &[]),
        StepDef::new(Step::Contact, ResourceStep, &[fields::RENTAL_PERIOD]),
        StepDef::new(Step::Payment, ResourceStep, &[fields::DRIVER_INFO]),
        StepDef::new(Step::Success, ResourceStep, &[fields::BOOKING_REFERENCE]),
    ],
};

static VISA: ServiceFlow = ServiceFlow {
    service: Service::Visa,
    resource_scoped: false,
    steps: &[
        StepDef::new(Step::Start, UrlTemplate::Step, &[]),
        StepDef::new(Step::Personal, UrlTemplate::Step, &[fields::VISA_TYPE]),
        StepDef::new(
            Step::Passport,
            UrlTemplate::Step,
            &[fields::VISA_TYPE, fields::PERSONAL_INFO],
        ),
        StepDef::new(
            Step::Appointment,
            UrlTemplate::Step,
            &[fields::VISA_TYPE, fields::PERSONAL_INFO, fields::PASSPORT_INFO],
        ),
        StepDef::new(
            Step::Review,
            UrlTemplate::Step,
            &[fields::PERSONAL_INFO, fields::PASSPORT_INFO, fields::APPOINTMENT],
        ),
        StepDef::new(
            Step::Payment,
            UrlTemplate::Step,
            &[fields::PERSONAL_INFO, fields::PASSPORT_INFO, fields::APPOINTMENT],
        ),
        StepDef::new(Step::Success, UrlTemplate::Step, &[fields::BOOKING_REFERENCE]),
    ],
};

static INSURANCE: ServiceFlow = ServiceFlow {
    service: Service::Insurance,
    resource_scoped: false,
    steps: &[
        StepDef::new(Step::Plans, UrlTemplate::Step, &[]),
        StepDef::new(Step::TripDetails, UrlTemplate::Step, &[fields::SELECTED_PLAN]),
        StepDef::new(
            Step::Travelers,
            UrlTemplate::Step,
            &[fields::SELECTED_PLAN, fields::TRIP_DETAILS],
        ),
        StepDef::new(
            Step::Review,
            UrlTemplate::Step,
            &[fields::SELECTED_PLAN, fields::TRIP_DETAILS, fields::TRAVELERS],
        ),
        StepDef::new(
            Step::Payment,
            UrlTemplate::Step,
            &[fields::SELECTED_PLAN, fields::TRIP_DETAILS, fields::TRAVELERS],
        ),
        StepDef::new(Step::Success, UrlTemplate::Step, &[fields::BOOKING_REFERENCE]),
    ],
};

/// Look up the flow for a service.
pub fn flow(service: Service) -> &'static ServiceFlow {
    match service {
        Service::Lodging => &LODGING,
        Service::VehicleRental => &VEHICLE_RENTAL,
        Service::Visa => &VISA,
        Service::Insurance => &INSURANCE,
    }
}

impl ServiceFlow {
    pub fn steps(&self) -> impl DoubleEndedIterator<Item = Step> + '_ {
        self.steps.iter().map(|def| def.step)
    }

    pub fn entry_step(&self) -> Step {
        self.steps[0].step
    }

    pub fn def(&self, step: Step) -> Option<&'static StepDef> {
        self.steps.iter().find(|def| def.step == step)
    }

    pub fn contains(&self, step: Step) -> bool {
        self.def(step).is_some()
    }

    pub fn position(&self, step: Step) -> Option<usize> {
        self.steps.iter().position(|def| def.step == step)
    }

    pub fn next(&self, step: Step) -> Option<Step> {
        let index = self.position(step)?;
        self.steps.get(index + 1).map(|def| def.step)
    }

    pub fn previous(&self, step: Step) -> Option<Step> {
        let index = self.position(step)?;
        index.checked_sub(1).map(|i| self.steps[i].step)
    }

    /// Step addressed by a bare `/<service>/<resourceId>` path, if any.
    pub(crate) fn resource_step(&self) -> Option<Step> {
        self.steps
            .iter()
            .find(|def| def.url == UrlTemplate::Resource)
            .map(|def| def.step)
    }

    /// Data-completeness check for `step`. Steps outside this flow are never
    /// satisfied; the entry step always is.
    pub fn has_required_data(
        &self,
        step: Step,
        data: &BookingData,
        resource_id: Option<&str>,
    ) -> bool {
        if step == self.entry_step() {
            return true;
        }
        self.def(step)
            .is_some_and(|def| def.is_satisfied(data, resource_id))
    }
}
