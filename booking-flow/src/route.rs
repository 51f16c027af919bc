//! Path ⇄ `(service, step, resource id)` mapping.
//!
//! Route surface:
//! * resource-scoped services: `/<service>`, `/<service>/<id>`, `/<service>/<id>/<step>`
//! * flat services: `/<service>`, `/<service>/<step>`
//!
//! Anything that does not fit yields `None`; an unknown route is not an error.

use serde::{Deserialize, Serialize};

use crate::service::{Service, Step};
use crate::topology::{UrlTemplate, flow};

/// A path resolved against the topology table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRoute {
    pub service: Service,
    pub step: Option<Step>,
    pub resource_id: Option<String>,
}

fn segments(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Resolve a path. Returns `None` only when the leading segment is not a
/// known service; an unrecognised step leaves `step` empty.
pub fn parse(path: &str) -> Option<BookingRoute> {
    let segs = segments(path);
    let service = Service::from_slug(segs.first()?)?;
    let flow = flow(service);

    let rest = &segs[1..];
    let (step, resource_id) = if flow.resource_scoped {
        match rest {
            [] => (Some(flow.entry_step()), None),
            [id] => (flow.resource_step(), Some(id.to_string())),
            [id, slug] => {
                let step = Step::from_slug(slug).filter(|step| {
                    flow.def(*step)
                        .is_some_and(|def| def.url == UrlTemplate::ResourceStep)
                });
                (step, Some(id.to_string()))
            }
            [id, ..] => (None, Some(id.to_string())),
        }
    } else {
        match rest {
            [] => (Some(flow.entry_step()), None),
            [slug] => (Step::from_slug(slug).filter(|s| flow.contains(*s)), None),
            _ => (None, None),
        }
    };

    Some(BookingRoute {
        service,
        step,
        resource_id,
    })
}

pub fn get_service_type(path: &str) -> Option<Service> {
    segments(path).first().and_then(|s| Service::from_slug(s))
}

pub fn get_booking_step(path: &str) -> Option<Step> {
    parse(path).and_then(|route| route.step)
}

pub fn get_resource_id_from_route(path: &str) -> Option<String> {
    parse(path).and_then(|route| route.resource_id)
}

pub fn service_root(service: Service) -> String {
    format!("/{}", service.slug())
}

/// Ids are embedded verbatim as one path segment.
fn is_usable_resource_id(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains(['/', '?', '#'])
}

/// Canonical path for `step` of `service`.
///
/// Resource-addressed steps without a usable id, and steps that do not belong
/// to the service, degrade to the service root.
pub fn get_step_url(service: Service, step: Step, resource_id: Option<&str>) -> String {
    let root = service_root(service);
    let Some(def) = flow(service).def(step) else {
        return root;
    };
    let resource_id = resource_id.filter(|id| is_usable_resource_id(id));

    match (def.url, resource_id) {
        (UrlTemplate::Root, _) => root,
        (UrlTemplate::Step, _) => format!("{root}/{}", step.slug()),
        (UrlTemplate::Resource, Some(id)) => format!("{root}/{id}"),
        (UrlTemplate::ResourceStep, Some(id)) => format!("{root}/{id}/{}", step.slug()),
        (UrlTemplate::Resource | UrlTemplate::ResourceStep, None) => root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_resource_scoped_paths() {
        assert_eq!(get_service_type("/vehicle-rental/car-7/payment"), Some(Service::VehicleRental));
        assert_eq!(get_booking_step("/vehicle-rental/car-7/payment"), Some(Step::Payment));
        assert_eq!(
            get_resource_id_from_route("/vehicle-rental/car-7/payment").as_deref(),
            Some("car-7")
        );
        assert_eq!(get_booking_step("/lodging/h-12"), Some(Step::Details));
        assert_eq!(get_booking_step("/lodging"), Some(Step::Search));
        assert_eq!(get_booking_step("/lodging/h-12/guests?room=2"), Some(Step::Guests));
    }

    #[test]
    fn resolves_flat_paths() {
        assert_eq!(get_booking_step("/visa/passport"), Some(Step::Passport));
        assert_eq!(get_booking_step("/insurance/trip-details/"), Some(Step::TripDetails));
        assert_eq!(get_booking_step("/visa"), Some(Step::Start));
        assert_eq!(get_resource_id_from_route("/visa/passport"), None);
    }

    #[test]
    fn unknown_routes_are_none() {
        assert_eq!(get_service_type("/articles/top-10"), None);
        assert_eq!(get_service_type("/"), None);
        assert_eq!(get_booking_step("/visa/guests"), None);
        assert_eq!(get_booking_step("/lodging/h-12/contact"), None);
        assert_eq!(get_booking_step("/lodging/h-12/details"), None);
        assert_eq!(get_booking_step("/insurance/plans/extra"), None);
        assert!(parse("/lodging/h-12/nope").is_some_and(|r| r.step.is_none()));
    }

    #[test]
    fn missing_resource_degrades_to_root() {
        assert_eq!(get_step_url(Service::Lodging, Step::Guests, None), "/lodging");
        assert_eq!(get_step_url(Service::VehicleRental, Step::Details, Some("")), "/vehicle-rental");
        assert_eq!(get_step_url(Service::Lodging, Step::Payment, Some("a/b")), "/lodging");
        assert_eq!(get_step_url(Service::Visa, Step::Guests, None), "/visa");
    }

    #[test]
    fn urls_round_trip() {
        for service in Service::ALL {
            let flow = flow(service);
            let id = flow.resource_scoped.then_some("res-42");
            for step in flow.steps() {
                let url = get_step_url(service, step, id);
                assert_eq!(get_service_type(&url), Some(service), "{url}");
                assert_eq!(get_booking_step(&url), Some(step), "{url}");
                let expected_id = flow
                    .def(step)
                    .filter(|def| def.url.needs_resource())
                    .and(id)
                    .map(str::to_string);
                assert_eq!(get_resource_id_from_route(&url), expected_id, "{url}");
            }
        }
    }
}
