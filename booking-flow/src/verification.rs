use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::Result, service::Service};

/// Status reported by the payment verification endpoint. Anything the
/// gateway sends that is not `success` or `failed` reads as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Success,
    Failed,
    #[serde(other)]
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub status: RemoteStatus,
    /// Confirmation details on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerificationResponse {
    pub fn pending() -> Self {
        Self {
            status: RemoteStatus::Pending,
            data: None,
            message: None,
        }
    }

    pub fn success(data: Value) -> Self {
        Self {
            status: RemoteStatus::Success,
            data: Some(data),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RemoteStatus::Failed,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Scope label sent alongside a reference.
pub fn scope_label(service: Option<Service>) -> &'static str {
    service.map(Service::slug).unwrap_or("general")
}

/// Backend contract for checking a payment reference.
///
/// An `Err` means the request itself did not complete (transport error,
/// bad response body); a declined payment is an `Ok` with
/// [`RemoteStatus::Failed`].
#[async_trait]
pub trait VerificationEndpoint: Send + Sync {
    async fn verify(&self, reference: &str, service: Option<Service>)
    -> Result<VerificationResponse>;
}

#[cfg(feature = "http")]
pub use http::HttpVerificationEndpoint;

#[cfg(feature = "http")]
mod http {
    use async_trait::async_trait;
    use tracing::debug;
    use url::Url;

    use super::{VerificationEndpoint, VerificationResponse, scope_label};
    use crate::error::{BookingError, Result};
    use crate::service::Service;

    /// `GET {base}/payments/verify/{reference}?service={slug|general}`
    #[derive(Debug, Clone)]
    pub struct HttpVerificationEndpoint {
        client: reqwest::Client,
        base_url: Url,
    }

    impl HttpVerificationEndpoint {
        pub fn new(base_url: &str) -> Result<Self> {
            Self::with_client(reqwest::Client::new(), base_url)
        }

        pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
            let base_url = Url::parse(base_url)
                .map_err(|e| BookingError::Config(format!("invalid verification URL: {e}")))?;
            if base_url.cannot_be_a_base() {
                return Err(BookingError::Config(format!(
                    "verification URL cannot be a base: {base_url}"
                )));
            }
            Ok(Self { client, base_url })
        }

        pub(crate) fn url_for(&self, reference: &str, service: Option<Service>) -> Url {
            let mut url = self.base_url.clone();
            if let Ok(mut segments) = url.path_segments_mut() {
                segments
                    .pop_if_empty()
                    .extend(["payments", "verify", reference]);
            }
            url.query_pairs_mut()
                .append_pair("service", scope_label(service));
            url
        }
    }

    #[async_trait]
    impl VerificationEndpoint for HttpVerificationEndpoint {
        async fn verify(
            &self,
            reference: &str,
            service: Option<Service>,
        ) -> Result<VerificationResponse> {
            let url = self.url_for(reference, service);
            debug!(%url, "Verifying payment reference");

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| BookingError::Verification(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(BookingError::Verification(format!(
                    "verification endpoint returned {status}"
                )));
            }

            response
                .json::<VerificationResponse>()
                .await
                .map_err(|e| BookingError::Verification(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_reads_as_pending() {
        let response: VerificationResponse =
            serde_json::from_str(r#"{"status":"processing"}"#).unwrap();
        assert_eq!(response.status, RemoteStatus::Pending);

        let response: VerificationResponse =
            serde_json::from_str(r#"{"status":"success","data":{"bookingId":"B-1"}}"#).unwrap();
        assert_eq!(response.status, RemoteStatus::Success);
        assert_eq!(response.data.unwrap()["bookingId"], "B-1");
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_endpoint_builds_urls() {
        let endpoint = HttpVerificationEndpoint::new("https://api.example.com/v1/").unwrap();
        assert_eq!(
            endpoint.url_for("PAY 1", Some(Service::VehicleRental)).as_str(),
            "https://api.example.com/v1/payments/verify/PAY%201?service=vehicle-rental"
        );
        assert_eq!(
            endpoint.url_for("T-9", None).as_str(),
            "https://api.example.com/v1/payments/verify/T-9?service=general"
        );
        assert!(HttpVerificationEndpoint::new("not a url").is_err());
    }
}
