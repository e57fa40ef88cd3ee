//! Resource description service
//!
//! The collector never talks to cloud APIs directly. It asks a describer
//! for the inventory of one resource type in one account and region; how
//! the describer obtains cross-account credentials is its own business.

use crate::error::{CollectionError, ConfigError};
use crate::http::{build_client, sanitize_for_log};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use url::Url;

/// Where to collect from: `(accountId, roleName, region)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionTarget {
    pub account_id: String,
    pub role_name: String,
    pub region: String,
}

impl CollectionTarget {
    pub fn new(account_id: &str, role_name: &str, region: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            region: region.to_string(),
        }
    }

    /// Reject targets that would address no account, role or region.
    pub fn validate(&self) -> Result<(), CollectionError> {
        let fields = [
            ("account", &self.account_id),
            ("role", &self.role_name),
            ("region", &self.region),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(CollectionError::InvalidTarget { field: *field }),
            None => Ok(()),
        }
    }

    /// ARN of the role installed in the customer account.
    pub fn role_arn(&self) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, self.role_name)
    }
}

/// External collaborator returning the raw describe result for a resource
/// type.
pub trait ResourceDescriber: Send + Sync {
    fn describe(
        &self,
        target: &CollectionTarget,
        resource_type: &str,
    ) -> impl Future<Output = Result<Value, CollectionError>> + Send;
}

/// Describer backed by an inventory HTTP service:
/// `GET <base>/accounts/<account>/regions/<region>/resources/<type>?roleArn=<arn>`.
#[derive(Clone)]
pub struct HttpDescriber {
    client: Client,
    base_url: Url,
}

impl HttpDescriber {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            field: "describer_url".to_string(),
            message,
        };

        let base_url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid(format!("{} cannot be used as a base URL", base_url)));
        }
        let client = build_client().map_err(|e| invalid(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Request URL for one target and resource type.
    pub fn describe_url(&self, target: &CollectionTarget, resource_type: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "accounts",
                target.account_id.as_str(),
                "regions",
                target.region.as_str(),
                "resources",
                resource_type,
            ]);
        }
        url.query_pairs_mut()
            .append_pair("roleArn", &target.role_arn());
        url
    }
}

impl ResourceDescriber for HttpDescriber {
    async fn describe(
        &self,
        target: &CollectionTarget,
        resource_type: &str,
    ) -> Result<Value, CollectionError> {
        let url = self.describe_url(target, resource_type);
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("Describe error: {} - {}", status, sanitize_for_log(&body));
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollectionError::RoleAssumption {
                    role_arn: target.role_arn(),
                    message: sanitize_for_log(&body),
                },
                StatusCode::TOO_MANY_REQUESTS => CollectionError::Throttled {
                    message: sanitize_for_log(&body),
                },
                other => CollectionError::Api {
                    status: other.as_u16(),
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| CollectionError::MalformedResponse {
            message: format!("invalid JSON: {}", e),
        })
    }
}
