//! Shared AWS SDK configuration for the SQS and Glue clients.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::debug;

/// Static credentials supplied through configuration.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl StaticCredentials {
    /// Pair up optional config fields; both must be present.
    pub fn from_parts(access_key_id: Option<&str>, secret_access_key: Option<&str>) -> Option<Self> {
        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Self {
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret_access_key.to_string(),
            }),
            _ => None,
        }
    }
}

/// Load SDK configuration, falling back to the default credential chain
/// (environment, profile, instance role) when no static credentials are set.
pub async fn load_sdk_config(
    region: Option<&str>,
    credentials: Option<StaticCredentials>,
    endpoint: Option<&str>,
) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }

    if let Some(endpoint) = endpoint {
        debug!(endpoint = %endpoint, "Using custom AWS endpoint");
        loader = loader.endpoint_url(endpoint);
    }

    if let Some(credentials) = credentials {
        debug!("Using explicit AWS credentials");
        loader = loader.credentials_provider(aws_credential_types::Credentials::new(
            credentials.access_key_id,
            credentials.secret_access_key,
            None,
            None,
            "q2p-explicit-credentials",
        ));
    } else {
        debug!("Using default AWS credential chain");
    }

    loader.load().await
}

/// Error codes AWS services return for permission failures.
pub(crate) fn is_access_denied_code(code: Option<&str>) -> bool {
    matches!(
        code,
        Some(
            "AccessDenied"
                | "AccessDeniedException"
                | "UnauthorizedOperation"
                | "InvalidClientTokenId"
                | "UnrecognizedClientException"
                | "SignatureDoesNotMatch"
                | "ExpiredToken"
                | "KMS.AccessDeniedException"
        )
    )
}
