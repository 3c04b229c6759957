//! Managed identity tokens.
//!
//! The endpoint is discovered the same way the Azure SDKs do it:
//!
//! * App Service and Functions set `IDENTITY_ENDPOINT` and `IDENTITY_HEADER`
//! * AAD pod identity may move IMDS with `AZURE_POD_IDENTITY_AUTHORITY_HOST`
//! * everything else talks to IMDS on `169.254.169.254`

use crate::{
    credential::{parse_endpoint, TokenCredential},
    error::{Result, TokenError},
    token::{parse_token_response, AccessToken},
};

use reqwest::{blocking::Client, Url};
use std::{env, fmt};

pub const IMDS_HOST: &str = "http://169.254.169.254";
const IMDS_PATH: &str = "/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

const IDENTITY_ENDPOINT: &str = "IDENTITY_ENDPOINT";
const IDENTITY_HEADER: &str = "IDENTITY_HEADER";
const POD_IDENTITY_AUTHORITY_HOST: &str = "AZURE_POD_IDENTITY_AUTHORITY_HOST";

#[derive(Clone, PartialEq)]
pub enum ManagedIdentitySource {
    /// Instance Metadata Service
    Imds { endpoint: Url },
    /// App Service / Functions local token service
    AppService { endpoint: Url, secret: String },
}

impl ManagedIdentitySource {
    pub fn from_env() -> Result<Self> {
        if let (Ok(endpoint), Ok(secret)) = (env::var(IDENTITY_ENDPOINT), env::var(IDENTITY_HEADER))
        {
            log::debug!("Managed identity: App Service endpoint {}", endpoint);
            return Ok(ManagedIdentitySource::AppService {
                endpoint: parse_endpoint(&endpoint)?,
                secret,
            });
        }

        let host = match env::var(POD_IDENTITY_AUTHORITY_HOST) {
            Ok(host) => {
                log::debug!("Managed identity: pod identity host {}", host);
                host
            }
            Err(_) => IMDS_HOST.into(),
        };
        let endpoint = format!("{}{}", host.trim_end_matches('/'), IMDS_PATH);
        Ok(ManagedIdentitySource::Imds {
            endpoint: parse_endpoint(&endpoint)?,
        })
    }

    fn endpoint(&self) -> &Url {
        match self {
            ManagedIdentitySource::Imds { endpoint } => endpoint,
            ManagedIdentitySource::AppService { endpoint, .. } => endpoint,
        }
    }
}

impl fmt::Debug for ManagedIdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedIdentitySource::Imds { endpoint } => {
                f.debug_struct("Imds").field("endpoint", endpoint).finish()
            }
            ManagedIdentitySource::AppService { endpoint, .. } => f
                .debug_struct("AppService")
                .field("endpoint", endpoint)
                .field("secret", &"[REDACTED]")
                .finish(),
        }
    }
}

/// System assigned managed identity.
#[derive(Debug)]
pub struct ManagedIdentityCredential {
    http: Client,
    source: ManagedIdentitySource,
}

impl ManagedIdentityCredential {
    pub fn new(http: Client) -> Result<Self> {
        log::info!("Creating ManagedIdentityCredential...");
        Ok(Self::with_source(http, ManagedIdentitySource::from_env()?))
    }

    pub fn with_source(http: Client, source: ManagedIdentitySource) -> Self {
        ManagedIdentityCredential { http, source }
    }
}

impl TokenCredential for ManagedIdentityCredential {
    fn get_token(&self, resource: &str) -> Result<AccessToken> {
        // the managed identity endpoints take a resource, not a scope
        let resource = resource.strip_suffix("/.default").unwrap_or(resource);
        let request = match &self.source {
            ManagedIdentitySource::Imds { endpoint } => self
                .http
                .get(endpoint.clone())
                .header("Metadata", "true")
                .query(&[("api-version", IMDS_API_VERSION), ("resource", resource)]),
            ManagedIdentitySource::AppService { endpoint, secret } => self
                .http
                .get(endpoint.clone())
                .header("X-IDENTITY-HEADER", secret.as_str())
                .query(&[("api-version", APP_SERVICE_API_VERSION), ("resource", resource)]),
        };

        let endpoint = self.source.endpoint().as_str();
        log::debug!("Managed identity: requesting token from {}", endpoint);
        let response = match request.send() {
            Ok(response) => response,
            Err(e) => {
                return Err(TokenError::AuthToken(format!(
                    "{}: managed identity token request failed (is this running in Azure?): {}",
                    endpoint, e
                )))
            }
        };
        parse_token_response(response, endpoint)
    }
}
