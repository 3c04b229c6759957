use crate::{
    error::{Result, TokenError},
    pfx::DecodedCertificate,
    token::{parse_token_response, AccessToken},
};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use regex::Regex;
use reqwest::{blocking::Client, Url};
use serde::Serialize;
use std::fmt;

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Lifetime of a client assertion, in seconds.
const ASSERTION_LIFETIME: i64 = 600;

/// Something that hands out bearer tokens for a resource.
pub trait TokenCredential {
    fn get_token(&self, resource: &str) -> Result<AccessToken>;
}

/// Formats a resource as a v2.0 endpoint scope.
pub fn scope_for(resource: &str) -> String {
    if resource.ends_with("/.default") {
        resource.to_string()
    } else {
        format!("{}/.default", resource)
    }
}

/// Parses an identity endpoint URL, accepting only http(s).
pub(crate) fn parse_endpoint(value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| TokenError::AuthConfig(format!("invalid endpoint {}: {}", value, e)))?;
    match url.scheme() {
        "https" | "http" => Ok(url),
        scheme => Err(TokenError::AuthConfig(format!(
            "invalid endpoint {}: unsupported scheme {}",
            value, scheme
        ))),
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let re = Regex::new(r"^[0-9A-Za-z.-]+$").unwrap();
    if re.is_match(tenant_id) {
        Ok(())
    } else {
        Err(TokenError::AuthConfig(format!(
            "invalid tenant id {:?}: only alphanumeric characters, '.' and '-' are allowed",
            tenant_id
        )))
    }
}

#[derive(Debug, Clone)]
pub struct ClientCertificateOptions {
    pub authority_host: String,
    /// Add the x5c header so the identity provider can validate by subject
    /// name and issuer instead of by thumbprint
    pub send_certificate_chain: bool,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    exp: i64,
    iat: i64,
    iss: &'a str,
    jti: String,
    nbf: i64,
    sub: &'a str,
}

/// Service principal credential using the certificate client assertion flow.
pub struct ClientCertificateCredential {
    http: Client,
    client_id: String,
    token_url: String,
    key: EncodingKey,
    thumbprint: String,
    chain: Option<Vec<String>>,
}

impl ClientCertificateCredential {
    pub fn new(
        http: Client,
        tenant_id: &str,
        client_id: &str,
        certificate: DecodedCertificate,
        options: &ClientCertificateOptions,
    ) -> Result<Self> {
        log::info!("Creating ClientCertificateCredential...");
        validate_tenant_id(tenant_id)?;
        if client_id.trim().is_empty() {
            return Err(TokenError::AuthConfig("client id is empty".into()));
        }
        let authority = parse_endpoint(&options.authority_host)?;
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority.as_str().trim_end_matches('/'),
            tenant_id
        );

        let rsa = certificate.key().rsa().map_err(|_| {
            TokenError::AuthConfig("certificate private key is not an RSA key".into())
        })?;
        let der = rsa
            .private_key_to_der()
            .map_err(|e| TokenError::AuthConfig(format!("private key: {}", e)))?;
        let key = EncodingKey::from_rsa_der(&der);

        let thumbprint = certificate
            .thumbprint()
            .map_err(|e| TokenError::AuthConfig(format!("certificate thumbprint: {}", e)))?;
        let chain = if options.send_certificate_chain {
            Some(
                certificate
                    .chain()
                    .map_err(|e| TokenError::AuthConfig(format!("certificate chain: {}", e)))?,
            )
        } else {
            None
        };
        log::debug!("Token endpoint {}, certificate x5t {}", token_url, thumbprint);

        Ok(ClientCertificateCredential {
            http,
            client_id: client_id.to_string(),
            token_url,
            key,
            thumbprint,
            chain,
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Signs a fresh client assertion for the token endpoint.
    fn assertion(&self) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.x5t = Some(self.thumbprint.clone());
        header.x5c = self.chain.clone();

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            aud: &self.token_url,
            exp: now + ASSERTION_LIFETIME,
            iat: now,
            iss: &self.client_id,
            jti: uuid::Uuid::new_v4().to_string(),
            nbf: now,
            sub: &self.client_id,
        };
        encode(&header, &claims, &self.key).map_err(|e| {
            TokenError::AuthToken(format!("failed to create client assertion: {}", e))
        })
    }
}

impl TokenCredential for ClientCertificateCredential {
    fn get_token(&self, resource: &str) -> Result<AccessToken> {
        let assertion = self.assertion()?;
        let scope = scope_for(resource);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
            ("scope", scope.as_str()),
        ];

        log::debug!("Requesting token for scope {}", scope);
        let response = match self.http.post(&self.token_url).form(&params).send() {
            Ok(response) => response,
            Err(e) => {
                return Err(TokenError::AuthToken(format!(
                    "{}: token request failed: {}",
                    self.token_url, e
                )))
            }
        };
        parse_token_response(response, &self.token_url)
    }
}

impl fmt::Debug for ClientCertificateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificateCredential")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("key", &"[REDACTED]")
            .field("thumbprint", &self.thumbprint)
            .field("send_certificate_chain", &self.chain.is_some())
            .finish()
    }
}
