//! `getbearertoken` gets a bearer token from the Microsoft identity platform
//! using a PFX (PKCS#12) client certificate or the platform managed identity,
//! and writes it to a file that only the owner can read.
//!
//! ```no_run
//! use getbearertoken::{Flags, Params};
//!
//! let flags = Flags {
//!     application_id: Some("11111111-2222-3333-4444-555555555555".into()),
//!     tenant_id: Some("contoso.onmicrosoft.com".into()),
//!     certificate: Some("/etc/sp.pfx".into()),
//!     token_file_output: Some("/run/secrets/arm-token".into()),
//!     ..Default::default()
//! };
//! let params = Params::try_from(flags).unwrap();
//! match getbearertoken::run(&params) {
//!     Ok(token) => println!("token expires on {:?}", token.expires_on),
//!     Err(e) => {
//!         eprintln!("{}", e);
//!         std::process::exit(e.exit_code())
//!     }
//! }
//! ```
//!
//! # Certificate authentication
//!
//! The certificate must be registered on the app registration of
//! `applicationid`. The private key signs a client assertion which is
//! exchanged for a token with the OAuth2 client credentials grant. With
//! `-usesniauth` the full certificate chain is sent along, for app
//! registrations that trust the certificate by subject name and issuer.
//!
//! # Managed identity
//!
//! With `-usemanagedidentity` the system assigned identity of the host is
//! used. The local token endpoint is discovered from the environment, see
//! [`managed_identity`].

#[cfg(test)]
#[macro_use]
extern crate lazy_static;

pub mod credential;
pub mod error;
pub mod managed_identity;
pub mod params;
pub mod pfx;
pub mod token;

#[cfg(test)]
mod test_util;

pub use credential::{ClientCertificateCredential, ClientCertificateOptions, TokenCredential};
pub use error::{Result, TokenError};
pub use managed_identity::ManagedIdentityCredential;
pub use params::{AuthMode, CertificateSource, Flags, Params};
pub use token::{write_token_file, AccessToken};

use reqwest::blocking::Client;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The one HTTP client used for the token request.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("getbearertoken/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TokenError::AuthConfig(format!("failed to create HTTP client: {}", e)))
}

/// Builds the credential `params` ask for.
///
/// Certificate material is read, decoded and consumed here; it does not
/// outlive the returned credential's construction.
pub fn build_credential(params: &Params) -> Result<Box<dyn TokenCredential>> {
    let http = http_client(params.timeout)?;
    match &params.auth {
        AuthMode::ManagedIdentity => Ok(Box::new(ManagedIdentityCredential::new(http)?)),
        AuthMode::Certificate(source) => {
            let data = pfx::read_certificate(&source.path)?;
            let certificate = pfx::decode_pfx(&data, &source.password)?;
            let options = ClientCertificateOptions {
                authority_host: params.authority_host.clone(),
                send_certificate_chain: source.send_certificate_chain,
            };
            Ok(Box::new(ClientCertificateCredential::new(
                http,
                &params.tenant_id,
                &params.application_id,
                certificate,
                &options,
            )?))
        }
    }
}

/// Resolves a bearer token for `params.resource`.
pub fn resolve(params: &Params) -> Result<AccessToken> {
    let credential = build_credential(params)?;
    log::info!("Getting the token...");
    credential.get_token(&params.resource)
}

/// Resolves a token and writes it to `params.output`.
///
/// The output file is not touched unless a token was obtained.
pub fn run(params: &Params) -> Result<AccessToken> {
    let token = resolve(params)?;
    write_token_file(&params.output, &token)?;
    Ok(token)
}
