use crate::error::{Result, TokenError};
use std::{fmt, path::PathBuf, time::Duration};

/// Azure Resource Manager, the resource the tool was written for.
pub const DEFAULT_RESOURCE: &str = "https://management.core.windows.net/";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Flags as given on the command line, before any validation.
#[derive(Clone)]
pub struct Flags {
    pub application_id: Option<String>,
    pub tenant_id: Option<String>,
    pub certificate: Option<PathBuf>,
    pub pfx_password: String,
    pub token_file_output: Option<PathBuf>,
    pub use_sni_auth: bool,
    pub use_managed_identity: bool,
    pub resource: String,
    pub authority_host: String,
    pub timeout: Duration,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            application_id: None,
            tenant_id: None,
            certificate: None,
            pfx_password: String::new(),
            token_file_output: None,
            use_sni_auth: false,
            use_managed_identity: false,
            resource: DEFAULT_RESOURCE.into(),
            authority_host: DEFAULT_AUTHORITY_HOST.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Where the certificate comes from and how it is presented.
#[derive(Clone, PartialEq)]
pub struct CertificateSource {
    pub path: PathBuf,
    pub password: String,
    /// Send the whole chain (x5c) in the client assertion
    pub send_certificate_chain: bool,
}

impl fmt::Debug for CertificateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateSource")
            .field("path", &self.path)
            .field("password", &"[REDACTED]")
            .field("send_certificate_chain", &self.send_certificate_chain)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    Certificate(CertificateSource),
    ManagedIdentity,
}

/// Validated invocation parameters, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub application_id: String,
    pub tenant_id: String,
    pub auth: AuthMode,
    pub output: PathBuf,
    pub resource: String,
    pub authority_host: String,
    pub timeout: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, flag: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| TokenError::InvalidArguments(format!("-{} is required", flag)))
}

impl TryFrom<Flags> for Params {
    type Error = TokenError;

    fn try_from(flags: Flags) -> Result<Params> {
        let certificate = flags
            .certificate
            .filter(|path| !path.as_os_str().is_empty());

        if flags.use_managed_identity
            && (flags.use_sni_auth || certificate.is_some() || !flags.pfx_password.is_empty())
        {
            return Err(TokenError::ConflictingArguments(
                "cannot use certificate arguments while using -usemanagedidentity".into(),
            ));
        }

        let Some(output) = flags
            .token_file_output
            .filter(|path| !path.as_os_str().is_empty())
        else {
            return Err(TokenError::InvalidArguments(
                "-tokenfileoutput is required".into(),
            ));
        };

        let (application_id, tenant_id, auth) = if flags.use_managed_identity {
            // system assigned identity: the ids are not used
            (
                non_empty(flags.application_id).unwrap_or_default(),
                non_empty(flags.tenant_id).unwrap_or_default(),
                AuthMode::ManagedIdentity,
            )
        } else {
            let application_id = required(flags.application_id, "applicationid")?;
            let tenant_id = required(flags.tenant_id, "tenantid")?;
            let Some(path) = certificate else {
                return Err(TokenError::InvalidArguments(
                    "-certificate is required unless -usemanagedidentity is set".into(),
                ));
            };
            let source = CertificateSource {
                path,
                password: flags.pfx_password,
                send_certificate_chain: flags.use_sni_auth,
            };
            (application_id, tenant_id, AuthMode::Certificate(source))
        };

        Ok(Params {
            application_id,
            tenant_id,
            auth,
            output,
            resource: flags.resource,
            authority_host: flags.authority_host,
            timeout: flags.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate_flags() -> Flags {
        Flags {
            application_id: Some("11111111-2222-3333-4444-555555555555".into()),
            tenant_id: Some("contoso.onmicrosoft.com".into()),
            certificate: Some("/etc/sp.pfx".into()),
            token_file_output: Some("/tmp/token".into()),
            ..Default::default()
        }
    }

    #[test]
    fn certificate_mode() {
        let mut flags = certificate_flags();
        flags.pfx_password = "secret".into();
        flags.use_sni_auth = true;

        let params = Params::try_from(flags).unwrap();
        assert_eq!(params.tenant_id, "contoso.onmicrosoft.com");
        assert_eq!(params.output, PathBuf::from("/tmp/token"));
        assert_eq!(params.resource, DEFAULT_RESOURCE);
        assert_eq!(
            params.auth,
            AuthMode::Certificate(CertificateSource {
                path: "/etc/sp.pfx".into(),
                password: "secret".into(),
                send_certificate_chain: true,
            })
        );
    }

    #[test]
    fn managed_identity_mode() {
        let flags = Flags {
            use_managed_identity: true,
            token_file_output: Some("/tmp/token".into()),
            ..Default::default()
        };
        let params = Params::try_from(flags).unwrap();
        assert_eq!(params.auth, AuthMode::ManagedIdentity);
        assert_eq!(params.application_id, "");
    }

    #[test]
    fn managed_identity_conflicts_with_certificate_flags() {
        let mut flags = certificate_flags();
        flags.use_managed_identity = true;
        assert!(matches!(
            Params::try_from(flags).unwrap_err(),
            TokenError::ConflictingArguments(_)
        ));

        for flags in [
            Flags {
                use_managed_identity: true,
                use_sni_auth: true,
                token_file_output: Some("/tmp/token".into()),
                ..Default::default()
            },
            Flags {
                use_managed_identity: true,
                pfx_password: "secret".into(),
                token_file_output: Some("/tmp/token".into()),
                ..Default::default()
            },
            // conflict wins over the missing output path
            Flags {
                use_managed_identity: true,
                use_sni_auth: true,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                Params::try_from(flags).unwrap_err(),
                TokenError::ConflictingArguments(_)
            ));
        }
    }

    #[test]
    fn missing_flags() {
        let mut flags = certificate_flags();
        flags.token_file_output = None;
        assert_eq!(
            Params::try_from(flags).unwrap_err(),
            TokenError::InvalidArguments("-tokenfileoutput is required".into())
        );

        let mut flags = certificate_flags();
        flags.tenant_id = Some("  ".into());
        assert_eq!(
            Params::try_from(flags).unwrap_err(),
            TokenError::InvalidArguments("-tenantid is required".into())
        );

        let mut flags = certificate_flags();
        flags.application_id = None;
        assert_eq!(
            Params::try_from(flags).unwrap_err(),
            TokenError::InvalidArguments("-applicationid is required".into())
        );

        let mut flags = certificate_flags();
        flags.certificate = Some(PathBuf::new());
        assert!(matches!(
            Params::try_from(flags).unwrap_err(),
            TokenError::InvalidArguments(_)
        ));
    }

    #[test]
    fn password_is_not_in_debug_output() {
        let mut flags = certificate_flags();
        flags.pfx_password = "hunter2".into();
        let params = Params::try_from(flags).unwrap();
        assert!(!format!("{:?}", params).contains("hunter2"));
    }
}
