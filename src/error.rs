use std::fmt;

pub type Result<T> = std::result::Result<T, TokenError>;

/// Every failure of the token pipeline. Each variant maps to one process
/// exit code so that calling scripts can branch on the failing step.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    /// No arguments, an unparsable flag or a missing required flag
    InvalidArguments(String),
    /// Managed identity was requested together with certificate flags
    ConflictingArguments(String),
    /// Certificate file is missing or unreadable
    CertificateNotFound(String),
    /// Certificate file is not a PKCS#12 container or the password is wrong
    CertificateDecode(String),
    /// Credential could not be constructed from the given material
    AuthConfig(String),
    /// Identity provider did not hand out a token
    AuthToken(String),
    /// Token could not be written to the output file
    OutputWrite(String),
}

impl TokenError {
    pub fn exit_code(&self) -> i32 {
        match self {
            TokenError::AuthConfig(_) => 2,
            TokenError::AuthToken(_) => 3,
            TokenError::InvalidArguments(_) => 4,
            TokenError::CertificateNotFound(_) => 5,
            TokenError::CertificateDecode(_) => 6,
            TokenError::ConflictingArguments(_) => 7,
            TokenError::OutputWrite(_) => 8,
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenError::InvalidArguments(s) => write!(f, "invalid arguments: {}", s),
            TokenError::ConflictingArguments(s) => write!(f, "conflicting arguments: {}", s),
            TokenError::CertificateNotFound(s) => write!(f, "certificate not found: {}", s),
            TokenError::CertificateDecode(s) => {
                write!(f, "failed to decode PKCS#12 certificate: {}", s)
            }
            TokenError::AuthConfig(s) => write!(f, "failed to create credential: {}", s),
            TokenError::AuthToken(s) => write!(f, "failed to get the token: {}", s),
            TokenError::OutputWrite(s) => write!(f, "failed to write the token: {}", s),
        }
    }
}

impl std::error::Error for TokenError {}
