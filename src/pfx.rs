use crate::error::{Result, TokenError};

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    x509::X509,
};
use std::{fmt, fs, path::Path};

/// Private key and certificates taken out of a PKCS#12 container.
///
/// Only lives until the credential is built: it is never written anywhere
/// and its `Debug` output leaves the key out.
pub struct DecodedCertificate {
    key: PKey<Private>,
    certificate: X509,
    ca: Vec<X509>,
}

impl DecodedCertificate {
    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// SHA-1 thumbprint of the leaf certificate, base64url without padding
    /// (the JWS `x5t` header value).
    pub fn thumbprint(&self) -> std::result::Result<String, ErrorStack> {
        let digest = self.certificate.digest(MessageDigest::sha1())?;
        Ok(URL_SAFE_NO_PAD.encode(&*digest))
    }

    /// Leaf certificate followed by the bundled CA certificates, each DER
    /// encoded in standard base64 (the JWS `x5c` header value).
    pub fn chain(&self) -> std::result::Result<Vec<String>, ErrorStack> {
        std::iter::once(&self.certificate)
            .chain(self.ca.iter())
            .map(|cert| cert.to_der().map(|der| STANDARD.encode(der)))
            .collect()
    }
}

impl fmt::Debug for DecodedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedCertificate")
            .field("key", &"[REDACTED]")
            .field("subject", self.certificate.subject_name())
            .field("ca", &self.ca.len())
            .finish()
    }
}

/// Reads the certificate file, failing with `CertificateNotFound` when the
/// path does not exist or cannot be read.
pub fn read_certificate(path: &Path) -> Result<Vec<u8>> {
    log::info!("Checking if certificate file exists...");
    if let Err(e) = fs::metadata(path) {
        return Err(TokenError::CertificateNotFound(format!(
            "certificate file {}, not found: {}",
            path.display(),
            e
        )));
    }

    log::info!("Reading the certificate file...");
    fs::read(path).map_err(|e| {
        TokenError::CertificateNotFound(format!(
            "failed to read the certificate file ({}): {}",
            path.display(),
            e
        ))
    })
}

/// Decodes a DER encoded PKCS#12 container.
pub fn decode_pfx(data: &[u8], password: &str) -> Result<DecodedCertificate> {
    log::info!("Decoding the PFX to get the certificate and private key...");
    let parsed = Pkcs12::from_der(data)
        .and_then(|pkcs12| pkcs12.parse2(password))
        .map_err(|e| TokenError::CertificateDecode(e.to_string()))?;

    let Some(key) = parsed.pkey else {
        return Err(TokenError::CertificateDecode(
            "container has no private key".into(),
        ));
    };
    let Some(certificate) = parsed.cert else {
        return Err(TokenError::CertificateDecode(
            "container has no certificate".into(),
        ));
    };
    let ca = parsed
        .ca
        .map(|stack| stack.into_iter().collect())
        .unwrap_or_default();

    let decoded = DecodedCertificate {
        key,
        certificate,
        ca,
    };
    log::debug!("Decoded {:?}", decoded);
    Ok(decoded)
}
