//! Helpers shared by the unit tests: environment isolation, throwaway
//! certificates and a mock identity provider.

use std::{
    collections::HashMap,
    env,
    ffi::{OsStr, OsString},
    sync::{Mutex, MutexGuard},
};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509NameBuilder, X509},
};
use tokio::runtime::Runtime;
use wiremock::{Mock, MockServer};

lazy_static! {
    /// Held by every test that touches the process environment, in any
    /// module: the identity discovery variables are process wide.
    static ref ENV_MUTEX: Mutex<()> = Mutex::new(());
}

/// Sets identity discovery variables for one test and puts the previous
/// values back on drop.
struct EnvGuard<'a> {
    previous: HashMap<&'a str, Option<OsString>>,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> EnvGuard<'a> {
    fn set<T>(vars: T) -> Self
    where
        T: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        // a panicking test poisons the lock but leaves the environment restored
        let lock = ENV_MUTEX.lock().unwrap_or_else(|poison| poison.into_inner());

        let mut previous = HashMap::new();
        for (name, value) in vars {
            previous.entry(name).or_insert_with(|| env::var_os(name));
            apply_var(name, value);
        }
        EnvGuard {
            previous,
            _lock: lock,
        }
    }
}

fn apply_var<V: AsRef<OsStr>>(name: &str, value: Option<V>) {
    match value {
        Some(value) => env::set_var(name, value),
        None => env::remove_var(name),
    }
}

impl Drop for EnvGuard<'_> {
    fn drop(&mut self) {
        for (name, value) in self.previous.drain() {
            apply_var(name, value);
        }
    }
}

/// Runs `f` with `vars` applied to the environment (`None` unsets).
pub fn run_with_env<'a, T, F>(vars: T, f: F)
where
    F: FnOnce(),
    T: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let _guard = EnvGuard::set(vars);
    f();
}

pub fn self_signed(
    common_name: &str,
    issuer: Option<(&X509, &PKey<Private>)>,
) -> (PKey<Private>, X509) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    match issuer {
        Some((issuer_cert, issuer_key)) => {
            builder.set_issuer_name(issuer_cert.subject_name()).unwrap();
            builder.sign(issuer_key, MessageDigest::sha256()).unwrap();
        }
        None => {
            builder.set_issuer_name(&name).unwrap();
            builder.sign(&key, MessageDigest::sha256()).unwrap();
        }
    }
    (key, builder.build())
}

/// A PKCS#12 container with a leaf certificate and its private key.
pub struct TestPfx {
    pub der: Vec<u8>,
    pub key: PKey<Private>,
    pub cert: X509,
    pub ca: Option<X509>,
}

impl TestPfx {
    pub fn new(password: &str) -> Self {
        let (key, cert) = self_signed("getbearertoken-test", None);
        let der = Pkcs12::builder()
            .name("getbearertoken-test")
            .pkey(&key)
            .cert(&cert)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap();
        TestPfx {
            der,
            key,
            cert,
            ca: None,
        }
    }

    /// Leaf issued by a throwaway CA, with the CA bundled in the container.
    pub fn with_ca(password: &str) -> Self {
        let (ca_key, ca_cert) = self_signed("getbearertoken-test-ca", None);
        let (key, cert) = self_signed("getbearertoken-test", Some((&ca_cert, &ca_key)));
        let mut ca_stack = openssl::stack::Stack::new().unwrap();
        ca_stack.push(ca_cert.clone()).unwrap();
        let der = Pkcs12::builder()
            .name("getbearertoken-test")
            .pkey(&key)
            .cert(&cert)
            .ca(ca_stack)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap();
        TestPfx {
            der,
            key,
            cert,
            ca: Some(ca_cert),
        }
    }

    pub fn public_key_pkcs1(&self) -> Vec<u8> {
        self.key.rsa().unwrap().public_key_to_der_pkcs1().unwrap()
    }
}

/// wiremock server driven from blocking tests.
pub struct MockIdentityProvider {
    server: MockServer,
    runtime: Runtime,
}

impl MockIdentityProvider {
    pub fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        MockIdentityProvider { server, runtime }
    }

    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn received_requests(&self) -> Vec<wiremock::Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
    }
}

/// Value of `name` in an url-encoded form body.
pub fn form_value(body: &[u8], name: &str) -> Option<String> {
    String::from_utf8_lossy(body).split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
