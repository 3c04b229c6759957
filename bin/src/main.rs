use std::{env, ffi::OsString, path::PathBuf, process::exit, time::Duration};

use clap::{ArgAction, Parser};
use getbearertoken::{
    params::{DEFAULT_AUTHORITY_HOST, DEFAULT_RESOURCE, DEFAULT_TIMEOUT},
    run, Flags, Params, TokenError, VERSION,
};

/// Gets a bearer token with a PFX client certificate or managed identity and
/// writes it to a file readable by the owner only
#[derive(Parser)]
#[command(name = "getbearertoken", long_about = None, disable_version_flag = true)]
struct Cli {
    /// Service principal's application id
    #[arg(long = "applicationid", value_name = "ID")]
    application_id: Option<String>,

    /// Service principal's tenant id
    #[arg(long = "tenantid", value_name = "ID")]
    tenant_id: Option<String>,

    /// Full path to the pfx-formatted certificate containing the certificate
    /// and private key used to authenticate
    #[arg(long = "certificate", value_name = "PATH")]
    certificate: Option<PathBuf>,

    /// Pfx file password, defaults to empty string
    #[arg(
        long = "pfxpassword",
        value_name = "PASSWORD",
        default_value = "",
        hide_default_value = true,
        allow_hyphen_values = true
    )]
    pfx_password: String,

    /// Full filename of the generated token
    #[arg(long = "tokenfileoutput", value_name = "PATH")]
    token_file_output: Option<PathBuf>,

    /// Send the certificate chain (subject name and issuer authentication)
    #[arg(
        long = "usesniauth",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        default_value_t = false,
        action = ArgAction::Set
    )]
    use_sni_auth: bool,

    /// Use the managed identity of this host instead of a certificate
    #[arg(
        long = "usemanagedidentity",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        default_value_t = false,
        action = ArgAction::Set
    )]
    use_managed_identity: bool,

    /// Resource the token is issued for
    #[arg(long, value_name = "URL", default_value = DEFAULT_RESOURCE)]
    resource: String,

    /// Identity provider authority, change it for sovereign clouds
    #[arg(long = "authorityhost", value_name = "URL", default_value = DEFAULT_AUTHORITY_HOST)]
    authority_host: String,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Shows current tool version
    // handled by `version_requested` before parsing, kept for --help
    #[allow(dead_code)]
    #[arg(long, action = ArgAction::SetTrue)]
    version: bool,
}

impl Cli {
    fn into_flags(self) -> Flags {
        Flags {
            application_id: self.application_id,
            tenant_id: self.tenant_id,
            certificate: self.certificate,
            pfx_password: self.pfx_password,
            token_file_output: self.token_file_output,
            use_sni_auth: self.use_sni_auth,
            use_managed_identity: self.use_managed_identity,
            resource: self.resource,
            authority_host: self.authority_host,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

const VALUE_FLAGS: &[&str] = &[
    "applicationid",
    "tenantid",
    "certificate",
    "pfxpassword",
    "tokenfileoutput",
    "resource",
    "authorityhost",
    "timeout",
];
const SWITCH_FLAGS: &[&str] = &["usesniauth", "usemanagedidentity", "version", "help"];

/// Accepts the single dash spelling (`-tenantid x`) existing scripts use by
/// rewriting known flags to `--tenantid x`. Flag values are left alone.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut expect_value = false;
    args.into_iter()
        .map(|arg| {
            if std::mem::take(&mut expect_value) {
                return arg;
            }
            let Some(s) = arg.to_str() else {
                return arg;
            };
            let Some(flag) = s.strip_prefix("--").or_else(|| s.strip_prefix('-')) else {
                return arg;
            };
            let (name, has_value) = match flag.split_once('=') {
                Some((name, _)) => (name, true),
                None => (flag, false),
            };
            let takes_value = VALUE_FLAGS.contains(&name);
            if !takes_value && !SWITCH_FLAGS.contains(&name) {
                return arg;
            }
            expect_value = takes_value && !has_value;
            OsString::from(format!("--{}", flag))
        })
        .collect()
}

/// Whether `--version` appears as a flag, not as the value of another flag.
/// Expects arguments already passed through `normalize_args`.
fn version_requested(args: &[OsString]) -> bool {
    let mut expect_value = false;
    for arg in args.iter().skip(1) {
        if std::mem::take(&mut expect_value) {
            continue;
        }
        let Some(name) = arg.to_str().and_then(|s| s.strip_prefix("--")) else {
            continue;
        };
        if name == "version" {
            return true;
        }
        expect_value = VALUE_FLAGS.contains(&name);
    }
    false
}

fn exit_with(error: TokenError) -> ! {
    eprintln!("Error: {}", error);
    exit(error.exit_code())
}

fn main() {
    let args = normalize_args(env::args_os());
    if args.len() < 2 {
        exit_with(TokenError::InvalidArguments(
            "invalid number of arguments, please execute getbearertoken --help for more information"
                .into(),
        ));
    }

    // the version wins over anything else on the command line
    if version_requested(&args) {
        println!("{}", VERSION);
        return;
    }

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            if e.use_stderr() {
                exit(TokenError::InvalidArguments(e.to_string()).exit_code());
            }
            exit(0);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let params = match Params::try_from(cli.into_flags()) {
        Ok(params) => params,
        Err(e) => exit_with(e),
    };

    match run(&params) {
        Ok(token) => match token.expires_on {
            Some(expires_on) => log::info!(
                "Token written to {}, expires on {}",
                params.output.display(),
                expires_on
            ),
            None => log::info!("Token written to {}", params.output.display()),
        },
        Err(e) => exit_with(e),
    }
}
