//! `pathval` - verify X.509 certificate chains from the command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pathval_lib::store;
use pathval_lib::{
    verify_certificate, Certificate, Crl, CrlCheck, Purpose, TrustStore, VerificationResult,
    VerifyFlags, VerifyParams,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pathval")]
#[command(version)]
#[command(about = "X.509 certificate path validation")]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify one or more certificates
    Verify(VerifyArgs),

    /// Print a named parameter preset as JSON
    Params {
        /// default, pkcs7, smime_sign, ssl_client or ssl_server
        #[arg(default_value = "default")]
        name: String,
    },
}

#[derive(Args)]
struct VerifyArgs {
    /// Trusted certificates (PEM bundle)
    #[arg(long, value_name = "FILE")]
    cafile: Option<PathBuf>,

    /// Directory of trusted PEM certificates
    #[arg(long, value_name = "DIR")]
    capath: Option<PathBuf>,

    /// Untrusted intermediates (PEM)
    #[arg(long, value_name = "FILE")]
    untrusted: Vec<PathBuf>,

    /// CRLs to consult (PEM), may repeat
    #[arg(long, value_name = "FILE")]
    crl: Vec<PathBuf>,

    /// Revocation checking: off, leaf or chain
    #[arg(long, value_name = "MODE")]
    crl_check: Option<CrlCheck>,

    #[arg(long)]
    partial_chain: bool,

    #[arg(long)]
    trusted_first: bool,

    #[arg(long)]
    no_alt_chains: bool,

    #[arg(long)]
    use_deltas: bool,

    /// Indirect and reason-partitioned CRLs
    #[arg(long)]
    extended_crl: bool,

    #[arg(long, value_name = "PURPOSE")]
    purpose: Option<Purpose>,

    #[arg(long, value_name = "HOST")]
    host: Vec<String>,

    #[arg(long, value_name = "EMAIL")]
    email: Option<String>,

    #[arg(long, value_name = "ADDR")]
    ip: Option<std::net::IpAddr>,

    /// Check time as Unix seconds
    #[arg(long, value_name = "SECS")]
    attime: Option<i64>,

    /// Depth limit; the chain holds at most N + 1 certificates
    #[arg(long, value_name = "N")]
    depth: Option<usize>,

    /// JSON parameter file; flags above are applied on top
    #[arg(long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Certificates to verify (PEM or DER; the first PEM block is the leaf)
    #[arg(required = true, value_name = "CERT")]
    certs: Vec<PathBuf>,
}

impl VerifyArgs {
    fn verify_params(&self) -> Result<VerifyParams> {
        let mut params = match &self.params {
            Some(path) => VerifyParams::from_file(path)?,
            None => VerifyParams::default(),
        };
        let switches = [
            (self.partial_chain, VerifyFlags::PARTIAL_CHAIN),
            (self.trusted_first, VerifyFlags::TRUSTED_FIRST),
            (self.no_alt_chains, VerifyFlags::NO_ALT_CHAINS),
            (self.use_deltas, VerifyFlags::USE_DELTAS),
            (self.extended_crl, VerifyFlags::EXTENDED_CRL_SUPPORT),
        ];
        for (on, flag) in switches {
            if on {
                params.set_flags(flag);
            }
        }
        if let Some(mode) = self.crl_check {
            params.crl_check = mode;
        }
        if let Some(purpose) = self.purpose {
            params.set_purpose(purpose);
        }
        if !self.host.is_empty() {
            params.hosts = self.host.clone();
        }
        if self.email.is_some() {
            params.email = self.email.clone();
        }
        if self.ip.is_some() {
            params.ip = self.ip;
        }
        if self.attime.is_some() {
            params.check_time = self.attime;
        }
        if let Some(depth) = self.depth {
            params.depth = depth;
        }
        Ok(params)
    }

    fn trust_store(&self) -> Result<TrustStore> {
        if self.cafile.is_none() && self.capath.is_none() {
            return TrustStore::system().context("loading system trust store");
        }
        let mut store = TrustStore::new();
        if let Some(file) = &self.cafile {
            let n = store.add_pem_bundle(&read(file)?)?;
            debug!(file = %file.display(), count = n, "loaded CA file");
        }
        if let Some(dir) = &self.capath {
            let n = store.add_pem_directory(dir)?;
            debug!(dir = %dir.display(), count = n, "loaded CA directory");
        }
        if store.is_empty() {
            bail!("no trusted certificates loaded");
        }
        Ok(store)
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// The leaf of a PEM file, or the whole file as DER.
fn load_leaf(path: &Path) -> Result<Certificate> {
    let data = read(path)?;
    if let Ok(mut certs) = store::load_pem_certs(&data) {
        if !certs.is_empty() {
            return Ok(certs.remove(0));
        }
    }
    Certificate::from_der(&data).with_context(|| format!("parsing {}", path.display()))
}

fn print_text(path: &Path, result: &VerificationResult) {
    if result.is_valid {
        println!("{}: OK", path.display());
        return;
    }
    for d in &result.diagnostics {
        if let Some(subject) = &d.subject {
            eprintln!("{subject}");
        }
        eprintln!("error at {} depth lookup: {}", d.depth, d.code);
    }
    eprintln!("error {}: verification failed", path.display());
}

fn run_verify(args: &VerifyArgs) -> Result<bool> {
    let params = args.verify_params()?;
    let trusted = args.trust_store()?;

    let mut untrusted = Vec::new();
    for file in &args.untrusted {
        untrusted.extend(store::load_pem_certs(&read(file)?)?);
    }
    let mut crls: Vec<Crl> = Vec::new();
    for file in &args.crl {
        crls.extend(store::load_pem_crls(&read(file)?)?);
    }
    info!(
        trusted = trusted.len(),
        untrusted = untrusted.len(),
        crls = crls.len(),
        "inputs loaded"
    );

    let mut all_ok = true;
    let mut reports = Vec::new();
    for path in &args.certs {
        let leaf = load_leaf(path)?;
        let result = verify_certificate(leaf, &untrusted, &crls, &trusted, &params)
            .with_context(|| format!("verifying {}", path.display()))?;
        all_ok &= result.is_valid;
        if args.json {
            reports.push(serde_json::json!({
                "file": path.display().to_string(),
                "result": result,
            }));
        } else {
            print_text(path, &result);
        }
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(all_ok)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Verify(args) => {
            if run_verify(&args)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
        Commands::Params { name } => {
            let Some(params) = VerifyParams::lookup(&name) else {
                bail!("unknown parameter preset '{name}'");
            };
            println!("{}", params.to_json()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> VerifyArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Verify(args) => args,
            Commands::Params { .. } => panic!("expected verify"),
        }
    }

    #[test]
    fn test_flags_map_to_params() {
        let args = parse(&[
            "pathval",
            "verify",
            "--crl-check",
            "chain",
            "--partial-chain",
            "--use-deltas",
            "--purpose",
            "sslserver",
            "--host",
            "example.com",
            "--attime",
            "1700000000",
            "--depth",
            "3",
            "leaf.pem",
        ]);
        let p = args.verify_params().unwrap();
        assert_eq!(p.crl_check, CrlCheck::Chain);
        assert!(p.has(VerifyFlags::PARTIAL_CHAIN | VerifyFlags::USE_DELTAS));
        assert!(!p.has(VerifyFlags::TRUSTED_FIRST));
        assert_eq!(p.purpose, Some(Purpose::SslServer));
        assert_eq!(p.hosts, ["example.com"]);
        assert_eq!(p.check_time, Some(1_700_000_000));
        assert_eq!(p.depth, 3);
    }

    #[test]
    fn test_command_line_overrides_params_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"flags": "TRUSTED_FIRST", "crl_check": "leaf", "depth": 5}"#,
        )
        .unwrap();
        let path = file.path().to_str().unwrap();
        let args = parse(&["pathval", "verify", "--params", path, "--depth", "2", "c.pem"]);
        let p = args.verify_params().unwrap();
        assert!(p.has(VerifyFlags::TRUSTED_FIRST));
        assert_eq!(p.crl_check, CrlCheck::Leaf);
        assert_eq!(p.depth, 2);
    }

    #[test]
    fn test_cert_argument_required() {
        assert!(Cli::try_parse_from(["pathval", "verify"]).is_err());
        assert!(
            Cli::try_parse_from(["pathval", "verify", "--crl-check", "sometimes", "c.pem"]).is_err()
        );
    }
}
