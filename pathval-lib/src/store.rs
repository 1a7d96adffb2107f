//! Trusted certificate and CRL sources.
//!
//! [`CertLookup`] is the collaborator chain building and revocation checking
//! query: certificates by subject name and CRLs by issuer name. [`TrustStore`]
//! is the in-memory implementation, loadable from PEM bundles, PEM
//! directories or the system trust store.
//!
//! The system trust store location is discovered via `openssl-probe` and
//! environment variables, matching OpenSSL's lookup behavior.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use x509_parser::pem::Pem;

use crate::cert::Certificate;
use crate::crl::Crl;
use crate::error::{PathvalError, Result};
use crate::name::Name;
use crate::params::VerifyParams;

/// Lookup of trusted certificates and CRLs.
pub trait CertLookup {
    /// Trusted certificates whose subject is `subject`, in insertion order.
    fn certs_by_subject(&self, subject: &Name) -> Result<Vec<Certificate>>;

    /// CRLs issued under `issuer`.
    fn crls_by_issuer(&self, issuer: &Name) -> Result<Vec<Crl>>;
}

/// A plain list of trusted certificates, with no CRLs.
impl CertLookup for Vec<Certificate> {
    fn certs_by_subject(&self, subject: &Name) -> Result<Vec<Certificate>> {
        Ok(self
            .iter()
            .filter(|c| c.subject() == subject)
            .cloned()
            .collect())
    }

    fn crls_by_issuer(&self, _issuer: &Name) -> Result<Vec<Crl>> {
        Ok(Vec::new())
    }
}

/// A set of trusted CA certificates and CRLs.
///
/// `TrustStore::system()` loads the same certificates OpenSSL uses. On
/// Linux this is typically `/etc/ssl/certs/ca-certificates.crt`.
pub struct TrustStore {
    certs_by_subject: HashMap<Name, Vec<Certificate>>,
    crls_by_issuer: HashMap<Name, Vec<Crl>>,
    count: usize,
    params: VerifyParams,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("count", &self.count)
            .field("crls", &self.crls_by_issuer.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl TrustStore {
    /// Create an empty trust store.
    pub fn new() -> Self {
        TrustStore {
            certs_by_subject: HashMap::new(),
            crls_by_issuer: HashMap::new(),
            count: 0,
            params: VerifyParams::default(),
        }
    }

    /// Load the system trust store.
    ///
    /// Searches, in order:
    /// 1. `SSL_CERT_FILE` environment variable
    /// 2. Path discovered by `openssl-probe`
    /// 3. Well known bundle files of the major distributions
    /// 4. `SSL_CERT_DIR`, probed directories and `/etc/ssl/certs`
    pub fn system() -> Result<Self> {
        let mut store = TrustStore::new();
        let probe = openssl_probe::probe();

        let mut bundle_paths: Vec<String> = std::env::var("SSL_CERT_FILE").into_iter().collect();
        if let Some(probe_file) = probe.cert_file {
            bundle_paths.push(probe_file.to_string_lossy().into_owned());
        }
        bundle_paths.extend(
            [
                "/etc/ssl/certs/ca-certificates.crt",
                "/etc/pki/tls/certs/ca-bundle.crt",
                "/etc/ssl/ca-bundle.pem",
                "/etc/ssl/cert.pem",
            ]
            .map(String::from),
        );

        for path in &bundle_paths {
            if let Ok(data) = std::fs::read(path) {
                if store.add_pem_bundle(&data)? > 0 {
                    debug!(path = %path, count = store.len(), "loaded system trust bundle");
                    return Ok(store);
                }
            }
        }

        let mut dir_paths: Vec<String> = std::env::var("SSL_CERT_DIR").into_iter().collect();
        for probe_dir in probe.cert_dir {
            dir_paths.push(probe_dir.to_string_lossy().into_owned());
        }
        dir_paths.push("/etc/ssl/certs".into());

        for dir in &dir_paths {
            if store.add_pem_directory(Path::new(dir)).unwrap_or(0) > 0 {
                debug!(dir = %dir, count = store.len(), "loaded system trust directory");
                return Ok(store);
            }
        }

        Err(PathvalError::VerifyError("no system trust store found".into()))
    }

    /// Create a trust store from a PEM bundle (e.g., a CA certificates file).
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let mut store = TrustStore::new();
        store.add_pem_bundle(pem_data)?;
        Ok(store)
    }

    /// Create a trust store from a PEM file path.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Self::from_pem(&read_file(path)?)
    }

    /// Add a DER-encoded certificate.
    pub fn add_der(&mut self, der: &[u8]) -> Result<()> {
        self.add_cert(Certificate::from_der(der)?);
        Ok(())
    }

    /// Add a certificate. Exact duplicates are ignored.
    pub fn add_cert(&mut self, cert: Certificate) {
        let bucket = self
            .certs_by_subject
            .entry(cert.subject().clone())
            .or_default();
        if !bucket.contains(&cert) {
            bucket.push(cert);
            self.count += 1;
        }
    }

    /// Add all certificates from a PEM bundle. Returns the number of
    /// certificates actually added (skipping those that fail to parse).
    pub fn add_pem_bundle(&mut self, pem_data: &[u8]) -> Result<usize> {
        let before = self.count;
        for der in parse_pem_chain(pem_data)? {
            if let Err(e) = self.add_der(&der) {
                debug!(error = %e, "skipping unparsable bundle entry");
            }
        }
        Ok(self.count - before)
    }

    /// Load certificates from a directory of PEM files (like OpenSSL's -CApath).
    ///
    /// Reads all `.pem`, `.crt`, `.cer` and hashed `.0`-`.9` files.
    pub fn add_pem_directory(&mut self, dir: &Path) -> Result<usize> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            PathvalError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", dir.display(), e),
            ))
        })?;
        let mut total = 0;
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let is_cert_file = name.ends_with(".pem")
                || name.ends_with(".crt")
                || name.ends_with(".cer")
                || name.chars().last().is_some_and(|c| c.is_ascii_digit());
            if is_cert_file {
                if let Ok(data) = std::fs::read(&path) {
                    total += self.add_pem_bundle(&data).unwrap_or(0);
                }
            }
        }
        Ok(total)
    }

    pub fn add_crl(&mut self, crl: Crl) {
        let bucket = self.crls_by_issuer.entry(crl.issuer().clone()).or_default();
        if !bucket.contains(&crl) {
            bucket.push(crl);
        }
    }

    /// Add every CRL of a PEM file. Returns the number added.
    pub fn add_pem_crls(&mut self, pem_data: &[u8]) -> Result<usize> {
        let crls = load_pem_crls(pem_data)?;
        let n = crls.len();
        for crl in crls {
            self.add_crl(crl);
        }
        Ok(n)
    }

    /// Number of certificates in the store.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the store holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether this exact certificate is in the store.
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.certs_by_subject
            .get(cert.subject())
            .is_some_and(|certs| certs.contains(cert))
    }

    /// Parameters verifications against this store start from.
    pub fn params(&self) -> &VerifyParams {
        &self.params
    }

    pub fn set_params(&mut self, params: VerifyParams) {
        self.params = params;
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CertLookup for TrustStore {
    fn certs_by_subject(&self, subject: &Name) -> Result<Vec<Certificate>> {
        Ok(self
            .certs_by_subject
            .get(subject)
            .cloned()
            .unwrap_or_default())
    }

    fn crls_by_issuer(&self, issuer: &Name) -> Result<Vec<Crl>> {
        Ok(self.crls_by_issuer.get(issuer).cloned().unwrap_or_default())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        PathvalError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

/// Parse a PEM-encoded file containing one or more certificates into
/// individual DER-encoded certificates.
pub fn parse_pem_chain(input: &[u8]) -> Result<Vec<Vec<u8>>> {
    let certs = pem_blocks(input, &["CERTIFICATE", "TRUSTED CERTIFICATE"])?;
    if certs.is_empty() {
        return Err(PathvalError::PemError(
            "no certificates found in PEM input".into(),
        ));
    }
    Ok(certs)
}

/// Parse a PEM-encoded file into DER-encoded CRLs.
pub fn parse_pem_crl(input: &[u8]) -> Result<Vec<Vec<u8>>> {
    let crls = pem_blocks(input, &["X509 CRL"])?;
    if crls.is_empty() {
        return Err(PathvalError::PemError("no CRLs found in PEM input".into()));
    }
    Ok(crls)
}

/// Parse PEM certificates into [`Certificate`]s, leaf first.
pub fn load_pem_certs(input: &[u8]) -> Result<Vec<Certificate>> {
    parse_pem_chain(input)?
        .iter()
        .map(|der| Certificate::from_der(der))
        .collect()
}

/// Parse PEM CRLs into [`Crl`]s.
pub fn load_pem_crls(input: &[u8]) -> Result<Vec<Crl>> {
    parse_pem_crl(input)?
        .iter()
        .map(|der| Crl::from_der(der))
        .collect()
}

fn pem_blocks(input: &[u8], labels: &[&str]) -> Result<Vec<Vec<u8>>> {
    let mut blocks = Vec::new();
    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if labels.contains(&pem.label.as_str()) {
                    blocks.push(pem.contents);
                }
            }
            Err(e) => {
                // Trailing garbage after valid blocks is tolerated.
                if !blocks.is_empty() {
                    break;
                }
                return Err(PathvalError::PemError(format!("failed to parse PEM: {}", e)));
            }
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, KeyUsage};
    use crate::crl::CrlBuilder;

    fn root(cn: &str, serial: u8) -> Certificate {
        let n = Name::from_pairs(&[("CN", cn)]);
        CertificateBuilder::new(n.clone(), n)
            .serial(&[serial])
            .key_usage(KeyUsage::KEY_CERT_SIGN)
            .build()
    }

    #[test]
    fn test_lookup_by_subject() {
        let mut store = TrustStore::new();
        store.add_cert(root("A", 1));
        store.add_cert(root("A", 2));
        store.add_cert(root("A", 1));
        store.add_cert(root("B", 1));
        assert_eq!(store.len(), 3);
        let a = Name::from_pairs(&[("CN", "a")]);
        assert_eq!(store.certs_by_subject(&a).unwrap().len(), 2);
        assert!(store.contains(&root("B", 1)));
        assert!(!store.contains(&root("B", 2)));
        assert!(store
            .certs_by_subject(&Name::from_pairs(&[("CN", "C")]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_crls_by_issuer() {
        let mut store = TrustStore::new();
        let issuer = Name::from_pairs(&[("CN", "A")]);
        store.add_crl(CrlBuilder::new(issuer.clone()).number(1).build());
        store.add_crl(CrlBuilder::new(issuer.clone()).number(1).build());
        store.add_crl(CrlBuilder::new(issuer.clone()).number(2).build());
        assert_eq!(store.crls_by_issuer(&issuer).unwrap().len(), 2);
    }

    #[test]
    fn test_vec_lookup() {
        let stack = vec![root("A", 1), root("B", 1)];
        let found = stack
            .certs_by_subject(&Name::from_pairs(&[("CN", "B")]))
            .unwrap();
        assert_eq!(found, vec![root("B", 1)]);
    }

    #[test]
    fn test_pem_errors() {
        assert!(matches!(
            parse_pem_chain(b"garbage"),
            Err(PathvalError::PemError(_))
        ));
        assert!(parse_pem_crl(b"").is_err());
    }

    #[test]
    fn test_pem_directory_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("broken.pem"), b"not pem").unwrap();
        let mut store = TrustStore::new();
        assert_eq!(store.add_pem_directory(dir.path()).unwrap(), 0);
        assert!(store.add_pem_directory(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_pem_file_and_params() {
        let missing = tempfile::tempdir().unwrap().path().join("ca.pem");
        assert!(matches!(
            TrustStore::from_pem_file(&missing),
            Err(PathvalError::Io(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"no pem here").unwrap();
        assert!(TrustStore::from_pem_file(file.path()).is_err());
        assert!(TrustStore::new().add_pem_crls(b"no pem here").is_err());

        let mut store = TrustStore::new();
        assert!(store.is_empty());
        let mut params = VerifyParams::lookup("ssl_server").unwrap();
        params.clear_flags(crate::params::VerifyFlags::all());
        store.set_params(params.clone());
        assert_eq!(store.params(), &params);
    }
}
