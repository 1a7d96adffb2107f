//! In-memory PKI for integration tests.
//!
//! Keys are opaque labels: a certificate's public key is `key:<label>` and a
//! valid signature is the issuer's key bytes, checked by [`KeyEcho`].

#![allow(dead_code)]

use pathval_lib::cert::{EcCurve, KeyAlgorithm, KeyUsage, PublicKeyInfo};
use pathval_lib::{
    Certificate, CertificateBuilder, Crl, CrlBuilder, ErrorCode, Name, PathvalError,
    SignatureError, SignatureVerifier, StoreContext, TrustStore, VerifyParams,
};

/// Check time used by every test.
pub const NOW: i64 = 1_700_000_000;

pub fn name(cn: &str) -> Name {
    Name::from_pairs(&[("CN", cn)])
}

pub fn key_bytes(label: &str) -> Vec<u8> {
    format!("key:{label}").into_bytes()
}

pub fn key(label: &str) -> PublicKeyInfo {
    PublicKeyInfo::new(KeyAlgorithm::Ec(Some(EcCurve::P256)), key_bytes(label))
}

/// A certificate for `subject` holding key `key_label`, signed by
/// `issuer_key`.
pub fn cert(subject: &str, key_label: &str, issuer: &str, issuer_key: &str) -> CertificateBuilder {
    CertificateBuilder::new(name(subject), name(issuer))
        .public_key(key(key_label))
        .signature(&key_bytes(issuer_key))
        .validity(NOW - 86_400, NOW + 86_400)
}

/// A CA whose key label is its name.
pub fn ca(cn: &str, issuer: &str) -> CertificateBuilder {
    cert(cn, cn, issuer, issuer)
        .basic_constraints(true, None)
        .key_usage(KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN)
}

pub fn root(cn: &str) -> Certificate {
    ca(cn, cn).build()
}

pub fn leaf(cn: &str, issuer: &str) -> CertificateBuilder {
    cert(cn, cn, issuer, issuer)
        .serial(&[0x10, 0x01])
        .key_usage(KeyUsage::DIGITAL_SIGNATURE)
}

/// A current CRL signed by the key labelled `issuer`.
pub fn crl(issuer: &str) -> CrlBuilder {
    CrlBuilder::new(name(issuer))
        .last_update(NOW - 3_600)
        .next_update(NOW + 3_600)
        .signature(&key_bytes(issuer))
}

pub fn store(certs: &[Certificate]) -> TrustStore {
    let mut store = TrustStore::new();
    for cert in certs {
        store.add_cert(cert.clone());
    }
    store
}

pub fn params() -> VerifyParams {
    VerifyParams {
        check_time: Some(NOW),
        ..VerifyParams::default()
    }
}

/// Accepts a signature equal to the issuer's key bytes; an empty key does
/// not decode.
pub struct KeyEcho;

impl KeyEcho {
    fn check(signature: &[u8], key: &PublicKeyInfo) -> Result<(), SignatureError> {
        if key.spki.is_empty() {
            Err(SignatureError::KeyDecode)
        } else if signature == key.spki.as_slice() {
            Ok(())
        } else {
            Err(SignatureError::Invalid)
        }
    }
}

impl SignatureVerifier for KeyEcho {
    fn verify_certificate(
        &self,
        cert: &Certificate,
        issuer_key: &PublicKeyInfo,
    ) -> Result<(), SignatureError> {
        Self::check(cert.signature(), issuer_key)
    }

    fn verify_crl(&self, crl: &Crl, issuer_key: &PublicKeyInfo) -> Result<(), SignatureError> {
        Self::check(crl.signature(), issuer_key)
    }
}

/// What a verification run produced.
pub struct Outcome {
    pub result: Result<(), PathvalError>,
    pub error: ErrorCode,
    pub diagnostics: Vec<(ErrorCode, usize)>,
    pub chain: Vec<String>,
}

impl Outcome {
    pub fn codes(&self) -> Vec<ErrorCode> {
        self.diagnostics.iter().map(|(code, _)| *code).collect()
    }
}

/// Verify with a callback that continues past every problem.
pub fn run(
    store: &TrustStore,
    leaf: Certificate,
    pool: &[Certificate],
    crls: &[Crl],
    params: VerifyParams,
) -> Outcome {
    let ctx = StoreContext::new(store, Some(leaf), pool)
        .with_params(params)
        .with_crls(crls)
        .with_verifier(&KeyEcho)
        .with_callback(|_, _| true);
    finish(ctx)
}

/// Verify with the default callback, which stops at the first problem.
pub fn run_strict(
    store: &TrustStore,
    leaf: Certificate,
    pool: &[Certificate],
    params: VerifyParams,
) -> Outcome {
    let ctx = StoreContext::new(store, Some(leaf), pool)
        .with_params(params)
        .with_verifier(&KeyEcho);
    finish(ctx)
}

fn finish(mut ctx: StoreContext<'_>) -> Outcome {
    let result = ctx.verify();
    Outcome {
        result,
        error: ctx.error(),
        diagnostics: ctx.diagnostics().iter().map(|d| (d.code, d.depth)).collect(),
        chain: ctx.chain().iter().map(|c| c.subject().to_string()).collect(),
    }
}
