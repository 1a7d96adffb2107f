//! Convenience entry points.
//!
//! These parse PEM input, run a [`StoreContext`] with a callback that keeps
//! going after every problem, and summarise the outcome as a serialisable
//! [`VerificationResult`], the way `openssl verify` prints every error it
//! meets rather than only the first.

use serde::Serialize;
use tracing::info;

use crate::cert::Certificate;
use crate::context::{Diagnostic, StoreContext};
use crate::crl::Crl;
use crate::error::Result;
use crate::params::VerifyParams;
use crate::store::{self, TrustStore};

/// Result of certificate chain verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    /// Whether the entire chain verified successfully.
    pub is_valid: bool,
    /// The chain that was built, leaf first.
    pub chain: Vec<ChainCertInfo>,
    /// One line per problem found (empty if `is_valid` is true).
    pub errors: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    /// Host name the leaf matched, when hosts were configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peername: Option<String>,
}

impl std::fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid {
            write!(f, "OK")?;
            if !self.chain.is_empty() {
                write!(f, " (chain: ")?;
                for (i, info) in self.chain.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{}", info.subject)?;
                }
                write!(f, ")")?;
            }
        } else {
            write!(f, "FAIL")?;
            for err in &self.errors {
                write!(f, ": {}", err)?;
            }
        }
        Ok(())
    }
}

/// A certificate in the built chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainCertInfo {
    /// Position in chain (0 = leaf).
    pub depth: usize,
    pub subject: String,
    pub issuer: String,
}

/// Verify `leaf` against `store`, with `untrusted` intermediates and extra
/// CRLs, under `params`.
///
/// Verification problems end up in the result; only fatal errors (a failed
/// store lookup) are returned as `Err`.
pub fn verify_certificate(
    leaf: Certificate,
    untrusted: &[Certificate],
    crls: &[Crl],
    store: &TrustStore,
    params: &VerifyParams,
) -> Result<VerificationResult> {
    let mut ctx = StoreContext::from_store(store, leaf, untrusted)
        .with_shared_params(params)
        .with_crls(crls)
        .with_callback(|_, _| true);

    ctx.verify()?;
    Ok(summarise(&ctx))
}

fn summarise(ctx: &StoreContext<'_>) -> VerificationResult {
    let chain: Vec<ChainCertInfo> = ctx
        .chain()
        .iter()
        .enumerate()
        .map(|(depth, cert)| ChainCertInfo {
            depth,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
        })
        .collect();
    let diagnostics = ctx.diagnostics().to_vec();
    let errors: Vec<String> = diagnostics
        .iter()
        .map(|d| match &d.subject {
            Some(subject) => format!("depth {} ({}): {}", d.depth, subject, d.code),
            None => format!("depth {}: {}", d.depth, d.code),
        })
        .collect();
    let is_valid = diagnostics.is_empty();
    info!(
        valid = is_valid,
        chain_len = chain.len(),
        problems = errors.len(),
        "verification finished"
    );
    VerificationResult {
        is_valid,
        chain,
        errors,
        diagnostics,
        peername: ctx.peername().map(str::to_string),
    }
}

/// Parse a PEM chain and verify it against a trust store.
///
/// The first certificate is the leaf; the rest form the untrusted pool.
/// Input without certificates is a [`PemError`](crate::PathvalError::PemError).
pub fn verify_pem_chain(
    pem_data: &[u8],
    trust_store: &TrustStore,
    hostname: Option<&str>,
) -> Result<VerificationResult> {
    let mut params = trust_store.params().clone();
    if let Some(host) = hostname {
        params.hosts = vec![host.to_string()];
    }
    verify_pem_chain_with_params(pem_data, trust_store, &params, &[])
}

/// Like [`verify_pem_chain`] with explicit parameters and CRLs.
pub fn verify_pem_chain_with_params(
    pem_data: &[u8],
    trust_store: &TrustStore,
    params: &VerifyParams,
    crls: &[Crl],
) -> Result<VerificationResult> {
    let mut certs = store::load_pem_certs(pem_data)?;
    let leaf = certs.remove(0);
    verify_certificate(leaf, &certs, crls, trust_store, params)
}

/// Verify a DER leaf with intermediates from a separate PEM file, like
/// `openssl verify -untrusted intermediates.pem cert.pem`.
pub fn verify_with_untrusted(
    leaf_der: &[u8],
    untrusted_pem: &[u8],
    trust_store: &TrustStore,
    params: &VerifyParams,
    crls: &[Crl],
) -> Result<VerificationResult> {
    let leaf = Certificate::from_der(leaf_der)?;
    let untrusted = store::load_pem_certs(untrusted_pem)?;
    verify_certificate(leaf, &untrusted, crls, trust_store, params)
}
