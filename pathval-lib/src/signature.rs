//! Signature and validity period checks, anchor first.

use tracing::debug;

use crate::cert::Certificate;
use crate::chain;
use crate::context::{Halt, Step, StoreContext};
use crate::crypto::SignatureError;
use crate::error::ErrorCode;
use crate::params::VerifyFlags;

/// Verify every link of the chain from the anchor down to the leaf.
///
/// The anchor's own signature is only checked with `CHECK_SS_SIGNATURE`.
/// An anchor that did not issue itself is accepted as is under
/// `PARTIAL_CHAIN`; otherwise verification starts below it. Each verified
/// position is passed to the callback with `ok = true`.
pub(crate) fn internal_verify(ctx: &mut StoreContext<'_>) -> Step {
    let Some(mut n) = ctx.chain.len().checked_sub(1) else {
        return Ok(());
    };
    let check_ss = ctx.params.has(VerifyFlags::CHECK_SS_SIGNATURE);
    let mut xi = ctx.chain[n].clone();
    ctx.error_depth = n;

    let mut xs;
    let mut skip_signature = false;
    let top = xi.clone();
    if chain::check_issued(ctx, &top, &top) {
        xs = xi.clone();
    } else if ctx.params.has(VerifyFlags::PARTIAL_CHAIN) {
        xs = xi.clone();
        skip_signature = true;
    } else if n == 0 {
        ctx.report(ErrorCode::UnableToVerifyLeafSignature, 0, Some(xi))?;
        return Ok(());
    } else {
        n -= 1;
        xs = ctx.chain[n].clone();
    }

    loop {
        ctx.error_depth = n;
        let is_anchor = xs == xi;
        if !skip_signature && (!is_anchor || check_ss) {
            verify_link(ctx, &xs, &xi, n)?;
        }
        skip_signature = false;

        check_cert_time(ctx, &xs, n)?;

        ctx.error_depth = n;
        ctx.current_issuer = Some(xi.clone());
        ctx.current_cert = Some(xs.clone());
        if !ctx.call(true) {
            return Err(Halt::Rejected);
        }

        if n == 0 {
            break;
        }
        n -= 1;
        xi = xs;
        xs = ctx.chain[n].clone();
    }
    Ok(())
}

fn verify_link(
    ctx: &mut StoreContext<'_>,
    subject: &Certificate,
    issuer: &Certificate,
    depth: usize,
) -> Step {
    match ctx
        .verifier
        .verify_certificate(subject, issuer.public_key())
    {
        Ok(()) => Ok(()),
        Err(SignatureError::KeyDecode) => {
            debug!(depth, issuer = %issuer.subject(), "issuer key unusable");
            ctx.report(
                ErrorCode::UnableToDecodeIssuerPublicKey,
                depth,
                Some(issuer.clone()),
            )
        }
        Err(SignatureError::Invalid) => {
            ctx.report(ErrorCode::CertSignatureFailure, depth, Some(subject.clone()))
        }
    }
}

/// Report a certificate outside its validity period at the check time.
pub(crate) fn check_cert_time(ctx: &mut StoreContext<'_>, x: &Certificate, depth: usize) -> Step {
    if ctx.params.has(VerifyFlags::NO_CHECK_TIME) {
        return Ok(());
    }
    let now = ctx.params.time();
    if x.not_before() > now {
        ctx.report(ErrorCode::CertNotYetValid, depth, Some(x.clone()))?;
    }
    if x.not_after() <= now {
        ctx.report(ErrorCode::CertHasExpired, depth, Some(x.clone()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, KeyAlgorithm, KeyUsage, PublicKeyInfo};
    use crate::crl::Crl;
    use crate::crypto::SignatureVerifier;
    use crate::name::Name;
    use crate::store::TrustStore;

    /// Accepts a signature equal to the issuer's key bytes.
    struct Echo;

    impl SignatureVerifier for Echo {
        fn verify_certificate(
            &self,
            cert: &Certificate,
            key: &PublicKeyInfo,
        ) -> Result<(), SignatureError> {
            if key.spki.is_empty() {
                Err(SignatureError::KeyDecode)
            } else if cert.signature() == key.spki.as_slice() {
                Ok(())
            } else {
                Err(SignatureError::Invalid)
            }
        }

        fn verify_crl(&self, _: &Crl, _: &PublicKeyInfo) -> Result<(), SignatureError> {
            Ok(())
        }
    }

    fn cert(cn: &str, issuer: &str, key: &str, signed_by: &str) -> Certificate {
        CertificateBuilder::new(
            Name::from_pairs(&[("CN", cn)]),
            Name::from_pairs(&[("CN", issuer)]),
        )
        .basic_constraints(true, None)
        .key_usage(KeyUsage::KEY_CERT_SIGN)
        .public_key(PublicKeyInfo::new(KeyAlgorithm::Ec(None), key.as_bytes().to_vec()))
        .signature(signed_by.as_bytes())
        .validity(100, 200)
        .build()
    }

    fn run(chain: Vec<Certificate>, flags: VerifyFlags, at: i64) -> Vec<(ErrorCode, usize)> {
        let store = TrustStore::new();
        let mut ctx = StoreContext::new(&store, None, &[])
            .with_verifier(&Echo)
            .with_callback(|_, _| true);
        ctx.set_flags(flags);
        ctx.set_time(at);
        ctx.chain = chain;
        internal_verify(&mut ctx).unwrap();
        ctx.diagnostics().iter().map(|d| (d.code, d.depth)).collect()
    }

    #[test]
    fn test_valid_chain() {
        let chain = vec![cert("leaf", "R", "l", "r"), cert("R", "R", "r", "r")];
        assert!(run(chain, VerifyFlags::empty(), 150).is_empty());
    }

    #[test]
    fn test_bad_link_and_expiry() {
        let chain = vec![cert("leaf", "R", "l", "x"), cert("R", "R", "r", "bogus")];
        assert_eq!(
            run(chain.clone(), VerifyFlags::empty(), 150),
            [(ErrorCode::CertSignatureFailure, 0)]
        );
        assert_eq!(
            run(chain, VerifyFlags::CHECK_SS_SIGNATURE, 250),
            [
                (ErrorCode::CertSignatureFailure, 1),
                (ErrorCode::CertHasExpired, 1),
                (ErrorCode::CertSignatureFailure, 0),
                (ErrorCode::CertHasExpired, 0),
            ]
        );
    }

    #[test]
    fn test_lone_leaf_without_issuer() {
        let chain = vec![cert("leaf", "R", "l", "r")];
        assert_eq!(
            run(chain, VerifyFlags::empty(), 150),
            [(ErrorCode::UnableToVerifyLeafSignature, 0)]
        );
    }

    #[test]
    fn test_partial_chain_anchor_unchecked() {
        let chain = vec![cert("leaf", "A", "l", "a"), cert("A", "R", "a", "r")];
        assert!(run(chain, VerifyFlags::PARTIAL_CHAIN, 150).is_empty());
    }
}
