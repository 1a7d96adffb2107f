//! Signature verification and Suite B algorithm policy.
//!
//! Verification never touches key material directly: it asks a
//! [`SignatureVerifier`] whether a certificate or CRL was signed by an
//! issuer's public key. [`X509ParserVerifier`] is the default, re-parsing the
//! DER encodings with x509-parser's `verify` feature.

use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::cert::{Certificate, EcCurve, PublicKeyInfo, SignatureAlgorithm};
use crate::crl::Crl;
use crate::error::ErrorCode;
use crate::params::VerifyFlags;

/// Why a signature did not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// The issuer public key could not be decoded.
    KeyDecode,
    /// The signature does not verify under the key.
    Invalid,
}

/// Signature checks against an issuer public key.
pub trait SignatureVerifier: Send + Sync {
    fn verify_certificate(
        &self,
        cert: &Certificate,
        issuer_key: &PublicKeyInfo,
    ) -> Result<(), SignatureError>;

    fn verify_crl(&self, crl: &Crl, issuer_key: &PublicKeyInfo) -> Result<(), SignatureError>;
}

/// Verifies DER-encoded certificates and CRLs with x509-parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct X509ParserVerifier;

impl X509ParserVerifier {
    fn decode_key(key: &PublicKeyInfo) -> Result<SubjectPublicKeyInfo<'_>, SignatureError> {
        SubjectPublicKeyInfo::from_der(&key.spki)
            .map(|(_, spki)| spki)
            .map_err(|_| SignatureError::KeyDecode)
    }
}

impl SignatureVerifier for X509ParserVerifier {
    fn verify_certificate(
        &self,
        cert: &Certificate,
        issuer_key: &PublicKeyInfo,
    ) -> Result<(), SignatureError> {
        let spki = Self::decode_key(issuer_key)?;
        let (_, x509) =
            X509Certificate::from_der(cert.encoding()).map_err(|_| SignatureError::Invalid)?;
        x509.verify_signature(Some(&spki))
            .map_err(|_| SignatureError::Invalid)
    }

    fn verify_crl(&self, crl: &Crl, issuer_key: &PublicKeyInfo) -> Result<(), SignatureError> {
        let spki = Self::decode_key(issuer_key)?;
        let (_, x509) = CertificateRevocationList::from_der(crl.encoding())
            .map_err(|_| SignatureError::Invalid)?;
        x509.verify_signature(&spki)
            .map_err(|_| SignatureError::Invalid)
    }
}

/// Check one key, and optionally the algorithm it signed with, against the
/// Suite B levels of security still allowed by `flags`.
fn check_suiteb_key(
    key: &PublicKeyInfo,
    signed_with: Option<&SignatureAlgorithm>,
    flags: &mut VerifyFlags,
) -> Result<(), ErrorCode> {
    match key.curve() {
        Some(EcCurve::P384) => {
            if signed_with.is_some_and(|s| *s != SignatureAlgorithm::EcdsaSha384) {
                return Err(ErrorCode::SuiteBInvalidSignatureAlgorithm);
            }
            if !flags.contains(VerifyFlags::SUITEB_192_LOS) {
                return Err(ErrorCode::SuiteBLosNotAllowed);
            }
            // Once P-384 appears, P-256 may not sign further up.
            flags.remove(VerifyFlags::SUITEB_128_LOS_ONLY);
            Ok(())
        }
        Some(EcCurve::P256) => {
            if signed_with.is_some_and(|s| *s != SignatureAlgorithm::EcdsaSha256) {
                return Err(ErrorCode::SuiteBInvalidSignatureAlgorithm);
            }
            if !flags.contains(VerifyFlags::SUITEB_128_LOS_ONLY) {
                return Err(ErrorCode::SuiteBLosNotAllowed);
            }
            Ok(())
        }
        Some(_) => Err(ErrorCode::SuiteBInvalidCurve),
        None if matches!(key.algorithm, crate::cert::KeyAlgorithm::Ec(None)) => {
            Err(ErrorCode::SuiteBInvalidCurve)
        }
        None => Err(ErrorCode::SuiteBInvalidAlgorithm),
    }
}

/// Suite B compliance of a whole chain, leaf first.
///
/// Every certificate must be version 3 with an allowed EC key, and each
/// certificate's signature algorithm must suit its issuer's curve. On
/// failure returns the error and the depth it belongs to.
pub(crate) fn check_suiteb_chain(
    chain: &[Certificate],
    flags: VerifyFlags,
) -> Result<(), (ErrorCode, usize)> {
    let flags = flags & VerifyFlags::SUITEB_128_LOS;
    if flags.is_empty() || chain.is_empty() {
        return Ok(());
    }
    let mut tflags = flags;
    let mut depth = 0;
    let result = (|| {
        let leaf = &chain[0];
        if leaf.version() != 3 {
            return Err(ErrorCode::SuiteBInvalidVersion);
        }
        check_suiteb_key(leaf.public_key(), None, &mut tflags)?;
        depth = 1;
        for i in 1..chain.len() {
            depth = i;
            let cert = &chain[i];
            if cert.version() != 3 {
                return Err(ErrorCode::SuiteBInvalidVersion);
            }
            check_suiteb_key(
                cert.public_key(),
                Some(chain[i - 1].signature_algorithm()),
                &mut tflags,
            )?;
        }
        // The anchor's own signature.
        let last = &chain[chain.len() - 1];
        check_suiteb_key(
            last.public_key(),
            Some(last.signature_algorithm()),
            &mut tflags,
        )
    })();

    result.map_err(|mut code| {
        if matches!(
            code,
            ErrorCode::SuiteBInvalidSignatureAlgorithm | ErrorCode::SuiteBLosNotAllowed
        ) && depth > 0
        {
            depth -= 1;
        }
        if code == ErrorCode::SuiteBLosNotAllowed && flags != tflags {
            code = ErrorCode::SuiteBCannotSignP384WithP256;
        }
        (code, depth)
    })
}

/// Suite B compliance of a CRL signed by `issuer_key`.
pub(crate) fn check_suiteb_crl(
    crl: &Crl,
    issuer_key: &PublicKeyInfo,
    flags: VerifyFlags,
) -> Result<(), ErrorCode> {
    let mut flags = flags & VerifyFlags::SUITEB_128_LOS;
    if flags.is_empty() {
        return Ok(());
    }
    check_suiteb_key(issuer_key, Some(crl.signature_algorithm()), &mut flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, KeyAlgorithm};
    use crate::name::Name;

    fn cert(cn: &str, issuer: &str, curve: EcCurve, sig: SignatureAlgorithm) -> Certificate {
        CertificateBuilder::new(
            Name::from_pairs(&[("CN", cn)]),
            Name::from_pairs(&[("CN", issuer)]),
        )
        .public_key(PublicKeyInfo::new(KeyAlgorithm::Ec(Some(curve)), Vec::new()))
        .signature_algorithm(sig)
        .build()
    }

    #[test]
    fn test_suiteb_off_passes_anything() {
        let rsa = CertificateBuilder::new(Name::default(), Name::default())
            .public_key(PublicKeyInfo::new(KeyAlgorithm::Rsa, Vec::new()))
            .build();
        assert_eq!(check_suiteb_chain(&[rsa], VerifyFlags::empty()), Ok(()));
    }

    #[test]
    fn test_suiteb_128_chain() {
        let chain = [
            cert("leaf", "ca", EcCurve::P256, SignatureAlgorithm::EcdsaSha256),
            cert("ca", "ca", EcCurve::P256, SignatureAlgorithm::EcdsaSha256),
        ];
        assert_eq!(
            check_suiteb_chain(&chain, VerifyFlags::SUITEB_128_LOS_ONLY),
            Ok(())
        );
        assert_eq!(
            check_suiteb_chain(&chain, VerifyFlags::SUITEB_192_LOS),
            Err((ErrorCode::SuiteBLosNotAllowed, 0))
        );
    }

    #[test]
    fn test_suiteb_wrong_signature_reports_child_depth() {
        let chain = [
            cert("leaf", "ca", EcCurve::P384, SignatureAlgorithm::EcdsaSha256),
            cert("ca", "ca", EcCurve::P384, SignatureAlgorithm::EcdsaSha384),
        ];
        assert_eq!(
            check_suiteb_chain(&chain, VerifyFlags::SUITEB_192_LOS),
            Err((ErrorCode::SuiteBInvalidSignatureAlgorithm, 0))
        );
    }

    #[test]
    fn test_suiteb_p256_cannot_sign_p384() {
        let chain = [
            cert("leaf", "ca", EcCurve::P384, SignatureAlgorithm::EcdsaSha256),
            cert("ca", "ca", EcCurve::P256, SignatureAlgorithm::EcdsaSha256),
        ];
        assert_eq!(
            check_suiteb_chain(&chain, VerifyFlags::SUITEB_128_LOS),
            Err((ErrorCode::SuiteBCannotSignP384WithP256, 0))
        );
    }

    #[test]
    fn test_suiteb_rejects_other_curves_and_versions() {
        let p521 = [cert("leaf", "ca", EcCurve::P521, SignatureAlgorithm::EcdsaSha512)];
        assert_eq!(
            check_suiteb_chain(&p521, VerifyFlags::SUITEB_128_LOS),
            Err((ErrorCode::SuiteBInvalidCurve, 0))
        );
        let v1 = CertificateBuilder::new(Name::default(), Name::default())
            .version(1)
            .build();
        assert_eq!(
            check_suiteb_chain(&[v1], VerifyFlags::SUITEB_128_LOS),
            Err((ErrorCode::SuiteBInvalidVersion, 0))
        );
    }

    #[test]
    fn test_default_verifier_rejects_bad_key() {
        let c = cert("leaf", "ca", EcCurve::P256, SignatureAlgorithm::EcdsaSha256);
        let key = PublicKeyInfo::new(KeyAlgorithm::Rsa, b"junk".to_vec());
        assert_eq!(
            X509ParserVerifier.verify_certificate(&c, &key),
            Err(SignatureError::KeyDecode)
        );
    }
}
