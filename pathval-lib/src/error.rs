//! Error types.
//!
//! [`PathvalError`] is what the Rust API returns. [`ErrorCode`] is the
//! verification status recorded in a [`StoreContext`](crate::StoreContext)
//! and handed to the verification callback.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by the library.
#[derive(Debug, Error)]
pub enum PathvalError {
    /// PEM input could not be parsed.
    #[error("PEM error: {0}")]
    PemError(String),

    /// DER input could not be parsed.
    #[error("DER error: {0}")]
    DerError(String),

    /// I/O failure while reading certificates, CRLs or configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The certificate/CRL lookup collaborator failed.
    #[error("store lookup failed: {0}")]
    StoreLookup(String),

    /// The context was misused (no certificate set, or reused).
    #[error("invalid call: {0}")]
    InvalidCall(&'static str),

    /// Verification stopped because the callback declined to continue.
    #[error("verification failed at depth {depth}: {code}")]
    Verification {
        /// Status recorded when verification stopped.
        code: ErrorCode,
        /// Chain index the status refers to.
        depth: usize,
    },

    /// Generic verification error outside of a context.
    #[error("verification error: {0}")]
    VerifyError(String),
}

impl PathvalError {
    /// The [`ErrorCode`] a context records for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            PathvalError::Verification { code, .. } => *code,
            PathvalError::StoreLookup(_) => ErrorCode::StoreLookup,
            PathvalError::InvalidCall(_) => ErrorCode::InvalidCall,
            _ => ErrorCode::Unspecified,
        }
    }
}

/// Verification status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Ok,
    Unspecified,
    UnableToGetIssuerCert,
    UnableToGetIssuerCertLocally,
    UnableToGetCrl,
    UnableToGetCrlIssuer,
    UnableToDecodeIssuerPublicKey,
    UnableToVerifyLeafSignature,
    CertSignatureFailure,
    CrlSignatureFailure,
    CertNotYetValid,
    CertHasExpired,
    CrlNotYetValid,
    CrlHasExpired,
    OutOfMem,
    DepthZeroSelfSignedCert,
    SelfSignedCertInChain,
    CertChainTooLong,
    CertRevoked,
    InvalidCa,
    InvalidNonCa,
    PathLengthExceeded,
    ProxyPathLengthExceeded,
    ProxyCertificatesNotAllowed,
    InvalidPurpose,
    CertRejected,
    SubjectIssuerMismatch,
    AkidSkidMismatch,
    AkidIssuerSerialMismatch,
    KeyusageNoCertsign,
    KeyusageNoCrlSign,
    KeyusageNoDigitalSignature,
    SignatureAlgorithmMismatch,
    UnhandledCriticalExtension,
    UnhandledCriticalCrlExtension,
    InvalidExtension,
    InvalidPolicyExtension,
    NoExplicitPolicy,
    DifferentCrlScope,
    CrlPathValidationError,
    PermittedViolation,
    ExcludedViolation,
    UnsupportedConstraintType,
    UnsupportedNameSyntax,
    SubtreeMinMax,
    NameConstraintsWithoutSans,
    HostnameMismatch,
    EmailMismatch,
    IpAddressMismatch,
    SuiteBInvalidVersion,
    SuiteBInvalidAlgorithm,
    SuiteBInvalidCurve,
    SuiteBInvalidSignatureAlgorithm,
    SuiteBLosNotAllowed,
    SuiteBCannotSignP384WithP256,
    InvalidCall,
    StoreLookup,
}

impl ErrorCode {
    /// Whether this is the success status.
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// Human readable description.
    pub fn description(self) -> &'static str {
        use ErrorCode::*;
        match self {
            Ok => "ok",
            Unspecified => "unspecified certificate verification error",
            UnableToGetIssuerCert => "unable to get issuer certificate",
            UnableToGetIssuerCertLocally => "unable to get local issuer certificate",
            UnableToGetCrl => "unable to get certificate CRL",
            UnableToGetCrlIssuer => "unable to get CRL issuer certificate",
            UnableToDecodeIssuerPublicKey => "unable to decode issuer public key",
            UnableToVerifyLeafSignature => "unable to verify the first certificate",
            CertSignatureFailure => "certificate signature failure",
            CrlSignatureFailure => "CRL signature failure",
            CertNotYetValid => "certificate is not yet valid",
            CertHasExpired => "certificate has expired",
            CrlNotYetValid => "CRL is not yet valid",
            CrlHasExpired => "CRL has expired",
            OutOfMem => "out of memory",
            DepthZeroSelfSignedCert => "self signed certificate",
            SelfSignedCertInChain => "self signed certificate in certificate chain",
            CertChainTooLong => "certificate chain too long",
            CertRevoked => "certificate revoked",
            InvalidCa => "invalid CA certificate",
            InvalidNonCa => "invalid non-CA certificate (has CA markings)",
            PathLengthExceeded => "path length constraint exceeded",
            ProxyPathLengthExceeded => "proxy path length constraint exceeded",
            ProxyCertificatesNotAllowed => "proxy certificates not allowed",
            InvalidPurpose => "unsupported certificate purpose",
            CertRejected => "certificate rejected",
            SubjectIssuerMismatch => "subject issuer mismatch",
            AkidSkidMismatch => "authority and subject key identifier mismatch",
            AkidIssuerSerialMismatch => "authority and issuer serial number mismatch",
            KeyusageNoCertsign => "key usage does not include certificate signing",
            KeyusageNoCrlSign => "key usage does not include CRL signing",
            KeyusageNoDigitalSignature => "key usage does not include digital signature",
            SignatureAlgorithmMismatch => "issuer key type does not match signature algorithm",
            UnhandledCriticalExtension => "unhandled critical extension",
            UnhandledCriticalCrlExtension => "unhandled critical CRL extension",
            InvalidExtension => "invalid or inconsistent certificate extension",
            InvalidPolicyExtension => "invalid or inconsistent certificate policy extension",
            NoExplicitPolicy => "no explicit policy",
            DifferentCrlScope => "different CRL scope",
            CrlPathValidationError => "CRL path validation error",
            PermittedViolation => "permitted subtree violation",
            ExcludedViolation => "excluded subtree violation",
            UnsupportedConstraintType => "unsupported name constraint type",
            UnsupportedNameSyntax => "unsupported or invalid name syntax",
            SubtreeMinMax => "name constraints minimum and maximum not supported",
            NameConstraintsWithoutSans => {
                "issuer has name constraints but leaf has no SANs"
            }
            HostnameMismatch => "hostname mismatch",
            EmailMismatch => "email address mismatch",
            IpAddressMismatch => "IP address mismatch",
            SuiteBInvalidVersion => "Suite B: certificate version invalid",
            SuiteBInvalidAlgorithm => "Suite B: certificate key is not EC",
            SuiteBInvalidCurve => "Suite B: invalid ECC curve",
            SuiteBInvalidSignatureAlgorithm => "Suite B: invalid signature algorithm",
            SuiteBLosNotAllowed => "Suite B: curve not allowed for this LOS",
            SuiteBCannotSignP384WithP256 => "Suite B: cannot sign P-384 with P-256",
            InvalidCall => "invalid or inconsistent verification call",
            StoreLookup => "issuer certificate lookup error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PathvalError>;
