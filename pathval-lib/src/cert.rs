//! Certificate model.
//!
//! A [`Certificate`] is an immutable, cheaply clonable value carrying the
//! facts path validation consumes: names, validity, key usage, basic
//! constraints, identifiers, distribution points, name constraints and
//! policies, together with flags derived from them once at construction
//! (self-issued, self-signed, CA, proxy, unhandled critical extension, ...).
//!
//! Certificates come from DER through x509-parser ([`Certificate::from_der`])
//! or are assembled directly with [`CertificateBuilder`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use x509_parser::der_parser::der::parse_der_sequence;
use x509_parser::prelude::*;

use crate::crl::ReasonSet;
use crate::error::{ErrorCode, PathvalError};
use crate::name::{self, GeneralName, Name, NameAttr};
use crate::util;

/// OID of the ProxyCertInfo extension (RFC 3820).
pub const OID_PROXY_CERT_INFO: &str = "1.3.6.1.5.5.7.1.14";
/// OID of the Freshest CRL extension.
pub const OID_FRESHEST_CRL: &str = "2.5.29.46";
/// anyPolicy.
pub const OID_ANY_POLICY: &str = "2.5.29.32.0";

const OID_CERTIFICATE_POLICIES: &str = "2.5.29.32";
const OID_POLICY_MAPPINGS: &str = "2.5.29.33";
const OID_POLICY_CONSTRAINTS: &str = "2.5.29.36";
const OID_INHIBIT_ANY_POLICY: &str = "2.5.29.54";

bitflags! {
    /// Facts derived from a certificate's extensions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CertFlags: u32 {
        /// Subject name equals issuer name.
        const SELF_ISSUED = 1 << 0;
        /// Self-issued, AKID consistent with itself, key usage allows certificate signing.
        const SELF_SIGNED = 1 << 1;
        /// basicConstraints cA is set.
        const CA = 1 << 2;
        const BASIC_CONSTRAINTS = 1 << 3;
        const KEY_USAGE = 1 << 4;
        const EXT_KEY_USAGE = 1 << 5;
        /// ProxyCertInfo present.
        const PROXY = 1 << 6;
        /// A critical extension this library does not process.
        const CRITICAL = 1 << 7;
        /// Freshest CRL extension present.
        const FRESHEST = 1 << 8;
        /// Malformed or inconsistent extensions.
        const INVALID = 1 << 9;
        /// Malformed policy extensions.
        const INVALID_POLICY = 1 << 10;
        /// X.509 version 1.
        const V1 = 1 << 11;
    }
}

bitflags! {
    /// keyUsage bits, bit 0 being digitalSignature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct KeyUsage: u16 {
        const DIGITAL_SIGNATURE = 1 << 0;
        const NON_REPUDIATION = 1 << 1;
        const KEY_ENCIPHERMENT = 1 << 2;
        const DATA_ENCIPHERMENT = 1 << 3;
        const KEY_AGREEMENT = 1 << 4;
        const KEY_CERT_SIGN = 1 << 5;
        const CRL_SIGN = 1 << 6;
        const ENCIPHER_ONLY = 1 << 7;
        const DECIPHER_ONLY = 1 << 8;
    }
}

bitflags! {
    /// Extended key usages this library understands. Also used for
    /// auxiliary trust settings.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ExtKeyUsage: u16 {
        const ANY = 1 << 0;
        const SERVER_AUTH = 1 << 1;
        const CLIENT_AUTH = 1 << 2;
        const CODE_SIGNING = 1 << 3;
        const EMAIL_PROTECTION = 1 << 4;
        const TIME_STAMPING = 1 << 5;
        const OCSP_SIGNING = 1 << 6;
        /// Some usage outside of the above.
        const OTHER = 1 << 7;
    }
}

impl ExtKeyUsage {
    fn from_x509(eku: &x509_parser::extensions::ExtendedKeyUsage<'_>) -> Self {
        let mut out = ExtKeyUsage::empty();
        out.set(ExtKeyUsage::ANY, eku.any);
        out.set(ExtKeyUsage::SERVER_AUTH, eku.server_auth);
        out.set(ExtKeyUsage::CLIENT_AUTH, eku.client_auth);
        out.set(ExtKeyUsage::CODE_SIGNING, eku.code_signing);
        out.set(ExtKeyUsage::EMAIL_PROTECTION, eku.email_protection);
        out.set(ExtKeyUsage::TIME_STAMPING, eku.time_stamping);
        out.set(ExtKeyUsage::OCSP_SIGNING, eku.ocsp_signing);
        out.set(ExtKeyUsage::OTHER, !eku.other.is_empty());
        out
    }
}

/// Elliptic curves relevant to validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EcCurve {
    P256,
    P384,
    P521,
    Other(String),
}

/// Public key algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KeyAlgorithm {
    Rsa,
    Ec(Option<EcCurve>),
    Ed25519,
    Dsa,
    Other(String),
}

impl KeyAlgorithm {
    fn kind(&self) -> Option<KeyKind> {
        match self {
            KeyAlgorithm::Rsa => Some(KeyKind::Rsa),
            KeyAlgorithm::Ec(_) => Some(KeyKind::Ec),
            KeyAlgorithm::Ed25519 => Some(KeyKind::Ed25519),
            KeyAlgorithm::Dsa => Some(KeyKind::Dsa),
            KeyAlgorithm::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Rsa,
    Ec,
    Ed25519,
    Dsa,
}

/// Subject public key: algorithm plus the encoded SubjectPublicKeyInfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicKeyInfo {
    pub algorithm: KeyAlgorithm,
    /// DER SubjectPublicKeyInfo, or opaque key bytes for built certificates.
    pub spki: Vec<u8>,
}

impl PublicKeyInfo {
    pub fn new(algorithm: KeyAlgorithm, spki: impl Into<Vec<u8>>) -> Self {
        PublicKeyInfo {
            algorithm,
            spki: spki.into(),
        }
    }

    /// The EC curve, when this is an EC key with a named curve.
    pub fn curve(&self) -> Option<&EcCurve> {
        match &self.algorithm {
            KeyAlgorithm::Ec(curve) => curve.as_ref(),
            _ => None,
        }
    }

    fn from_x509(spki: &SubjectPublicKeyInfo<'_>) -> Self {
        let algorithm = match spki.algorithm.algorithm.to_id_string().as_str() {
            "1.2.840.113549.1.1.1" | "1.2.840.113549.1.1.10" => KeyAlgorithm::Rsa,
            "1.2.840.10045.2.1" => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|p| p.as_oid().ok())
                    .map(|oid| match oid.to_id_string().as_str() {
                        "1.2.840.10045.3.1.7" => EcCurve::P256,
                        "1.3.132.0.34" => EcCurve::P384,
                        "1.3.132.0.35" => EcCurve::P521,
                        other => EcCurve::Other(other.to_string()),
                    });
                KeyAlgorithm::Ec(curve)
            }
            "1.3.101.112" => KeyAlgorithm::Ed25519,
            "1.2.840.10040.4.1" => KeyAlgorithm::Dsa,
            other => KeyAlgorithm::Other(other.to_string()),
        };
        PublicKeyInfo {
            algorithm,
            spki: spki.raw.to_vec(),
        }
    }
}

/// Signature algorithm of a certificate or CRL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SignatureAlgorithm {
    RsaSha1,
    RsaSha256,
    RsaSha384,
    RsaSha512,
    RsaPss,
    EcdsaSha1,
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
    Ed25519,
    Other(String),
}

impl SignatureAlgorithm {
    pub fn from_oid(oid: &str) -> Self {
        match oid {
            "1.2.840.113549.1.1.5" => SignatureAlgorithm::RsaSha1,
            "1.2.840.113549.1.1.11" => SignatureAlgorithm::RsaSha256,
            "1.2.840.113549.1.1.12" => SignatureAlgorithm::RsaSha384,
            "1.2.840.113549.1.1.13" => SignatureAlgorithm::RsaSha512,
            "1.2.840.113549.1.1.10" => SignatureAlgorithm::RsaPss,
            "1.2.840.10045.4.1" => SignatureAlgorithm::EcdsaSha1,
            "1.2.840.10045.4.3.2" => SignatureAlgorithm::EcdsaSha256,
            "1.2.840.10045.4.3.3" => SignatureAlgorithm::EcdsaSha384,
            "1.2.840.10045.4.3.4" => SignatureAlgorithm::EcdsaSha512,
            "1.3.101.112" => SignatureAlgorithm::Ed25519,
            other => SignatureAlgorithm::Other(other.to_string()),
        }
    }

    fn key_kind(&self) -> Option<KeyKind> {
        use SignatureAlgorithm::*;
        match self {
            RsaSha1 | RsaSha256 | RsaSha384 | RsaSha512 | RsaPss => Some(KeyKind::Rsa),
            EcdsaSha1 | EcdsaSha256 | EcdsaSha384 | EcdsaSha512 => Some(KeyKind::Ec),
            Ed25519 => Some(KeyKind::Ed25519),
            Other(_) => None,
        }
    }
}

/// basicConstraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BasicConstraints {
    pub ca: bool,
    pub path_len: Option<u32>,
}

/// authorityKeyIdentifier, shared by certificates and CRLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorityKeyId {
    pub key_id: Option<Vec<u8>>,
    pub issuer: Option<Vec<GeneralName>>,
    pub serial: Option<Vec<u8>>,
}

impl AuthorityKeyId {
    pub fn with_key_id(key_id: impl Into<Vec<u8>>) -> Self {
        AuthorityKeyId {
            key_id: Some(key_id.into()),
            ..Default::default()
        }
    }

    pub(crate) fn from_x509(akid: &x509_parser::extensions::AuthorityKeyIdentifier<'_>) -> Self {
        AuthorityKeyId {
            key_id: akid.key_identifier.as_ref().map(|k| k.0.to_vec()),
            issuer: akid
                .authority_cert_issuer
                .as_ref()
                .map(|names| names.iter().map(GeneralName::from_x509).collect()),
            serial: akid.authority_cert_serial.map(|s| s.to_vec()),
        }
    }
}

/// The name of a distribution point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DistPointName {
    FullName(Vec<GeneralName>),
    /// RDN fragment appended to the issuer's name.
    Relative(Name),
}

impl DistPointName {
    pub(crate) fn from_x509(dpn: &x509_parser::extensions::DistributionPointName<'_>) -> Self {
        use x509_parser::extensions::DistributionPointName as X;
        match dpn {
            X::FullName(names) => {
                DistPointName::FullName(names.iter().map(GeneralName::from_x509).collect())
            }
            X::NameRelativeToCRLIssuer(rdn) => {
                let attrs = rdn
                    .iter()
                    .map(|attr| {
                        NameAttr::new(
                            name::attr_kind(attr.attr_type().to_id_string()),
                            attr.as_str().unwrap_or_default(),
                        )
                    })
                    .collect();
                DistPointName::Relative(Name::new(attrs))
            }
        }
    }
}

/// One entry of the cRLDistributionPoints extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionPoint {
    pub name: Option<DistPointName>,
    /// Reasons covered; absent means all reasons.
    pub reasons: Option<ReasonSet>,
    pub crl_issuer: Option<Vec<GeneralName>>,
}

impl DistributionPoint {
    /// A distribution point with a full name.
    pub fn full_name(names: Vec<GeneralName>) -> Self {
        DistributionPoint {
            name: Some(DistPointName::FullName(names)),
            reasons: None,
            crl_issuer: None,
        }
    }

    /// Reasons covered by this point.
    pub fn reasons(&self) -> ReasonSet {
        self.reasons.unwrap_or(ReasonSet::ALL)
    }
}

/// A name constraints subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneralSubtree {
    pub base: GeneralName,
    pub minimum: u32,
    pub maximum: Option<u32>,
}

impl GeneralSubtree {
    pub fn new(base: GeneralName) -> Self {
        GeneralSubtree {
            base,
            minimum: 0,
            maximum: None,
        }
    }
}

/// nameConstraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NameConstraints {
    pub permitted: Vec<GeneralSubtree>,
    pub excluded: Vec<GeneralSubtree>,
}

impl NameConstraints {
    pub fn permit(mut self, base: GeneralName) -> Self {
        self.permitted.push(GeneralSubtree::new(base));
        self
    }

    pub fn exclude(mut self, base: GeneralName) -> Self {
        self.excluded.push(GeneralSubtree::new(base));
        self
    }
}

/// Auxiliary trust settings attached to a trusted certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustSettings {
    pub trusted: ExtKeyUsage,
    pub rejected: ExtKeyUsage,
}

impl TrustSettings {
    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
struct CertFields {
    version: u32,
    serial: Vec<u8>,
    subject: Name,
    issuer: Name,
    not_before: i64,
    not_after: i64,
    basic_constraints: Option<BasicConstraints>,
    key_usage: Option<KeyUsage>,
    ext_key_usage: Option<ExtKeyUsage>,
    subject_key_id: Option<Vec<u8>>,
    authority_key_id: Option<AuthorityKeyId>,
    subject_alt_names: Option<Vec<GeneralName>>,
    crl_distribution_points: Vec<DistributionPoint>,
    freshest_crl: bool,
    name_constraints: Option<NameConstraints>,
    policies: Option<Vec<String>>,
    policy_mappings: Vec<(String, String)>,
    require_explicit_policy: Option<u32>,
    inhibit_policy_mapping: Option<u32>,
    inhibit_any_policy: Option<u32>,
    /// `Some(path_len)` when ProxyCertInfo is present.
    proxy: Option<Option<u32>>,
    unhandled_critical: bool,
    invalid: bool,
    invalid_policy: bool,
    public_key: PublicKeyInfo,
    signature_algorithm: SignatureAlgorithm,
    signature: Vec<u8>,
    #[serde(skip)]
    trust: Option<TrustSettings>,
}

impl CertFields {
    fn new(subject: Name, issuer: Name) -> Self {
        CertFields {
            version: 3,
            serial: vec![1],
            subject,
            issuer,
            not_before: 0,
            not_after: 4_102_444_800,
            basic_constraints: None,
            key_usage: None,
            ext_key_usage: None,
            subject_key_id: None,
            authority_key_id: None,
            subject_alt_names: None,
            crl_distribution_points: Vec::new(),
            freshest_crl: false,
            name_constraints: None,
            policies: None,
            policy_mappings: Vec::new(),
            require_explicit_policy: None,
            inhibit_policy_mapping: None,
            inhibit_any_policy: None,
            proxy: None,
            unhandled_critical: false,
            invalid: false,
            invalid_policy: false,
            public_key: PublicKeyInfo::new(KeyAlgorithm::Ec(Some(EcCurve::P256)), Vec::new()),
            signature_algorithm: SignatureAlgorithm::EcdsaSha256,
            signature: Vec::new(),
            trust: None,
        }
    }

    /// Derive flags and the effective path length, the way the extension
    /// cache does before any validation looks at the certificate.
    fn derive(&self) -> (CertFlags, Option<u32>) {
        let mut flags = CertFlags::empty();
        let mut path_len = None;

        if self.version == 1 {
            flags |= CertFlags::V1;
        }
        if let Some(bc) = self.basic_constraints {
            flags |= CertFlags::BASIC_CONSTRAINTS;
            if bc.ca {
                flags |= CertFlags::CA;
            }
            match bc.path_len {
                Some(_) if !bc.ca => {
                    flags |= CertFlags::INVALID;
                    path_len = Some(0);
                }
                limit => path_len = limit,
            }
        }
        if self.key_usage.is_some() {
            flags |= CertFlags::KEY_USAGE;
        }
        if self.ext_key_usage.is_some() {
            flags |= CertFlags::EXT_KEY_USAGE;
        }
        if self.proxy.is_some() {
            flags |= CertFlags::PROXY;
            if flags.contains(CertFlags::CA) || self.subject_alt_names.is_some() {
                flags |= CertFlags::INVALID;
            }
        }
        if self.unhandled_critical {
            flags |= CertFlags::CRITICAL;
        }
        if self.freshest_crl {
            flags |= CertFlags::FRESHEST;
        }
        if self.invalid {
            flags |= CertFlags::INVALID;
        }
        if self.invalid_policy {
            flags |= CertFlags::INVALID_POLICY;
        }
        if self.subject == self.issuer {
            flags |= CertFlags::SELF_ISSUED;
            let akid_ok = self.authority_key_id.as_ref().map_or(true, |akid| {
                akid_matches(
                    akid,
                    self.subject_key_id.as_deref(),
                    &self.serial,
                    &self.issuer,
                )
                .is_ok()
            });
            let ku_ok = self
                .key_usage
                .map_or(true, |ku| ku.contains(KeyUsage::KEY_CERT_SIGN));
            if akid_ok && ku_ok {
                flags |= CertFlags::SELF_SIGNED;
            }
        }
        (flags, path_len)
    }
}

struct CertInner {
    fields: CertFields,
    flags: CertFlags,
    path_len: Option<u32>,
    encoding: Vec<u8>,
}

/// An immutable certificate handle. Clones share the same data.
#[derive(Clone)]
pub struct Certificate {
    inner: Arc<CertInner>,
}

impl Certificate {
    fn assemble(fields: CertFields, encoding: Option<Vec<u8>>) -> Self {
        let (flags, path_len) = fields.derive();
        let encoding = encoding.unwrap_or_else(|| serde_json::to_vec(&fields).unwrap_or_default());
        Certificate {
            inner: Arc::new(CertInner {
                fields,
                flags,
                path_len,
                encoding,
            }),
        }
    }

    /// Parse a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, PathvalError> {
        let (_, x509) = X509Certificate::from_der(der)
            .map_err(|e| PathvalError::DerError(format!("{}", e)))?;

        let mut fields = CertFields::new(
            Name::from_x509(x509.subject()),
            Name::from_x509(x509.issuer()),
        );
        fields.version = x509.version().0 + 1;
        fields.serial = x509.raw_serial().to_vec();
        fields.not_before = x509.validity().not_before.timestamp();
        fields.not_after = x509.validity().not_after.timestamp();
        fields.public_key = PublicKeyInfo::from_x509(x509.public_key());
        fields.signature_algorithm =
            SignatureAlgorithm::from_oid(&x509.signature_algorithm.algorithm.to_id_string());
        fields.signature = x509.signature_value.data.to_vec();

        for ext in x509.extensions() {
            let oid = ext.oid.to_id_string();
            if ext.critical && !is_supported_extension(&oid) {
                fields.unhandled_critical = true;
            }
            match ext.parsed_extension() {
                ParsedExtension::BasicConstraints(bc) => {
                    fields.basic_constraints = Some(BasicConstraints {
                        ca: bc.ca,
                        path_len: bc.path_len_constraint,
                    });
                }
                ParsedExtension::KeyUsage(ku) => {
                    fields.key_usage = Some(KeyUsage::from_bits_truncate(ku.flags));
                }
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    fields.ext_key_usage = Some(ExtKeyUsage::from_x509(eku));
                }
                ParsedExtension::SubjectKeyIdentifier(kid) => {
                    fields.subject_key_id = Some(kid.0.to_vec());
                }
                ParsedExtension::AuthorityKeyIdentifier(akid) => {
                    fields.authority_key_id = Some(AuthorityKeyId::from_x509(akid));
                }
                ParsedExtension::SubjectAlternativeName(san) => {
                    fields.subject_alt_names = Some(
                        san.general_names
                            .iter()
                            .map(GeneralName::from_x509)
                            .collect(),
                    );
                }
                ParsedExtension::NameConstraints(nc) => {
                    let subtrees = |list: &Option<Vec<x509_parser::extensions::GeneralSubtree<'_>>>| {
                        list.as_ref()
                            .map(|v| {
                                v.iter()
                                    .map(|s| GeneralSubtree::new(GeneralName::from_x509(&s.base)))
                                    .collect()
                            })
                            .unwrap_or_default()
                    };
                    fields.name_constraints = Some(NameConstraints {
                        permitted: subtrees(&nc.permitted_subtrees),
                        excluded: subtrees(&nc.excluded_subtrees),
                    });
                }
                ParsedExtension::CRLDistributionPoints(dps) => {
                    fields.crl_distribution_points = dps
                        .points
                        .iter()
                        .map(|dp| DistributionPoint {
                            name: dp.distribution_point.as_ref().map(DistPointName::from_x509),
                            reasons: dp
                                .reasons
                                .as_ref()
                                .map(|r| ReasonSet::from_bits_truncate(r.flags)),
                            crl_issuer: dp
                                .crl_issuer
                                .as_ref()
                                .map(|names| names.iter().map(GeneralName::from_x509).collect()),
                        })
                        .collect();
                }
                ParsedExtension::CertificatePolicies(policies) => {
                    let mut oids: Vec<String> = Vec::new();
                    for policy in policies.iter() {
                        let id = policy.policy_id.to_id_string();
                        if oids.contains(&id) {
                            fields.invalid_policy = true;
                        }
                        oids.push(id);
                    }
                    fields.policies = Some(oids);
                }
                ParsedExtension::PolicyMappings(pm) => {
                    fields.policy_mappings = pm
                        .mappings
                        .iter()
                        .map(|m| {
                            (
                                m.issuer_domain_policy.to_id_string(),
                                m.subject_domain_policy.to_id_string(),
                            )
                        })
                        .collect();
                }
                ParsedExtension::PolicyConstraints(pc) => {
                    fields.require_explicit_policy = pc.require_explicit_policy;
                    fields.inhibit_policy_mapping = pc.inhibit_policy_mapping;
                }
                ParsedExtension::InhibitAnyPolicy(iap) => {
                    fields.inhibit_any_policy = Some(iap.skip_certs);
                }
                ParsedExtension::ParseError { .. } => {
                    if is_policy_extension(&oid) {
                        fields.invalid_policy = true;
                    } else {
                        fields.invalid = true;
                    }
                }
                _ => match oid.as_str() {
                    OID_PROXY_CERT_INFO => match proxy_cert_info(ext.value) {
                        Some(limit) => fields.proxy = Some(limit),
                        None => {
                            fields.proxy = Some(None);
                            fields.invalid = true;
                        }
                    },
                    OID_FRESHEST_CRL => fields.freshest_crl = true,
                    _ => {}
                },
            }
        }

        Ok(Certificate::assemble(fields, Some(der.to_vec())))
    }

    pub fn version(&self) -> u32 {
        self.inner.fields.version
    }

    pub fn serial(&self) -> &[u8] {
        &self.inner.fields.serial
    }

    pub fn subject(&self) -> &Name {
        &self.inner.fields.subject
    }

    pub fn issuer(&self) -> &Name {
        &self.inner.fields.issuer
    }

    /// notBefore as Unix seconds.
    pub fn not_before(&self) -> i64 {
        self.inner.fields.not_before
    }

    /// notAfter as Unix seconds.
    pub fn not_after(&self) -> i64 {
        self.inner.fields.not_after
    }

    pub fn flags(&self) -> CertFlags {
        self.inner.flags
    }

    pub fn is_self_issued(&self) -> bool {
        self.inner.flags.contains(CertFlags::SELF_ISSUED)
    }

    pub fn is_self_signed(&self) -> bool {
        self.inner.flags.contains(CertFlags::SELF_SIGNED)
    }

    pub fn key_usage(&self) -> Option<KeyUsage> {
        self.inner.fields.key_usage
    }

    pub fn ext_key_usage(&self) -> Option<ExtKeyUsage> {
        self.inner.fields.ext_key_usage
    }

    /// Effective pathLenConstraint, `None` when unlimited.
    pub fn path_len(&self) -> Option<u32> {
        self.inner.path_len
    }

    /// Proxy path length limit, `None` when unlimited or not a proxy.
    pub fn proxy_path_len(&self) -> Option<u32> {
        self.inner.fields.proxy.flatten()
    }

    pub fn subject_key_id(&self) -> Option<&[u8]> {
        self.inner.fields.subject_key_id.as_deref()
    }

    pub fn authority_key_id(&self) -> Option<&AuthorityKeyId> {
        self.inner.fields.authority_key_id.as_ref()
    }

    /// SAN entries; `None` when the extension is absent.
    pub fn subject_alt_names(&self) -> Option<&[GeneralName]> {
        self.inner.fields.subject_alt_names.as_deref()
    }

    pub fn crl_distribution_points(&self) -> &[DistributionPoint] {
        &self.inner.fields.crl_distribution_points
    }

    pub fn name_constraints(&self) -> Option<&NameConstraints> {
        self.inner.fields.name_constraints.as_ref()
    }

    pub fn policies(&self) -> Option<&[String]> {
        self.inner.fields.policies.as_deref()
    }

    pub fn policy_mappings(&self) -> &[(String, String)] {
        &self.inner.fields.policy_mappings
    }

    pub fn require_explicit_policy(&self) -> Option<u32> {
        self.inner.fields.require_explicit_policy
    }

    pub fn inhibit_policy_mapping(&self) -> Option<u32> {
        self.inner.fields.inhibit_policy_mapping
    }

    pub fn inhibit_any_policy(&self) -> Option<u32> {
        self.inner.fields.inhibit_any_policy
    }

    pub fn public_key(&self) -> &PublicKeyInfo {
        &self.inner.fields.public_key
    }

    pub fn signature_algorithm(&self) -> &SignatureAlgorithm {
        &self.inner.fields.signature_algorithm
    }

    pub fn signature(&self) -> &[u8] {
        &self.inner.fields.signature
    }

    pub fn trust_settings(&self) -> Option<&TrustSettings> {
        self.inner.fields.trust.as_ref()
    }

    /// The encoded certificate: DER for parsed certificates.
    pub fn encoding(&self) -> &[u8] {
        &self.inner.encoding
    }

    /// A copy of this certificate carrying auxiliary trust settings.
    pub fn with_trust(&self, trust: TrustSettings) -> Certificate {
        let mut fields = self.inner.fields.clone();
        fields.trust = Some(trust);
        Certificate::assemble(fields, Some(self.inner.encoding.clone()))
    }

    /// Whether `self` could have issued `subject`.
    ///
    /// Checks name chaining, the subject's AKID against this certificate,
    /// signature algorithm versus key type and key usage (keyCertSign, or
    /// digitalSignature when the subject is a proxy certificate).
    pub fn check_issued(&self, subject: &Certificate) -> Result<(), ErrorCode> {
        if self.subject() != subject.issuer() {
            return Err(ErrorCode::SubjectIssuerMismatch);
        }
        if let Some(akid) = subject.authority_key_id() {
            self.check_akid(akid)?;
        }
        if let (Some(sig), Some(key)) = (
            subject.signature_algorithm().key_kind(),
            self.public_key().algorithm.kind(),
        ) {
            if sig != key {
                return Err(ErrorCode::SignatureAlgorithmMismatch);
            }
        }
        if subject.flags().contains(CertFlags::PROXY) {
            if ku_reject(self, KeyUsage::DIGITAL_SIGNATURE) {
                return Err(ErrorCode::KeyusageNoDigitalSignature);
            }
        } else if ku_reject(self, KeyUsage::KEY_CERT_SIGN) {
            return Err(ErrorCode::KeyusageNoCertsign);
        }
        Ok(())
    }

    /// Whether an authority key identifier is consistent with this
    /// certificate as the issuer.
    pub fn check_akid(&self, akid: &AuthorityKeyId) -> Result<(), ErrorCode> {
        akid_matches(akid, self.subject_key_id(), self.serial(), self.issuer())
    }

    /// Whether this certificate may act as a CA.
    pub fn check_ca(&self) -> bool {
        let flags = self.flags();
        if ku_reject(self, KeyUsage::KEY_CERT_SIGN) {
            return false;
        }
        if flags.contains(CertFlags::BASIC_CONSTRAINTS) {
            return flags.contains(CertFlags::CA);
        }
        if flags.contains(CertFlags::V1) && flags.contains(CertFlags::SELF_SIGNED) {
            return true;
        }
        flags.contains(CertFlags::KEY_USAGE)
    }

    /// Whether the certificate is within its validity window at `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.not_before() <= now && now < self.not_after()
    }
}

/// Key usage present and none of `usage` set.
pub(crate) fn ku_reject(cert: &Certificate, usage: KeyUsage) -> bool {
    cert.key_usage().is_some_and(|ku| !ku.intersects(usage))
}

/// Extended key usage present and none of `usage` set.
pub(crate) fn xku_reject(cert: &Certificate, usage: ExtKeyUsage) -> bool {
    cert.ext_key_usage().is_some_and(|eku| !eku.intersects(usage))
}

fn akid_matches(
    akid: &AuthorityKeyId,
    skid: Option<&[u8]>,
    serial: &[u8],
    issuer_name: &Name,
) -> Result<(), ErrorCode> {
    if let (Some(key_id), Some(skid)) = (akid.key_id.as_deref(), skid) {
        if key_id != skid {
            return Err(ErrorCode::AkidSkidMismatch);
        }
    }
    if let Some(akid_serial) = akid.serial.as_deref() {
        if util::strip_leading_zeros(akid_serial) != util::strip_leading_zeros(serial) {
            return Err(ErrorCode::AkidIssuerSerialMismatch);
        }
    }
    if let Some(names) = &akid.issuer {
        let dirname = names.iter().find_map(|gn| match gn {
            GeneralName::Directory(n) => Some(n),
            _ => None,
        });
        if dirname.is_some_and(|n| n != issuer_name) {
            return Err(ErrorCode::AkidIssuerSerialMismatch);
        }
    }
    Ok(())
}

/// Extensions processed by path validation; anything else marked critical
/// makes a certificate fail with an unhandled critical extension.
fn is_supported_extension(oid: &str) -> bool {
    matches!(
        oid,
        "2.16.840.1.113730.1.1" // Netscape Cert Type
        | "2.5.29.15" // Key Usage
        | "2.5.29.17" // Subject Alternative Name
        | "2.5.29.19" // Basic Constraints
        | "2.5.29.32" // Certificate Policies
        | "2.5.29.37" // Extended Key Usage
        | "1.3.6.1.5.5.7.1.14" // Proxy Cert Info
        | "2.5.29.36" // Policy Constraints
        | "2.5.29.30" // Name Constraints
        | "2.5.29.33" // Policy Mappings
        | "2.5.29.54" // Inhibit Any Policy
    )
}

fn is_policy_extension(oid: &str) -> bool {
    matches!(
        oid,
        OID_CERTIFICATE_POLICIES
            | OID_POLICY_MAPPINGS
            | OID_POLICY_CONSTRAINTS
            | OID_INHIBIT_ANY_POLICY
    )
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.encoding == other.inner.encoding
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject().to_string())
            .field("issuer", &self.issuer().to_string())
            .field("serial", &util::hex(self.serial()))
            .field("flags", &self.flags())
            .finish()
    }
}

/// Assembles a [`Certificate`] field by field.
///
/// Defaults: version 3, serial 1, valid from the epoch until 2100, an empty
/// P-256 key and an ecdsa-with-SHA256 signature.
pub struct CertificateBuilder {
    fields: CertFields,
}

impl CertificateBuilder {
    pub fn new(subject: Name, issuer: Name) -> Self {
        CertificateBuilder {
            fields: CertFields::new(subject, issuer),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.fields.version = version;
        self
    }

    pub fn serial(mut self, serial: &[u8]) -> Self {
        self.fields.serial = serial.to_vec();
        self
    }

    pub fn validity(mut self, not_before: i64, not_after: i64) -> Self {
        self.fields.not_before = not_before;
        self.fields.not_after = not_after;
        self
    }

    pub fn basic_constraints(mut self, ca: bool, path_len: Option<u32>) -> Self {
        self.fields.basic_constraints = Some(BasicConstraints { ca, path_len });
        self
    }

    pub fn key_usage(mut self, usage: KeyUsage) -> Self {
        self.fields.key_usage = Some(usage);
        self
    }

    pub fn ext_key_usage(mut self, usage: ExtKeyUsage) -> Self {
        self.fields.ext_key_usage = Some(usage);
        self
    }

    pub fn subject_key_id(mut self, id: &[u8]) -> Self {
        self.fields.subject_key_id = Some(id.to_vec());
        self
    }

    pub fn authority_key_id(mut self, akid: AuthorityKeyId) -> Self {
        self.fields.authority_key_id = Some(akid);
        self
    }

    pub fn subject_alt_names(mut self, names: Vec<GeneralName>) -> Self {
        self.fields.subject_alt_names = Some(names);
        self
    }

    pub fn crl_distribution_point(mut self, dp: DistributionPoint) -> Self {
        self.fields.crl_distribution_points.push(dp);
        self
    }

    pub fn freshest_crl(mut self) -> Self {
        self.fields.freshest_crl = true;
        self
    }

    pub fn name_constraints(mut self, nc: NameConstraints) -> Self {
        self.fields.name_constraints = Some(nc);
        self
    }

    pub fn policies(mut self, oids: &[&str]) -> Self {
        self.fields.policies = Some(oids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn policy_mapping(mut self, issuer_domain: &str, subject_domain: &str) -> Self {
        self.fields
            .policy_mappings
            .push((issuer_domain.to_string(), subject_domain.to_string()));
        self
    }

    pub fn policy_constraints(
        mut self,
        require_explicit: Option<u32>,
        inhibit_mapping: Option<u32>,
    ) -> Self {
        self.fields.require_explicit_policy = require_explicit;
        self.fields.inhibit_policy_mapping = inhibit_mapping;
        self
    }

    pub fn inhibit_any_policy(mut self, skip_certs: u32) -> Self {
        self.fields.inhibit_any_policy = Some(skip_certs);
        self
    }

    /// Mark as an RFC 3820 proxy certificate.
    pub fn proxy(mut self, path_len: Option<u32>) -> Self {
        self.fields.proxy = Some(path_len);
        self
    }

    /// Mark as carrying a critical extension nobody understands.
    pub fn unhandled_critical_extension(mut self) -> Self {
        self.fields.unhandled_critical = true;
        self
    }

    pub fn invalid_policy(mut self) -> Self {
        self.fields.invalid_policy = true;
        self
    }

    pub fn public_key(mut self, key: PublicKeyInfo) -> Self {
        self.fields.public_key = key;
        self
    }

    pub fn signature_algorithm(mut self, alg: SignatureAlgorithm) -> Self {
        self.fields.signature_algorithm = alg;
        self
    }

    pub fn signature(mut self, signature: &[u8]) -> Self {
        self.fields.signature = signature.to_vec();
        self
    }

    pub fn trust(mut self, trust: TrustSettings) -> Self {
        self.fields.trust = Some(trust);
        self
    }

    pub fn build(self) -> Certificate {
        Certificate::assemble(self.fields, None)
    }
}

/// Path length of a ProxyCertInfo value:
/// `SEQUENCE { pCPathLenConstraint INTEGER OPTIONAL, proxyPolicy SEQUENCE }`.
///
/// Returns `Some(None)` when the extension is well formed without a limit.
fn proxy_cert_info(value: &[u8]) -> Option<Option<u32>> {
    let (rest, seq) = parse_der_sequence(value).ok()?;
    if !rest.is_empty() {
        return None;
    }
    match seq.as_sequence().ok()?.as_slice() {
        [policy] => policy.as_sequence().is_ok().then_some(None),
        [len, policy] => {
            let len = len.as_u32().ok()?;
            policy.as_sequence().is_ok().then_some(Some(len))
        }
        _ => None,
    }
}
