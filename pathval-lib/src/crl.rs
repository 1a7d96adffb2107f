//! Certificate revocation lists.
//!
//! [`Crl`] carries what revocation checking needs from a CRL: issuer, update
//! times, CRL numbers (full and delta), the issuing distribution point and
//! its derived flags, the raw AKID/IDP extension bytes used to pair delta
//! CRLs with their base, and the revoked entries sorted by serial.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use x509_parser::der_parser::der::{parse_der_integer, parse_der_sequence_defined_g};
use x509_parser::der_parser::error::BerError;
use x509_parser::extensions::GeneralName as X509GeneralName;
use x509_parser::nom::IResult;
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::cert::{AuthorityKeyId, Certificate, DistPointName, SignatureAlgorithm};
use crate::error::PathvalError;
use crate::name::{GeneralName, Name};
use crate::util;

const OID_CRL_NUMBER: &str = "2.5.29.20";
const OID_DELTA_CRL_INDICATOR: &str = "2.5.29.27";
const OID_ISSUING_DIST_POINT: &str = "2.5.29.28";
const OID_CERTIFICATE_ISSUER: &str = "2.5.29.29";
const OID_AUTHORITY_KEY_ID: &str = "2.5.29.35";
const OID_FRESHEST_CRL: &str = "2.5.29.46";

bitflags! {
    /// Revocation reasons as ReasonFlags bit positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ReasonSet: u16 {
        const UNUSED = 1 << 0;
        const KEY_COMPROMISE = 1 << 1;
        const CA_COMPROMISE = 1 << 2;
        const AFFILIATION_CHANGED = 1 << 3;
        const SUPERSEDED = 1 << 4;
        const CESSATION_OF_OPERATION = 1 << 5;
        const CERTIFICATE_HOLD = 1 << 6;
        const PRIVILEGE_WITHDRAWN = 1 << 7;
        const AA_COMPROMISE = 1 << 8;
        const ALL = 0x1ff;
    }
}

bitflags! {
    /// Facts derived from the issuingDistributionPoint extension.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct IdpFlags: u8 {
        const PRESENT = 1 << 0;
        const ONLY_USER = 1 << 1;
        const ONLY_CA = 1 << 2;
        const ONLY_ATTR = 1 << 3;
        const INDIRECT = 1 << 4;
        const REASONS = 1 << 5;
        /// More than one of the "only" flags, or an undecodable extension.
        const INVALID = 1 << 6;
    }
}

/// CRLReason of a revoked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => RevocationReason::KeyCompromise,
            2 => RevocationReason::CaCompromise,
            3 => RevocationReason::AffiliationChanged,
            4 => RevocationReason::Superseded,
            5 => RevocationReason::CessationOfOperation,
            6 => RevocationReason::CertificateHold,
            8 => RevocationReason::RemoveFromCrl,
            9 => RevocationReason::PrivilegeWithdrawn,
            10 => RevocationReason::AaCompromise,
            _ => RevocationReason::Unspecified,
        }
    }
}

/// One revoked certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevokedEntry {
    pub serial: Vec<u8>,
    pub reason: Option<RevocationReason>,
    pub revocation_date: i64,
    /// certificateIssuer in effect for this entry (indirect CRLs).
    pub issuer: Option<Vec<GeneralName>>,
}

impl RevokedEntry {
    pub fn new(serial: &[u8], reason: Option<RevocationReason>) -> Self {
        RevokedEntry {
            serial: serial.to_vec(),
            reason,
            revocation_date: 0,
            issuer: None,
        }
    }
}

/// issuingDistributionPoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssuingDistPoint {
    pub name: Option<DistPointName>,
    pub only_user: bool,
    pub only_ca: bool,
    pub only_attr: bool,
    pub only_some_reasons: Option<ReasonSet>,
    pub indirect: bool,
}

impl IssuingDistPoint {
    fn from_x509(idp: &x509_parser::extensions::IssuingDistributionPoint<'_>) -> Self {
        IssuingDistPoint {
            name: idp.distribution_point.as_ref().map(DistPointName::from_x509),
            only_user: idp.only_contains_user_certs,
            only_ca: idp.only_contains_ca_certs,
            only_attr: idp.only_contains_attribute_certs,
            only_some_reasons: idp
                .only_some_reasons
                .as_ref()
                .map(|r| ReasonSet::from_bits_truncate(r.flags)),
            indirect: idp.indirect_crl,
        }
    }
}

/// CRL number or delta base number, compared numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CrlNumber(Vec<u8>);

impl CrlNumber {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        CrlNumber(util::strip_leading_zeros(bytes).to_vec())
    }
}

impl From<u64> for CrlNumber {
    fn from(n: u64) -> Self {
        CrlNumber::from_bytes(&n.to_be_bytes())
    }
}

impl Ord for CrlNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for CrlNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Raw value of an extension that may legitimately be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExtValue {
    Absent,
    Present(Vec<u8>),
    /// The extension appeared more than once.
    Duplicated,
}

impl ExtValue {
    fn record(&mut self, value: &[u8]) {
        *self = match self {
            ExtValue::Absent => ExtValue::Present(value.to_vec()),
            _ => ExtValue::Duplicated,
        };
    }
}

#[derive(Debug, Clone, Serialize)]
struct CrlFields {
    issuer: Name,
    last_update: i64,
    next_update: Option<i64>,
    number: Option<CrlNumber>,
    base_number: Option<CrlNumber>,
    authority_key_id: Option<AuthorityKeyId>,
    idp: Option<IssuingDistPoint>,
    akid_ext: ExtValue,
    idp_ext: ExtValue,
    critical: bool,
    freshest: bool,
    idp_invalid: bool,
    revoked: Vec<RevokedEntry>,
    signature_algorithm: SignatureAlgorithm,
    signature: Vec<u8>,
}

struct CrlInner {
    fields: CrlFields,
    idp_flags: IdpFlags,
    idp_reasons: ReasonSet,
    encoding: Vec<u8>,
}

/// An immutable CRL handle. Clones share the same data.
#[derive(Clone)]
pub struct Crl {
    inner: Arc<CrlInner>,
}

impl Crl {
    fn assemble(mut fields: CrlFields, encoding: Option<Vec<u8>>) -> Self {
        let mut idp_flags = IdpFlags::empty();
        let mut idp_reasons = ReasonSet::ALL;
        if let Some(idp) = &fields.idp {
            idp_flags |= IdpFlags::PRESENT;
            let mut only = 0;
            for (set, flag) in [
                (idp.only_user, IdpFlags::ONLY_USER),
                (idp.only_ca, IdpFlags::ONLY_CA),
                (idp.only_attr, IdpFlags::ONLY_ATTR),
            ] {
                if set {
                    idp_flags |= flag;
                    only += 1;
                }
            }
            if only > 1 {
                idp_flags |= IdpFlags::INVALID;
            }
            if idp.indirect {
                idp_flags |= IdpFlags::INDIRECT;
            }
            if let Some(reasons) = idp.only_some_reasons {
                idp_flags |= IdpFlags::REASONS;
                idp_reasons = reasons;
            }
        }
        if fields.idp_invalid {
            idp_flags |= IdpFlags::PRESENT | IdpFlags::INVALID;
        }
        // A delta indicator without a CRL number makes the CRL unusable.
        if fields.base_number.is_some() && fields.number.is_none() {
            idp_flags |= IdpFlags::INVALID;
        }

        // An entry without certificateIssuer inherits the previous entry's.
        let mut current: Option<Vec<GeneralName>> = None;
        for entry in fields.revoked.iter_mut() {
            match &entry.issuer {
                Some(issuer) => current = Some(issuer.clone()),
                None => entry.issuer = current.clone(),
            }
        }
        fields
            .revoked
            .sort_by(|a, b| cmp_serial(&a.serial, &b.serial));

        let encoding = encoding.unwrap_or_else(|| serde_json::to_vec(&fields).unwrap_or_default());
        Crl {
            inner: Arc::new(CrlInner {
                fields,
                idp_flags,
                idp_reasons,
                encoding,
            }),
        }
    }

    /// Parse a DER CRL.
    pub fn from_der(der: &[u8]) -> Result<Self, PathvalError> {
        let (_, x509) = CertificateRevocationList::from_der(der)
            .map_err(|e| PathvalError::DerError(format!("{}", e)))?;

        let mut fields = CrlFields::new(Name::from_x509(x509.issuer()));
        fields.last_update = x509.last_update().timestamp();
        fields.next_update = x509.next_update().map(|t| t.timestamp());
        fields.signature_algorithm =
            SignatureAlgorithm::from_oid(&x509.signature_algorithm.algorithm.to_id_string());
        fields.signature = x509.signature_value.data.to_vec();

        for ext in x509.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::CRLNumber(n) => {
                    fields.number = Some(CrlNumber::from_bytes(&n.to_bytes_be()));
                }
                ParsedExtension::AuthorityKeyIdentifier(akid) => {
                    fields.akid_ext.record(ext.value);
                    fields.authority_key_id = Some(AuthorityKeyId::from_x509(akid));
                }
                ParsedExtension::IssuingDistributionPoint(idp) => {
                    fields.idp_ext.record(ext.value);
                    fields.idp = Some(IssuingDistPoint::from_x509(idp));
                }
                _ => match ext.oid.to_id_string().as_str() {
                    OID_DELTA_CRL_INDICATOR => fields.base_number = crl_number(ext.value),
                    OID_AUTHORITY_KEY_ID => fields.akid_ext.record(ext.value),
                    OID_ISSUING_DIST_POINT => {
                        fields.idp_ext.record(ext.value);
                        fields.idp_invalid = true;
                    }
                    OID_CRL_NUMBER => {}
                    OID_FRESHEST_CRL => fields.freshest = true,
                    _ => {
                        if ext.critical {
                            fields.critical = true;
                        }
                    }
                },
            }
        }

        for revoked in x509.iter_revoked_certificates() {
            let mut entry = RevokedEntry::new(
                revoked.raw_serial(),
                revoked
                    .reason_code()
                    .map(|rc| RevocationReason::from_code(rc.1 .0)),
            );
            entry.revocation_date = revoked.revocation_date.timestamp();
            for ext in revoked.extensions() {
                if ext.oid.to_id_string() == OID_CERTIFICATE_ISSUER {
                    entry.issuer = certificate_issuer(ext.value);
                }
            }
            fields.revoked.push(entry);
        }

        Ok(Crl::assemble(fields, Some(der.to_vec())))
    }

    pub fn issuer(&self) -> &Name {
        &self.inner.fields.issuer
    }

    pub fn last_update(&self) -> i64 {
        self.inner.fields.last_update
    }

    pub fn next_update(&self) -> Option<i64> {
        self.inner.fields.next_update
    }

    pub fn number(&self) -> Option<&CrlNumber> {
        self.inner.fields.number.as_ref()
    }

    /// Delta CRL indicator: the base CRL number this delta applies to.
    pub fn base_number(&self) -> Option<&CrlNumber> {
        self.inner.fields.base_number.as_ref()
    }

    pub fn is_delta(&self) -> bool {
        self.inner.fields.base_number.is_some()
    }

    pub fn authority_key_id(&self) -> Option<&AuthorityKeyId> {
        self.inner.fields.authority_key_id.as_ref()
    }

    pub fn issuing_dist_point(&self) -> Option<&IssuingDistPoint> {
        self.inner.fields.idp.as_ref()
    }

    pub fn idp_flags(&self) -> IdpFlags {
        self.inner.idp_flags
    }

    /// Reasons this CRL covers per its IDP, all reasons when unrestricted.
    pub fn idp_reasons(&self) -> ReasonSet {
        self.inner.idp_reasons
    }

    /// A critical extension other than IDP, AKID or the delta indicator.
    pub fn has_unhandled_critical(&self) -> bool {
        self.inner.fields.critical
    }

    pub fn has_freshest(&self) -> bool {
        self.inner.fields.freshest
    }

    pub fn revoked(&self) -> &[RevokedEntry] {
        &self.inner.fields.revoked
    }

    pub fn signature_algorithm(&self) -> &SignatureAlgorithm {
        &self.inner.fields.signature_algorithm
    }

    pub fn signature(&self) -> &[u8] {
        &self.inner.fields.signature
    }

    /// The encoded CRL: DER for parsed CRLs.
    pub fn encoding(&self) -> &[u8] {
        &self.inner.encoding
    }

    /// The entry revoking `cert`, if any.
    ///
    /// Entries match by serial; the entry's issuer (its certificateIssuer,
    /// or the CRL issuer) must also be the certificate's issuer.
    pub fn find_revoked(&self, cert: &Certificate) -> Option<&RevokedEntry> {
        let revoked = self.revoked();
        let serial = cert.serial();
        let start = revoked.partition_point(|e| cmp_serial(&e.serial, serial) == Ordering::Less);
        revoked[start..]
            .iter()
            .take_while(|e| cmp_serial(&e.serial, serial) == Ordering::Equal)
            .find(|e| self.entry_issuer_matches(e, cert.issuer()))
    }

    fn entry_issuer_matches(&self, entry: &RevokedEntry, issuer: &Name) -> bool {
        match &entry.issuer {
            None => self.issuer() == issuer,
            Some(names) => names
                .iter()
                .any(|gn| matches!(gn, GeneralName::Directory(n) if n == issuer)),
        }
    }

    /// Whether this delta CRL can be applied on top of `base`.
    ///
    /// Both must carry CRL numbers, share an issuer, carry byte-identical
    /// AKID and IDP extensions, and the delta must start at or before the
    /// base and be newer than it.
    pub fn is_delta_of(&self, base: &Crl) -> bool {
        let (Some(delta_base), Some(delta_number), Some(base_number)) =
            (self.base_number(), self.number(), base.number())
        else {
            return false;
        };
        if self.issuer() != base.issuer() {
            return false;
        }
        if !ext_match(&self.inner.fields.akid_ext, &base.inner.fields.akid_ext) {
            return false;
        }
        if !ext_match(&self.inner.fields.idp_ext, &base.inner.fields.idp_ext) {
            return false;
        }
        delta_base <= base_number && delta_number > base_number
    }
}

fn ext_match(a: &ExtValue, b: &ExtValue) -> bool {
    match (a, b) {
        (ExtValue::Absent, ExtValue::Absent) => true,
        (ExtValue::Present(x), ExtValue::Present(y)) => x == y,
        _ => false,
    }
}

fn cmp_serial(a: &[u8], b: &[u8]) -> Ordering {
    let (a, b) = (util::strip_leading_zeros(a), util::strip_leading_zeros(b));
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl PartialEq for Crl {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.encoding == other.inner.encoding
    }
}

impl Eq for Crl {}

impl fmt::Debug for Crl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crl")
            .field("issuer", &self.issuer().to_string())
            .field("number", &self.number())
            .field("base_number", &self.base_number())
            .field("last_update", &self.last_update())
            .field("revoked", &self.revoked().len())
            .finish()
    }
}

impl CrlFields {
    fn new(issuer: Name) -> Self {
        CrlFields {
            issuer,
            last_update: 0,
            next_update: None,
            number: None,
            base_number: None,
            authority_key_id: None,
            idp: None,
            akid_ext: ExtValue::Absent,
            idp_ext: ExtValue::Absent,
            critical: false,
            freshest: false,
            idp_invalid: false,
            revoked: Vec::new(),
            signature_algorithm: SignatureAlgorithm::EcdsaSha256,
            signature: Vec::new(),
        }
    }
}

/// Assembles a [`Crl`] field by field. The AKID and IDP values double as
/// their raw extension encodings for delta pairing.
pub struct CrlBuilder {
    fields: CrlFields,
}

impl CrlBuilder {
    pub fn new(issuer: Name) -> Self {
        CrlBuilder {
            fields: CrlFields::new(issuer),
        }
    }

    pub fn last_update(mut self, t: i64) -> Self {
        self.fields.last_update = t;
        self
    }

    pub fn next_update(mut self, t: i64) -> Self {
        self.fields.next_update = Some(t);
        self
    }

    pub fn number(mut self, n: u64) -> Self {
        self.fields.number = Some(n.into());
        self
    }

    /// Make this a delta CRL against base number `n`.
    pub fn delta_of(mut self, n: u64) -> Self {
        self.fields.base_number = Some(n.into());
        self
    }

    pub fn authority_key_id(mut self, akid: AuthorityKeyId) -> Self {
        self.fields.akid_ext = ExtValue::Present(serde_json::to_vec(&akid).unwrap_or_default());
        self.fields.authority_key_id = Some(akid);
        self
    }

    pub fn issuing_dist_point(mut self, idp: IssuingDistPoint) -> Self {
        self.fields.idp_ext = ExtValue::Present(serde_json::to_vec(&idp).unwrap_or_default());
        self.fields.idp = Some(idp);
        self
    }

    pub fn unhandled_critical_extension(mut self) -> Self {
        self.fields.critical = true;
        self
    }

    pub fn freshest(mut self) -> Self {
        self.fields.freshest = true;
        self
    }

    pub fn revoke(self, serial: &[u8], reason: Option<RevocationReason>) -> Self {
        self.revoke_entry(RevokedEntry::new(serial, reason))
    }

    pub fn revoke_entry(mut self, entry: RevokedEntry) -> Self {
        self.fields.revoked.push(entry);
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

    pub fn build(self) -> Crl {
        Crl::assemble(self.fields, None)
    }
}

/// A bare INTEGER extension value, as in the delta CRL indicator.
fn crl_number(value: &[u8]) -> Option<CrlNumber> {
    let (rest, obj) = parse_der_integer(value).ok()?;
    let n = obj.as_biguint().ok()?;
    rest.is_empty().then(|| CrlNumber::from_bytes(&n.to_bytes_be()))
}

/// certificateIssuer entry extension: `GeneralNames`.
fn certificate_issuer(value: &[u8]) -> Option<Vec<GeneralName>> {
    let parsed: IResult<&[u8], Vec<GeneralName>, BerError> =
        parse_der_sequence_defined_g(|mut content, _| {
            let mut names = Vec::new();
            while !content.is_empty() {
                let (rest, gn) = X509GeneralName::from_der(content)
                    .map_err(|_| x509_parser::nom::Err::Error(BerError::InvalidTag))?;
                names.push(GeneralName::from_x509(&gn));
                content = rest;
            }
            Ok((content, names))
        })(value);
    match parsed {
        Ok((rest, names)) if rest.is_empty() => Some(names),
        _ => None,
    }
}
