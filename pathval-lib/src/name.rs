//! Distinguished names and general names.
//!
//! Names compare by a canonical form (attribute types plus values lowercased
//! with internal whitespace collapsed), which is what issuer/subject
//! chaining, CRL issuer matching and directory name constraints use.

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::PathvalError;
use crate::util;

/// OID of the PKCS#9 emailAddress attribute.
pub const OID_EMAIL_ADDRESS: &str = "1.2.840.113549.1.9.1";

/// One attribute of a distinguished name, e.g. `CN=example.com`.
#[derive(Debug, Clone)]
pub struct NameAttr {
    /// Short attribute name (`CN`, `O`, ...) or dotted OID.
    pub kind: String,
    /// Attribute value as text.
    pub value: String,
}

impl NameAttr {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        NameAttr {
            kind: kind.into(),
            value: value.into(),
        }
    }

    fn canonical(&self) -> (String, String) {
        let value = self
            .value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        (self.kind.to_ascii_uppercase(), value)
    }
}

/// A distinguished name as an ordered list of attributes.
#[derive(Debug, Clone, Default)]
pub struct Name {
    attrs: Vec<NameAttr>,
    canonical: Vec<(String, String)>,
}

impl Name {
    /// Build a name from attributes in RDN order.
    pub fn new(attrs: Vec<NameAttr>) -> Self {
        let canonical = attrs.iter().map(NameAttr::canonical).collect();
        Name { attrs, canonical }
    }

    /// Build a name from `(type, value)` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Name::new(pairs.iter().map(|(k, v)| NameAttr::new(*k, *v)).collect())
    }

    /// Convert an x509-parser name.
    pub fn from_x509(name: &x509_parser::x509::X509Name<'_>) -> Self {
        let mut attrs = Vec::new();
        for rdn in name.iter() {
            for attr in rdn.iter() {
                let kind = attr_kind(attr.attr_type().to_id_string());
                let value = match attr.as_str() {
                    Ok(s) => s.to_string(),
                    Err(_) => format!("#{}", util::hex(attr.attr_value().as_bytes())),
                };
                attrs.push(NameAttr { kind, value });
            }
        }
        Name::new(attrs)
    }

    pub fn attrs(&self) -> &[NameAttr] {
        &self.attrs
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Values of every attribute of the given kind, in order.
    pub fn values_of<'n>(&'n self, kind: &'n str) -> impl Iterator<Item = &'n str> + 'n {
        self.attrs
            .iter()
            .filter(move |a| a.kind.eq_ignore_ascii_case(kind))
            .map(|a| a.value.as_str())
    }

    /// Common name attributes.
    pub fn common_names(&self) -> impl Iterator<Item = &str> {
        self.values_of("CN")
    }

    /// emailAddress attributes.
    pub fn email_addresses(&self) -> impl Iterator<Item = &str> {
        self.attrs
            .iter()
            .filter(|a| a.kind == "emailAddress" || a.kind == OID_EMAIL_ADDRESS)
            .map(|a| a.value.as_str())
    }

    /// Whether `self` is an RDN prefix of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.canonical.len() <= other.canonical.len()
            && self
                .canonical
                .iter()
                .zip(other.canonical.iter())
                .all(|(a, b)| a == b)
    }

    /// Append a relative name to this one.
    pub fn join(&self, relative: &Name) -> Name {
        let mut attrs = self.attrs.clone();
        attrs.extend(relative.attrs.iter().cloned());
        Name::new(attrs)
    }
}

/// Short attribute name for a dotted OID, or the OID itself.
pub(crate) fn attr_kind(oid: String) -> String {
    short_attr_name(&oid).map(str::to_string).unwrap_or(oid)
}

fn short_attr_name(oid: &str) -> Option<&'static str> {
    Some(match oid {
        "2.5.4.3" => "CN",
        "2.5.4.4" => "SN",
        "2.5.4.5" => "serialNumber",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "street",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.12" => "title",
        "2.5.4.42" => "GN",
        "0.9.2342.19200300.100.1.25" => "DC",
        "0.9.2342.19200300.100.1.1" => "UID",
        OID_EMAIL_ADDRESS => "emailAddress",
        _ => return None,
    })
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.attrs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", attr.kind, attr.value)?;
        }
        Ok(())
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses the `CN=foo, O=Bar` form produced by `Display`.
impl FromStr for Name {
    type Err = PathvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut attrs = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (kind, value) = part.split_once('=').ok_or_else(|| {
                PathvalError::Config(format!("invalid name component '{}'", part))
            })?;
            attrs.push(NameAttr::new(kind.trim(), value.trim()));
        }
        Ok(Name::new(attrs))
    }
}

/// A GeneralName as used by SAN, name constraints, distribution points and
/// authority key identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GeneralName {
    Dns(String),
    Email(String),
    Uri(String),
    /// Address (4/16 bytes), or address plus mask (8/32 bytes) in constraints.
    Ip(Vec<u8>),
    Directory(Name),
    /// Any other form, kept only so its presence is visible.
    Other(String),
}

impl GeneralName {
    /// Convert an x509-parser general name.
    pub fn from_x509(gn: &x509_parser::extensions::GeneralName<'_>) -> Self {
        use x509_parser::extensions::GeneralName as X;
        match gn {
            X::DNSName(s) => GeneralName::Dns(s.to_string()),
            X::RFC822Name(s) => GeneralName::Email(s.to_string()),
            X::URI(s) => GeneralName::Uri(s.to_string()),
            X::IPAddress(b) => GeneralName::Ip(b.to_vec()),
            X::DirectoryName(n) => GeneralName::Directory(Name::from_x509(n)),
            X::RegisteredID(oid) => {
                GeneralName::Other(format!("registeredID:{}", oid.to_id_string()))
            }
            X::OtherName(oid, _) => {
                GeneralName::Other(format!("otherName:{}", oid.to_id_string()))
            }
            _ => GeneralName::Other("unsupported".into()),
        }
    }

    /// Discriminant used to pair names with constraints of the same form.
    pub(crate) fn form(&self) -> u8 {
        match self {
            GeneralName::Dns(_) => 0,
            GeneralName::Email(_) => 1,
            GeneralName::Uri(_) => 2,
            GeneralName::Ip(_) => 3,
            GeneralName::Directory(_) => 4,
            GeneralName::Other(_) => 5,
        }
    }
}

impl fmt::Display for GeneralName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneralName::Dns(s) => write!(f, "DNS:{}", s),
            GeneralName::Email(s) => write!(f, "email:{}", s),
            GeneralName::Uri(s) => write!(f, "URI:{}", s),
            GeneralName::Ip(b) if b.len() == 8 || b.len() == 32 => {
                let (addr, mask) = b.split_at(b.len() / 2);
                write!(
                    f,
                    "IP:{}/{}",
                    util::format_ip_bytes(addr),
                    util::format_ip_bytes(mask)
                )
            }
            GeneralName::Ip(b) => write!(f, "IP:{}", util::format_ip_bytes(b)),
            GeneralName::Directory(n) => write!(f, "DirName:{}", n),
            GeneralName::Other(s) => f.write_str(s),
        }
    }
}
