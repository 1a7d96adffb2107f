//! Certificate purposes and trust evaluation.
//!
//! A [`Purpose`] decides whether a certificate's key usage, extended key
//! usage and CA status fit an intended use. A [`TrustKind`] decides whether a
//! certificate from the trusted part of a chain is an acceptable anchor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cert::{ku_reject, xku_reject, CertFlags, Certificate, ExtKeyUsage, KeyUsage};
use crate::error::PathvalError;

/// Intended use of the leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    SslClient,
    SslServer,
    NsSslServer,
    SmimeSign,
    SmimeEncrypt,
    CrlSign,
    Any,
    OcspHelper,
    TimestampSign,
}

impl Purpose {
    pub const ALL: [Purpose; 9] = [
        Purpose::SslClient,
        Purpose::SslServer,
        Purpose::NsSslServer,
        Purpose::SmimeSign,
        Purpose::SmimeEncrypt,
        Purpose::CrlSign,
        Purpose::Any,
        Purpose::OcspHelper,
        Purpose::TimestampSign,
    ];

    /// Short name as accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Purpose::SslClient => "sslclient",
            Purpose::SslServer => "sslserver",
            Purpose::NsSslServer => "nssslserver",
            Purpose::SmimeSign => "smimesign",
            Purpose::SmimeEncrypt => "smimeencrypt",
            Purpose::CrlSign => "crlsign",
            Purpose::Any => "any",
            Purpose::OcspHelper => "ocsphelper",
            Purpose::TimestampSign => "timestampsign",
        }
    }

    /// Trust kind used when the caller does not pick one.
    pub fn default_trust(self) -> TrustKind {
        match self {
            Purpose::SslClient => TrustKind::SslClient,
            Purpose::SslServer | Purpose::NsSslServer => TrustKind::SslServer,
            Purpose::SmimeSign | Purpose::SmimeEncrypt => TrustKind::Email,
            Purpose::CrlSign | Purpose::OcspHelper => TrustKind::Compat,
            Purpose::Any => TrustKind::Default,
            Purpose::TimestampSign => TrustKind::Tsa,
        }
    }

    /// Whether `cert` is fit for this purpose, as a CA when `ca` is set.
    pub fn check(self, cert: &Certificate, ca: bool) -> bool {
        match self {
            Purpose::SslClient => {
                if xku_reject(cert, ExtKeyUsage::CLIENT_AUTH) {
                    return false;
                }
                if ca {
                    return cert.check_ca();
                }
                !ku_reject(cert, KeyUsage::DIGITAL_SIGNATURE | KeyUsage::KEY_AGREEMENT)
            }
            Purpose::SslServer | Purpose::NsSslServer => {
                if xku_reject(cert, ExtKeyUsage::SERVER_AUTH) {
                    return false;
                }
                if ca {
                    return cert.check_ca();
                }
                if ku_reject(
                    cert,
                    KeyUsage::DIGITAL_SIGNATURE
                        | KeyUsage::KEY_ENCIPHERMENT
                        | KeyUsage::KEY_AGREEMENT,
                ) {
                    return false;
                }
                // Netscape flavour additionally insists on key encipherment.
                self != Purpose::NsSslServer || !ku_reject(cert, KeyUsage::KEY_ENCIPHERMENT)
            }
            Purpose::SmimeSign | Purpose::SmimeEncrypt => {
                if xku_reject(cert, ExtKeyUsage::EMAIL_PROTECTION) {
                    return false;
                }
                if ca {
                    return cert.check_ca();
                }
                let usage = if self == Purpose::SmimeSign {
                    KeyUsage::DIGITAL_SIGNATURE | KeyUsage::NON_REPUDIATION
                } else {
                    KeyUsage::KEY_ENCIPHERMENT
                };
                !ku_reject(cert, usage)
            }
            Purpose::CrlSign => {
                if ca {
                    return cert.check_ca();
                }
                !ku_reject(cert, KeyUsage::CRL_SIGN)
            }
            Purpose::OcspHelper => !ca || cert.check_ca(),
            Purpose::TimestampSign => {
                if ca {
                    return cert.check_ca();
                }
                let allowed = KeyUsage::DIGITAL_SIGNATURE | KeyUsage::NON_REPUDIATION;
                if cert.key_usage().is_some_and(|ku| !allowed.contains(ku)) {
                    return false;
                }
                cert.ext_key_usage() == Some(ExtKeyUsage::TIME_STAMPING)
            }
            Purpose::Any => true,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Purpose {
    type Err = PathvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Purpose::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| PathvalError::Config(format!("unknown purpose '{}'", s)))
    }
}

/// How trust of an anchor is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustKind {
    /// anyExtendedKeyUsage trust, falling back to the compatibility rule.
    Default,
    /// Self-signed certificates are trusted.
    Compat,
    SslClient,
    SslServer,
    Email,
    ObjectSign,
    OcspSign,
    OcspRequest,
    Tsa,
}

/// Outcome of trust evaluation for a certificate or a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustResult {
    Trusted,
    Rejected,
    Untrusted,
}

impl TrustKind {
    pub fn name(self) -> &'static str {
        match self {
            TrustKind::Default => "default",
            TrustKind::Compat => "compat",
            TrustKind::SslClient => "sslclient",
            TrustKind::SslServer => "sslserver",
            TrustKind::Email => "email",
            TrustKind::ObjectSign => "objsign",
            TrustKind::OcspSign => "ocspsign",
            TrustKind::OcspRequest => "ocsprequest",
            TrustKind::Tsa => "tsa",
        }
    }

    fn usage(self) -> ExtKeyUsage {
        match self {
            TrustKind::Default | TrustKind::Compat => ExtKeyUsage::ANY,
            TrustKind::SslClient => ExtKeyUsage::CLIENT_AUTH,
            TrustKind::SslServer => ExtKeyUsage::SERVER_AUTH,
            TrustKind::Email => ExtKeyUsage::EMAIL_PROTECTION,
            TrustKind::ObjectSign => ExtKeyUsage::CODE_SIGNING,
            TrustKind::OcspSign | TrustKind::OcspRequest => ExtKeyUsage::OCSP_SIGNING,
            TrustKind::Tsa => ExtKeyUsage::TIME_STAMPING,
        }
    }

    /// Trust `cert` under this kind.
    pub fn check(self, cert: &Certificate) -> TrustResult {
        match self {
            TrustKind::Default => match obj_trust(cert, ExtKeyUsage::ANY) {
                TrustResult::Untrusted => trust_compat(cert),
                other => other,
            },
            TrustKind::Compat => trust_compat(cert),
            TrustKind::OcspSign | TrustKind::OcspRequest => {
                if cert.trust_settings().is_some() {
                    obj_trust(cert, self.usage())
                } else {
                    TrustResult::Untrusted
                }
            }
            _ => {
                if cert.trust_settings().is_some_and(|t| !t.is_empty()) {
                    obj_trust(cert, self.usage())
                } else {
                    trust_compat(cert)
                }
            }
        }
    }
}

impl fmt::Display for TrustKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrustKind {
    type Err = PathvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            TrustKind::Default,
            TrustKind::Compat,
            TrustKind::SslClient,
            TrustKind::SslServer,
            TrustKind::Email,
            TrustKind::ObjectSign,
            TrustKind::OcspSign,
            TrustKind::OcspRequest,
            TrustKind::Tsa,
        ]
        .into_iter()
        .find(|t| t.name() == s)
        .ok_or_else(|| PathvalError::Config(format!("unknown trust '{}'", s)))
    }
}

fn trust_compat(cert: &Certificate) -> TrustResult {
    if cert.flags().contains(CertFlags::SELF_SIGNED) {
        TrustResult::Trusted
    } else {
        TrustResult::Untrusted
    }
}

fn obj_trust(cert: &Certificate, usage: ExtKeyUsage) -> TrustResult {
    let Some(settings) = cert.trust_settings() else {
        return TrustResult::Untrusted;
    };
    if settings.rejected.intersects(usage | ExtKeyUsage::ANY) {
        return TrustResult::Rejected;
    }
    if settings.trusted.intersects(usage | ExtKeyUsage::ANY) {
        return TrustResult::Trusted;
    }
    TrustResult::Untrusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, TrustSettings};
    use crate::name::Name;

    fn leaf() -> CertificateBuilder {
        CertificateBuilder::new(
            Name::from_pairs(&[("CN", "leaf")]),
            Name::from_pairs(&[("CN", "CA")]),
        )
    }

    fn root() -> CertificateBuilder {
        let n = Name::from_pairs(&[("CN", "Root")]);
        CertificateBuilder::new(n.clone(), n).basic_constraints(true, None)
    }

    #[test]
    fn test_ssl_server_purpose() {
        let good = leaf()
            .key_usage(KeyUsage::DIGITAL_SIGNATURE)
            .ext_key_usage(ExtKeyUsage::SERVER_AUTH)
            .build();
        assert!(Purpose::SslServer.check(&good, false));
        assert!(!Purpose::SslClient.check(&good, false));

        let no_eku = leaf().key_usage(KeyUsage::KEY_ENCIPHERMENT).build();
        assert!(Purpose::SslServer.check(&no_eku, false));
        assert!(Purpose::NsSslServer.check(&no_eku, false));

        let ds_only = leaf().key_usage(KeyUsage::DIGITAL_SIGNATURE).build();
        assert!(!Purpose::NsSslServer.check(&ds_only, false));

        let crl_only = leaf().key_usage(KeyUsage::CRL_SIGN).build();
        assert!(!Purpose::SslServer.check(&crl_only, false));
    }

    #[test]
    fn test_ca_purpose_needs_ca() {
        let ee = leaf().basic_constraints(false, None).build();
        assert!(!Purpose::SslServer.check(&ee, true));
        assert!(Purpose::SslServer.check(&root().build(), true));
        assert!(Purpose::Any.check(&ee, true));
    }

    #[test]
    fn test_timestamp_purpose() {
        let tsa = leaf()
            .key_usage(KeyUsage::DIGITAL_SIGNATURE)
            .ext_key_usage(ExtKeyUsage::TIME_STAMPING)
            .build();
        assert!(Purpose::TimestampSign.check(&tsa, false));
        let extra = leaf()
            .ext_key_usage(ExtKeyUsage::TIME_STAMPING | ExtKeyUsage::SERVER_AUTH)
            .build();
        assert!(!Purpose::TimestampSign.check(&extra, false));
        assert!(!Purpose::TimestampSign.check(&leaf().build(), false));
    }

    #[test]
    fn test_trust_compat_and_aux() {
        let r = root().build();
        assert_eq!(TrustKind::Default.check(&r), TrustResult::Trusted);
        assert_eq!(TrustKind::SslServer.check(&r), TrustResult::Trusted);
        assert_eq!(TrustKind::OcspSign.check(&r), TrustResult::Untrusted);

        let client_only = r.with_trust(TrustSettings {
            trusted: ExtKeyUsage::CLIENT_AUTH,
            rejected: ExtKeyUsage::empty(),
        });
        assert_eq!(TrustKind::SslServer.check(&client_only), TrustResult::Untrusted);
        assert_eq!(TrustKind::SslClient.check(&client_only), TrustResult::Trusted);

        let rejected = r.with_trust(TrustSettings {
            trusted: ExtKeyUsage::empty(),
            rejected: ExtKeyUsage::ANY,
        });
        assert_eq!(TrustKind::SslServer.check(&rejected), TrustResult::Rejected);

        let intermediate = leaf().build();
        assert_eq!(TrustKind::Default.check(&intermediate), TrustResult::Untrusted);
    }

    #[test]
    fn test_names_roundtrip() {
        for p in Purpose::ALL {
            assert_eq!(p.name().parse::<Purpose>().unwrap(), p);
        }
        assert!("bogus".parse::<Purpose>().is_err());
        assert_eq!("tsa".parse::<TrustKind>().unwrap(), TrustKind::Tsa);
    }
}
