//! Verification parameters.
//!
//! [`VerifyParams`] holds everything that changes how a chain is verified:
//! behaviour flags, the CRL checking mode, depth limit, purpose and trust,
//! the check time, the identities the leaf must match and the acceptable
//! policies. Parameters load from JSON and come in named presets.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

use crate::error::{PathvalError, Result};
use crate::purpose::{Purpose, TrustKind};
use crate::util;

/// Default depth limit.
pub const DEFAULT_DEPTH: usize = 100;

bitflags! {
    /// Behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VerifyFlags: u32 {
        /// Report issuer check failures through the callback.
        const CB_ISSUER_CHECK = 1 << 0;
        /// Accept certificates with unhandled critical extensions.
        const IGNORE_CRITICAL = 1 << 1;
        const ALLOW_PROXY_CERTS = 1 << 2;
        const POLICY_CHECK = 1 << 3;
        const EXPLICIT_POLICY = 1 << 4;
        const INHIBIT_ANY = 1 << 5;
        const INHIBIT_MAP = 1 << 6;
        /// Call back once with the policy outcome on success.
        const NOTIFY_POLICY = 1 << 7;
        /// Indirect and reason-partitioned CRLs.
        const EXTENDED_CRL_SUPPORT = 1 << 8;
        const USE_DELTAS = 1 << 9;
        /// Verify the trust anchor's own signature.
        const CHECK_SS_SIGNATURE = 1 << 10;
        /// Prefer issuers from the trusted store over the untrusted pool.
        const TRUSTED_FIRST = 1 << 11;
        /// Accept chains ending in a trusted non-self-signed certificate.
        const PARTIAL_CHAIN = 1 << 12;
        const NO_ALT_CHAINS = 1 << 13;
        const NO_CHECK_TIME = 1 << 14;
        /// Always consult the store for CRLs.
        const CRL_EXHAUSTIVE = 1 << 15;
        const SUITEB_128_LOS_ONLY = 1 << 16;
        const SUITEB_192_LOS = 1 << 17;
        const SUITEB_128_LOS = Self::SUITEB_128_LOS_ONLY.bits() | Self::SUITEB_192_LOS.bits();
    }
}

/// Which certificates get a revocation check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrlCheck {
    #[default]
    Off,
    /// The leaf only.
    Leaf,
    /// Every certificate in the chain.
    Chain,
}

impl std::str::FromStr for CrlCheck {
    type Err = PathvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(CrlCheck::Off),
            "leaf" => Ok(CrlCheck::Leaf),
            "chain" | "all" => Ok(CrlCheck::Chain),
            _ => Err(PathvalError::Config(format!("unknown CRL check mode '{}'", s))),
        }
    }
}

/// Options controlling verification behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyParams {
    /// Preset name, when built from one.
    pub name: Option<String>,
    pub flags: VerifyFlags,
    pub crl_check: CrlCheck,
    /// Depth limit: a chain holds at most `depth + 1` certificates.
    pub depth: usize,
    pub purpose: Option<Purpose>,
    /// Trust kind; when unset the purpose's default applies.
    pub trust: Option<TrustKind>,
    /// Verify at this Unix time instead of now.
    pub check_time: Option<i64>,
    /// Host names the leaf must match (any one).
    pub hosts: Vec<String>,
    pub email: Option<String>,
    pub ip: Option<IpAddr>,
    /// Acceptable policy OIDs; empty means any policy.
    pub policies: Vec<String>,
}

impl Default for VerifyParams {
    fn default() -> Self {
        VerifyParams {
            name: None,
            flags: VerifyFlags::empty(),
            crl_check: CrlCheck::Off,
            depth: DEFAULT_DEPTH,
            purpose: None,
            trust: None,
            check_time: None,
            hosts: Vec::new(),
            email: None,
            ip: None,
            policies: Vec::new(),
        }
    }
}

impl VerifyParams {
    /// A named preset: `default`, `pkcs7`, `smime_sign`, `ssl_client` or
    /// `ssl_server`.
    pub fn lookup(name: &str) -> Option<VerifyParams> {
        let (purpose, trust) = match name {
            "default" => {
                return Some(VerifyParams {
                    name: Some(name.to_string()),
                    ..Default::default()
                })
            }
            "pkcs7" | "smime_sign" => (Purpose::SmimeSign, TrustKind::Email),
            "ssl_client" => (Purpose::SslClient, TrustKind::SslClient),
            "ssl_server" => (Purpose::SslServer, TrustKind::SslServer),
            _ => return None,
        };
        Some(VerifyParams {
            name: Some(name.to_string()),
            purpose: Some(purpose),
            trust: Some(trust),
            ..Default::default()
        })
    }

    /// Parse parameters from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PathvalError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            PathvalError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&data)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PathvalError::Config(e.to_string()))
    }

    /// Set the purpose, taking its default trust when no trust is set.
    pub fn set_purpose(&mut self, purpose: Purpose) {
        self.purpose = Some(purpose);
        if self.trust.is_none() {
            self.trust = Some(purpose.default_trust());
        }
    }

    pub fn set_trust(&mut self, trust: TrustKind) {
        self.trust = Some(trust);
    }

    pub fn set_flags(&mut self, flags: VerifyFlags) {
        self.flags |= flags;
    }

    pub fn clear_flags(&mut self, flags: VerifyFlags) {
        self.flags -= flags;
    }

    pub fn has(&self, flags: VerifyFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Effective trust kind.
    pub fn trust_kind(&self) -> TrustKind {
        self.trust.unwrap_or(TrustKind::Default)
    }

    /// The time certificates and CRLs are checked against.
    pub fn time(&self) -> i64 {
        self.check_time.unwrap_or_else(util::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_presets() {
        let p = VerifyParams::lookup("ssl_server").unwrap();
        assert_eq!(p.purpose, Some(Purpose::SslServer));
        assert_eq!(p.trust, Some(TrustKind::SslServer));
        assert_eq!(p.depth, DEFAULT_DEPTH);
        assert_eq!(
            VerifyParams::lookup("pkcs7").unwrap().purpose,
            Some(Purpose::SmimeSign)
        );
        assert!(VerifyParams::lookup("nonexistent").is_none());
    }

    #[test]
    fn test_purpose_inherits_trust() {
        let mut p = VerifyParams::default();
        p.set_purpose(Purpose::SmimeEncrypt);
        assert_eq!(p.trust_kind(), TrustKind::Email);

        let mut q = VerifyParams::default();
        q.set_trust(TrustKind::Compat);
        q.set_purpose(Purpose::SslServer);
        assert_eq!(q.trust_kind(), TrustKind::Compat);
    }

    #[test]
    fn test_from_json_defaults_and_flags() {
        let p = VerifyParams::from_json(
            r#"{"flags": "PARTIAL_CHAIN | USE_DELTAS", "crl_check": "chain", "purpose": "sslclient"}"#,
        )
        .unwrap();
        assert!(p.has(VerifyFlags::PARTIAL_CHAIN | VerifyFlags::USE_DELTAS));
        assert_eq!(p.crl_check, CrlCheck::Chain);
        assert_eq!(p.depth, DEFAULT_DEPTH);
        assert_eq!(p.purpose, Some(Purpose::SslClient));
        assert!(VerifyParams::from_json("{\"depth\": \"x\"}").is_err());
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut p = VerifyParams::lookup("ssl_client").unwrap();
        p.hosts.push("example.com".into());
        p.check_time = Some(1_700_000_000);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(p.to_json().unwrap().as_bytes()).unwrap();
        let loaded = VerifyParams::from_file(file.path()).unwrap();
        assert_eq!(loaded, p);
        assert_eq!(loaded.time(), 1_700_000_000);
    }

    #[test]
    fn test_suiteb_composite_flag() {
        assert!(VerifyFlags::SUITEB_128_LOS.contains(VerifyFlags::SUITEB_192_LOS));
        assert!(VerifyFlags::SUITEB_128_LOS.contains(VerifyFlags::SUITEB_128_LOS_ONLY));
    }
}
