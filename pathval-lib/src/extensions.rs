//! Per-certificate extension checks over the untrusted part of the chain.

use crate::cert::CertFlags;
use crate::context::{Step, StoreContext};
use crate::error::ErrorCode;
use crate::params::VerifyFlags;
use crate::purpose::Purpose;

/// What the next certificate up the chain has to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaRequirement {
    Either,
    NotCa,
    Ca,
}

/// Check critical extensions, proxy rules, CA status, purpose and path
/// length for every untrusted certificate, leaf first.
///
/// A context validating a CRL issuer never accepts proxy certificates. When
/// a purpose is configured it checks for CRL signing instead.
pub(crate) fn check_chain_extensions(ctx: &mut StoreContext<'_>) -> Step {
    let (purpose, allow_proxy) = if ctx.is_child() {
        (ctx.params.purpose.map(|_| Purpose::CrlSign), false)
    } else {
        (
            ctx.params.purpose,
            ctx.params.has(VerifyFlags::ALLOW_PROXY_CERTS),
        )
    };
    let ignore_critical = ctx.params.has(VerifyFlags::IGNORE_CRITICAL);

    let mut must_be = CaRequirement::Either;
    let mut plen: u32 = 0;
    let mut proxy_path_length: u32 = 0;

    for i in 0..ctx.last_untrusted.min(ctx.chain.len()) {
        let x = ctx.chain[i].clone();
        let flags = x.flags();

        if !ignore_critical && flags.contains(CertFlags::CRITICAL) {
            ctx.report(ErrorCode::UnhandledCriticalExtension, i, Some(x.clone()))?;
        }
        if !allow_proxy && flags.contains(CertFlags::PROXY) {
            ctx.report(ErrorCode::ProxyCertificatesNotAllowed, i, Some(x.clone()))?;
        }

        match must_be {
            CaRequirement::Either => {}
            CaRequirement::NotCa if x.check_ca() => {
                ctx.report(ErrorCode::InvalidNonCa, i, Some(x.clone()))?;
            }
            CaRequirement::Ca if !x.check_ca() => {
                ctx.report(ErrorCode::InvalidCa, i, Some(x.clone()))?;
            }
            _ => {}
        }

        if let Some(purpose) = purpose {
            if !purpose.check(&x, must_be == CaRequirement::Ca) {
                ctx.report(ErrorCode::InvalidPurpose, i, Some(x.clone()))?;
            }
        }

        // Neither the leaf nor its issuer count against a path length.
        let self_issued = flags.contains(CertFlags::SELF_ISSUED);
        if i > 1 && !self_issued {
            if let Some(path_len) = x.path_len() {
                if u64::from(plen) > u64::from(path_len) + u64::from(proxy_path_length) + 1 {
                    ctx.report(ErrorCode::PathLengthExceeded, i, Some(x.clone()))?;
                }
            }
        }
        if !self_issued {
            plen += 1;
        }

        if flags.contains(CertFlags::PROXY) {
            if let Some(limit) = x.proxy_path_len() {
                if i as u64 > u64::from(limit) {
                    ctx.report(ErrorCode::ProxyPathLengthExceeded, i, Some(x.clone()))?;
                }
            }
            proxy_path_length += 1;
            must_be = CaRequirement::NotCa;
        } else {
            must_be = CaRequirement::Ca;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{Certificate, CertificateBuilder, KeyUsage};
    use crate::name::Name;
    use crate::store::TrustStore;

    fn name(cn: &str) -> Name {
        Name::from_pairs(&[("CN", cn)])
    }

    fn ca(cn: &str, issuer: &str, path_len: Option<u32>) -> Certificate {
        CertificateBuilder::new(name(cn), name(issuer))
            .basic_constraints(true, path_len)
            .key_usage(KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN)
            .build()
    }

    fn run(chain: Vec<Certificate>, flags: VerifyFlags) -> Vec<(ErrorCode, usize)> {
        let store = TrustStore::new();
        let mut ctx = StoreContext::new(&store, None, &[]).with_callback(|_, _| true);
        ctx.set_flags(flags);
        ctx.last_untrusted = chain.len();
        ctx.chain = chain;
        check_chain_extensions(&mut ctx).unwrap();
        ctx.diagnostics().iter().map(|d| (d.code, d.depth)).collect()
    }

    #[test]
    fn test_clean_chain() {
        let chain = vec![
            CertificateBuilder::new(name("leaf"), name("A")).build(),
            ca("A", "R", Some(0)),
            ca("R", "R", None),
        ];
        assert!(run(chain, VerifyFlags::empty()).is_empty());
    }

    #[test]
    fn test_path_length_exceeded_at_constrained_ca() {
        let chain = vec![
            CertificateBuilder::new(name("leaf"), name("B")).build(),
            ca("B", "A", None),
            ca("A", "R", Some(0)),
            ca("R", "R", None),
        ];
        assert_eq!(
            run(chain, VerifyFlags::empty()),
            [(ErrorCode::PathLengthExceeded, 2)]
        );
    }

    #[test]
    fn test_self_issued_not_counted() {
        // A self-issued key rollover certificate between B and A.
        let chain = vec![
            CertificateBuilder::new(name("leaf"), name("A")).build(),
            ca("A", "A", None),
            ca("A", "R", Some(0)),
            ca("R", "R", None),
        ];
        assert!(run(chain, VerifyFlags::empty()).is_empty());
    }

    #[test]
    fn test_non_ca_intermediate() {
        let chain = vec![
            CertificateBuilder::new(name("leaf"), name("A")).build(),
            CertificateBuilder::new(name("A"), name("R"))
                .basic_constraints(false, None)
                .build(),
        ];
        assert_eq!(run(chain, VerifyFlags::empty()), [(ErrorCode::InvalidCa, 1)]);
    }

    #[test]
    fn test_critical_and_proxy_flags() {
        let leaf = CertificateBuilder::new(name("proxy"), name("user"))
            .proxy(Some(0))
            .key_usage(KeyUsage::DIGITAL_SIGNATURE)
            .build();
        let user = CertificateBuilder::new(name("user"), name("A"))
            .unhandled_critical_extension()
            .key_usage(KeyUsage::DIGITAL_SIGNATURE)
            .build();
        let chain = vec![leaf, user];
        assert_eq!(
            run(chain.clone(), VerifyFlags::empty()),
            [
                (ErrorCode::ProxyCertificatesNotAllowed, 0),
                (ErrorCode::UnhandledCriticalExtension, 1),
            ]
        );
        assert!(run(
            chain,
            VerifyFlags::ALLOW_PROXY_CERTS | VerifyFlags::IGNORE_CRITICAL
        )
        .is_empty());
    }

    #[test]
    fn test_crl_issuer_path_checks_crl_sign_only_with_purpose() {
        let signer = CertificateBuilder::new(name("signer"), name("R"))
            .key_usage(KeyUsage::DIGITAL_SIGNATURE)
            .build();
        let chain = vec![signer.clone(), ca("R", "R", None)];
        let store = TrustStore::new();

        let check = |purpose: Option<Purpose>| {
            let mut parent = StoreContext::new(&store, None, &[]).with_callback(|_, _| true);
            if let Some(purpose) = purpose {
                parent.set_purpose(purpose);
            }
            let mut child = parent.child(signer.clone());
            child.last_untrusted = chain.len();
            child.chain = chain.clone();
            check_chain_extensions(&mut child).unwrap();
            child
                .diagnostics()
                .iter()
                .map(|d| (d.code, d.depth))
                .collect::<Vec<_>>()
        };
        assert!(check(None).is_empty());
        assert_eq!(
            check(Some(Purpose::SslServer)),
            [(ErrorCode::InvalidPurpose, 0)]
        );
    }
}
