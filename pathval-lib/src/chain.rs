//! Chain building and trust evaluation.
//!
//! Building starts from the leaf and extends the chain from the untrusted
//! pool, then from the trusted store, until a self-signed certificate or the
//! depth limit is reached. The result is classified by [`check_trust`]; an
//! untrusted chain is rebuilt from an earlier position when the store (or
//! the pool) offers a different issuer there.
//!
//! The untrusted pool is never modified. Which pool entries sit in the chain
//! is tracked by index, alongside the (slot, entry) pairs already tried.

use std::collections::HashSet;
use tracing::debug;

use crate::cert::{CertFlags, Certificate};
use crate::context::{Halt, Step, StoreContext};
use crate::error::{ErrorCode, PathvalError};
use crate::params::VerifyFlags;
use crate::purpose::TrustResult;

/// Which pool entries the chain uses, and which were tried where.
struct PoolCursor<'p> {
    pool: &'p [Certificate],
    /// Pool index of each chain entry; `None` for store certificates.
    origin: Vec<Option<usize>>,
    tried: HashSet<(usize, usize)>,
}

impl<'p> PoolCursor<'p> {
    fn in_chain(&self, idx: usize, upto: usize) -> bool {
        self.origin[..upto.min(self.origin.len())].contains(&Some(idx))
    }

    /// First pool entry not yet used or tried at `slot` that issued the
    /// certificate at `slot - 1`.
    fn find(&self, ctx: &mut StoreContext<'_>, slot: usize) -> Option<usize> {
        let subject = ctx.chain[slot - 1].clone();
        (0..self.pool.len()).find(|&idx| {
            !self.tried.contains(&(slot, idx))
                && !self.in_chain(idx, slot)
                && check_issued(ctx, &subject, &self.pool[idx])
        })
    }

    fn push(&mut self, ctx: &mut StoreContext<'_>, idx: usize) {
        let slot = ctx.chain.len();
        self.tried.insert((slot, idx));
        self.origin.push(Some(idx));
        ctx.chain.push(self.pool[idx].clone());
    }

    fn truncate(&mut self, ctx: &mut StoreContext<'_>, len: usize) {
        ctx.chain.truncate(len);
        self.origin.truncate(len);
    }

    /// Extend the chain with untrusted issuers, at most up to `cap` entries.
    fn extend(&mut self, ctx: &mut StoreContext<'_>, cap: usize) -> Step {
        let depth = ctx.params.depth;
        let trusted_first = ctx.params.has(VerifyFlags::TRUSTED_FIRST);
        loop {
            let len = ctx.chain.len();
            if len > depth || len >= cap {
                break;
            }
            let tail = ctx.chain[len - 1].clone();
            if is_self_signed(ctx, &tail, len - 1)? {
                break;
            }
            if trusted_first && get_issuer(ctx, &tail)?.is_some() {
                debug!(depth = len - 1, "issuer available from trusted store");
                break;
            }
            match self.find(ctx, len) {
                Some(idx) => {
                    debug!(
                        depth = len,
                        subject = %self.pool[idx].subject(),
                        "issuer taken from untrusted pool"
                    );
                    self.push(ctx, idx);
                    ctx.last_untrusted += 1;
                }
                None => break,
            }
        }
        Ok(())
    }
}

/// Build the chain for `leaf` into the context and classify its trust.
///
/// Reports depth-zero self-signed, self-signed-in-chain and missing issuer
/// problems through the callback; sets `bad_chain` when the chain does not
/// end in a trusted certificate.
pub(crate) fn build(ctx: &mut StoreContext<'_>, leaf: Certificate) -> Step {
    let depth = ctx.params.depth;
    let no_alternates = ctx
        .params
        .flags
        .intersects(VerifyFlags::TRUSTED_FIRST | VerifyFlags::NO_ALT_CHAINS);

    ctx.chain = vec![leaf];
    ctx.last_untrusted = 1;
    let mut cursor = PoolCursor {
        pool: ctx.untrusted,
        origin: vec![None],
        tried: HashSet::new(),
    };
    cursor.extend(ctx, usize::MAX)?;

    // Untrusted entries; retries only look at positions before this.
    let mut j = ctx.chain.len();
    // Longest untrusted prefix a retry may rebuild. Never grows.
    let mut bound = j;
    let mut chain_ss: Option<Certificate> = None;

    let trust = loop {
        let last = ctx.chain.len() - 1;
        let tail = ctx.chain[last].clone();
        if is_self_signed(ctx, &tail, last)? {
            if ctx.chain.len() == 1 {
                // A lone self-signed certificate must be in the store exactly.
                match get_issuer(ctx, &tail)? {
                    Some(found) if found == tail => {
                        ctx.chain[0] = found;
                        ctx.last_untrusted = 0;
                    }
                    _ => {
                        ctx.bad_chain = true;
                        ctx.report(ErrorCode::DepthZeroSelfSignedCert, 0, Some(tail))?;
                    }
                }
            } else {
                debug!(subject = %tail.subject(), "setting aside self-signed certificate");
                chain_ss = ctx.chain.pop();
                cursor.origin.pop();
                ctx.last_untrusted = ctx.last_untrusted.saturating_sub(1);
                j = j.saturating_sub(1);
            }
        }

        // Complete the chain from the store.
        loop {
            let len = ctx.chain.len();
            if len > depth {
                break;
            }
            let tail = ctx.chain[len - 1].clone();
            if is_self_signed(ctx, &tail, len - 1)? {
                break;
            }
            match get_issuer(ctx, &tail)? {
                Some(issuer) => {
                    debug!(depth = len, subject = %issuer.subject(), "issuer taken from store");
                    ctx.chain.push(issuer);
                    cursor.origin.push(None);
                }
                None => break,
            }
        }

        let trust = check_trust(ctx)?;
        if trust == TrustResult::Trusted || no_alternates {
            break trust;
        }
        if !retry_alternate(ctx, &mut cursor, &mut j, &mut bound)? {
            break trust;
        }
    };

    if trust != TrustResult::Trusted && !ctx.bad_chain {
        let num = ctx.chain.len();
        let tail = ctx.chain[num - 1].clone();
        let (code, cert) = match chain_ss.take() {
            Some(ss) if check_issued(ctx, &tail, &ss) => {
                ctx.chain.push(ss.clone());
                ctx.last_untrusted = ctx.chain.len();
                (ErrorCode::SelfSignedCertInChain, ss)
            }
            _ => {
                let code = if num > depth {
                    ErrorCode::CertChainTooLong
                } else if ctx.last_untrusted >= num {
                    ErrorCode::UnableToGetIssuerCertLocally
                } else {
                    ErrorCode::UnableToGetIssuerCert
                };
                (code, tail)
            }
        };
        ctx.bad_chain = true;
        let depth = ctx.chain.len() - 1;
        ctx.report(code, depth, Some(cert))?;
    }
    Ok(())
}

/// Look for a different path: walking back over the untrusted prefix, a
/// store issuer for an earlier certificate, or an untried pool issuer.
/// Rewinds the chain and returns whether a retry is due. The rebuilt
/// untrusted prefix never exceeds `bound`, which only shrinks.
fn retry_alternate(
    ctx: &mut StoreContext<'_>,
    cursor: &mut PoolCursor<'_>,
    j: &mut usize,
    bound: &mut usize,
) -> Step<bool> {
    let mut k = *j;
    while k >= 1 {
        if k < *j {
            let subject = ctx.chain[k - 1].clone();
            if get_issuer(ctx, &subject)?.is_some() {
                debug!(depth = k, "retrying with alternative issuer from store");
                cursor.truncate(ctx, k);
                ctx.last_untrusted = k;
                *j = k;
                *bound = k;
                return Ok(true);
            }
        }
        if k < *bound && k <= ctx.chain.len() && k <= ctx.params.depth {
            if let Some(idx) = cursor.find(ctx, k) {
                debug!(
                    depth = k,
                    subject = %cursor.pool[idx].subject(),
                    "retrying with alternative issuer from untrusted pool"
                );
                cursor.truncate(ctx, k);
                cursor.push(ctx, idx);
                ctx.last_untrusted = k + 1;
                cursor.extend(ctx, *bound)?;
                *j = ctx.chain.len();
                *bound = *j;
                return Ok(true);
            }
        }
        k -= 1;
    }
    Ok(false)
}

/// Issuer check between two certificates. With `CB_ISSUER_CHECK` a
/// mismatch is also shown to the callback; it stays a mismatch either way.
pub(crate) fn check_issued(
    ctx: &mut StoreContext<'_>,
    subject: &Certificate,
    issuer: &Certificate,
) -> bool {
    match issuer.check_issued(subject) {
        Ok(()) => true,
        Err(code) => {
            if ctx.params.has(VerifyFlags::CB_ISSUER_CHECK) {
                ctx.error = code;
                ctx.current_cert = Some(subject.clone());
                ctx.current_issuer = Some(issuer.clone());
                ctx.call(false);
            }
            false
        }
    }
}

/// An issuer of `x` from the trusted store, preferring one that is
/// currently valid; otherwise the last matching candidate.
pub(crate) fn get_issuer(
    ctx: &mut StoreContext<'_>,
    x: &Certificate,
) -> Step<Option<Certificate>> {
    let candidates = ctx
        .lookup
        .certs_by_subject(x.issuer())
        .map_err(lookup_failed)?;
    let mut found = None;
    for candidate in candidates {
        if check_issued(ctx, x, &candidate) {
            if time_valid(ctx, &candidate) {
                return Ok(Some(candidate));
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

pub(crate) fn lookup_failed(e: PathvalError) -> Halt {
    match e {
        PathvalError::StoreLookup(_) => Halt::Fatal(e),
        other => Halt::Fatal(PathvalError::StoreLookup(other.to_string())),
    }
}

fn time_valid(ctx: &StoreContext<'_>, cert: &Certificate) -> bool {
    ctx.params.has(VerifyFlags::NO_CHECK_TIME) || cert.is_valid_at(ctx.params.time())
}

/// Self-signed check; a certificate with inconsistent extensions cannot be
/// classified and ends verification.
fn is_self_signed(ctx: &mut StoreContext<'_>, cert: &Certificate, depth: usize) -> Step<bool> {
    if cert.flags().contains(CertFlags::INVALID) {
        ctx.error_depth = depth;
        ctx.current_cert = Some(cert.clone());
        return Err(Halt::Fatal(PathvalError::Verification {
            code: ErrorCode::InvalidExtension,
            depth,
        }));
    }
    Ok(cert.is_self_signed())
}

/// Classify the chain from the untrusted boundary onward.
///
/// A rejected certificate is reported; if the callback continues, the
/// search goes on. With `PARTIAL_CHAIN`, any trusted entry or a leaf present
/// verbatim in the store makes the chain trusted.
pub(crate) fn check_trust(ctx: &mut StoreContext<'_>) -> Step<TrustResult> {
    let kind = ctx.params.trust_kind();
    for i in ctx.last_untrusted..ctx.chain.len() {
        let cert = ctx.chain[i].clone();
        match kind.check(&cert) {
            TrustResult::Trusted => return Ok(TrustResult::Trusted),
            TrustResult::Rejected => ctx.report(ErrorCode::CertRejected, i, Some(cert))?,
            TrustResult::Untrusted => {}
        }
    }

    if ctx.params.has(VerifyFlags::PARTIAL_CHAIN) {
        if ctx.last_untrusted < ctx.chain.len() {
            return Ok(TrustResult::Trusted);
        }
        let leaf = ctx.chain[0].clone();
        if let Some(found) = lookup_cert_match(ctx, &leaf)? {
            ctx.chain[0] = found;
            ctx.last_untrusted = 0;
            return Ok(TrustResult::Trusted);
        }
    }
    Ok(TrustResult::Untrusted)
}

/// The store's copy of exactly `x`, if present.
fn lookup_cert_match(ctx: &StoreContext<'_>, x: &Certificate) -> Step<Option<Certificate>> {
    let certs = ctx
        .lookup
        .certs_by_subject(x.subject())
        .map_err(lookup_failed)?;
    Ok(certs.into_iter().find(|c| c == x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, KeyUsage};
    use crate::name::Name;
    use crate::store::TrustStore;

    fn name(cn: &str) -> Name {
        Name::from_pairs(&[("CN", cn)])
    }

    fn ca(cn: &str, issuer: &str) -> Certificate {
        CertificateBuilder::new(name(cn), name(issuer))
            .basic_constraints(true, None)
            .key_usage(KeyUsage::KEY_CERT_SIGN)
            .build()
    }

    fn leaf(issuer: &str) -> Certificate {
        CertificateBuilder::new(name("leaf"), name(issuer)).build()
    }

    fn build_only(store: &TrustStore, leaf: Certificate, pool: &[Certificate]) -> (Vec<String>, bool) {
        let mut ctx =
            StoreContext::new(store, Some(leaf.clone()), pool).with_callback(|_, _| true);
        build(&mut ctx, leaf).unwrap();
        let subjects = ctx.chain().iter().map(|c| c.subject().to_string()).collect();
        (subjects, ctx.bad_chain)
    }

    #[test]
    fn test_builds_through_pool_to_store() {
        let mut store = TrustStore::new();
        store.add_cert(ca("Root", "Root"));
        let pool = [ca("Int", "Root")];
        let (chain, bad) = build_only(&store, leaf("Int"), &pool);
        assert_eq!(chain, ["CN=leaf", "CN=Int", "CN=Root"]);
        assert!(!bad);
    }

    #[test]
    fn test_missing_issuer_is_bad_chain() {
        let store = TrustStore::new();
        let (chain, bad) = build_only(&store, leaf("Nowhere"), &[]);
        assert_eq!(chain, ["CN=leaf"]);
        assert!(bad);
    }

    #[test]
    fn test_store_alternative_replaces_untrusted_root() {
        // The pool offers a self-signed "Int" look-alike chain ending in an
        // untrusted root; the store knows a different issuer for Int.
        let mut store = TrustStore::new();
        store.add_cert(ca("Root", "Root"));
        store.add_cert(ca("Bridge", "Root"));
        let pool = [ca("Int", "Bridge"), ca("Bridge", "OldRoot"), ca("OldRoot", "OldRoot")];
        let (chain, bad) = build_only(&store, leaf("Int"), &pool);
        assert_eq!(chain, ["CN=leaf", "CN=Int", "CN=Bridge", "CN=Root"]);
        assert!(!bad);
    }

    #[test]
    fn test_retry_never_lengthens_untrusted_prefix() {
        // The store's "A" replaces the pool's first choice at depth 1, which
        // fixes the prefix at one entry; the pool's other "A" would need two.
        let mut store = TrustStore::new();
        store.add_cert(ca("Root", "Root"));
        store.add_cert(ca("A", "Y"));
        let pool = [ca("A", "Z"), ca("A", "Root")];
        let leaf = leaf("A");
        let mut ctx =
            StoreContext::new(&store, Some(leaf.clone()), &pool).with_callback(|_, _| true);
        build(&mut ctx, leaf).unwrap();
        assert_eq!(ctx.chain()[1].issuer(), &name("Y"));
        assert_eq!(ctx.chain().len(), 2);
        assert_eq!(ctx.last_untrusted(), 1);
        assert!(ctx.bad_chain);
    }

    #[test]
    fn test_pool_alternate_after_self_signed() {
        let mut store = TrustStore::new();
        store.add_cert(ca("Root", "Root"));
        let pool = [ca("A", "A"), ca("A", "Root")];
        let (chain, bad) = build_only(&store, leaf("A"), &pool);
        assert_eq!(chain, ["CN=leaf", "CN=A", "CN=Root"]);
        assert!(!bad);
    }
}
