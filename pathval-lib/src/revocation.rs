//! CRL based revocation checking.
//!
//! For each certificate to check, the best CRL is picked from the CRLs given
//! to the context and, when those are not good enough, from the store. A CRL
//! is scored on what can be established about it (issuer, criticality,
//! validity period, issuing certificate, scope), optionally paired with a
//! delta CRL, then verified and consulted. The loop repeats until the
//! revocation reasons covered reach all reasons or stop growing.

use tracing::debug;

use crate::cert::{self, CertFlags, Certificate, DistPointName, DistributionPoint, KeyUsage};
use crate::chain;
use crate::context::{Halt, Step, StoreContext};
use crate::crl::{Crl, IdpFlags, ReasonSet, RevocationReason};
use crate::crypto::{self, SignatureError};
use crate::error::{ErrorCode, PathvalError};
use crate::name::{GeneralName, Name};
use crate::params::{CrlCheck, VerifyFlags};

/// No unhandled critical CRL extensions.
pub const CRL_SCORE_NOCRITICAL: u32 = 0x100;
/// The CRL's distribution point covers the certificate.
pub const CRL_SCORE_SCOPE: u32 = 0x080;
/// Within its validity period.
pub const CRL_SCORE_TIME: u32 = 0x040;
/// Issued under the certificate issuer's name.
pub const CRL_SCORE_ISSUER_NAME: u32 = 0x020;
/// Issued by the certificate's own issuer.
pub const CRL_SCORE_ISSUER_CERT: u32 = 0x018;
/// Issuer found on the certificate's own path.
pub const CRL_SCORE_SAME_PATH: u32 = 0x008;
/// Issuing certificate located and consistent with the AKID.
pub const CRL_SCORE_AKID: u32 = 0x004;
/// A current delta CRL is available.
pub const CRL_SCORE_TIME_DELTA: u32 = 0x002;
/// Minimum score of a fully usable CRL.
pub const CRL_SCORE_VALID: u32 = CRL_SCORE_NOCRITICAL | CRL_SCORE_TIME | CRL_SCORE_SCOPE;

/// The CRL (and delta) picked for one round of a certificate's check.
#[derive(Debug)]
struct Selection {
    crl: Option<Crl>,
    delta: Option<Crl>,
    issuer: Option<Certificate>,
    score: u32,
    reasons: ReasonSet,
}

impl Selection {
    fn empty(reasons: ReasonSet) -> Self {
        Selection {
            crl: None,
            delta: None,
            issuer: None,
            score: 0,
            reasons,
        }
    }

    fn is_valid(&self) -> bool {
        self.score >= CRL_SCORE_VALID
    }
}

/// Check revocation of the leaf, or of the whole chain, per `crl_check`.
///
/// Leaf-only checking is skipped in nested CRL issuer contexts.
pub(crate) fn check_revocation(ctx: &mut StoreContext<'_>) -> Step {
    if ctx.chain.is_empty() {
        return Ok(());
    }
    let last = match ctx.params.crl_check {
        CrlCheck::Off => return Ok(()),
        CrlCheck::Chain => ctx.chain.len() - 1,
        CrlCheck::Leaf if ctx.is_child() => return Ok(()),
        CrlCheck::Leaf => 0,
    };
    for depth in 0..=last {
        check_cert(ctx, depth)?;
    }
    Ok(())
}

fn check_cert(ctx: &mut StoreContext<'_>, depth: usize) -> Step {
    let x = ctx.chain[depth].clone();
    ctx.error_depth = depth;
    ctx.current_cert = Some(x.clone());
    ctx.current_issuer = None;
    ctx.current_crl_score = 0;
    ctx.current_reasons = ReasonSet::empty();

    let outcome = check_cert_rounds(ctx, &x, depth);
    ctx.current_crl = None;
    outcome
}

fn check_cert_rounds(ctx: &mut StoreContext<'_>, x: &Certificate, depth: usize) -> Step {
    while ctx.current_reasons != ReasonSet::ALL {
        let last_reasons = ctx.current_reasons;
        let selection = get_crl_delta(ctx, x, depth)?;
        let Some(crl) = selection.crl.clone() else {
            debug!(depth, "no CRL found");
            return ctx.report(ErrorCode::UnableToGetCrl, depth, Some(x.clone()));
        };
        debug!(
            depth,
            crl_issuer = %crl.issuer(),
            score = format_args!("{:#x}", selection.score),
            delta = selection.delta.is_some(),
            "selected CRL"
        );
        ctx.current_issuer = selection.issuer.clone();
        ctx.current_crl_score = selection.score;
        // Only a fully usable CRL counts towards coverage.
        if selection.is_valid() {
            ctx.current_reasons = selection.reasons;
        }
        ctx.current_crl = Some(crl.clone());

        check_crl(ctx, &crl, x, depth)?;
        let mut removed = false;
        if let Some(delta) = &selection.delta {
            check_crl(ctx, delta, x, depth)?;
            removed = cert_crl(ctx, delta, x, depth)?;
        }
        // Delta says removeFromCRL: the base entry no longer applies.
        if !removed {
            cert_crl(ctx, &crl, x, depth)?;
        }

        if last_reasons == ctx.current_reasons {
            return ctx.report(ErrorCode::UnableToGetCrl, depth, Some(x.clone()));
        }
    }
    Ok(())
}

/// Best CRL and delta for `x`, from the context's CRLs and then the store.
fn get_crl_delta(ctx: &StoreContext<'_>, x: &Certificate, depth: usize) -> Step<Selection> {
    let mut found = Selection::empty(ctx.current_reasons);
    let valid = get_crl_sk(ctx, x, depth, ctx.crls, &mut found);
    if !valid || ctx.params.has(VerifyFlags::CRL_EXHAUSTIVE) {
        let from_store = ctx
            .lookup
            .crls_by_issuer(x.issuer())
            .map_err(chain::lookup_failed)?;
        get_crl_sk(ctx, x, depth, &from_store, &mut found);
    }
    Ok(found)
}

/// Pick the best scoring CRL of `crls` if it beats `found`. Equal scores go
/// to the newer CRL. Returns whether the overall pick is fully usable.
fn get_crl_sk(
    ctx: &StoreContext<'_>,
    x: &Certificate,
    depth: usize,
    crls: &[Crl],
    found: &mut Selection,
) -> bool {
    let mut best: Option<(usize, u32, Option<Certificate>, ReasonSet)> = None;
    let mut best_score = found.score;
    let mut best_update = found.crl.as_ref().map(Crl::last_update);

    for (idx, crl) in crls.iter().enumerate() {
        let mut reasons = ctx.current_reasons;
        let (score, issuer) = get_crl_score(ctx, crl, x, depth, &mut reasons);
        if score == 0 || score < best_score {
            continue;
        }
        if score == best_score && best_update.is_some_and(|t| crl.last_update() <= t) {
            continue;
        }
        best_score = score;
        best_update = Some(crl.last_update());
        best = Some((idx, score, issuer, reasons));
    }

    if let Some((idx, mut score, issuer, reasons)) = best {
        let crl = crls[idx].clone();
        let delta = get_delta_sk(ctx, x, &crl, crls, &mut score);
        *found = Selection {
            crl: Some(crl),
            delta,
            issuer,
            score,
            reasons,
        };
    }
    found.is_valid()
}

/// A delta CRL in `crls` for `base`, when deltas are in use and either the
/// certificate or the base CRL advertises fresher CRLs.
fn get_delta_sk(
    ctx: &StoreContext<'_>,
    x: &Certificate,
    base: &Crl,
    crls: &[Crl],
    score: &mut u32,
) -> Option<Crl> {
    if !ctx.params.has(VerifyFlags::USE_DELTAS) {
        return None;
    }
    if !x.flags().contains(CertFlags::FRESHEST) && !base.has_freshest() {
        return None;
    }
    let delta = crls.iter().find(|d| d.is_delta_of(base))?;
    if crl_time_ok(ctx, delta, false) {
        *score |= CRL_SCORE_TIME_DELTA;
        // An expired base stays current through its delta.
        if crl_time_ok(ctx, base, true) {
            *score |= CRL_SCORE_TIME;
        }
    }
    Some(delta.clone())
}

/// Score `crl` for certificate `x` at `depth`, adding the reasons it covers
/// to `reasons`. Zero means unusable. Also returns the CRL's issuing
/// certificate when it could be located.
pub(crate) fn get_crl_score(
    ctx: &StoreContext<'_>,
    crl: &Crl,
    x: &Certificate,
    depth: usize,
    reasons: &mut ReasonSet,
) -> (u32, Option<Certificate>) {
    let idp = crl.idp_flags();
    if idp.contains(IdpFlags::INVALID) {
        return (0, None);
    }
    if !ctx.params.has(VerifyFlags::EXTENDED_CRL_SUPPORT) {
        if idp.intersects(IdpFlags::INDIRECT | IdpFlags::REASONS) {
            return (0, None);
        }
    } else if idp.contains(IdpFlags::REASONS) && (crl.idp_reasons() - *reasons).is_empty() {
        return (0, None);
    }
    // Deltas are only ever used alongside a base.
    if crl.is_delta() {
        return (0, None);
    }

    let mut score = 0;
    if x.issuer() == crl.issuer() {
        score |= CRL_SCORE_ISSUER_NAME;
    } else if !idp.contains(IdpFlags::INDIRECT) {
        return (0, None);
    }
    if !crl.has_unhandled_critical() {
        score |= CRL_SCORE_NOCRITICAL;
    }
    if crl_time_ok(ctx, crl, false) {
        score |= CRL_SCORE_TIME;
    }

    let issuer = crl_akid_check(ctx, crl, depth, &mut score);
    if score & CRL_SCORE_AKID == 0 {
        return (0, None);
    }

    if let Some(covered) = crl_crldp_check(x, crl, score) {
        if (covered - *reasons).is_empty() {
            return (0, None);
        }
        *reasons |= covered;
        score |= CRL_SCORE_SCOPE;
    }
    (score, issuer)
}

fn akid_ok(crl: &Crl, candidate: &Certificate) -> bool {
    crl.authority_key_id()
        .map_or(true, |akid| candidate.check_akid(akid).is_ok())
}

/// Locate the CRL's issuing certificate: the certificate's issuer, another
/// certificate further up the chain, or (extended support only) an
/// untrusted pool entry.
fn crl_akid_check(
    ctx: &StoreContext<'_>,
    crl: &Crl,
    depth: usize,
    score: &mut u32,
) -> Option<Certificate> {
    let last = ctx.chain.len().checked_sub(1)?;
    let cidx = if depth != last { depth + 1 } else { depth };

    let direct = &ctx.chain[cidx];
    if akid_ok(crl, direct) && *score & CRL_SCORE_ISSUER_NAME != 0 {
        *score |= CRL_SCORE_AKID | CRL_SCORE_ISSUER_CERT;
        return Some(direct.clone());
    }

    for candidate in &ctx.chain[cidx + 1..] {
        if candidate.subject() == crl.issuer() && akid_ok(crl, candidate) {
            *score |= CRL_SCORE_AKID | CRL_SCORE_SAME_PATH;
            return Some(candidate.clone());
        }
    }

    if !ctx.params.has(VerifyFlags::EXTENDED_CRL_SUPPORT) {
        return None;
    }
    let found = ctx
        .untrusted
        .iter()
        .find(|c| c.subject() == crl.issuer() && akid_ok(crl, c))?;
    *score |= CRL_SCORE_AKID;
    Some(found.clone())
}

/// Whether the CRL's scope covers `x`; if so, the reasons it covers.
fn crl_crldp_check(x: &Certificate, crl: &Crl, score: u32) -> Option<ReasonSet> {
    let idp = crl.idp_flags();
    if idp.contains(IdpFlags::ONLY_ATTR) {
        return None;
    }
    if x.flags().contains(CertFlags::CA) {
        if idp.contains(IdpFlags::ONLY_USER) {
            return None;
        }
    } else if idp.contains(IdpFlags::ONLY_CA) {
        return None;
    }

    let reasons = crl.idp_reasons();
    let idp_name = crl.issuing_dist_point().and_then(|i| i.name.as_ref());
    for dp in x.crl_distribution_points() {
        if !crldp_check_crlissuer(dp, crl, score) {
            continue;
        }
        let dp_matches = match (&dp.name, idp_name) {
            (Some(a), Some(b)) => {
                let a_base = dp_issuer_name(dp).unwrap_or_else(|| x.issuer().clone());
                idp_check_dp(&resolve(a, &a_base), &resolve(b, crl.issuer()))
            }
            _ => true,
        };
        if dp_matches {
            return Some(reasons & dp.reasons());
        }
    }
    if idp_name.is_none() && score & CRL_SCORE_ISSUER_NAME != 0 {
        return Some(reasons);
    }
    None
}

/// A distribution point without cRLIssuer needs the CRL under the
/// certificate issuer's name; with one, the CRL issuer must be listed.
fn crldp_check_crlissuer(dp: &DistributionPoint, crl: &Crl, score: u32) -> bool {
    match &dp.crl_issuer {
        None => score & CRL_SCORE_ISSUER_NAME != 0,
        Some(names) => names
            .iter()
            .any(|gn| matches!(gn, GeneralName::Directory(n) if n == crl.issuer())),
    }
}

fn dp_issuer_name(dp: &DistributionPoint) -> Option<Name> {
    dp.crl_issuer.as_ref()?.iter().find_map(|gn| match gn {
        GeneralName::Directory(n) => Some(n.clone()),
        _ => None,
    })
}

/// A distribution point name with any relative name made absolute.
enum ResolvedDp<'n> {
    Full(&'n [GeneralName]),
    Dir(Name),
}

fn resolve<'n>(dpn: &'n DistPointName, base: &Name) -> ResolvedDp<'n> {
    match dpn {
        DistPointName::FullName(names) => ResolvedDp::Full(names),
        DistPointName::Relative(rdn) => ResolvedDp::Dir(base.join(rdn)),
    }
}

fn idp_check_dp(a: &ResolvedDp<'_>, b: &ResolvedDp<'_>) -> bool {
    match (a, b) {
        (ResolvedDp::Dir(x), ResolvedDp::Dir(y)) => x == y,
        (ResolvedDp::Dir(n), ResolvedDp::Full(names))
        | (ResolvedDp::Full(names), ResolvedDp::Dir(n)) => names
            .iter()
            .any(|gn| matches!(gn, GeneralName::Directory(d) if d == n)),
        (ResolvedDp::Full(x), ResolvedDp::Full(y)) => x.iter().any(|gn| y.contains(gn)),
    }
}

/// Whether `crl` is within its validity period. An expired base CRL is
/// tolerated when `delta_fresh` is set.
fn crl_time_ok(ctx: &StoreContext<'_>, crl: &Crl, delta_fresh: bool) -> bool {
    if ctx.params.has(VerifyFlags::NO_CHECK_TIME) {
        return true;
    }
    let now = ctx.params.time();
    if crl.last_update() > now {
        return false;
    }
    match crl.next_update() {
        Some(next) if next <= now => delta_fresh,
        _ => true,
    }
}

/// Report a CRL outside its validity period.
fn check_crl_time(ctx: &mut StoreContext<'_>, crl: &Crl, x: &Certificate, depth: usize) -> Step {
    if ctx.params.has(VerifyFlags::NO_CHECK_TIME) {
        return Ok(());
    }
    ctx.current_crl = Some(crl.clone());
    let now = ctx.params.time();
    if crl.last_update() > now {
        ctx.report(ErrorCode::CrlNotYetValid, depth, Some(x.clone()))?;
    }
    if let Some(next) = crl.next_update() {
        if next <= now && ctx.current_crl_score & CRL_SCORE_TIME_DELTA == 0 {
            ctx.report(ErrorCode::CrlHasExpired, depth, Some(x.clone()))?;
        }
    }
    ctx.current_crl = None;
    Ok(())
}

/// Verify a selected CRL: issuer key usage, scope, issuer path, IDP
/// validity, time, Suite B and signature. Delta CRLs only get the time,
/// Suite B and signature checks.
fn check_crl(ctx: &mut StoreContext<'_>, crl: &Crl, x: &Certificate, depth: usize) -> Step {
    let last = ctx.chain.len() - 1;
    let issuer = if let Some(issuer) = ctx.current_issuer.clone() {
        issuer
    } else if depth < last {
        ctx.chain[depth + 1].clone()
    } else {
        let top = ctx.chain[last].clone();
        if !chain::check_issued(ctx, &top, &top) {
            ctx.report(ErrorCode::UnableToGetCrlIssuer, depth, Some(x.clone()))?;
        }
        top
    };
    let score = ctx.current_crl_score;

    if !crl.is_delta() {
        if cert::ku_reject(&issuer, KeyUsage::CRL_SIGN) {
            ctx.report(ErrorCode::KeyusageNoCrlSign, depth, Some(x.clone()))?;
        }
        if score & CRL_SCORE_SCOPE == 0 {
            ctx.report(ErrorCode::DifferentCrlScope, depth, Some(x.clone()))?;
        }
        if score & CRL_SCORE_SAME_PATH == 0 {
            let crl_issuer = ctx.current_issuer.clone();
            if !check_crl_path(ctx, crl_issuer)? {
                ctx.report(ErrorCode::CrlPathValidationError, depth, Some(x.clone()))?;
            }
        }
        if crl.idp_flags().contains(IdpFlags::INVALID) {
            ctx.report(ErrorCode::InvalidExtension, depth, Some(x.clone()))?;
        }
    }

    if score & CRL_SCORE_TIME == 0 {
        check_crl_time(ctx, crl, x, depth)?;
    }

    if let Err(code) = crypto::check_suiteb_crl(crl, issuer.public_key(), ctx.params.flags) {
        ctx.report(code, depth, Some(x.clone()))?;
    }
    match ctx.verifier.verify_crl(crl, issuer.public_key()) {
        Ok(()) => Ok(()),
        Err(SignatureError::KeyDecode) => {
            ctx.report(ErrorCode::UnableToDecodeIssuerPublicKey, depth, Some(x.clone()))
        }
        Err(SignatureError::Invalid) => {
            ctx.report(ErrorCode::CrlSignatureFailure, depth, Some(x.clone()))
        }
    }
}

/// Validate the path of a CRL issuer that is not on the certificate's own
/// path. The issuer must chain to the same trust anchor. Never nested.
fn check_crl_path(ctx: &mut StoreContext<'_>, issuer: Option<Certificate>) -> Step<bool> {
    if ctx.is_child() {
        return Ok(false);
    }
    let Some(issuer) = issuer else {
        return Ok(false);
    };
    debug!(issuer = %issuer.subject(), "validating CRL issuer path");

    let (outcome, anchor, diagnostics) = {
        let mut child = ctx.child(issuer);
        let outcome = child.verify();
        let anchor = child.chain().last().cloned();
        (outcome, anchor, child.take_diagnostics())
    };
    ctx.absorb(diagnostics);

    match outcome {
        Ok(()) => {
            let same_anchor = anchor.is_some() && anchor.as_ref() == ctx.chain.last();
            if !same_anchor {
                debug!("CRL issuer chains to a different trust anchor");
            }
            Ok(same_anchor)
        }
        Err(PathvalError::StoreLookup(msg)) => Err(Halt::Fatal(PathvalError::StoreLookup(msg))),
        Err(e) => {
            debug!(error = %e, "CRL issuer path rejected");
            Ok(false)
        }
    }
}

/// Look `x` up in `crl`. Returns whether the entry found says
/// removeFromCRL, which clears the certificate for this round.
fn cert_crl(ctx: &mut StoreContext<'_>, crl: &Crl, x: &Certificate, depth: usize) -> Step<bool> {
    if !ctx.params.has(VerifyFlags::IGNORE_CRITICAL) && crl.has_unhandled_critical() {
        ctx.report(ErrorCode::UnhandledCriticalCrlExtension, depth, Some(x.clone()))?;
    }
    if let Some(entry) = crl.find_revoked(x) {
        if entry.reason == Some(RevocationReason::RemoveFromCrl) {
            return Ok(true);
        }
        debug!(depth, reason = ?entry.reason, "certificate revoked");
        ctx.report(ErrorCode::CertRevoked, depth, Some(x.clone()))?;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, PublicKeyInfo};
    use crate::crl::{CrlBuilder, IssuingDistPoint};
    use crate::crypto::SignatureVerifier;
    use crate::params::CrlCheck;
    use crate::store::TrustStore;
    use proptest::prelude::*;

    struct AcceptAll;

    impl SignatureVerifier for AcceptAll {
        fn verify_certificate(&self, _: &Certificate, _: &PublicKeyInfo) -> Result<(), SignatureError> {
            Ok(())
        }

        fn verify_crl(&self, _: &Crl, _: &PublicKeyInfo) -> Result<(), SignatureError> {
            Ok(())
        }
    }

    const NOW: i64 = 1_000_000;

    fn name(cn: &str) -> Name {
        Name::from_pairs(&[("CN", cn)])
    }

    fn chain() -> Vec<Certificate> {
        vec![
            CertificateBuilder::new(name("leaf"), name("CA"))
                .serial(&[0x42])
                .freshest_crl()
                .build(),
            CertificateBuilder::new(name("CA"), name("CA"))
                .basic_constraints(true, None)
                .key_usage(KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN)
                .build(),
        ]
    }

    fn crl() -> CrlBuilder {
        CrlBuilder::new(name("CA"))
            .last_update(NOW - 10)
            .next_update(NOW + 10)
    }

    fn run(crls: &[Crl], flags: VerifyFlags) -> Vec<ErrorCode> {
        let store = TrustStore::new();
        let mut ctx = StoreContext::new(&store, None, &[])
            .with_crls(crls)
            .with_verifier(&AcceptAll)
            .with_callback(|_, _| true);
        ctx.set_flags(flags);
        ctx.set_time(NOW);
        ctx.params.to_mut().crl_check = CrlCheck::Leaf;
        ctx.chain = chain();
        ctx.last_untrusted = 1;
        check_revocation(&mut ctx).unwrap();
        ctx.diagnostics().iter().map(|d| d.code).collect()
    }

    fn score(crl: &Crl, flags: VerifyFlags) -> u32 {
        let store = TrustStore::new();
        let mut ctx = StoreContext::new(&store, None, &[]);
        ctx.set_flags(flags);
        ctx.set_time(NOW);
        ctx.chain = chain();
        let leaf = ctx.chain[0].clone();
        let mut reasons = ReasonSet::empty();
        get_crl_score(&ctx, crl, &leaf, 0, &mut reasons).0
    }

    #[test]
    fn test_good_crl() {
        assert!(run(&[crl().build()], VerifyFlags::empty()).is_empty());
        assert_eq!(
            score(&crl().build(), VerifyFlags::empty()),
            CRL_SCORE_VALID | CRL_SCORE_ISSUER_NAME | CRL_SCORE_ISSUER_CERT | CRL_SCORE_AKID
        );
    }

    #[test]
    fn test_revoked_and_missing() {
        let revoking = crl().revoke(&[0x42], Some(RevocationReason::KeyCompromise)).build();
        assert_eq!(run(&[revoking], VerifyFlags::empty()), [ErrorCode::CertRevoked]);
        assert_eq!(run(&[], VerifyFlags::empty()), [ErrorCode::UnableToGetCrl]);
    }

    #[test]
    fn test_future_crl_is_used_but_not_counted() {
        let future = crl().last_update(NOW + 5).build();
        assert_eq!(
            run(&[future], VerifyFlags::empty()),
            [ErrorCode::CrlNotYetValid, ErrorCode::UnableToGetCrl]
        );
    }

    #[test]
    fn test_newer_crl_wins_tie() {
        let old = crl().last_update(NOW - 100).build();
        let new = crl()
            .last_update(NOW - 50)
            .revoke(&[0x42], None)
            .build();
        assert_eq!(run(&[old, new], VerifyFlags::empty()), [ErrorCode::CertRevoked]);
    }

    #[test]
    fn test_other_issuer_and_critical() {
        let other = CrlBuilder::new(name("Other"))
            .last_update(NOW - 10)
            .build();
        assert_eq!(score(&other, VerifyFlags::empty()), 0);
        let critical = crl().unhandled_critical_extension().build();
        assert_eq!(
            run(&[critical], VerifyFlags::empty()),
            [ErrorCode::UnhandledCriticalCrlExtension, ErrorCode::UnableToGetCrl]
        );
    }

    #[test]
    fn test_indirect_and_partitioned_need_extended_support() {
        let partitioned = crl()
            .issuing_dist_point(IssuingDistPoint {
                only_some_reasons: Some(ReasonSet::KEY_COMPROMISE),
                ..IssuingDistPoint::default()
            })
            .build();
        assert_eq!(score(&partitioned, VerifyFlags::empty()), 0);
        assert_ne!(score(&partitioned, VerifyFlags::EXTENDED_CRL_SUPPORT), 0);
    }

    #[test]
    fn test_delta_crl() {
        let base = crl().number(5).revoke(&[0x42], Some(RevocationReason::CertificateHold)).build();
        let delta = crl()
            .number(6)
            .delta_of(5)
            .revoke(&[0x42], Some(RevocationReason::RemoveFromCrl))
            .build();
        assert_eq!(score(&delta, VerifyFlags::USE_DELTAS), 0);
        assert!(run(&[base.clone(), delta.clone()], VerifyFlags::USE_DELTAS).is_empty());
        assert_eq!(
            run(&[base, delta], VerifyFlags::empty()),
            [ErrorCode::CertRevoked]
        );
    }

    #[test]
    fn test_expired_base_tolerated_with_fresh_delta() {
        let base = crl().number(5).next_update(NOW - 1).build();
        let delta = crl().number(6).delta_of(5).build();
        assert!(run(&[base.clone(), delta], VerifyFlags::USE_DELTAS).is_empty());
        assert_eq!(
            run(&[base], VerifyFlags::USE_DELTAS),
            [ErrorCode::CrlHasExpired, ErrorCode::UnableToGetCrl]
        );
    }

    fn reasons_strategy() -> impl Strategy<Value = Vec<u16>> {
        prop::collection::vec(1u16..=0x1ff, 0..5)
    }

    proptest! {
        #[test]
        fn prop_coverage_reaches_union(parts in reasons_strategy()) {
            let crls: Vec<Crl> = parts
                .iter()
                .map(|bits| {
                    crl()
                        .issuing_dist_point(IssuingDistPoint {
                            only_some_reasons: Some(ReasonSet::from_bits_truncate(*bits)),
                            ..IssuingDistPoint::default()
                        })
                        .build()
                })
                .collect();
            let union = parts
                .iter()
                .fold(ReasonSet::empty(), |acc, b| acc | ReasonSet::from_bits_truncate(*b));
            let codes = run(&crls, VerifyFlags::EXTENDED_CRL_SUPPORT);
            if union == ReasonSet::ALL {
                prop_assert!(codes.is_empty());
            } else {
                prop_assert_eq!(codes, vec![ErrorCode::UnableToGetCrl]);
            }
        }

        #[test]
        fn prop_foreign_issuer_scores_zero(cn in "[A-Za-z]{1,12}") {
            prop_assume!(!cn.eq_ignore_ascii_case("CA"));
            let foreign = CrlBuilder::new(name(&cn)).last_update(NOW - 10).build();
            prop_assert_eq!(score(&foreign, VerifyFlags::EXTENDED_CRL_SUPPORT), 0);
            prop_assert_eq!(
                run(&[foreign], VerifyFlags::empty()),
                vec![ErrorCode::UnableToGetCrl]
            );
        }
    }
}
