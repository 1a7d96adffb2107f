//! Leaf identity checks and name constraints.

use tracing::debug;

use crate::cert::{Certificate, CertFlags, GeneralSubtree, NameConstraints};
use crate::context::{Step, StoreContext};
use crate::error::ErrorCode;
use crate::name::GeneralName;
use crate::util;

/// Upper bound on names times subtrees for one constraints check.
const MAX_NC_WORK_FACTOR: usize = 65_536;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Match the leaf against the configured hosts, email and IP address.
///
/// Mismatches are reported at depth 0. Nested CRL issuer contexts skip
/// this stage.
pub(crate) fn check_id(ctx: &mut StoreContext<'_>) -> Step {
    if ctx.is_child() || ctx.chain.is_empty() {
        return Ok(());
    }
    let leaf = ctx.chain[0].clone();

    if !ctx.params.hosts.is_empty() {
        ctx.peername = ctx
            .params
            .hosts
            .iter()
            .find_map(|host| matching_host(&leaf, host));
        if ctx.peername.is_none() {
            ctx.report(ErrorCode::HostnameMismatch, 0, Some(leaf.clone()))?;
        }
    }
    if let Some(email) = ctx.params.email.clone() {
        if !email_matches(&leaf, &email) {
            ctx.report(ErrorCode::EmailMismatch, 0, Some(leaf.clone()))?;
        }
    }
    if let Some(ip) = ctx.params.ip {
        let wanted = util::ip_to_bytes(&ip);
        let found = leaf
            .subject_alt_names()
            .unwrap_or_default()
            .iter()
            .any(|gn| matches!(gn, GeneralName::Ip(b) if *b == wanted));
        if !found {
            ctx.report(ErrorCode::IpAddressMismatch, 0, Some(leaf))?;
        }
    }
    Ok(())
}

/// The certificate name that matched `host`, if any.
///
/// DNS SAN entries win; without any, a common name that looks like a DNS
/// name is tried.
fn matching_host(cert: &Certificate, host: &str) -> Option<String> {
    let sans: Vec<&str> = cert
        .subject_alt_names()
        .unwrap_or_default()
        .iter()
        .filter_map(|gn| match gn {
            GeneralName::Dns(d) => Some(d.as_str()),
            _ => None,
        })
        .collect();
    if !sans.is_empty() {
        return sans
            .into_iter()
            .find(|p| util::hostname_matches(p, host))
            .map(str::to_string);
    }
    cert.subject()
        .common_names()
        .filter(|cn| util::looks_like_dns_name(cn))
        .find(|cn| util::hostname_matches(cn, host))
        .map(str::to_string)
}

/// Local part compared exactly, domain ASCII case-insensitively.
fn email_equal(a: &str, b: &str) -> bool {
    match (a.rsplit_once('@'), b.rsplit_once('@')) {
        (Some((la, da)), Some((lb, db))) => la == lb && da.eq_ignore_ascii_case(db),
        (None, None) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

fn email_matches(cert: &Certificate, email: &str) -> bool {
    let sans: Vec<&str> = cert
        .subject_alt_names()
        .unwrap_or_default()
        .iter()
        .filter_map(|gn| match gn {
            GeneralName::Email(e) => Some(e.as_str()),
            _ => None,
        })
        .collect();
    if !sans.is_empty() {
        return sans.into_iter().any(|e| email_equal(e, email));
    }
    cert.subject()
        .email_addresses()
        .any(|e| email_equal(e, email))
}

// ---------------------------------------------------------------------------
// Name constraints
// ---------------------------------------------------------------------------

/// Check every certificate against the constraints of all its ancestors.
///
/// Self-issued intermediates are exempt; the leaf is always checked. When
/// the leaf has no subjectAltName at all, DNS-like common names must
/// satisfy the DNS constraints too.
pub(crate) fn check_name_constraints(ctx: &mut StoreContext<'_>) -> Step {
    let len = ctx.chain.len();
    for i in (0..len).rev() {
        let x = ctx.chain[i].clone();
        if i > 0 && x.flags().contains(CertFlags::SELF_ISSUED) {
            continue;
        }
        for j in (i + 1..len).rev() {
            let ca = ctx.chain[j].clone();
            let Some(nc) = ca.name_constraints() else {
                continue;
            };
            if let Err(code) = check_cert(&x, nc) {
                debug!(depth = i, constrained_by = j, ?code, "name constraint violation");
                ctx.report(code, i, Some(x.clone()))?;
            }
        }
    }

    let Some(leaf) = ctx.chain.first().cloned() else {
        return Ok(());
    };
    if leaf.subject_alt_names().is_some() {
        return Ok(());
    }
    let constraints: Vec<Certificate> = ctx.chain[1..]
        .iter()
        .filter(|c| c.name_constraints().is_some())
        .cloned()
        .collect();
    if constraints.is_empty() {
        return Ok(());
    }
    for cn in leaf.subject().common_names() {
        if !util::looks_like_dns_name(cn) {
            continue;
        }
        let name = GeneralName::Dns(cn.to_string());
        let violated = constraints
            .iter()
            .filter_map(|c| c.name_constraints())
            .any(|nc| match_subtrees(&name, nc).is_err());
        if violated {
            return ctx.report(ErrorCode::NameConstraintsWithoutSans, 0, Some(leaf.clone()));
        }
    }
    Ok(())
}

/// Check a certificate's subject and alternative names against one set of
/// constraints, stopping at the first failure.
pub(crate) fn check_cert(cert: &Certificate, nc: &NameConstraints) -> Result<(), ErrorCode> {
    let subject = cert.subject();
    let sans = cert.subject_alt_names().unwrap_or_default();
    let emails: Vec<&str> = subject.email_addresses().collect();

    let name_count = sans.len() + emails.len() + usize::from(!subject.is_empty());
    let subtree_count = nc.permitted.len() + nc.excluded.len();
    if name_count.saturating_mul(subtree_count) > MAX_NC_WORK_FACTOR {
        return Err(ErrorCode::Unspecified);
    }

    if !subject.is_empty() {
        match_subtrees(&GeneralName::Directory(subject.clone()), nc)?;
        for email in emails {
            match_subtrees(&GeneralName::Email(email.to_string()), nc)?;
        }
    }
    for gn in sans {
        match_subtrees(gn, nc)?;
    }
    Ok(())
}

/// Permitted subtrees of a name's form must contain it; no excluded
/// subtree may.
fn match_subtrees(name: &GeneralName, nc: &NameConstraints) -> Result<(), ErrorCode> {
    let same_form = |s: &&GeneralSubtree| s.base.form() == name.form();

    let mut permitted_seen = false;
    let mut permitted_hit = false;
    for sub in nc.permitted.iter().filter(same_form) {
        check_minmax(sub)?;
        if permitted_hit {
            continue;
        }
        permitted_seen = true;
        match match_single(name, &sub.base) {
            Ok(()) => permitted_hit = true,
            Err(ErrorCode::PermittedViolation) => {}
            Err(e) => return Err(e),
        }
    }
    if permitted_seen && !permitted_hit {
        return Err(ErrorCode::PermittedViolation);
    }

    for sub in nc.excluded.iter().filter(same_form) {
        check_minmax(sub)?;
        match match_single(name, &sub.base) {
            Ok(()) => return Err(ErrorCode::ExcludedViolation),
            Err(ErrorCode::PermittedViolation) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn check_minmax(sub: &GeneralSubtree) -> Result<(), ErrorCode> {
    if sub.minimum != 0 || sub.maximum.is_some() {
        return Err(ErrorCode::SubtreeMinMax);
    }
    Ok(())
}

/// Whether `name` lies within `base`; a miss is `PermittedViolation`.
fn match_single(name: &GeneralName, base: &GeneralName) -> Result<(), ErrorCode> {
    let hit = match (name, base) {
        (GeneralName::Directory(n), GeneralName::Directory(b)) => b.is_prefix_of(n),
        (GeneralName::Dns(n), GeneralName::Dns(b)) => dns_within(n, b),
        (GeneralName::Email(n), GeneralName::Email(b)) => email_within(n, b)?,
        (GeneralName::Uri(n), GeneralName::Uri(b)) => uri_within(n, b)?,
        (GeneralName::Ip(n), GeneralName::Ip(b)) => ip_within(n, b)?,
        _ => return Err(ErrorCode::UnsupportedConstraintType),
    };
    if hit {
        Ok(())
    } else {
        Err(ErrorCode::PermittedViolation)
    }
}

/// `example.com` covers itself and any subdomain; `.example.com` only
/// subdomains. An empty base covers everything.
fn dns_within(name: &str, base: &str) -> bool {
    if base.is_empty() {
        return true;
    }
    if name.len() > base.len() {
        let split = name.len() - base.len();
        let Some(tail) = name.get(split..) else {
            return false;
        };
        let preceded_by_dot = name.as_bytes()[split - 1] == b'.';
        return (base.starts_with('.') || preceded_by_dot) && tail.eq_ignore_ascii_case(base);
    }
    name.eq_ignore_ascii_case(base)
}

/// A mailbox (`user@host`), a host (`host`) or a domain (`.host`).
fn email_within(email: &str, base: &str) -> Result<bool, ErrorCode> {
    let Some((local, host)) = email.rsplit_once('@') else {
        return Err(ErrorCode::UnsupportedNameSyntax);
    };
    match base.rsplit_once('@') {
        None if base.starts_with('.') => Ok(email.len() > base.len()
            && email
                .get(email.len() - base.len()..)
                .is_some_and(|t| t.eq_ignore_ascii_case(base))),
        None => Ok(host.eq_ignore_ascii_case(base)),
        Some((base_local, base_host)) => {
            if !base_local.is_empty() && base_local != local {
                return Ok(false);
            }
            Ok(host.eq_ignore_ascii_case(base_host))
        }
    }
}

/// Host part of the URI against a host or `.domain` base.
fn uri_within(uri: &str, base: &str) -> Result<bool, ErrorCode> {
    let rest = uri
        .split_once(':')
        .and_then(|(_, rest)| rest.strip_prefix("//"))
        .ok_or(ErrorCode::UnsupportedNameSyntax)?;
    let end = rest.find(':').or_else(|| rest.find('/')).unwrap_or(rest.len());
    let host = &rest[..end];
    if host.is_empty() {
        return Err(ErrorCode::UnsupportedNameSyntax);
    }
    if base.starts_with('.') {
        return Ok(host.len() > base.len()
            && host
                .get(host.len() - base.len()..)
                .is_some_and(|t| t.eq_ignore_ascii_case(base)));
    }
    Ok(host.eq_ignore_ascii_case(base))
}

/// Address against address plus mask, of the same family.
fn ip_within(ip: &[u8], base: &[u8]) -> Result<bool, ErrorCode> {
    if ip.len() != 4 && ip.len() != 16 {
        return Err(ErrorCode::UnsupportedNameSyntax);
    }
    if base.len() != 8 && base.len() != 32 {
        return Err(ErrorCode::UnsupportedNameSyntax);
    }
    if ip.len() * 2 != base.len() {
        return Ok(false);
    }
    let (addr, mask) = base.split_at(ip.len());
    Ok(ip
        .iter()
        .zip(addr)
        .zip(mask)
        .all(|((i, a), m)| i & m == a & m))
}
