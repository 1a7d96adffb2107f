//! Certificate policy processing.
//!
//! The context hands the built chain to a [`PolicyChecker`] and acts on the
//! [`PolicyOutcome`]. [`TreePolicyChecker`] is a compact RFC 5280 section 6.1
//! evaluator: it tracks the valid policy set level by level with expected
//! policy sets for mappings, and does not retain qualifiers.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::cert::{CertFlags, Certificate, OID_ANY_POLICY};
use crate::params::VerifyFlags;

/// A node of the valid policy tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyNode {
    pub valid_policy: String,
    pub expected: BTreeSet<String>,
}

impl PolicyNode {
    fn new(valid_policy: &str, expected: impl IntoIterator<Item = String>) -> Self {
        PolicyNode {
            valid_policy: valid_policy.to_string(),
            expected: expected.into_iter().collect(),
        }
    }

    fn any() -> Self {
        PolicyNode::new(OID_ANY_POLICY, [OID_ANY_POLICY.to_string()])
    }

    fn is_any(&self) -> bool {
        self.valid_policy == OID_ANY_POLICY
    }
}

/// Result of successful policy processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyTree {
    /// Valid policy nodes per certificate, issuer side first.
    pub levels: Vec<Vec<PolicyNode>>,
    /// Policies valid for the whole chain.
    pub authority_policies: Vec<String>,
    /// Authority policies restricted to the caller's acceptable set.
    pub user_policies: Vec<String>,
}

impl PolicyTree {
    /// Whether the chain is valid for any policy.
    pub fn is_any(&self) -> bool {
        self.authority_policies.iter().any(|p| p == OID_ANY_POLICY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// A certificate carried malformed policy extensions.
    Invalid,
    /// An explicit policy was required and none is valid.
    NoExplicitPolicy,
    Valid {
        explicit_policy: bool,
        tree: PolicyTree,
    },
}

/// Policy evaluation over a built chain, leaf first.
pub trait PolicyChecker: Send + Sync {
    fn check(&self, chain: &[Certificate], policies: &[String], flags: VerifyFlags)
        -> PolicyOutcome;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreePolicyChecker;

struct Counters {
    explicit: usize,
    mapping: usize,
    any: usize,
}

impl Counters {
    fn decrement(&mut self) {
        self.explicit = self.explicit.saturating_sub(1);
        self.mapping = self.mapping.saturating_sub(1);
        self.any = self.any.saturating_sub(1);
    }

    fn constrain(&mut self, cert: &Certificate) {
        if let Some(r) = cert.require_explicit_policy() {
            self.explicit = self.explicit.min(r as usize);
        }
        if let Some(m) = cert.inhibit_policy_mapping() {
            self.mapping = self.mapping.min(m as usize);
        }
        if let Some(a) = cert.inhibit_any_policy() {
            self.any = self.any.min(a as usize);
        }
    }
}

impl PolicyChecker for TreePolicyChecker {
    fn check(
        &self,
        chain: &[Certificate],
        policies: &[String],
        flags: VerifyFlags,
    ) -> PolicyOutcome {
        // A self-signed anchor takes no part in policy processing.
        let certs = match chain.split_last() {
            Some((top, rest)) if top.is_self_signed() => rest,
            _ => chain,
        };
        let n = certs.len();
        let start = |flag: VerifyFlags| if flags.contains(flag) { 0 } else { n + 1 };
        let mut counters = Counters {
            explicit: start(VerifyFlags::EXPLICIT_POLICY),
            mapping: start(VerifyFlags::INHIBIT_MAP),
            any: start(VerifyFlags::INHIBIT_ANY),
        };

        let mut level: Option<Vec<PolicyNode>> = Some(vec![PolicyNode::any()]);
        let mut levels = Vec::with_capacity(n);

        for (k, cert) in certs.iter().rev().enumerate() {
            let is_leaf = k + 1 == n;
            if cert.flags().contains(CertFlags::INVALID_POLICY) {
                return PolicyOutcome::Invalid;
            }

            level = match (level.take(), cert.policies()) {
                (Some(parents), Some(cert_policies)) => {
                    let any_allowed = counters.any > 0 || (!is_leaf && cert.is_self_issued());
                    let next = next_level(&parents, cert_policies, any_allowed);
                    (!next.is_empty()).then_some(next)
                }
                _ => None,
            };

            if !is_leaf {
                let mappings = cert.policy_mappings();
                if mappings
                    .iter()
                    .any(|(i, s)| i == OID_ANY_POLICY || s == OID_ANY_POLICY)
                {
                    return PolicyOutcome::Invalid;
                }
                if let Some(nodes) = level.as_mut() {
                    apply_mappings(nodes, mappings, counters.mapping > 0);
                    if nodes.is_empty() {
                        level = None;
                    }
                }
                if !cert.is_self_issued() {
                    counters.decrement();
                }
                counters.constrain(cert);
            } else {
                counters.explicit = counters.explicit.saturating_sub(1);
                if cert.require_explicit_policy() == Some(0) {
                    counters.explicit = 0;
                }
            }

            if counters.explicit == 0 && level.is_none() {
                debug!(depth = n - 1 - k, "no valid policy with explicit policy required");
                return PolicyOutcome::NoExplicitPolicy;
            }
            levels.push(level.clone().unwrap_or_default());
        }

        let authority: Vec<String> = level
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|node| node.valid_policy.clone())
            .collect();
        let user = restrict(&authority, policies);
        let explicit_policy = counters.explicit == 0;
        if explicit_policy && user.is_empty() {
            return PolicyOutcome::NoExplicitPolicy;
        }
        debug!(?authority, ?user, explicit_policy, "policy processing done");
        PolicyOutcome::Valid {
            explicit_policy,
            tree: PolicyTree {
                levels,
                authority_policies: authority,
                user_policies: user,
            },
        }
    }
}

fn next_level(parents: &[PolicyNode], cert_policies: &[String], any_allowed: bool) -> Vec<PolicyNode> {
    let parent_any = parents.iter().any(PolicyNode::is_any);
    let mut next: Vec<PolicyNode> = Vec::new();
    for p in cert_policies.iter().filter(|p| *p != OID_ANY_POLICY) {
        let expected = parents.iter().any(|node| node.expected.contains(p));
        if expected || parent_any {
            next.push(PolicyNode::new(p, [p.clone()]));
        }
    }
    if any_allowed && cert_policies.iter().any(|p| p == OID_ANY_POLICY) {
        let expected: BTreeSet<&String> = parents.iter().flat_map(|n| n.expected.iter()).collect();
        for e in expected {
            if !next.iter().any(|node| &node.valid_policy == e) {
                next.push(PolicyNode::new(e, [e.clone()]));
            }
        }
    }
    next
}

fn apply_mappings(nodes: &mut Vec<PolicyNode>, mappings: &[(String, String)], allowed: bool) {
    let issuer_domains: BTreeSet<&String> = mappings.iter().map(|(i, _)| i).collect();
    if !allowed {
        nodes.retain(|node| !issuer_domains.contains(&node.valid_policy));
        return;
    }
    let any_present = nodes.iter().any(PolicyNode::is_any);
    for domain in issuer_domains {
        let targets = mappings
            .iter()
            .filter(|(i, _)| i == domain)
            .map(|(_, s)| s.clone());
        match nodes.iter_mut().find(|node| &node.valid_policy == domain) {
            Some(node) => node.expected = targets.collect(),
            None if any_present => nodes.push(PolicyNode::new(domain, targets)),
            None => {}
        }
    }
}

/// Intersect the authority policies with the acceptable ones. An empty
/// acceptable set, or one containing anyPolicy, accepts everything.
fn restrict(authority: &[String], acceptable: &[String]) -> Vec<String> {
    if acceptable.is_empty() || acceptable.iter().any(|p| p == OID_ANY_POLICY) {
        return authority.to_vec();
    }
    if authority.iter().any(|p| p == OID_ANY_POLICY) {
        return acceptable.to_vec();
    }
    authority
        .iter()
        .filter(|p| acceptable.contains(p))
        .cloned()
        .collect()
}
