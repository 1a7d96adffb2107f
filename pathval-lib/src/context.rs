//! The verification context.
//!
//! A [`StoreContext`] verifies one leaf certificate exactly once. It owns the
//! chain being built and the diagnostic cursor (error, depth, current
//! certificate, issuer and CRL) that the verification callback inspects.
//! Every problem found is routed through the callback, which decides whether
//! verification continues.

use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cert::Certificate;
use crate::chain;
use crate::constraints;
use crate::crl::{Crl, ReasonSet};
use crate::crypto::{self, SignatureVerifier, X509ParserVerifier};
use crate::error::{ErrorCode, PathvalError};
use crate::extensions;
use crate::params::{VerifyFlags, VerifyParams};
use crate::policy::{self, PolicyChecker, PolicyTree};
use crate::purpose::{Purpose, TrustKind};
use crate::revocation;
use crate::signature;
use crate::store::{CertLookup, TrustStore};

/// Verification callback: `(ok, context) -> continue`.
///
/// Called with `false` for every problem (the context's error fields
/// describe it) and with `true` once per verified chain position.
pub type VerifyCallback = Arc<dyn Fn(bool, &StoreContext<'_>) -> bool + Send + Sync>;

fn continue_if_ok(ok: bool, _ctx: &StoreContext<'_>) -> bool {
    ok
}

/// A problem reported through the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub depth: usize,
    /// Subject of the certificate the problem concerns.
    pub subject: Option<String>,
}

/// Why a verification stage stopped early.
#[derive(Debug)]
pub(crate) enum Halt {
    /// The callback declined to continue.
    Rejected,
    /// Lookup failure or misuse; no callback involved.
    Fatal(PathvalError),
}

impl From<PathvalError> for Halt {
    fn from(e: PathvalError) -> Self {
        Halt::Fatal(e)
    }
}

pub(crate) type Step<T = ()> = std::result::Result<T, Halt>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    BuildChain,
    CheckExtensions,
    CheckIdentity,
    CheckRevocation,
    CheckSuiteB,
    VerifySignatures,
    CheckNameConstraints,
    CheckPolicy,
    Done,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::BuildChain => Stage::CheckExtensions,
            Stage::CheckExtensions => Stage::CheckIdentity,
            Stage::CheckIdentity => Stage::CheckRevocation,
            Stage::CheckRevocation => Stage::CheckSuiteB,
            Stage::CheckSuiteB => Stage::VerifySignatures,
            Stage::VerifySignatures => Stage::CheckNameConstraints,
            Stage::CheckNameConstraints => Stage::CheckPolicy,
            Stage::CheckPolicy | Stage::Done => Stage::Done,
        }
    }
}

/// State of a single chain verification.
pub struct StoreContext<'a> {
    pub(crate) lookup: &'a dyn CertLookup,
    pub(crate) params: Cow<'a, VerifyParams>,
    pub(crate) verifier: &'a dyn SignatureVerifier,
    pub(crate) untrusted: &'a [Certificate],
    pub(crate) crls: &'a [Crl],
    callback: VerifyCallback,
    policy_checker: Arc<dyn PolicyChecker>,
    is_child: bool,
    leaf: Option<Certificate>,
    used: bool,

    pub(crate) chain: Vec<Certificate>,
    pub(crate) last_untrusted: usize,
    pub(crate) bad_chain: bool,

    pub(crate) error: ErrorCode,
    pub(crate) error_depth: usize,
    pub(crate) current_cert: Option<Certificate>,
    pub(crate) current_issuer: Option<Certificate>,
    pub(crate) current_crl: Option<Crl>,
    pub(crate) current_crl_score: u32,
    pub(crate) current_reasons: ReasonSet,

    diagnostics: Vec<Diagnostic>,
    pub(crate) peername: Option<String>,
    explicit_policy: bool,
    policy_tree: Option<PolicyTree>,
}

impl<'a> StoreContext<'a> {
    /// A context verifying `leaf` against `lookup`, with `untrusted` as the
    /// pool of intermediates. Parameters default to [`VerifyParams::default`].
    pub fn new(
        lookup: &'a dyn CertLookup,
        leaf: Option<Certificate>,
        untrusted: &'a [Certificate],
    ) -> Self {
        StoreContext {
            lookup,
            params: Cow::Owned(VerifyParams::default()),
            verifier: &X509ParserVerifier,
            untrusted,
            crls: &[],
            callback: Arc::new(continue_if_ok),
            policy_checker: Arc::new(policy::TreePolicyChecker),
            is_child: false,
            leaf,
            used: false,
            chain: Vec::new(),
            last_untrusted: 0,
            bad_chain: false,
            error: ErrorCode::Ok,
            error_depth: 0,
            current_cert: None,
            current_issuer: None,
            current_crl: None,
            current_crl_score: 0,
            current_reasons: ReasonSet::empty(),
            diagnostics: Vec::new(),
            peername: None,
            explicit_policy: false,
            policy_tree: None,
        }
    }

    /// A context over a [`TrustStore`], sharing the store's parameters.
    pub fn from_store(
        store: &'a TrustStore,
        leaf: Certificate,
        untrusted: &'a [Certificate],
    ) -> Self {
        let mut ctx = StoreContext::new(store, Some(leaf), untrusted);
        ctx.params = Cow::Borrowed(store.params());
        ctx
    }

    /// Replace the parameters with an owned copy.
    pub fn with_params(mut self, params: VerifyParams) -> Self {
        self.params = Cow::Owned(params);
        self
    }

    /// Share parameters by reference; they are copied on first change.
    pub fn with_shared_params(mut self, params: &'a VerifyParams) -> Self {
        self.params = Cow::Borrowed(params);
        self
    }

    /// CRLs consulted before the store.
    pub fn with_crls(mut self, crls: &'a [Crl]) -> Self {
        self.crls = crls;
        self
    }

    pub fn with_verifier(mut self, verifier: &'a dyn SignatureVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(bool, &StoreContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.callback = Arc::new(callback);
        self
    }

    pub fn with_policy_checker(mut self, checker: Arc<dyn PolicyChecker>) -> Self {
        self.policy_checker = checker;
        self
    }

    /// Use a fixed list of trusted certificates instead of the store.
    pub fn with_trusted_stack(mut self, stack: &'a Vec<Certificate>) -> Self {
        self.lookup = stack;
        self
    }

    pub fn set_purpose(&mut self, purpose: Purpose) {
        self.params.to_mut().set_purpose(purpose);
    }

    pub fn set_trust(&mut self, trust: TrustKind) {
        self.params.to_mut().set_trust(trust);
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.params.to_mut().depth = depth;
    }

    pub fn set_flags(&mut self, flags: VerifyFlags) {
        self.params.to_mut().set_flags(flags);
    }

    pub fn set_time(&mut self, t: i64) {
        self.params.to_mut().check_time = Some(t);
    }

    pub fn params(&self) -> &VerifyParams {
        &self.params
    }

    /// Current verification status.
    pub fn error(&self) -> ErrorCode {
        self.error
    }

    /// Chain index the status refers to.
    pub fn error_depth(&self) -> usize {
        self.error_depth
    }

    pub fn current_cert(&self) -> Option<&Certificate> {
        self.current_cert.as_ref()
    }

    pub fn current_issuer(&self) -> Option<&Certificate> {
        self.current_issuer.as_ref()
    }

    pub fn current_crl(&self) -> Option<&Crl> {
        self.current_crl.as_ref()
    }

    /// The chain built so far, leaf first.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// An owned copy of the chain.
    pub fn chain_owned(&self) -> Vec<Certificate> {
        self.chain.clone()
    }

    /// Number of chain entries that came from the untrusted side.
    pub fn last_untrusted(&self) -> usize {
        self.last_untrusted
    }

    pub fn untrusted(&self) -> &[Certificate] {
        self.untrusted
    }

    /// The host name the leaf matched, when hosts were configured.
    pub fn peername(&self) -> Option<&str> {
        self.peername.as_deref()
    }

    /// Whether policy processing ended requiring an explicit policy.
    pub fn explicit_policy(&self) -> bool {
        self.explicit_policy
    }

    pub fn policy_tree(&self) -> Option<&PolicyTree> {
        self.policy_tree.as_ref()
    }

    /// Whether this context validates a CRL issuer for another context.
    pub fn is_child(&self) -> bool {
        self.is_child
    }

    /// Every problem reported through the callback, in order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Build and verify the chain.
    ///
    /// Returns `Ok` unless the callback declined to continue or a fatal
    /// error occurred. With a callback that always continues, inspect
    /// [`diagnostics`](Self::diagnostics) for the problems found.
    pub fn verify(&mut self) -> Result<(), PathvalError> {
        let Some(leaf) = self.leaf.clone() else {
            self.error = ErrorCode::InvalidCall;
            return Err(PathvalError::InvalidCall("no certificate set for verification"));
        };
        if self.used {
            self.error = ErrorCode::InvalidCall;
            return Err(PathvalError::InvalidCall("context already used"));
        }
        self.used = true;

        let mut stage = Stage::BuildChain;
        let outcome = loop {
            if stage == Stage::Done {
                break Ok(());
            }
            let step = match stage {
                Stage::BuildChain => chain::build(self, leaf.clone()),
                Stage::CheckExtensions => extensions::check_chain_extensions(self),
                Stage::CheckIdentity => constraints::check_id(self),
                Stage::CheckRevocation => revocation::check_revocation(self),
                Stage::CheckSuiteB => self.check_suiteb(),
                Stage::VerifySignatures => signature::internal_verify(self),
                Stage::CheckNameConstraints => constraints::check_name_constraints(self),
                Stage::CheckPolicy => {
                    if !self.bad_chain && self.params.has(VerifyFlags::POLICY_CHECK) {
                        self.check_policy()
                    } else {
                        Ok(())
                    }
                }
                Stage::Done => Ok(()),
            };
            match step {
                Ok(()) => stage = stage.next(),
                Err(halt) => {
                    debug!(?stage, "verification stopped");
                    break Err(halt);
                }
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(Halt::Rejected) => {
                if self.error.is_ok() {
                    self.error = ErrorCode::Unspecified;
                }
                Err(PathvalError::Verification {
                    code: self.error,
                    depth: self.error_depth,
                })
            }
            Err(Halt::Fatal(e)) => {
                let code = e.code();
                self.error = if code.is_ok() {
                    ErrorCode::Unspecified
                } else {
                    code
                };
                Err(e)
            }
        }
    }

    /// Invoke the callback.
    pub(crate) fn call(&self, ok: bool) -> bool {
        let callback = Arc::clone(&self.callback);
        callback(ok, self)
    }

    /// Record a problem and ask the callback whether to continue.
    pub(crate) fn report(
        &mut self,
        code: ErrorCode,
        depth: usize,
        cert: Option<Certificate>,
    ) -> Step {
        self.error = code;
        self.error_depth = depth;
        self.current_cert = cert;
        self.record();
        if self.call(false) {
            Ok(())
        } else {
            Err(Halt::Rejected)
        }
    }

    /// Push the current error onto the diagnostics list and log it.
    pub(crate) fn record(&mut self) {
        let subject = self.current_cert.as_ref().map(|c| c.subject().to_string());
        warn!(
            code = ?self.error,
            depth = self.error_depth,
            subject = subject.as_deref().unwrap_or("-"),
            child = self.is_child,
            "{}",
            self.error
        );
        self.diagnostics.push(Diagnostic {
            code: self.error,
            depth: self.error_depth,
            subject,
        });
    }

    /// A context validating `issuer` as the signer of a CRL, sharing this
    /// context's sources, parameters and callback.
    pub(crate) fn child(&self, issuer: Certificate) -> StoreContext<'_> {
        let mut child = StoreContext::new(self.lookup, Some(issuer), self.untrusted);
        child.params = Cow::Borrowed(self.params.as_ref());
        child.verifier = self.verifier;
        child.crls = self.crls;
        child.callback = Arc::clone(&self.callback);
        child.policy_checker = Arc::clone(&self.policy_checker);
        child.is_child = true;
        child
    }

    /// Take over diagnostics a child context reported.
    pub(crate) fn absorb(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub(crate) fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn check_suiteb(&mut self) -> Step {
        if let Err((code, depth)) = crypto::check_suiteb_chain(&self.chain, self.params.flags) {
            let cert = self.chain.get(depth).cloned();
            self.report(code, depth, cert)?;
        }
        Ok(())
    }

    fn check_policy(&mut self) -> Step {
        if self.is_child {
            return Ok(());
        }
        let checker = Arc::clone(&self.policy_checker);
        let outcome = checker.check(&self.chain, &self.params.policies, self.params.flags);
        match outcome {
            policy::PolicyOutcome::Invalid => {
                // Report every certificate with bad policy extensions.
                for i in 1..self.chain.len() {
                    let cert = self.chain[i].clone();
                    if cert
                        .flags()
                        .contains(crate::cert::CertFlags::INVALID_POLICY)
                    {
                        self.report(ErrorCode::InvalidPolicyExtension, i, Some(cert))?;
                    }
                }
                Ok(())
            }
            policy::PolicyOutcome::NoExplicitPolicy => {
                self.explicit_policy = true;
                self.report(ErrorCode::NoExplicitPolicy, self.error_depth, None)
            }
            policy::PolicyOutcome::Valid {
                explicit_policy,
                tree,
            } => {
                self.explicit_policy = explicit_policy;
                self.policy_tree = Some(tree);
                if self.params.has(VerifyFlags::NOTIFY_POLICY) {
                    self.current_cert = None;
                    if !self.call(true) {
                        return Err(Halt::Rejected);
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for StoreContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("chain", &self.chain.len())
            .field("last_untrusted", &self.last_untrusted)
            .field("error", &self.error)
            .field("error_depth", &self.error_depth)
            .field("is_child", &self.is_child)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::CertificateBuilder;
    use crate::name::Name;

    fn self_signed() -> Certificate {
        let n = Name::from_pairs(&[("CN", "Root")]);
        CertificateBuilder::new(n.clone(), n).build()
    }

    #[test]
    fn test_no_leaf_is_invalid_call() {
        let store = TrustStore::new();
        let mut ctx = StoreContext::new(&store, None, &[]);
        assert!(matches!(ctx.verify(), Err(PathvalError::InvalidCall(_))));
        assert_eq!(ctx.error(), ErrorCode::InvalidCall);
    }

    #[test]
    fn test_context_is_one_shot() {
        let store = TrustStore::new();
        let mut ctx = StoreContext::new(&store, Some(self_signed()), &[])
            .with_callback(|_, _| true);
        assert!(ctx.verify().is_ok());
        assert!(matches!(ctx.verify(), Err(PathvalError::InvalidCall(_))));
    }

    #[test]
    fn test_rejection_keeps_error() {
        let store = TrustStore::new();
        let mut ctx = StoreContext::new(&store, Some(self_signed()), &[]);
        let err = ctx.verify().unwrap_err();
        assert_eq!(err.code(), ErrorCode::DepthZeroSelfSignedCert);
        assert_eq!(ctx.error(), ErrorCode::DepthZeroSelfSignedCert);
        assert_eq!(ctx.diagnostics().len(), 1);
    }

    #[test]
    fn test_shared_params_copy_on_write() {
        let store = TrustStore::new();
        let params = VerifyParams::default();
        let mut ctx = StoreContext::new(&store, Some(self_signed()), &[])
            .with_shared_params(&params);
        ctx.set_depth(3);
        assert_eq!(ctx.params().depth, 3);
        assert_eq!(params.depth, crate::params::DEFAULT_DEPTH);
    }
}
