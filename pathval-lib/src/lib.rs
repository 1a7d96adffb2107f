//! X.509 certificate path validation.
//!
//! A [`StoreContext`] builds a chain from a leaf certificate to a trust
//! anchor, retrying alternate paths through the untrusted pool, then checks
//! extensions, identity, revocation (CRLs with delta CRLs), Suite B
//! compliance, signatures and validity periods, name constraints and
//! certificate policies. Every problem is passed to a verification callback
//! that decides whether to continue.
//!
//! ```no_run
//! use pathval_lib::{verify_pem_chain, TrustStore};
//!
//! let store = TrustStore::system()?;
//! let pem = std::fs::read("chain.pem")?;
//! let result = verify_pem_chain(&pem, &store, Some("example.com"))?;
//! println!("{result}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cert;
mod chain;
mod constraints;
pub mod context;
pub mod crl;
pub mod crypto;
pub mod error;
mod extensions;
pub mod name;
pub mod params;
pub mod policy;
pub mod purpose;
mod revocation;
mod signature;
pub mod store;
pub mod util;
pub mod verify;

pub use cert::{Certificate, CertificateBuilder};
pub use context::{Diagnostic, StoreContext, VerifyCallback};
pub use crl::{Crl, CrlBuilder};
pub use crypto::{SignatureError, SignatureVerifier, X509ParserVerifier};
pub use error::{ErrorCode, PathvalError, Result};
pub use name::{GeneralName, Name};
pub use params::{CrlCheck, VerifyFlags, VerifyParams};
pub use policy::{PolicyChecker, PolicyOutcome, PolicyTree, TreePolicyChecker};
pub use purpose::{Purpose, TrustKind};
pub use store::{CertLookup, TrustStore};
pub use verify::{
    verify_certificate, verify_pem_chain, verify_pem_chain_with_params, verify_with_untrusted,
    ChainCertInfo, VerificationResult,
};
