mod common;

use common::*;
use pathval_lib::cert::NameConstraints;
use pathval_lib::{Certificate, CrlCheck, ErrorCode, GeneralName, TrustStore};
use proptest::prelude::*;

/// Leaf, `n` intermediates named I0..In-1 below root R, as (store, pool, leaf).
fn ladder(n: usize) -> (TrustStore, Vec<Certificate>, Certificate) {
    let mut pool = Vec::new();
    let mut issuer = "R".to_string();
    for i in 0..n {
        let cn = format!("I{i}");
        pool.push(ca(&cn, &issuer).build());
        issuer = cn;
    }
    // Reverse so the pool order does not mirror the chain.
    pool.reverse();
    (store(&[root("R")]), pool, leaf("leaf", &issuer).build())
}

proptest! {
    #[test]
    fn prop_well_formed_ladder_verifies(n in 0usize..5) {
        let (store, pool, leaf) = ladder(n);
        let out = run(&store, leaf, &pool, &[], params());
        prop_assert!(out.result.is_ok());
        prop_assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        prop_assert_eq!(out.chain.len(), n + 2);
        prop_assert_eq!(out.chain.first().map(String::as_str), Some("CN=leaf"));
        prop_assert_eq!(out.chain.last().map(String::as_str), Some("CN=R"));
    }

    #[test]
    fn prop_depth_limit_bounds_intermediates(n in 1usize..5, limit in 0usize..5) {
        let (store, pool, leaf) = ladder(n);
        let mut p = params();
        p.depth = limit;
        let out = run(&store, leaf, &pool, &[], p);
        // The chain holds at most `limit + 1` certificates.
        if n < limit {
            prop_assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        } else {
            prop_assert!(out.codes().contains(&ErrorCode::CertChainTooLong));
        }
    }

    #[test]
    fn prop_crl_from_other_issuer_never_covers(issuer in "[B-Z][a-z]{0,6}") {
        let store = store(&[root("R")]);
        let pool = [ca("A", "R").build()];
        let crls = [crl(&issuer).build()];
        let mut p = params();
        p.crl_check = CrlCheck::Leaf;
        let out = run(&store, leaf("leaf", "A").build(), &pool, &crls, p);
        prop_assert_eq!(out.diagnostics, vec![(ErrorCode::UnableToGetCrl, 0)]);
    }

    #[test]
    fn prop_delta_pairing(base in 0u64..50, delta_base in 0u64..50, delta in 0u64..60) {
        let full = crl("A").number(base).build();
        let d = crl("A").number(delta).delta_of(delta_base).build();
        prop_assert_eq!(d.is_delta_of(&full), delta_base <= base && delta > base);
        // A delta never pairs with another issuer's base.
        let other = crl("B").number(base).build();
        prop_assert!(!d.is_delta_of(&other));
    }

    #[test]
    fn prop_name_constraints_bind_descendants_only(
        label in "[a-z]{1,8}",
        inside in any::<bool>(),
    ) {
        let nc = NameConstraints::default().permit(GeneralName::Dns(".example.com".into()));
        // The constrained CA's own name lies outside its subtree.
        let constrained = ca("A", "R")
            .name_constraints(nc)
            .subject_alt_names(vec![GeneralName::Dns("ca.example.net".into())])
            .build();
        let domain = if inside { "example.com" } else { "example.net" };
        let host = format!("{label}.{domain}");
        let leaf = leaf("leaf", "A")
            .subject_alt_names(vec![GeneralName::Dns(host)])
            .build();
        let out = run(&store(&[root("R")]), leaf, &[constrained], &[], params());
        if inside {
            prop_assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        } else {
            prop_assert_eq!(out.diagnostics, vec![(ErrorCode::PermittedViolation, 0)]);
        }
    }
}
