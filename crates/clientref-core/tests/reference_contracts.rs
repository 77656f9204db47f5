//! Contract tests for client reference formatting and bucket progression.

use clientref_core::prelude::*;

fn walk(capacity: u32, claims: usize) -> Vec<String> {
    let portfolio = PortfolioRegistry::default().validate(1).unwrap();
    let format = ReferenceFormat::default();
    let mut state = BucketState::INITIAL;
    let mut issued = Vec::with_capacity(claims);

    for _ in 0..claims {
        let claim = state.claim(capacity).expect("space left");
        let triple = ReferenceTriple {
            portfolio,
            alpha: claim.alpha,
            sequence: claim.sequence,
        };
        issued.push(format.format(&triple).unwrap().into_string());
        state = claim.bucket_after();
    }
    issued
}

#[test]
fn rollover_sequence_at_capacity_three() {
    assert_eq!(walk(3, 4), vec!["1A001", "1A002", "1A003", "1B001"]);
}

#[test]
fn every_letter_is_used_in_order_then_space_runs_out() {
    let issued = walk(2, 52);
    assert_eq!(issued.first().map(String::as_str), Some("1A001"));
    assert_eq!(issued.last().map(String::as_str), Some("1Z002"));

    let letters: Vec<char> = issued.iter().map(|r| r.as_bytes()[1] as char).collect();
    assert!(letters.windows(2).all(|w| w[0] <= w[1]));

    let mut state = BucketState::INITIAL;
    for _ in 0..52 {
        state = state.claim(2).unwrap().bucket_after();
    }
    assert!(state.claim(2).is_none());
}

#[test]
fn walked_references_are_unique_and_parse_back() {
    let issued = walk(999, 2_500);
    let format = ReferenceFormat::default();

    let mut seen = std::collections::HashSet::new();
    for reference in &issued {
        assert!(seen.insert(reference.clone()), "duplicate {reference}");
        let triple = format.parse(reference).unwrap();
        assert_eq!(format.format(&triple).unwrap().as_str(), reference);
    }
    assert_eq!(issued[999], "1B001");
    assert_eq!(issued[1998], "1C001");
}

#[test]
fn parsed_portfolio_is_checked_by_registry_separately() {
    // The grammar accepts any positive portfolio; the registry owns the range.
    let triple = ReferenceFormat::default().parse("42A001").unwrap();
    assert_eq!(triple.portfolio.get(), 42);
    assert!(!PortfolioRegistry::default().contains(triple.portfolio));
}
