//! Chaining and settlement laws for `Deferred`.

use coopsync::{Deferred, Failure, LocalRuntime, test_complete, test_phase};
use proptest::prelude::*;

fn init_test(name: &str) {
    coopsync::test_utils::init_test_logging();
    test_phase!(name);
}

proptest! {
    /// Completing the mapped link is the same as completing the root.
    #[test]
    fn completing_mapped_link_equals_completing_root(v in any::<i64>(), k in any::<i64>()) {
        let f = move |x: i64| x.wrapping_mul(k);

        let via_root = Deferred::<i64>::new();
        let mapped_root = via_root.map(f);
        via_root.complete(v);

        let via_link = Deferred::<i64>::new();
        let mapped_link = via_link.map(f);
        mapped_link.complete(v);

        prop_assert_eq!(mapped_root.outcome(), Some(Ok(f(v))));
        prop_assert_eq!(mapped_link.outcome(), mapped_root.outcome());
        prop_assert_eq!(via_link.outcome(), Some(Ok(v)));
    }

    /// The first settlement wins; later ones change nothing.
    #[test]
    fn first_settlement_wins(first in any::<u32>(), later in prop::collection::vec(any::<Option<u32>>(), 0..8)) {
        let d = Deferred::<u32>::new();
        d.complete(first);
        for attempt in later {
            match attempt {
                Some(v) => d.complete(v),
                None => d.fail(Failure::new("late")),
            };
            prop_assert_eq!(d.outcome(), Some(Ok(first)));
        }
        prop_assert!(d.is_completed());
        prop_assert!(!d.is_failed());
    }
}

#[test]
fn awaiting_a_chain_driven_from_elsewhere() {
    init_test("awaiting_a_chain_driven_from_elsewhere");
    let rt = LocalRuntime::lab();
    let root = Deferred::<String>::new();
    let words = root
        .map(|s| s.split_whitespace().count())
        .and_then(|n| if n > 0 { Ok(n) } else { Err(Failure::new("empty")) });

    let driver = words.clone();
    rt.spawn(async move {
        driver.complete("settled from a derived link".to_string());
    });
    let counted = rt.block_on(words).unwrap();
    assert_eq!(counted, Ok(5));
    assert!(root.is_completed());
    test_complete!("awaiting_a_chain_driven_from_elsewhere");
}

#[test]
fn recover_then_always_on_failure() {
    init_test("recover_then_always_on_failure");
    let root = Deferred::<u8>::new();
    let recovered = root
        .recover(|err| if err.message() == "soft" { Ok(0) } else { Err(err) })
        .always(|| Ok(()));
    recovered.fail(Failure::new("soft"));
    assert_eq!(recovered.outcome(), Some(Ok(0)));
    assert!(root.is_failed());

    let hard = Deferred::<u8>::new();
    let chain = hard.recover(|err| if err.message() == "soft" { Ok(0) } else { Err(err) });
    hard.fail(Failure::new("hard"));
    let outcome = chain.outcome();
    assert!(matches!(outcome, Some(Err(ref e)) if e.message() == "hard"));
    test_complete!("recover_then_always_on_failure");
}
