use offertory::domain::TransactionStatus;
use offertory::payments::fees::FeeSchedule;
use proptest::prelude::*;

fn arb_status() -> impl Strategy<Value = TransactionStatus> {
    prop_oneof![
        Just(TransactionStatus::Pending),
        Just(TransactionStatus::Succeeded),
        Just(TransactionStatus::Failed),
        Just(TransactionStatus::Refunded),
        Just(TransactionStatus::Disputed),
    ]
}

fn arb_schedule() -> impl Strategy<Value = FeeSchedule> {
    (0u32..=1_000, 0i64..=100, 0u32..=500).prop_map(|(processing, fixed, platform)| FeeSchedule {
        processing_rate_bps: processing,
        fixed_fee_cents: fixed,
        platform_rate_bps: platform,
    })
}

proptest! {
    /// A covered gift always nets the church the full base amount.
    #[test]
    fn covered_gift_nets_base(base in 1i64..=99_999_999, schedule in arb_schedule()) {
        let fees = schedule.calculate(base, true).unwrap();
        prop_assert_eq!(fees.net_cents(), base);
        prop_assert!(fees.charge_cents >= base);
        prop_assert!(fees.processing_fee_cents >= 0);
        prop_assert!(fees.platform_fee_cents >= 0);
    }

    /// The grossed-up charge leaves at least the base after the exact
    /// percentage and fixed fees are taken out.
    #[test]
    fn covered_charge_absorbs_provider_fees(base in 1i64..=99_999_999, schedule in arb_schedule()) {
        let fees = schedule.calculate(base, true).unwrap();
        let kept_bps = 10_000i128
            - i128::from(schedule.processing_rate_bps)
            - i128::from(schedule.platform_rate_bps);
        let charge = i128::from(fees.charge_cents);
        let owed = (i128::from(base) + i128::from(schedule.fixed_fee_cents)) * 10_000;
        prop_assert!(charge * kept_bps >= owed, "charge {} too small for base {}", charge, base);
    }

    /// Without fee coverage the donor is charged the gift exactly.
    #[test]
    fn uncovered_charge_is_base(base in 1i64..=99_999_999, schedule in arb_schedule()) {
        let fees = schedule.calculate(base, false).unwrap();
        prop_assert_eq!(fees.charge_cents, base);
        prop_assert_eq!(fees.processing_fee_cents, 0);
        prop_assert!(fees.platform_fee_cents <= base);
    }

    /// A larger gift never produces a smaller charge.
    #[test]
    fn charge_is_monotonic(a in 1i64..=99_999_999, b in 1i64..=99_999_999, cover in any::<bool>()) {
        let schedule = FeeSchedule::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            schedule.calculate(low, cover).unwrap().charge_cents
                <= schedule.calculate(high, cover).unwrap().charge_cents
        );
    }

    /// Failed, Refunded and Disputed accept no further lifecycle moves.
    #[test]
    fn final_states_reject_all_transitions(target in arb_status()) {
        use TransactionStatus::*;
        for terminal in [Failed, Refunded, Disputed] {
            prop_assert!(!terminal.can_transition_to(&target));
        }
    }

    /// Any walk from Pending takes at most two steps: settle, then refund or dispute.
    #[test]
    fn random_walk_has_at_most_two_transitions(
        steps in prop::collection::vec(arb_status(), 1..20)
    ) {
        let mut current = TransactionStatus::Pending;
        let mut transitions = 0u32;
        for next in &steps {
            if current.can_transition_to(next) {
                current = *next;
                transitions += 1;
            }
        }
        prop_assert!(transitions <= 2, "got {transitions} transitions in walk: {steps:?}");
    }

    #[test]
    fn status_roundtrip(status in arb_status()) {
        let roundtripped = TransactionStatus::try_from(status.as_str()).unwrap();
        prop_assert_eq!(roundtripped, status);
    }
}
