//! Property-based tests for scoring, matrix updates and truncation.

use proptest::collection::{btree_map, vec as prop_vec};
use proptest::prelude::*;

use plrm::data::Example;
use plrm::model::LearnerConfig;
use plrm::repr::SparseCoefficientMatrix;
use plrm::training::softmax::softmax_in_place;
use plrm::training::{
    BlockModel, Prior, PriorSet, TruncatedGradientBlock, TruncationParams,
};

// =============================================================================
// Generators
// =============================================================================

const N_CLASSES: usize = 3;

fn arb_value() -> impl Strategy<Value = f64> {
    (-2.0f64..2.0).prop_filter("non-zero", |v| *v != 0.0)
}

/// Labeled example over features `1..=12`.
fn arb_example() -> impl Strategy<Value = Example> {
    (btree_map(1usize..=12, arb_value(), 1..5), 0..N_CLASSES).prop_map(|(features, label)| {
        Example::labeled(features, label).expect("generated example is valid")
    })
}

fn arb_scores() -> impl Strategy<Value = Vec<f64>> {
    prop_vec(-500.0f64..500.0, 1..8)
}

fn arb_truncation() -> impl Strategy<Value = (TruncationParams, Option<PriorSet>)> {
    let gravity = (0.0f64..2.0, 1u64..6)
        .prop_map(|(g, period)| (TruncationParams::gravity(g, period), None::<PriorSet>));
    let laplace = (0.01f64..3.0, 1u64..6).prop_map(|(lambda, period)| {
        (
            TruncationParams { period, ..Default::default() },
            Some(PriorSet::uniform(Prior::laplace_lambda(0.0, lambda))),
        )
    });
    let gaussian = (-0.5f64..0.5, 1u64..6).prop_map(|(mode, period)| {
        (
            TruncationParams { period, ..Default::default() },
            Some(PriorSet::uniform(Prior::gaussian(mode, 1.0))),
        )
    });
    prop_oneof![gravity, laplace, gaussian]
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn softmax_is_a_distribution(scores in arb_scores()) {
        let mut p = scores.clone();
        softmax_in_place(&mut p);
        let sum: f64 = p.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
        prop_assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn softmax_ignores_shifts(scores in arb_scores(), shift in -1e4f64..1e4) {
        let mut a = scores.clone();
        let mut b: Vec<f64> = scores.iter().map(|s| s + shift).collect();
        softmax_in_place(&mut a);
        softmax_in_place(&mut b);
        for (x, y) in a.iter().zip(&b) {
            prop_assert!((x - y).abs() < 1e-9, "{x} vs {y}");
        }
    }

    #[test]
    fn dense_row_updates_are_linear(
        row in prop_vec(-3.0f64..3.0, N_CLASSES),
        q1 in -2.0f64..2.0,
        q2 in -2.0f64..2.0,
    ) {
        let mut twice = SparseCoefficientMatrix::new();
        twice.add_dense_row(4, &row, q1).unwrap();
        twice.add_dense_row(4, &row, q2).unwrap();

        let mut once = SparseCoefficientMatrix::new();
        once.add_dense_row(4, &row, q1 + q2).unwrap();

        for class in 0..N_CLASSES {
            let (a, b) = (twice.get(4, class), once.get(4, class));
            prop_assert!((a - b).abs() <= 1e-12 * (1.0 + b.abs()), "class {class}: {a} vs {b}");
        }
    }

    #[test]
    fn laplace_never_crosses_mode(
        value in -5.0f64..5.0,
        mode in -1.0f64..1.0,
        lambda in 0.0f64..4.0,
        rate in 0.0f64..1.0,
        mult in 1u64..50,
    ) {
        let prior = Prior::laplace_lambda(mode, lambda);
        let shrunk = prior.apply(value, rate, mult).unwrap();
        prop_assert!((shrunk - mode) * (value - mode) >= 0.0);
        prop_assert!((shrunk - mode).abs() <= (value - mode).abs());
    }

    #[test]
    fn lazy_truncation_is_exact(
        (truncation, priors) in arb_truncation(),
        data in prop_vec(arb_example(), 1..60),
    ) {
        let config = LearnerConfig::builder()
            .learning_rate(0.1)
            .truncation(truncation)
            .maybe_priors(priors)
            .build()
            .unwrap();
        let mut lazy = TruncatedGradientBlock::new(&config, N_CLASSES).unwrap();
        let mut eager = TruncatedGradientBlock::new(&config, N_CLASSES).unwrap();
        for ex in &data {
            lazy.absorb_example(ex, 0).unwrap();
            eager.absorb_example(ex, 0).unwrap();
            eager.finish_absorb();
        }
        lazy.finish_absorb();
        prop_assert_eq!(lazy.export_state(), eager.export_state());
    }
}
