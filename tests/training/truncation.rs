//! Lazy truncation tests.
//!
//! A block that defers truncation until a row is touched must end in exactly
//! the same state as one that truncates every row as soon as an epoch opens.

use plrm::data::Example;
use plrm::model::LearnerConfig;
use plrm::testing::{assert_matrix_approx_eq, assert_slice_approx_eq, synthetic_examples};
use plrm::training::{
    BlockModel, BlockState, Prior, PriorSet, Replay, TruncatedGradientBlock, TruncationParams,
};
use rstest::rstest;

fn config(truncation: TruncationParams, priors: Option<PriorSet>) -> LearnerConfig {
    LearnerConfig::builder()
        .learning_rate(0.1)
        .truncation(truncation)
        .maybe_priors(priors)
        .build()
        .unwrap()
}

/// Train a lazy and an eager block on the same stream.
fn lazy_and_eager(config: &LearnerConfig, data: &[Example]) -> (BlockState, BlockState) {
    let mut lazy = TruncatedGradientBlock::new(config, 3).unwrap();
    let mut eager = TruncatedGradientBlock::new(config, 3).unwrap();

    for ex in data {
        lazy.absorb_example(ex, 0).unwrap();
        eager.absorb_example(ex, 0).unwrap();
        eager.finish_absorb();
    }
    lazy.finish_absorb();
    (lazy.export_state(), eager.export_state())
}

fn scoped_priors() -> PriorSet {
    let mut priors = PriorSet::new();
    priors.set_global(Prior::laplace_lambda(0.0, 0.5));
    priors.set_feature(2, Prior::gaussian(0.1, 2.0));
    priors.set_class(1, Prior::laplace_lambda(0.0, 2.0).with_theta(Some(0.3)));
    priors.set_coefficient(0, 5, Prior::gaussian(-0.2, 1.0));
    priors
}

#[rstest]
#[case::gravity_every_example(TruncationParams::gravity(0.5, 1), None)]
#[case::gravity_every_third(TruncationParams::gravity(0.5, 3), None)]
#[case::gravity_with_theta(
    TruncationParams { theta: Some(0.05), ..TruncationParams::gravity(1.0, 2) },
    None
)]
#[case::global_gaussian(
    TruncationParams { period: 4, ..Default::default() },
    Some(PriorSet::uniform(Prior::gaussian(0.0, 1.0)))
)]
#[case::global_laplace(
    TruncationParams { period: 5, ..Default::default() },
    Some(PriorSet::uniform(Prior::laplace_lambda(0.0, 1.5)))
)]
#[case::scoped(TruncationParams { period: 2, ..Default::default() }, Some(scoped_priors()))]
fn lazy_truncation_matches_eager(
    #[case] truncation: TruncationParams,
    #[case] priors: Option<PriorSet>,
) {
    super::init_logging();
    let config = config(truncation, priors);
    let data = synthetic_examples(120, 10, 3);

    let (lazy, eager) = lazy_and_eager(&config, &data);
    assert_eq!(lazy, eager);
}

#[test]
fn closed_form_replay_tracks_exact_replay() {
    let data = synthetic_examples(120, 10, 3);
    let truncation = |replay| TruncationParams {
        replay,
        ..TruncationParams::gravity(0.5, 2)
    };
    let gaussian = || Some(PriorSet::uniform(Prior::gaussian(0.0, 1.0)));

    let (exact, _) = lazy_and_eager(&config(truncation(Replay::Exact), gaussian()), &data);
    let (closed, _) = lazy_and_eager(&config(truncation(Replay::ClosedForm), gaussian()), &data);

    let (BlockState::Sparse { matrix: a, .. }, BlockState::Sparse { matrix: b, .. }) =
        (exact, closed)
    else {
        panic!("expected sparse states");
    };
    assert_matrix_approx_eq(&b, &a, 1e-9);
}

#[test]
fn strong_gravity_keeps_model_sparse() {
    let data = synthetic_examples(200, 40, 3);
    let free = config(TruncationParams::default(), None);
    let shrunk = config(TruncationParams::gravity(2.0, 1), None);

    let (BlockState::Sparse { matrix: dense, .. }, _) = lazy_and_eager(&free, &data) else {
        panic!("expected sparse state");
    };
    let (BlockState::Sparse { matrix: sparse, .. }, _) = lazy_and_eager(&shrunk, &data) else {
        panic!("expected sparse state");
    };
    assert!(sparse.nz_count() < dense.nz_count());
    assert!(sparse.l1_norm() < dense.l1_norm());
}

#[test]
fn scoring_sees_owed_truncation() {
    let config = config(TruncationParams::gravity(0.5, 1), None);
    let data = synthetic_examples(60, 10, 3);
    let mut block = TruncatedGradientBlock::new(&config, 3).unwrap();
    for ex in &data {
        block.absorb_example(ex, 0).unwrap();
    }

    let probe = Example::unlabeled([(1, 1.0), (4, 0.5), (7, 2.0)]).unwrap();
    let before = block.score(&probe).unwrap();
    block.finish_absorb();
    assert_slice_approx_eq(&block.score(&probe).unwrap(), &before, 1e-15, "flushed");
}
