//! Online training tests.
//!
//! - The single-example scenario on a fresh model
//! - Learning progress of both update rules on a synthetic stream
//! - Multi-task bookkeeping: branching, class growth and deletion

use approx::assert_abs_diff_eq;
use plrm::data::{Example, DUMMY_FEATURE};
use plrm::model::{Algorithm, LearnerConfig};
use plrm::repr::ClassRenumbering;
use plrm::testing::{assert_slice_approx_eq, synthetic_examples, DEFAULT_TOLERANCE};
use plrm::training::{BlockModel, BlockState, Learner, LearnerBlock, Verbosity};

fn mean_loglik(block: &LearnerBlock, data: &[Example]) -> f64 {
    let total: f64 = data
        .iter()
        .map(|ex| {
            let label = ex.label(0).unwrap();
            block.log_score(ex).unwrap()[label]
        })
        .sum();
    total / data.len() as f64
}

/// One feature `x`, classes A and B, one example `x = 1` labeled B.
#[test]
fn single_example_moves_weights_by_half_learning_rate() {
    super::init_logging();
    let mut learner = Learner::new(LearnerConfig::builder().learning_rate(0.1).build().unwrap());
    learner.create_block(0, 2).unwrap();

    let x = 1;
    let ex = Example::labeled([(x, 1.0)], 1).unwrap();
    assert_slice_approx_eq(&learner.score(0, &ex).unwrap(), &[0.5, 0.5], DEFAULT_TOLERANCE, "initial");

    learner.absorb(std::slice::from_ref(&ex)).unwrap();

    let BlockState::Sparse { matrix, .. } = learner.export_state(0).unwrap() else {
        panic!("expected sparse state");
    };
    assert_abs_diff_eq!(matrix.get(x, 0), -0.05, epsilon = 1e-15);
    assert_abs_diff_eq!(matrix.get(x, 1), 0.05, epsilon = 1e-15);
    assert_abs_diff_eq!(matrix.get(DUMMY_FEATURE, 1), 0.05, epsilon = 1e-15);
}

#[test]
fn truncated_gradient_learns_synthetic_stream() {
    super::init_logging();
    let data = synthetic_examples(300, 12, 3);
    let config = LearnerConfig::builder()
        .learning_rate(0.1)
        .verbosity(Verbosity::Info)
        .build()
        .unwrap();
    let mut block = LearnerBlock::new(&config, 3).unwrap();

    let before = mean_loglik(&block, &data);
    assert_abs_diff_eq!(before, (1.0f64 / 3.0).ln(), epsilon = 1e-12);

    for _ in 0..3 {
        assert_eq!(block.absorb(&data, 0).unwrap(), data.len());
    }
    let after = mean_loglik(&block, &data);
    assert!(after > before, "L did not improve: {before} -> {after}");
}

#[test]
fn exponentiated_gradient_learns_synthetic_stream() {
    super::init_logging();
    let data = synthetic_examples(300, 12, 3);
    let config = LearnerConfig::builder()
        .algorithm(Algorithm::ExponentiatedGradient { scale: 5.0 })
        .learning_rate(0.1)
        .build()
        .unwrap();
    let mut block = LearnerBlock::new(&config, 3).unwrap();

    let before = mean_loglik(&block, &data);
    for _ in 0..3 {
        block.absorb(&data, 0).unwrap();
    }
    let after = mean_loglik(&block, &data);
    assert!(after > before, "L did not improve: {before} -> {after}");

    let BlockState::Dual { positive, negative, .. } = block.export_state() else {
        panic!("expected dual state");
    };
    assert!(positive.iter_rows().all(|(_, row)| row.iter().all(|&v| v >= 0.0)));
    assert!(negative.iter_rows().all(|(_, row)| row.iter().all(|&v| v >= 0.0)));
}

#[test]
fn scores_are_distributions() {
    let data = synthetic_examples(50, 8, 4);
    for algorithm in [
        Algorithm::TruncatedGradient,
        Algorithm::ExponentiatedGradient { scale: 2.0 },
    ] {
        let config = LearnerConfig::builder().algorithm(algorithm).build().unwrap();
        let mut block = LearnerBlock::new(&config, 4).unwrap();
        block.absorb(&data, 0).unwrap();
        for ex in &data {
            let p = block.score(ex).unwrap();
            assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            let lp = block.log_score(ex).unwrap();
            for (a, b) in p.iter().zip(&lp) {
                assert_abs_diff_eq!(a.ln(), *b, epsilon = 1e-9);
            }
        }
    }
}

#[test]
fn branched_task_inherits_history() {
    let data = synthetic_examples(40, 6, 2);
    let mut learner = Learner::new(LearnerConfig::default());
    learner.create_block(0, 2).unwrap();
    learner.absorb(&data).unwrap();

    learner.branch_block(1, 0).unwrap();
    for ex in data.iter().take(5) {
        assert_eq!(learner.score(0, ex).unwrap(), learner.score(1, ex).unwrap());
    }

    // Only task 0 has labels, so absorbing again moves task 0 alone.
    learner.absorb(&data).unwrap();
    assert_ne!(
        learner.export_state(0).unwrap(),
        learner.export_state(1).unwrap()
    );
}

#[test]
fn class_set_changes_mid_stream() {
    let mut learner = Learner::new(LearnerConfig::default());
    learner.create_block(0, 2).unwrap();
    learner.absorb(&synthetic_examples(30, 5, 2)).unwrap();

    let new_class = learner.add_class(0).unwrap();
    assert_eq!(new_class, 2);
    learner.absorb(&synthetic_examples(30, 5, 3)).unwrap();

    learner
        .renumber_classes(0, &ClassRenumbering::deleting(3, &[0]))
        .unwrap();
    let ex = Example::unlabeled([(1, 1.0), (3, 0.5)]).unwrap();
    let p = learner.score(0, &ex).unwrap();
    assert_eq!(p.len(), 2);
    assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

    let BlockState::Sparse { matrix, n_classes } = learner.export_state(0).unwrap() else {
        panic!("expected sparse state");
    };
    assert_eq!(n_classes, 2);
    assert!(matrix.to_array(2).is_ok());
}
