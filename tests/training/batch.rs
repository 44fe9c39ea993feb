//! Batch refinement tests.
//!
//! The reference optimum is found independently by plain fixed-step gradient
//! ascent on a dense weight array.

use approx::assert_abs_diff_eq;
use plrm::data::Example;
use plrm::model::{Algorithm, LearnerConfig};
use plrm::repr::SparseCoefficientMatrix;
use plrm::testing::{assert_matrix_approx_eq, synthetic_examples, toy_examples};
use plrm::training::{
    AsdOptimizer, AsdParams, BlockState, Learner, LearnerError, Prior, PriorSet, StepSizeMode,
    Termination,
};

const N_FEATURES: usize = 3;
const N_CLASSES: usize = 2;

type Dense = [[f64; N_CLASSES]; N_FEATURES];

fn tight() -> AsdParams {
    AsdParams {
        epsilon: 1e-13,
        gradient_epsilon: 1e-12,
        max_iterations: 5000,
        ..Default::default()
    }
}

fn probabilities(w: &Dense, ex: &Example) -> [f64; N_CLASSES] {
    let mut s = [0.0; N_CLASSES];
    for &(f, x) in ex.features() {
        for k in 0..N_CLASSES {
            s[k] += w[f][k] * x;
        }
    }
    let max = s.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let z: f64 = s.iter().map(|v| (v - max).exp()).sum();
    s.map(|v| (v - max).exp() / z)
}

/// Mean log-likelihood and its gradient, without any penalty.
fn data_term(w: &Dense, data: &[Example]) -> (f64, Dense) {
    let n: f64 = data.iter().map(|ex| ex.multiplicity() as f64).sum();
    let mut total = 0.0;
    let mut grad = [[0.0; N_CLASSES]; N_FEATURES];
    for ex in data {
        let y = ex.label(0).unwrap();
        let m = ex.multiplicity() as f64;
        let p = probabilities(w, ex);
        total += m * p[y].ln();
        for &(f, x) in ex.features() {
            for k in 0..N_CLASSES {
                let r = (if k == y { 1.0 } else { 0.0 }) - p[k];
                grad[f][k] += m * r * x / n;
            }
        }
    }
    (total / n, grad)
}

fn gaussian_objective(w: &Dense, data: &[Example], variance: f64) -> f64 {
    let penalty: f64 = w.iter().flatten().map(|b| b * b).sum::<f64>() / (2.0 * variance);
    data_term(w, data).0 - penalty
}

/// Fixed-step ascent on the Gaussian-penalized objective.
fn brute_force_gaussian(data: &[Example], variance: f64) -> Dense {
    let mut w = [[0.0; N_CLASSES]; N_FEATURES];
    for _ in 0..20_000 {
        let (_, g) = data_term(&w, data);
        for f in 0..N_FEATURES {
            for k in 0..N_CLASSES {
                w[f][k] += 0.2 * (g[f][k] - w[f][k] / variance);
            }
        }
    }
    w
}

fn to_dense(matrix: &SparseCoefficientMatrix) -> Dense {
    let mut w = [[0.0; N_CLASSES]; N_FEATURES];
    for (f, row) in w.iter_mut().enumerate() {
        for (k, b) in row.iter_mut().enumerate() {
            *b = matrix.get(f, k);
        }
    }
    w
}

fn assert_non_decreasing(history: &[f64]) {
    for (i, pair) in history.windows(2).enumerate() {
        assert!(
            pair[1] >= pair[0] - 1e-12,
            "L decreased at evaluation {}: {} -> {}",
            i + 1,
            pair[0],
            pair[1]
        );
    }
}

/// Three examples, two classes, Gaussian prior of variance 1.
#[test]
fn gaussian_refinement_reaches_optimum() {
    super::init_logging();
    let data = toy_examples();
    let priors = PriorSet::uniform(Prior::gaussian(0.0, 1.0));
    let optimizer = AsdOptimizer::new(tight(), Some(&priors), 0.0).unwrap();

    let mut matrix = SparseCoefficientMatrix::new();
    let outcome = optimizer.optimize(&mut matrix, N_CLASSES, &data, 0).unwrap();
    assert_ne!(outcome.termination, Termination::NoExamples);
    assert_non_decreasing(&outcome.history);

    let reference = brute_force_gaussian(&data, 1.0);
    let optimum = gaussian_objective(&reference, &data, 1.0);
    assert_abs_diff_eq!(outcome.loglik, optimum, epsilon = 1e-9);
    assert_abs_diff_eq!(
        optimizer.log_likelihood(&matrix, N_CLASSES, &data, 0).unwrap(),
        outcome.loglik,
        epsilon = 1e-12
    );

    let found = to_dense(&matrix);
    for f in 0..N_FEATURES {
        for k in 0..N_CLASSES {
            assert_abs_diff_eq!(found[f][k], reference[f][k], epsilon = 1e-4);
        }
    }
}

#[test]
fn adaptive_step_reaches_same_optimum() {
    let data = toy_examples();
    let priors = PriorSet::uniform(Prior::gaussian(0.0, 1.0));
    let params = AsdParams {
        step_size: StepSizeMode::Adaptive,
        ..tight()
    };
    let optimizer = AsdOptimizer::new(params, Some(&priors), 0.0).unwrap();
    assert_eq!(optimizer.step_size(), StepSizeMode::Adaptive);

    let mut matrix = SparseCoefficientMatrix::new();
    let outcome = optimizer.optimize(&mut matrix, N_CLASSES, &data, 0).unwrap();
    assert_non_decreasing(&outcome.history);

    let reference = brute_force_gaussian(&data, 1.0);
    assert_abs_diff_eq!(
        outcome.loglik,
        gaussian_objective(&reference, &data, 1.0),
        epsilon = 1e-9
    );
}

#[test]
fn refinement_without_bonus_steps_reaches_optimum() {
    let data = toy_examples();
    let priors = PriorSet::uniform(Prior::gaussian(0.0, 1.0));
    let params = AsdParams {
        bonus_steps: false,
        ..tight()
    };
    let optimizer = AsdOptimizer::new(params, Some(&priors), 0.0).unwrap();

    let mut matrix = SparseCoefficientMatrix::new();
    let outcome = optimizer.optimize(&mut matrix, N_CLASSES, &data, 0).unwrap();
    assert_ne!(outcome.termination, Termination::MaxIterations);
    assert_non_decreasing(&outcome.history);

    let reference = brute_force_gaussian(&data, 1.0);
    assert_abs_diff_eq!(
        outcome.loglik,
        gaussian_objective(&reference, &data, 1.0),
        epsilon = 1e-9
    );
    let found = to_dense(&matrix);
    for f in 0..N_FEATURES {
        for k in 0..N_CLASSES {
            assert_abs_diff_eq!(found[f][k], reference[f][k], epsilon = 1e-4);
        }
    }
}

/// Unpenalized separable data keeps improving along the gradient, so a cap of
/// one bonus step is hit on every iteration.
#[test]
fn bonus_step_cap_is_not_fatal() {
    super::init_logging();
    let data = vec![
        Example::labeled([(1, 1.0)], 0).unwrap(),
        Example::labeled([(2, 1.0)], 1).unwrap(),
    ];
    let params = AsdParams {
        max_bonus_steps: 1,
        max_iterations: 40,
        ..Default::default()
    };
    let optimizer = AsdOptimizer::new(params, None, 0.0).unwrap();

    let mut matrix = SparseCoefficientMatrix::new();
    let outcome = optimizer.optimize(&mut matrix, N_CLASSES, &data, 0).unwrap();
    assert!(outcome.iterations > 0);
    assert_non_decreasing(&outcome.history);
    assert!(outcome.loglik > 0.5f64.ln());
    assert!(matrix.get(1, 0) > 0.0 && matrix.get(2, 1) > 0.0);
}

#[test]
fn multiplicity_matches_repeated_examples() {
    let toy = toy_examples();
    let repeated = vec![toy[0].clone(), toy[0].clone(), toy[1].clone(), toy[2].clone()];
    let weighted = vec![
        toy[0].clone().with_multiplicity(2).unwrap(),
        toy[1].clone(),
        toy[2].clone(),
    ];

    let priors = PriorSet::uniform(Prior::gaussian(0.0, 2.0));
    let optimizer = AsdOptimizer::new(tight(), Some(&priors), 0.0).unwrap();

    let mut a = SparseCoefficientMatrix::new();
    let mut b = SparseCoefficientMatrix::new();
    let ra = optimizer.optimize(&mut a, N_CLASSES, &repeated, 0).unwrap();
    let rb = optimizer.optimize(&mut b, N_CLASSES, &weighted, 0).unwrap();

    assert_abs_diff_eq!(ra.loglik, rb.loglik, epsilon = 1e-10);
    assert_matrix_approx_eq(&a, &b, 1e-5);
}

/// Laplace optimum satisfies the subgradient conditions: a non-zero
/// coefficient balances `g = λ·sign(b)`, a zero one has `|g| <= λ`.
#[test]
fn laplace_refinement_satisfies_optimality() {
    super::init_logging();
    let data = toy_examples();
    let lambda = 0.1;
    let priors = PriorSet::uniform(Prior::laplace_lambda(0.0, lambda));
    let optimizer = AsdOptimizer::new(tight(), Some(&priors), 0.0).unwrap();

    let mut matrix = SparseCoefficientMatrix::new();
    let outcome = optimizer.optimize(&mut matrix, N_CLASSES, &data, 0).unwrap();
    assert_non_decreasing(&outcome.history);

    let w = to_dense(&matrix);
    let (_, g) = data_term(&w, &data);
    for f in 0..N_FEATURES {
        for k in 0..N_CLASSES {
            let b = w[f][k];
            if b == 0.0 {
                assert!(g[f][k].abs() <= lambda + 1e-4, "w[{f}][{k}] = 0 but g = {}", g[f][k]);
            } else {
                assert_abs_diff_eq!(g[f][k], lambda * b.signum(), epsilon = 1e-4);
            }
        }
    }
}

#[test]
fn strong_laplace_prior_zeroes_everything() {
    let data = toy_examples();
    let priors = PriorSet::uniform(Prior::laplace_lambda(0.0, 10.0));
    let optimizer = AsdOptimizer::new(tight(), Some(&priors), 0.0).unwrap();

    let mut matrix = SparseCoefficientMatrix::new();
    let outcome = optimizer.optimize(&mut matrix, N_CLASSES, &data, 0).unwrap();
    assert_eq!(outcome.termination, Termination::ZeroGradient);
    assert_eq!(matrix.n_rows(), 0);
    assert_abs_diff_eq!(outcome.loglik, 0.5f64.ln(), epsilon = 1e-12);
}

#[test]
fn task_without_labels_is_a_no_op() {
    let data = vec![Example::new([(1, 1.0)], vec![Some(0), None]).unwrap()];
    let optimizer = AsdOptimizer::new(AsdParams::default(), None, 0.0).unwrap();
    let mut matrix = SparseCoefficientMatrix::new();
    let outcome = optimizer.optimize(&mut matrix, N_CLASSES, &data, 1).unwrap();
    assert_eq!(outcome.termination, Termination::NoExamples);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(matrix.n_rows(), 0);
}

#[test]
fn learner_refines_after_online_pass() {
    super::init_logging();
    let data = synthetic_examples(80, 6, 3);
    let priors = PriorSet::uniform(Prior::gaussian(0.0, 4.0));
    let config = LearnerConfig::builder().priors(priors.clone()).build().unwrap();
    let mut learner = Learner::new(config);
    learner.create_block(0, 3).unwrap();
    learner.absorb(&data).unwrap();

    let BlockState::Sparse { matrix, .. } = learner.export_state(0).unwrap() else {
        panic!("expected sparse state");
    };
    let optimizer = AsdOptimizer::new(AsdParams::default(), Some(&priors), 0.0).unwrap();
    let online = optimizer.log_likelihood(&matrix, 3, &data, 0).unwrap();

    let outcome = learner.refine(0, &data, AsdParams::default()).unwrap();
    assert!(outcome.loglik >= online, "{} < {online}", outcome.loglik);
    assert_non_decreasing(&outcome.history);
}

#[test]
fn exponentiated_gradient_has_no_batch_mode() {
    let config = LearnerConfig::builder()
        .algorithm(Algorithm::ExponentiatedGradient { scale: 1.0 })
        .build()
        .unwrap();
    let mut learner = Learner::new(config);
    learner.create_block(0, 2).unwrap();
    assert_eq!(
        learner.refine(0, &toy_examples(), AsdParams::default()).unwrap_err(),
        LearnerError::BatchUnsupported
    );
}
