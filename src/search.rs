//! Hyperparameter search over predictor configurations.
//!
//! The search space, the order in which it is explored and the scoring are
//! three separate pieces so each can be swapped without touching the others.

use log::{debug, info, warn};
use ndarray::{ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::neg_mean_squared_error;
use crate::regressor::{
    FittedRegressor, KernelGamma, KernelRidgeRegressor, PredictorSpec, Regressor, RidgeRegressor,
};
use crate::split::k_fold;

/// Which predictor family to train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    #[default]
    Ridge,
    KernelRidge,
}

/// Candidate values per hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSpace {
    pub ridge_alphas: Vec<f64>,
    pub kernel_ridge_alphas: Vec<f64>,
    pub kernel_ridge_gammas: Vec<KernelGamma>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            ridge_alphas: vec![0.01, 0.1, 1.0, 10.0, 100.0],
            kernel_ridge_alphas: vec![0.01, 0.1, 1.0, 10.0],
            kernel_ridge_gammas: vec![
                KernelGamma::Scale,
                KernelGamma::Auto,
                KernelGamma::Value(0.001),
                KernelGamma::Value(0.01),
                KernelGamma::Value(0.1),
                KernelGamma::Value(1.0),
            ],
        }
    }
}

impl ParameterSpace {
    /// Every combination for `kind`, in a fixed order (alphas outermost).
    pub fn candidates(&self, kind: PredictorKind) -> Vec<PredictorSpec> {
        match kind {
            PredictorKind::Ridge => self
                .ridge_alphas
                .iter()
                .map(|&alpha| PredictorSpec::Ridge(RidgeRegressor::new(alpha)))
                .collect(),
            PredictorKind::KernelRidge => self
                .kernel_ridge_alphas
                .iter()
                .flat_map(|&alpha| {
                    self.kernel_ridge_gammas.iter().map(move |&gamma| {
                        PredictorSpec::KernelRidge(KernelRidgeRegressor::new(alpha, gamma))
                    })
                })
                .collect(),
        }
    }
}

/// Order and extent of exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Every candidate.
    #[default]
    Grid,
    /// `n_iter` candidates drawn without replacement with the given seed.
    Random { n_iter: usize },
}

impl SearchStrategy {
    pub fn select(&self, mut candidates: Vec<PredictorSpec>, seed: u64) -> Vec<PredictorSpec> {
        match *self {
            SearchStrategy::Grid => candidates,
            SearchStrategy::Random { n_iter } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                candidates.shuffle(&mut rng);
                candidates.truncate(n_iter.max(1));
                candidates
            }
        }
    }
}

/// K-fold cross validation scored by negative mean squared error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossValidator {
    pub folds: usize,
}

impl CrossValidator {
    pub fn new(folds: usize) -> Self {
        Self { folds }
    }

    /// Mean held-out score of `candidate` over the folds.
    pub fn score<R: Regressor>(
        &self,
        candidate: &R,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
    ) -> PipelineResult<f64> {
        let folds = k_fold(x.nrows(), self.folds)?;
        let mut total = 0.0;
        for fold in &folds {
            let x_train = x.select(Axis(0), &fold.train);
            let y_train = y.select(Axis(0), &fold.train);
            let fitted = candidate.fit(x_train.view(), y_train.view())?;
            let x_test = x.select(Axis(0), &fold.test);
            let y_test = y.select(Axis(0), &fold.test);
            let predicted = fitted.predict(x_test.view())?;
            total += neg_mean_squared_error(y_test.view(), predicted.view());
        }
        Ok(total / folds.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub spec: PredictorSpec,
    pub mean_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: PredictorSpec,
    pub best_score: f64,
    /// Scores in candidate order.
    pub scores: Vec<CandidateScore>,
}

/// Scores every candidate in parallel and keeps the best one (the earliest on ties).
pub fn run_search(
    candidates: &[PredictorSpec],
    evaluator: &CrossValidator,
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
) -> PipelineResult<SearchOutcome> {
    if candidates.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "hyperparameter search has no candidates".to_string(),
        ));
    }
    info!(
        "Evaluating {} candidates with {}-fold cross validation.",
        candidates.len(),
        evaluator.folds
    );
    let scores = candidates
        .par_iter()
        .map(|spec| {
            evaluator.score(spec, x, y).map(|mean_score| CandidateScore {
                spec: *spec,
                mean_score,
            })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    for candidate in &scores {
        debug!("{:?}: mean score {:.6}", candidate.spec, candidate.mean_score);
    }
    let best_idx = best_candidate(&scores).ok_or_else(|| {
        PipelineError::NonFinite("every search candidate produced a non-finite score".to_string())
    })?;
    let best = scores[best_idx].clone();
    info!("Best candidate {:?} (score {:.6}).", best.spec, best.mean_score);
    Ok(SearchOutcome {
        best: best.spec,
        best_score: best.mean_score,
        scores,
    })
}

/// Index of the highest finite score, the earliest on ties.
fn best_candidate(scores: &[CandidateScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in scores.iter().enumerate() {
        if !candidate.mean_score.is_finite() {
            warn!("{:?} scored {}; skipping it.", candidate.spec, candidate.mean_score);
            continue;
        }
        match best {
            Some(b) if scores[b].mean_score >= candidate.mean_score => {}
            _ => best = Some(i),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    #[test]
    fn grid_enumerates_every_combination() {
        let space = ParameterSpace::default();
        assert_eq!(space.candidates(PredictorKind::Ridge).len(), 5);
        assert_eq!(space.candidates(PredictorKind::KernelRidge).len(), 24);
    }

    #[test]
    fn random_strategy_is_seeded_subset() {
        let all = ParameterSpace::default().candidates(PredictorKind::KernelRidge);
        let strategy = SearchStrategy::Random { n_iter: 5 };
        let a = strategy.select(all.clone(), 3);
        let b = strategy.select(all.clone(), 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.iter().all(|c| all.contains(c)));
        assert_eq!(SearchStrategy::Grid.select(all.clone(), 3), all);
    }

    #[test]
    fn search_prefers_weak_regularisation_on_clean_linear_data() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let x = Array2::random_using((45, 3), Uniform::new(-1.0, 1.0), &mut rng);
        let y = x.dot(&ndarray::array![[1.5], [-2.0], [0.5]]);
        let candidates = vec![
            PredictorSpec::Ridge(RidgeRegressor::new(100.0)),
            PredictorSpec::Ridge(RidgeRegressor::new(0.001)),
            PredictorSpec::Ridge(RidgeRegressor::new(10.0)),
        ];
        let outcome = run_search(&candidates, &CrossValidator::new(3), x.view(), y.view()).unwrap();
        assert_eq!(outcome.best, candidates[1]);
        assert_eq!(outcome.scores.len(), 3);
        assert!(outcome.best_score <= 0.0);
    }

    #[test]
    fn ties_keep_the_first_candidate() {
        let x = Array2::<f64>::zeros((9, 2));
        let y = Array2::<f64>::ones((9, 1));
        let candidates = vec![
            PredictorSpec::Ridge(RidgeRegressor::new(1.0)),
            PredictorSpec::Ridge(RidgeRegressor::new(2.0)),
        ];
        let outcome = run_search(&candidates, &CrossValidator::new(3), x.view(), y.view()).unwrap();
        assert_eq!(outcome.best, candidates[0]);
    }

    #[test]
    fn empty_search_space_is_an_error() {
        let x = Array2::<f64>::zeros((4, 1));
        assert!(run_search(&[], &CrossValidator::new(2), x.view(), x.view()).is_err());
    }

    #[test]
    fn non_finite_scores_never_win() {
        let score = |alpha: f64, mean_score: f64| CandidateScore {
            spec: PredictorSpec::Ridge(RidgeRegressor::new(alpha)),
            mean_score,
        };
        let scores = vec![
            score(1.0, f64::NAN),
            score(2.0, -0.5),
            score(3.0, f64::INFINITY),
            score(4.0, -0.2),
            score(5.0, -0.2),
        ];
        assert_eq!(best_candidate(&scores), Some(3));
        assert_eq!(best_candidate(&scores[..3]), Some(1));
        assert_eq!(best_candidate(&[score(1.0, f64::NAN), score(2.0, f64::NEG_INFINITY)]), None);
    }
}
