//! Token counting with a self-correcting estimate.
//!
//! Exact counts need a full encode. When that is too slow, callers estimate
//! with a cheap heuristic and scale it by the running mean of
//! `actual / estimated` ratios observed so far.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::tokenizer::{AllowedSpecial, Tokenizer, TokenizerError};

#[derive(Debug, Clone, Copy, Default)]
struct DeviationState {
    count: u64,
    mean: f64,
}

/// Running arithmetic mean of observed ratios.
///
/// Readers share the lock; updates are exclusive.
#[derive(Debug)]
pub struct Deviation {
    name: String,
    state: RwLock<DeviationState>,
}

impl Deviation {
    /// Start with no observations and a mean of 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(DeviationState::default()),
        }
    }

    /// Start from one seeded observation of `mean`.
    pub fn with_initial_mean(name: impl Into<String>, mean: f64) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(DeviationState { count: 1, mean }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current mean.
    pub fn get(&self) -> f64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).mean
    }

    /// Number of observations, including a seeded one.
    pub fn observations(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).count
    }

    /// Fold one observation into the mean.
    pub fn update(&self, value: f64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.count += 1;
        state.mean += (value - state.mean) / state.count as f64;
        log::debug!(
            "deviation [{}] mean: [{:.6}], update with [{:.6}]",
            self.name,
            state.mean,
            value
        );
    }
}

type Estimator = dyn Fn(&str) -> usize + Send + Sync;

/// Counts tokens exactly and corrects cheap estimates.
pub struct TokenCounter {
    tokenizer: Arc<Tokenizer>,
    deviation: Deviation,
    estimator: Box<Estimator>,
}

impl TokenCounter {
    /// Counter with no observations yet (`correct` returns 0 until updated).
    pub fn new(name: impl Into<String>, tokenizer: Arc<Tokenizer>) -> Self {
        Self::from_deviation(tokenizer, Deviation::new(name))
    }

    /// Counter seeded with one observation of `mean`.
    pub fn with_initial_mean(name: impl Into<String>, tokenizer: Arc<Tokenizer>, mean: f64) -> Self {
        Self::from_deviation(tokenizer, Deviation::with_initial_mean(name, mean))
    }

    fn from_deviation(tokenizer: Arc<Tokenizer>, deviation: Deviation) -> Self {
        Self {
            tokenizer,
            deviation,
            estimator: Box::new(|text: &str| text.chars().count()),
        }
    }

    /// Replace the heuristic used by [`estimate`](Self::estimate).
    /// The default counts characters.
    pub fn with_estimator<F>(mut self, estimator: F) -> Self
    where
        F: Fn(&str) -> usize + Send + Sync + 'static,
    {
        self.estimator = Box::new(estimator);
        self
    }

    /// Exact token count: a full encode with every special token recognised.
    pub fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.tokenizer.encode(text, AllowedSpecial::All)?.len())
    }

    /// Scale an estimated count by the current mean, rounding down.
    pub fn correct(&self, count: usize) -> usize {
        (count as f64 * self.mean()).floor() as usize
    }

    /// Corrected heuristic count for `text`.
    pub fn estimate(&self, text: &str) -> usize {
        self.correct((self.estimator)(text))
    }

    /// Record that an estimate of `estimated` turned out to be `actual`.
    ///
    /// An `estimated` of zero carries no ratio and is ignored.
    pub fn update(&self, actual: usize, estimated: usize) {
        if estimated == 0 {
            log::debug!(
                "deviation [{}] skipped update with zero estimate",
                self.deviation.name()
            );
            return;
        }
        self.deviation.update(actual as f64 / estimated as f64);
    }

    /// Current correction factor.
    pub fn mean(&self) -> f64 {
        self.deviation.get()
    }

    /// Observations folded into the mean so far.
    pub fn observations(&self) -> u64 {
        self.deviation.observations()
    }

    pub fn deviation(&self) -> &Deviation {
        &self.deviation
    }

    pub fn tokenizer(&self) -> &Arc<Tokenizer> {
        &self.tokenizer
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("deviation", &self.deviation)
            .finish_non_exhaustive()
    }
}
