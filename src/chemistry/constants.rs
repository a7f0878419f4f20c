/// Tolerance on the per-element abundance sum after renormalization.
pub const ABUNDANCE_SUM_TOLERANCE: f64 = 1e-8;

/// Acceptance window for raw abundance sums before renormalization;
/// published tables occasionally carry a small excess over 1.
pub const ABUNDANCE_LOAD_TOLERANCE: f64 = 1e-2;

/// Probabilities below this threshold are indistinguishable from zero
/// when combinations collapse into measured mass buckets.
pub const PROBABILITY_EPSILON: f64 = 1e-8;

/// Element-wise tolerance when validating corrected intensities against
/// caller-supplied expected values.
pub const VALIDATION_TOLERANCE: f64 = 1.0;

/// Tolerance for the per-element probability-sum diagnostic.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;
