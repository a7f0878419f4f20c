use std::collections::HashMap;

use nalgebra::DMatrix;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algorithm::combination::enumerate_combinations;
use crate::algorithm::probability::assign_probabilities;
use crate::chemistry::compound::LabeledCompound;
use crate::chemistry::constants::{PROBABILITY_EPSILON, VALIDATION_TOLERANCE};
use crate::chemistry::elements::IsotopeTable;
use crate::data::measurement::MeasurementVector;
use crate::data::purity::TracerPurity;
use crate::error::CorrectionError;

/// Knobs of one correction call.
#[derive(Clone, Debug, Default)]
pub struct CorrectionOptions {
    /// Apply natural abundance to the unlabeled tracer-element atoms.
    pub natural_abundance_on_tracer: bool,
    /// Tracer reagent purity; triggers the purity expansion and the
    /// triangularization pass of the solver.
    pub purity: Option<TracerPurity>,
    /// Expected corrected intensities in measurement-entry order, checked
    /// against every corrected column; deviations above the tolerance are
    /// reported as warnings.
    pub expected: Option<Vec<f64>>,
}

/// Output of one corrected experiment column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrectionResult {
    /// Corrected intensities in measurement-entry order, negative values
    /// clipped to zero and anchored to the measured M+0 intensity.
    pub corrected: Vec<f64>,
    /// `corrected / sum(corrected)`; an all-zero vector stays all-zero.
    pub normalized: Vec<f64>,
    /// The `(N, n)` key of every row of `corrected`.
    pub row_keys: Vec<(u16, u16)>,
    /// The assembled correction matrix in the same row/column order.
    pub matrix: Vec<Vec<f64>>,
    pub is_isotopologue: bool,
    /// Mean tracer enrichment; only meaningful for isotopologues and
    /// reported as 0 otherwise.
    pub mean_enrichment: f64,
    /// Element-wise absolute deviation from the expected intensities, when
    /// expected values were supplied.
    pub deviations: Option<Vec<f64>>,
}

/// Everything in solver row order, before mapping back to the caller's
/// entry order.
struct SolvedColumn {
    corrected: Vec<f64>,
    normalized: Vec<f64>,
    mean_enrichment: f64,
}

/// The assembled correction operator for one compound. Building the
/// engine runs enumeration, probability assignment, matrix assembly and
/// (with purity in play) the triangularization; applying it to a measured
/// column only runs the recorded row operations and a forward
/// substitution, so many experiment columns can share one engine.
pub struct CorrectionEngine {
    matrix: DMatrix<f64>,
    reduced: DMatrix<f64>,
    row_ops: Vec<(usize, usize, f64)>,
    keys: Vec<(u16, u16)>,
    is_isotopologue: bool,
}

impl CorrectionEngine {
    pub fn build(
        table: &IsotopeTable,
        compound: &LabeledCompound,
        options: &CorrectionOptions,
    ) -> Result<Self, CorrectionError> {
        compound.validate(table)?;
        if let Some(purity) = &options.purity {
            purity.validate(table, &compound.tracer)?;
        }

        let mut set = enumerate_combinations(
            table,
            compound,
            options.natural_abundance_on_tracer,
            options.purity.as_ref(),
        )?;
        assign_probabilities(&mut set);

        let keys = set.tracer_pairs.clone();
        let size = keys.len();
        let index: HashMap<(u32, u32), usize> = keys
            .iter()
            .enumerate()
            .map(|(row, &(m, n))| {
                (
                    (m as u32 * set.tracer_delta, n as u32 * set.tracer_delta),
                    row,
                )
            })
            .collect();

        let mut matrix = DMatrix::<f64>::zeros(size, size);
        let tracer_index = set.slots.len() - 1;
        for record in &set.records {
            // a bucket between measured peaks has no row and its
            // probability is dropped
            let Some(&row) = index.get(&record.mass) else {
                continue;
            };
            let (m, n) = record.slots[tracer_index];
            let column_key = (m as u32 * set.tracer_delta, n as u32 * set.tracer_delta);
            let Some(&column) = index.get(&column_key) else {
                continue;
            };
            // negligible contributions are dropped off the diagonal only
            if row != column && record.probability < PROBABILITY_EPSILON {
                continue;
            }
            matrix[(row, column)] += record.probability;
        }
        debug!(
            records = set.records.len(),
            size, "assembled correction matrix"
        );

        // purity expansion can land probability above the diagonal;
        // eliminate those entries right to left so the solve below is a
        // plain forward substitution
        let mut reduced = matrix.clone();
        let mut row_ops = Vec::new();
        for pivot_row in (1..size).rev() {
            for row in 0..pivot_row {
                if reduced[(row, pivot_row)] == 0.0 {
                    continue;
                }
                let pivot = reduced[(pivot_row, pivot_row)];
                if pivot == 0.0 {
                    return Err(CorrectionError::ZeroPivot(pivot_row));
                }
                let factor = reduced[(row, pivot_row)] / pivot;
                for column in 0..=pivot_row {
                    let update = factor * reduced[(pivot_row, column)];
                    reduced[(row, column)] -= update;
                }
                reduced[(row, pivot_row)] = 0.0;
                row_ops.push((row, pivot_row, factor));
            }
        }

        Ok(CorrectionEngine {
            matrix,
            reduced,
            row_ops,
            keys,
            is_isotopologue: compound.is_isotopologue(),
        })
    }

    /// Tracer `(N, n)` keys in solver row order.
    pub fn keys(&self) -> &[(u16, u16)] {
        &self.keys
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn is_isotopologue(&self) -> bool {
        self.is_isotopologue
    }

    /// Map measurement entries onto solver rows; fails unless the entry
    /// key set equals the tracer pair set.
    fn order_rows(&self, measurements: &MeasurementVector) -> Result<Vec<usize>, CorrectionError> {
        if measurements.entries.len() != self.keys.len() {
            return Err(CorrectionError::MeasurementKeyMismatch {
                reason: format!(
                    "{} entries, expected {}",
                    measurements.entries.len(),
                    self.keys.len()
                ),
            });
        }
        let rows: HashMap<(u16, u16), usize> = self
            .keys
            .iter()
            .enumerate()
            .map(|(row, &key)| (key, row))
            .collect();
        measurements
            .entries
            .iter()
            .map(|entry| {
                rows.get(&(entry.n_precursor, entry.n_fragment))
                    .copied()
                    .ok_or_else(|| CorrectionError::MeasurementKeyMismatch {
                        reason: format!(
                            "key ({}, {}) is not a valid tracer pair",
                            entry.n_precursor, entry.n_fragment
                        ),
                    })
            })
            .collect()
    }

    /// Solve for one measured column given in solver row order.
    fn solve(&self, measured: &[f64]) -> Result<SolvedColumn, CorrectionError> {
        let size = self.keys.len();

        let mut b = measured.to_vec();
        for &(row, pivot_row, factor) in &self.row_ops {
            b[row] -= factor * b[pivot_row];
        }

        // forward substitution; negative intensities are clipped as they
        // appear so they cannot back-feed into later rows
        let mut corrected = Vec::with_capacity(size);
        for row in 0..size {
            let mut value = b[row];
            for column in 0..row {
                value -= self.reduced[(row, column)] * corrected[column];
            }
            let pivot = self.reduced[(row, row)];
            if pivot == 0.0 {
                return Err(CorrectionError::ZeroPivot(row));
            }
            corrected.push((value / pivot).max(0.0));
        }

        // anchor the corrected vector to the measured monoisotopic peak
        if corrected[0] > 0.0 {
            let scale = measured[0] / corrected[0];
            for value in corrected.iter_mut() {
                *value *= scale;
            }
        }

        let mut total: f64 = corrected.iter().sum();
        if total == 0.0 {
            warn!("corrected intensities sum to zero, skipping normalization");
            total = 1.0;
        }
        let normalized: Vec<f64> = corrected.iter().map(|value| value / total).collect();

        let mean_enrichment = if !self.is_isotopologue {
            warn!("mean enrichment is not meaningful for a fragmented compound, reporting 0");
            0.0
        } else if size > 1 {
            let weighted: f64 = self
                .keys
                .iter()
                .zip(normalized.iter())
                .map(|(&(m, _), &value)| m as f64 * value)
                .sum();
            weighted / (size as f64 - 1.0)
        } else {
            0.0
        };

        Ok(SolvedColumn {
            corrected,
            normalized,
            mean_enrichment,
        })
    }

    /// Solve one column and map the outputs back to the caller's entry
    /// order.
    fn solve_column(
        &self,
        order: &[usize],
        keys: &[(u16, u16)],
        values: &[f64],
        expected: Option<&[f64]>,
    ) -> Result<CorrectionResult, CorrectionError> {
        let mut measured = vec![0.0; order.len()];
        for (entry, &row) in order.iter().enumerate() {
            measured[row] = values[entry];
        }

        let solved = self.solve(&measured)?;

        let corrected: Vec<f64> = order.iter().map(|&row| solved.corrected[row]).collect();
        let normalized: Vec<f64> = order.iter().map(|&row| solved.normalized[row]).collect();
        let matrix: Vec<Vec<f64>> = order
            .iter()
            .map(|&row| order.iter().map(|&col| self.matrix[(row, col)]).collect())
            .collect();

        let deviations = expected.map(|expected| validate_expected(&corrected, expected));

        Ok(CorrectionResult {
            corrected,
            normalized,
            row_keys: keys.to_vec(),
            matrix,
            is_isotopologue: self.is_isotopologue,
            mean_enrichment: solved.mean_enrichment,
            deviations,
        })
    }
}

/// Element-wise absolute deviation between corrected and expected values;
/// deviations above [`VALIDATION_TOLERANCE`] are reported as warnings,
/// never as errors.
fn validate_expected(corrected: &[f64], expected: &[f64]) -> Vec<f64> {
    if corrected.len() != expected.len() {
        warn!(
            real = corrected.len(),
            expected = expected.len(),
            "expected vector length does not match, skipping validation"
        );
        return Vec::new();
    }
    corrected
        .iter()
        .zip(expected.iter())
        .map(|(&value, &reference)| {
            let deviation = (value - reference).abs();
            if deviation > VALIDATION_TOLERANCE {
                warn!(
                    corrected = value,
                    expected = reference,
                    "corrected intensity deviates from the expected value"
                );
            }
            deviation
        })
        .collect()
}

/// Correct the first experiment column of a measurement vector.
///
/// This is the single-shot entry point: it builds the correction operator
/// for the compound, checks the measurement keys against the tracer pair
/// set, solves, and post-processes. Results come back in the measurement
/// entry order.
pub fn correct(
    table: &IsotopeTable,
    compound: &LabeledCompound,
    measurements: &MeasurementVector,
    options: &CorrectionOptions,
) -> Result<CorrectionResult, CorrectionError> {
    let engine = CorrectionEngine::build(table, compound, options)?;
    let order = engine.order_rows(measurements)?;
    engine.solve_column(
        &order,
        &measurements.keys(),
        &measurements.column(0),
        options.expected.as_deref(),
    )
}

/// Correct every experiment column of a measurement vector sequentially.
pub fn correct_all(
    table: &IsotopeTable,
    compound: &LabeledCompound,
    measurements: &MeasurementVector,
    options: &CorrectionOptions,
) -> Result<Vec<CorrectionResult>, CorrectionError> {
    let engine = CorrectionEngine::build(table, compound, options)?;
    let order = engine.order_rows(measurements)?;
    let keys = measurements.keys();
    (0..measurements.column_count())
        .map(|column| {
            engine.solve_column(
                &order,
                &keys,
                &measurements.column(column),
                options.expected.as_deref(),
            )
        })
        .collect()
}

/// Correct every experiment column in parallel. The engine is built once;
/// only the per-column solves fan out.
pub fn correct_batch(
    table: &IsotopeTable,
    compound: &LabeledCompound,
    measurements: &MeasurementVector,
    options: &CorrectionOptions,
    num_threads: usize,
) -> Result<Vec<CorrectionResult>, CorrectionError> {
    let engine = CorrectionEngine::build(table, compound, options)?;
    let order = engine.order_rows(measurements)?;
    let keys = measurements.keys();
    let columns: Vec<Vec<f64>> = (0..measurements.column_count())
        .map(|column| measurements.column(column))
        .collect();

    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(CorrectionError::custom)?;
    pool.install(|| {
        columns
            .par_iter()
            .map(|values| {
                engine.solve_column(&order, &keys, values, options.expected.as_deref())
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::compound::{CompoundSide, TracerSpec};

    fn engine_for(
        tracer_atoms: u32,
        formula: &str,
        options: &CorrectionOptions,
    ) -> CorrectionEngine {
        let table = IsotopeTable::natural();
        let side = CompoundSide::from_formula(tracer_atoms, formula).unwrap();
        let compound = LabeledCompound::new("X", TracerSpec::new(13, "C"), side.clone(), side);
        CorrectionEngine::build(&table, &compound, options).unwrap()
    }

    #[test]
    fn test_identity_matrix_for_inert_elements() {
        // phosphorus has a single isotope; with no other elements the
        // correction matrix is the identity
        let engine = engine_for(2, "P3", &CorrectionOptions::default());
        let matrix = engine.matrix();
        assert_eq!(matrix.nrows(), 3);
        for row in 0..3 {
            for column in 0..3 {
                let expected = if row == column { 1.0 } else { 0.0 };
                assert!((matrix[(row, column)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_matrix_is_lower_triangular_without_purity() {
        let engine = engine_for(6, "H12O6", &CorrectionOptions::default());
        let matrix = engine.matrix();
        assert_eq!(matrix.nrows(), 7);
        for row in 0..7 {
            assert!(matrix[(row, row)] > 0.0);
            for column in (row + 1)..7 {
                assert_eq!(matrix[(row, column)], 0.0);
            }
        }
    }

    #[test]
    fn test_forward_substitution_matches_hand_solve() {
        // [1, 0; 0.5, 1] x = [2, 3]  =>  x = [2, 2]
        let engine = CorrectionEngine {
            matrix: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 1.0]),
            reduced: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 1.0]),
            row_ops: Vec::new(),
            keys: vec![(0, 0), (1, 1)],
            is_isotopologue: true,
        };
        let solved = engine.solve(&[2.0, 3.0]).unwrap();
        assert!((solved.corrected[0] - 2.0).abs() < 1e-12);
        assert!((solved.corrected[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_pivot_is_fatal() {
        let engine = CorrectionEngine {
            matrix: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 0.0]),
            reduced: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 0.0]),
            row_ops: Vec::new(),
            keys: vec![(0, 0), (1, 1)],
            is_isotopologue: true,
        };
        assert!(matches!(
            engine.solve(&[1.0, 1.0]),
            Err(CorrectionError::ZeroPivot(1))
        ));
    }

    #[test]
    fn test_purity_places_mass_above_the_diagonal() {
        let options = CorrectionOptions {
            purity: Some(TracerPurity::parse_line("C12 C13 : 0.01 0.99").unwrap()),
            ..Default::default()
        };
        let engine = engine_for(3, "H4", &options);
        let matrix = engine.matrix();
        let above: f64 = (0..3)
            .flat_map(|row| ((row + 1)..3).map(move |column| (row, column)))
            .map(|(row, column)| matrix[(row, column)])
            .sum();
        assert!(above > 0.0);
        // triangularization cleared everything above the diagonal
        for row in 0..3 {
            for column in (row + 1)..3 {
                assert_eq!(engine.reduced[(row, column)], 0.0);
            }
        }
    }

    #[test]
    fn test_measurement_key_mismatch_is_fatal() {
        let table = IsotopeTable::natural();
        let side = CompoundSide::from_formula(2, "H2").unwrap();
        let compound = LabeledCompound::new("X", TracerSpec::new(13, "C"), side.clone(), side);
        let measured =
            MeasurementVector::from_single_column(&[(0, 0), (1, 1)], &[1.0, 0.0]).unwrap();
        let result = correct(&table, &compound, &measured, &CorrectionOptions::default());
        assert!(matches!(
            result,
            Err(CorrectionError::MeasurementKeyMismatch { .. })
        ));
    }

    #[test]
    fn test_entry_order_is_preserved() {
        let table = IsotopeTable::natural();
        let side = CompoundSide::from_formula(2, "P2").unwrap();
        let compound = LabeledCompound::new("X", TracerSpec::new(13, "C"), side.clone(), side);
        // entries deliberately out of solver order
        let measured = MeasurementVector::from_single_column(
            &[(2, 2), (0, 0), (1, 1)],
            &[7.0, 5.0, 3.0],
        )
        .unwrap();
        let result = correct(&table, &compound, &measured, &CorrectionOptions::default()).unwrap();
        assert_eq!(result.row_keys, vec![(2, 2), (0, 0), (1, 1)]);
        // identity problem: the corrected vector equals the input in the
        // input's own order
        assert!((result.corrected[0] - 7.0).abs() < 1e-9);
        assert!((result.corrected[1] - 5.0).abs() < 1e-9);
        assert!((result.corrected[2] - 3.0).abs() < 1e-9);
    }
}
