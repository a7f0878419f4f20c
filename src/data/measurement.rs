use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CorrectionError;

/// One measured intensity row: the precursor tracer-mass offset `N`
/// (M+N), the fragment offset `n` (m+n) and one value per experiment
/// column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasuredEntry {
    pub n_precursor: u16,
    pub n_fragment: u16,
    pub values: Vec<f64>,
}

/// The measured intensity vector of one compound, keyed uniquely by
/// `(N, n)`. The key set must match the tracer pair set derived from the
/// compound; the correction entry points enforce this.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MeasurementVector {
    pub entries: Vec<MeasuredEntry>,
}

impl MeasurementVector {
    pub fn new(entries: Vec<MeasuredEntry>) -> Result<Self, CorrectionError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert((entry.n_precursor, entry.n_fragment)) {
                return Err(CorrectionError::MeasurementKeyMismatch {
                    reason: format!(
                        "duplicate key ({}, {})",
                        entry.n_precursor, entry.n_fragment
                    ),
                });
            }
        }
        Ok(MeasurementVector { entries })
    }

    /// Convenience constructor for a single experiment column.
    pub fn from_single_column(
        keys: &[(u16, u16)],
        values: &[f64],
    ) -> Result<Self, CorrectionError> {
        if keys.len() != values.len() {
            return Err(CorrectionError::MeasurementKeyMismatch {
                reason: format!(
                    "{} keys but {} values",
                    keys.len(),
                    values.len()
                ),
            });
        }
        Self::new(
            keys.iter()
                .zip(values.iter())
                .map(|(&(n_precursor, n_fragment), &value)| MeasuredEntry {
                    n_precursor,
                    n_fragment,
                    values: vec![value],
                })
                .collect(),
        )
    }

    /// Parse measurement-table lines. Each line is a prefix followed by
    /// whitespace-separated numeric values; the prefix encodes
    /// `<compound>_<N>_<n>`, or `<compound>_<N>` for isotopologues (then
    /// `n = N`). Missing trailing values default to zero when a column is
    /// extracted.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocorrect::MeasurementVector;
    ///
    /// let lines = ["GLC_0 100.0 90.0", "GLC_1 0.0", "GLC_2"];
    /// let measured = MeasurementVector::parse_lines(&lines, "GLC", true).unwrap();
    /// assert_eq!(measured.entries.len(), 3);
    /// assert_eq!(measured.column(1), vec![90.0, 0.0, 0.0]);
    /// ```
    pub fn parse_lines<I, S>(
        lines: I,
        compound_name: &str,
        isotopologue: bool,
    ) -> Result<Self, CorrectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pattern = if isotopologue {
            Regex::new(r"^(?P<name>.+)_(?P<np>\d+)$")
        } else {
            Regex::new(r"^(?P<name>.+)_(?P<np>\d+)_(?P<nf>\d+)$")
        }
        .map_err(|e| CorrectionError::custom(e))?;

        let mut entries = Vec::new();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |reason: &str| CorrectionError::MalformedLine {
                line: line.to_string(),
                reason: reason.to_string(),
            };

            let mut tokens = line.split_whitespace();
            let prefix = tokens.next().ok_or_else(|| malformed("empty line"))?;
            let captures = pattern
                .captures(prefix)
                .ok_or_else(|| malformed("prefix does not encode a mass offset"))?;
            if &captures["name"] != compound_name {
                return Err(malformed(&format!(
                    "prefix names '{}', expected '{}'",
                    &captures["name"],
                    compound_name
                )));
            }
            let n_precursor = captures["np"]
                .parse::<u16>()
                .map_err(|_| malformed("invalid precursor offset"))?;
            let n_fragment = if isotopologue {
                n_precursor
            } else {
                captures["nf"]
                    .parse::<u16>()
                    .map_err(|_| malformed("invalid fragment offset"))?
            };

            let mut values = Vec::new();
            for token in tokens {
                let value = token
                    .parse::<f64>()
                    .map_err(|_| malformed(&format!("value '{}' is not a number", token)))?;
                values.push(value);
            }
            entries.push(MeasuredEntry {
                n_precursor,
                n_fragment,
                values,
            });
        }
        Self::new(entries)
    }

    pub fn keys(&self) -> Vec<(u16, u16)> {
        self.entries
            .iter()
            .map(|e| (e.n_precursor, e.n_fragment))
            .collect()
    }

    /// Number of experiment columns (the widest row wins; shorter rows
    /// are padded with zeros on extraction).
    pub fn column_count(&self) -> usize {
        self.entries.iter().map(|e| e.values.len()).max().unwrap_or(0)
    }

    /// Extract one experiment column in entry order, defaulting missing
    /// values to zero.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.entries
            .iter()
            .map(|e| e.values.get(index).copied().unwrap_or(0.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragmented_lines() {
        let lines = ["ALA_0_0 10.0 11.0", "ALA_1_0 5.0", "ALA_1_1 2.5 2.0"];
        let measured = MeasurementVector::parse_lines(&lines, "ALA", false).unwrap();
        assert_eq!(
            measured.keys(),
            vec![(0, 0), (1, 0), (1, 1)]
        );
        assert_eq!(measured.column_count(), 2);
        assert_eq!(measured.column(0), vec![10.0, 5.0, 2.5]);
        // missing second value defaults to zero
        assert_eq!(measured.column(1), vec![11.0, 0.0, 2.0]);
    }

    #[test]
    fn test_parse_isotopologue_prefix_sets_fragment_offset() {
        let lines = ["GLC_2 7.0"];
        let measured = MeasurementVector::parse_lines(&lines, "GLC", true).unwrap();
        assert_eq!(measured.keys(), vec![(2, 2)]);
    }

    #[test]
    fn test_parse_rejects_wrong_compound() {
        let lines = ["SER_0_0 1.0"];
        assert!(MeasurementVector::parse_lines(&lines, "GLC", false).is_err());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let lines = ["GLC_1 1.0", "GLC_1 2.0"];
        assert!(MeasurementVector::parse_lines(&lines, "GLC", true).is_err());
    }

    #[test]
    fn test_underscored_compound_names() {
        let lines = ["glc_6p_0_0 3.0", "glc_6p_1_0 1.0"];
        let measured = MeasurementVector::parse_lines(&lines, "glc_6p", false).unwrap();
        assert_eq!(measured.keys(), vec![(0, 0), (1, 0)]);
    }
}
