use serde::{Deserialize, Serialize};

use crate::chemistry::compound::TracerSpec;
use crate::chemistry::constants::ABUNDANCE_SUM_TOLERANCE;
use crate::chemistry::elements::IsotopeTable;
use crate::error::CorrectionError;

/// Isotopic composition of the tracer reagent. A perfect reagent carries
/// fraction 1 on the tracer isotope; anything else spreads labeled
/// positions over the other isotopes of the tracer element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TracerPurity {
    pub fractions: Vec<(String, f64)>,
}

impl TracerPurity {
    pub fn new(fractions: Vec<(String, f64)>) -> Result<Self, CorrectionError> {
        let mut sum = 0.0;
        for (name, fraction) in &fractions {
            if !fraction.is_finite() || *fraction < 0.0 || *fraction > 1.0 {
                return Err(CorrectionError::MalformedPurity(format!(
                    "fraction {} of {} is outside [0, 1]",
                    fraction, name
                )));
            }
            sum += fraction;
        }
        if (sum - 1.0).abs() > ABUNDANCE_SUM_TOLERANCE {
            return Err(CorrectionError::MalformedPurity(format!(
                "fractions sum to {}, expected 1",
                sum
            )));
        }
        Ok(TracerPurity { fractions })
    }

    /// Parse a purity line of the form `"C12 C13 : 0.01 0.99"`.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocorrect::TracerPurity;
    ///
    /// let purity = TracerPurity::parse_line("C12 C13 : 0.01 0.99").unwrap();
    /// assert_eq!(purity.fraction_of("C13"), 0.99);
    /// assert_eq!(purity.fraction_of("C14"), 0.0);
    /// ```
    pub fn parse_line(line: &str) -> Result<Self, CorrectionError> {
        let malformed = |reason: &str| CorrectionError::MalformedLine {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let (names, values) = line.split_once(':').ok_or_else(|| malformed("missing ':'"))?;
        let names: Vec<&str> = names.split_whitespace().collect();
        let values: Vec<&str> = values.split_whitespace().collect();
        if names.len() != values.len() {
            return Err(malformed("isotope and fraction counts differ"));
        }

        let mut fractions = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values.iter()) {
            let fraction = value
                .parse::<f64>()
                .map_err(|_| malformed(&format!("fraction '{}' is not a number", value)))?;
            fractions.push((name.to_string(), fraction));
        }
        Self::new(fractions)
    }

    /// Purity fraction of one isotope; isotopes not listed carry zero.
    pub fn fraction_of(&self, isotope: &str) -> f64 {
        self.fractions
            .iter()
            .find(|(name, _)| name == isotope)
            .map(|(_, fraction)| *fraction)
            .unwrap_or(0.0)
    }

    /// Check the descriptor against the tracer species: every listed
    /// isotope must belong to the tracer element and the tracer isotope
    /// itself must appear.
    pub fn validate(
        &self,
        table: &IsotopeTable,
        tracer: &TracerSpec,
    ) -> Result<(), CorrectionError> {
        for (name, _) in &self.fractions {
            let (element, _) = table.find_isotope(name)?;
            if element.symbol != tracer.element {
                return Err(CorrectionError::MalformedPurity(format!(
                    "isotope {} does not belong to tracer element {}",
                    name, tracer.element
                )));
            }
        }
        if !self.fractions.iter().any(|(name, _)| name == &tracer.isotope) {
            return Err(CorrectionError::MalformedPurity(format!(
                "tracer isotope {} missing from the purity table",
                tracer.isotope
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let purity = TracerPurity::parse_line("C12 C13 : 0.02 0.98").unwrap();
        assert!((purity.fraction_of("C12") - 0.02).abs() < 1e-12);
        assert!((purity.fraction_of("C13") - 0.98).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_sum() {
        assert!(TracerPurity::parse_line("C12 C13 : 0.5 0.4").is_err());
        assert!(TracerPurity::parse_line("C12 C13 : -0.1 1.1").is_err());
    }

    #[test]
    fn test_validate_against_tracer() {
        let table = IsotopeTable::natural();
        let tracer = TracerSpec::new(13, "C");
        let purity = TracerPurity::parse_line("C12 C13 : 0.01 0.99").unwrap();
        purity.validate(&table, &tracer).unwrap();

        // wrong element
        let wrong = TracerPurity::parse_line("N14 N15 : 0.01 0.99").unwrap();
        assert!(wrong.validate(&table, &tracer).is_err());

        // tracer isotope missing
        let missing = TracerPurity::parse_line("C12 : 1.0").unwrap();
        assert!(missing.validate(&table, &tracer).is_err());
    }
}
