use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chemistry::constants::ABUNDANCE_LOAD_TOLERANCE;
use crate::error::CorrectionError;

/// A single isotope of an element, named by concatenating the element
/// symbol and the mass number (e.g. `C13`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Isotope {
    pub name: String,
    pub mass_number: u32,
    /// Mass delta relative to the lightest isotope of the same element.
    pub delta: u32,
    /// Natural relative intensity; per element these sum to 1.
    pub abundance: f64,
}

/// An element together with its ordered isotope set. The lightest isotope
/// comes first, the remaining isotopes are sorted by name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Element {
    pub symbol: String,
    pub isotopes: Vec<Isotope>,
}

impl Element {
    pub fn lightest(&self) -> &Isotope {
        &self.isotopes[0]
    }

    /// An element with a single isotope contributes no mass shifts and is
    /// excluded from combination enumeration.
    pub fn is_inert(&self) -> bool {
        self.isotopes.len() == 1
    }

    pub fn heavy_isotopes(&self) -> &[Isotope] {
        &self.isotopes[1..]
    }
}

/// Lookup service for natural isotope data, either built in
/// ([`IsotopeTable::natural`]) or loaded from abundance-table lines
/// ([`IsotopeTable::from_lines`]).
///
/// # Examples
///
/// ```
/// use isocorrect::IsotopeTable;
///
/// let table = IsotopeTable::natural();
/// assert_eq!(table.isotope_count("C").unwrap(), 2);
/// assert_eq!(table.mass_delta("C13").unwrap(), 1);
/// assert_eq!(table.lightest("O").unwrap().name, "O16");
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IsotopeTable {
    elements: HashMap<String, Element>,
}

/// Published natural abundances for the default element set.
fn natural_abundance_data() -> Vec<(&'static str, Vec<(&'static str, u32, f64)>)> {
    vec![
        ("H", vec![("H1", 1, 0.999885), ("H2", 2, 0.000115)]),
        ("C", vec![("C12", 12, 0.9893), ("C13", 13, 0.0107)]),
        ("N", vec![("N14", 14, 0.99632), ("N15", 15, 0.00368)]),
        (
            "O",
            vec![("O16", 16, 0.99757), ("O17", 17, 0.00038), ("O18", 18, 0.00205)],
        ),
        (
            "Si",
            vec![("Si28", 28, 0.9223), ("Si29", 29, 0.0467), ("Si30", 30, 0.0310)],
        ),
        (
            "S",
            vec![("S32", 32, 0.9493), ("S33", 33, 0.0076), ("S34", 34, 0.0429)],
        ),
        ("P", vec![("P31", 31, 1.0)]),
    ]
}

/// Split an isotope name into its element symbol and mass number.
fn split_isotope_name(name: &str) -> Result<(String, u32), CorrectionError> {
    let symbol: String = name.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &name[symbol.len()..];

    let mut chars = symbol.chars();
    let valid_symbol = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_lowercase())
        && symbol.len() <= 2;
    if !valid_symbol || digits.is_empty() {
        return Err(CorrectionError::UnknownIsotope(name.to_string()));
    }

    let mass_number = digits
        .parse::<u32>()
        .map_err(|_| CorrectionError::UnknownIsotope(name.to_string()))?;
    Ok((symbol, mass_number))
}

impl IsotopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table with the published natural abundances for
    /// C, H, N, O, Si, S and P. Abundances are renormalized so that each
    /// element sums to exactly 1.
    pub fn natural() -> Self {
        let mut table = Self::default();
        for (symbol, isotopes) in natural_abundance_data() {
            let lightest = isotopes[0].1;
            let sum: f64 = isotopes.iter().map(|(_, _, a)| a).sum();
            let element = Element {
                symbol: symbol.to_string(),
                isotopes: isotopes
                    .iter()
                    .map(|(name, mass_number, abundance)| Isotope {
                        name: name.to_string(),
                        mass_number: *mass_number,
                        delta: mass_number - lightest,
                        abundance: abundance / sum,
                    })
                    .collect(),
            };
            table.elements.insert(symbol.to_string(), element);
        }
        table
    }

    /// Register one element. The first isotope listed is taken as the
    /// lightest; the remaining isotopes are sorted by name.
    ///
    /// Raw abundances must lie in [0, 1] and sum to 1 within
    /// [`ABUNDANCE_LOAD_TOLERANCE`]; they are renormalized to an exact sum
    /// of 1 before the element is stored.
    pub fn add_element(
        &mut self,
        isotopes: Vec<(String, u32, f64)>,
    ) -> Result<(), CorrectionError> {
        let (symbol, lightest_mass) = match isotopes.first() {
            Some((name, mass, _)) => (split_isotope_name(name)?.0, *mass),
            None => {
                return Err(CorrectionError::MalformedAbundance {
                    element: String::new(),
                    reason: "no isotopes listed".to_string(),
                })
            }
        };

        let mut sum = 0.0;
        for (name, mass_number, abundance) in &isotopes {
            let (iso_symbol, iso_mass) = split_isotope_name(name)?;
            if iso_symbol != symbol {
                return Err(CorrectionError::MalformedAbundance {
                    element: symbol,
                    reason: format!("isotope {} belongs to a different element", name),
                });
            }
            if iso_mass != *mass_number {
                return Err(CorrectionError::MalformedAbundance {
                    element: symbol,
                    reason: format!("isotope {} disagrees with mass number {}", name, mass_number),
                });
            }
            if *mass_number < lightest_mass {
                return Err(CorrectionError::MalformedAbundance {
                    element: symbol,
                    reason: format!("isotope {} is lighter than the first listed isotope", name),
                });
            }
            if !abundance.is_finite() || *abundance < 0.0 || *abundance > 1.0 {
                return Err(CorrectionError::MalformedAbundance {
                    element: symbol,
                    reason: format!("intensity {} of {} is outside [0, 1]", abundance, name),
                });
            }
            sum += abundance;
        }
        if (sum - 1.0).abs() > ABUNDANCE_LOAD_TOLERANCE {
            return Err(CorrectionError::MalformedAbundance {
                element: symbol,
                reason: format!("intensities sum to {}, expected 1", sum),
            });
        }
        if self.elements.contains_key(&symbol) {
            return Err(CorrectionError::MalformedAbundance {
                element: symbol,
                reason: "element listed twice".to_string(),
            });
        }

        let mut rest: Vec<&(String, u32, f64)> = isotopes[1..].iter().collect();
        rest.sort_by(|a, b| a.0.cmp(&b.0));

        let mut ordered = vec![&isotopes[0]];
        ordered.extend(rest);
        let element = Element {
            symbol: symbol.clone(),
            isotopes: ordered
                .into_iter()
                .map(|(name, mass_number, abundance)| Isotope {
                    name: name.clone(),
                    mass_number: *mass_number,
                    delta: mass_number - lightest_mass,
                    abundance: abundance / sum,
                })
                .collect(),
        };
        self.elements.insert(symbol, element);
        Ok(())
    }

    /// Parse one abundance-table line of the form
    /// `"O16 O17 O18 : 0.99757 0.00038 0.00205"` and register the element.
    pub fn add_line(&mut self, line: &str) -> Result<(), CorrectionError> {
        let malformed = |reason: &str| CorrectionError::MalformedLine {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let (names, values) = line.split_once(':').ok_or_else(|| malformed("missing ':'"))?;
        let names: Vec<&str> = names.split_whitespace().collect();
        let values: Vec<&str> = values.split_whitespace().collect();
        if names.len() != values.len() {
            return Err(malformed("isotope and intensity counts differ"));
        }

        let mut isotopes = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values.iter()) {
            let (_, mass_number) = split_isotope_name(name)?;
            let abundance = value
                .parse::<f64>()
                .map_err(|_| malformed(&format!("intensity '{}' is not a number", value)))?;
            isotopes.push((name.to_string(), mass_number, abundance));
        }
        self.add_element(isotopes)
    }

    /// Build a table from abundance-table lines; blank lines and lines
    /// starting with `#` are skipped.
    pub fn from_lines<I, S>(lines: I) -> Result<Self, CorrectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::default();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            table.add_line(line)?;
        }
        Ok(table)
    }

    pub fn element(&self, symbol: &str) -> Result<&Element, CorrectionError> {
        self.elements
            .get(symbol)
            .ok_or_else(|| CorrectionError::UnknownElement(symbol.to_string()))
    }

    pub fn lightest(&self, symbol: &str) -> Result<&Isotope, CorrectionError> {
        Ok(self.element(symbol)?.lightest())
    }

    /// Isotope names of an element in the deterministic table order:
    /// the lightest first, the rest sorted by name.
    pub fn isotopes_of(&self, symbol: &str) -> Result<Vec<&str>, CorrectionError> {
        Ok(self
            .element(symbol)?
            .isotopes
            .iter()
            .map(|i| i.name.as_str())
            .collect())
    }

    pub fn isotope_count(&self, symbol: &str) -> Result<usize, CorrectionError> {
        Ok(self.element(symbol)?.isotopes.len())
    }

    pub fn find_isotope(&self, name: &str) -> Result<(&Element, &Isotope), CorrectionError> {
        let (symbol, _) = split_isotope_name(name)?;
        let element = self
            .elements
            .get(&symbol)
            .ok_or_else(|| CorrectionError::UnknownIsotope(name.to_string()))?;
        let isotope = element
            .isotopes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| CorrectionError::UnknownIsotope(name.to_string()))?;
        Ok((element, isotope))
    }

    pub fn mass_delta(&self, name: &str) -> Result<u32, CorrectionError> {
        Ok(self.find_isotope(name)?.1.delta)
    }

    pub fn relative_intensity(&self, name: &str) -> Result<f64, CorrectionError> {
        Ok(self.find_isotope(name)?.1.abundance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::constants::ABUNDANCE_SUM_TOLERANCE;

    #[test]
    fn test_natural_table_sums_to_one() {
        let table = IsotopeTable::natural();
        for symbol in ["H", "C", "N", "O", "Si", "S", "P"] {
            let element = table.element(symbol).unwrap();
            let sum: f64 = element.isotopes.iter().map(|i| i.abundance).sum();
            assert!((sum - 1.0).abs() < ABUNDANCE_SUM_TOLERANCE);
        }
    }

    #[test]
    fn test_lookups() {
        let table = IsotopeTable::natural();
        assert_eq!(table.mass_delta("O18").unwrap(), 2);
        assert_eq!(table.lightest("C").unwrap().name, "C12");
        assert!((table.relative_intensity("C13").unwrap() - 0.0107).abs() < 1e-6);
        assert!(table.element("Fe").is_err());
        assert!(table.mass_delta("C14").is_err());
    }

    #[test]
    fn test_inert_element() {
        let table = IsotopeTable::natural();
        assert!(table.element("P").unwrap().is_inert());
        assert!(!table.element("S").unwrap().is_inert());
    }

    #[test]
    fn test_add_line_renormalizes() {
        // Slight excess over 1 is accepted and renormalized.
        let mut table = IsotopeTable::new();
        table.add_line("C12 C13 : 1.0 0.0107").unwrap();
        let sum: f64 = table
            .element("C")
            .unwrap()
            .isotopes
            .iter()
            .map(|i| i.abundance)
            .sum();
        assert!((sum - 1.0).abs() < ABUNDANCE_SUM_TOLERANCE);
    }

    #[test]
    fn test_add_line_rejects_bad_sums() {
        let mut table = IsotopeTable::new();
        assert!(table.add_line("C12 C13 : 0.5 0.4").is_err());
        assert!(table.add_line("C12 C13 : 1.2 -0.2").is_err());
        assert!(table.add_line("C12 C13 : 0.9893").is_err());
    }

    #[test]
    fn test_from_lines_skips_comments() {
        let table = IsotopeTable::from_lines([
            "# default carbon",
            "C12 C13 : 0.9893 0.0107",
            "",
            "N14 N15 : 0.99632 0.00368",
        ])
        .unwrap();
        assert_eq!(table.isotope_count("C").unwrap(), 2);
        assert_eq!(table.isotope_count("N").unwrap(), 2);
    }
}
