use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chemistry::elements::IsotopeTable;
use crate::error::CorrectionError;

/// The deliberately labeled isotope species shared by precursor and
/// fragment, e.g. `C13` on element `C`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerSpec {
    pub isotope: String,
    pub element: String,
}

impl TracerSpec {
    /// Build the tracer descriptor from a mass number and element symbol.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocorrect::TracerSpec;
    ///
    /// let tracer = TracerSpec::new(13, "C");
    /// assert_eq!(tracer.isotope, "C13");
    /// ```
    pub fn new(mass_number: u32, element: &str) -> Self {
        TracerSpec {
            isotope: format!("{}{}", element, mass_number),
            element: element.to_string(),
        }
    }
}

/// One side of a compound: how many tracer atoms it carries and the atom
/// counts of every other element present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundSide {
    pub tracer_atoms: u32,
    pub elements: HashMap<String, u32>,
}

impl CompoundSide {
    pub fn new(tracer_atoms: u32, elements: HashMap<String, u32>) -> Self {
        CompoundSide {
            tracer_atoms,
            elements,
        }
    }

    /// Build a side from the tracer atom count and a sum formula covering
    /// the non-tracer elements, e.g. `13C6` glucose as `(6, "H12O6")`.
    pub fn from_formula(tracer_atoms: u32, formula: &str) -> Result<Self, CorrectionError> {
        Ok(CompoundSide {
            tracer_atoms,
            elements: parse_formula(formula)?,
        })
    }
}

/// A labeled compound: precursor and fragment composition plus the tracer
/// species both sides share.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabeledCompound {
    pub name: String,
    pub tracer: TracerSpec,
    pub precursor: CompoundSide,
    pub fragment: CompoundSide,
}

impl LabeledCompound {
    pub fn new(
        name: &str,
        tracer: TracerSpec,
        precursor: CompoundSide,
        fragment: CompoundSide,
    ) -> Self {
        LabeledCompound {
            name: name.to_string(),
            tracer,
            precursor,
            fragment,
        }
    }

    /// A compound is an isotopologue when precursor and fragment have
    /// identical atomic composition, i.e. no fragmentation took place.
    pub fn is_isotopologue(&self) -> bool {
        self.precursor.tracer_atoms == self.fragment.tracer_atoms
            && self.precursor.elements == self.fragment.elements
    }

    /// Check the compound invariants against an isotope table: identical
    /// element sets on both sides, per-element precursor count >= fragment
    /// count, and a tracer species the table knows with more than one
    /// isotope.
    pub fn validate(&self, table: &IsotopeTable) -> Result<(), CorrectionError> {
        let malformed = |reason: String| CorrectionError::MalformedCompound {
            name: self.name.clone(),
            reason,
        };

        let (element, isotope) = table
            .find_isotope(&self.tracer.isotope)
            .map_err(|_| malformed(format!("unknown tracer isotope {}", self.tracer.isotope)))?;
        if element.symbol != self.tracer.element {
            return Err(malformed(format!(
                "tracer isotope {} does not belong to element {}",
                self.tracer.isotope, self.tracer.element
            )));
        }
        if element.is_inert() {
            return Err(malformed(format!(
                "tracer element {} has a single known isotope",
                self.tracer.element
            )));
        }
        if isotope.delta == 0 {
            return Err(malformed(format!(
                "tracer isotope {} is the lightest isotope of {}",
                self.tracer.isotope, self.tracer.element
            )));
        }

        if self.precursor.tracer_atoms < self.fragment.tracer_atoms {
            return Err(malformed(format!(
                "fragment has {} tracer atoms but precursor only {}",
                self.fragment.tracer_atoms, self.precursor.tracer_atoms
            )));
        }

        for (symbol, &count) in &self.precursor.elements {
            table
                .element(symbol)
                .map_err(|_| malformed(format!("unknown element {}", symbol)))?;
            if symbol == &self.tracer.element {
                return Err(malformed(format!(
                    "tracer element {} listed among the non-tracer elements",
                    symbol
                )));
            }
            match self.fragment.elements.get(symbol) {
                Some(&fragment_count) if fragment_count <= count => {}
                Some(&fragment_count) => {
                    return Err(malformed(format!(
                        "element {}: fragment count {} exceeds precursor count {}",
                        symbol, fragment_count, count
                    )))
                }
                None => {
                    return Err(malformed(format!(
                        "element {} present in precursor but missing from fragment",
                        symbol
                    )))
                }
            }
        }
        for symbol in self.fragment.elements.keys() {
            if !self.precursor.elements.contains_key(symbol) {
                return Err(malformed(format!(
                    "element {} present in fragment but missing from precursor",
                    symbol
                )));
            }
        }
        Ok(())
    }
}

/// Parse a sum formula into element counts.
///
/// # Arguments
///
/// * `formula` - sum formula, e.g. `C6H12O6`
///
/// # Returns
///
/// * `HashMap<String, u32>` - atom count per element symbol
///
/// # Examples
///
/// ```
/// use isocorrect::parse_formula;
///
/// let counts = parse_formula("C6H12O6").unwrap();
/// assert_eq!(counts["C"], 6);
/// assert_eq!(counts["H"], 12);
/// assert_eq!(counts["O"], 6);
/// ```
pub fn parse_formula(formula: &str) -> Result<HashMap<String, u32>, CorrectionError> {
    let mut counts = HashMap::new();
    let mut chars = formula.chars().peekable();

    while let Some(c) = chars.next() {
        if !c.is_ascii_uppercase() {
            return Err(CorrectionError::MalformedLine {
                line: formula.to_string(),
                reason: format!("unexpected character '{}'", c),
            });
        }
        let mut symbol = c.to_string();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_lowercase() {
                symbol.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let mut digits = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() {
                digits.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let count = if digits.is_empty() {
            1
        } else {
            digits.parse::<u32>().map_err(|_| CorrectionError::MalformedLine {
                line: formula.to_string(),
                reason: format!("invalid count '{}'", digits),
            })?
        };
        *counts.entry(symbol).or_insert(0) += count;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glucose() -> LabeledCompound {
        let side = CompoundSide::from_formula(6, "H12O6").unwrap();
        LabeledCompound::new("GLC", TracerSpec::new(13, "C"), side.clone(), side)
    }

    #[test]
    fn test_parse_formula() {
        let counts = parse_formula("C5H10O5").unwrap();
        assert_eq!(counts["C"], 5);
        assert_eq!(counts["H"], 10);
        assert_eq!(counts["O"], 5);

        let counts = parse_formula("Si2HO").unwrap();
        assert_eq!(counts["Si"], 2);
        assert_eq!(counts["H"], 1);
        assert_eq!(counts["O"], 1);

        assert!(parse_formula("c6").is_err());
    }

    #[test]
    fn test_isotopologue_detection() {
        let table = IsotopeTable::natural();
        let compound = glucose();
        compound.validate(&table).unwrap();
        assert!(compound.is_isotopologue());

        let fragment = CompoundSide::from_formula(3, "H6O3").unwrap();
        let fragmented = LabeledCompound::new(
            "GLC",
            TracerSpec::new(13, "C"),
            compound.precursor.clone(),
            fragment,
        );
        fragmented.validate(&table).unwrap();
        assert!(!fragmented.is_isotopologue());
    }

    #[test]
    fn test_validate_rejects_count_mismatch() {
        let table = IsotopeTable::natural();
        let precursor = CompoundSide::from_formula(3, "H6O3").unwrap();
        let fragment = CompoundSide::from_formula(3, "H8O3").unwrap();
        let compound =
            LabeledCompound::new("X", TracerSpec::new(13, "C"), precursor, fragment);
        assert!(compound.validate(&table).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_element() {
        let table = IsotopeTable::natural();
        let precursor = CompoundSide::from_formula(2, "H4N2").unwrap();
        let fragment = CompoundSide::from_formula(2, "H4").unwrap();
        let compound =
            LabeledCompound::new("X", TracerSpec::new(13, "C"), precursor, fragment);
        assert!(compound.validate(&table).is_err());
    }

    #[test]
    fn test_validate_rejects_single_isotope_tracer() {
        let table = IsotopeTable::natural();
        let side = CompoundSide::from_formula(1, "H3O4").unwrap();
        let compound = LabeledCompound::new("X", TracerSpec::new(31, "P"), side.clone(), side);
        assert!(compound.validate(&table).is_err());
    }

    #[test]
    fn test_validate_rejects_tracer_in_element_map() {
        let table = IsotopeTable::natural();
        let side = CompoundSide::from_formula(6, "C6H12O6").unwrap();
        let compound = LabeledCompound::new("GLC", TracerSpec::new(13, "C"), side.clone(), side);
        assert!(compound.validate(&table).is_err());
    }
}
