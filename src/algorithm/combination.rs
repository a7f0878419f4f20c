use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::chemistry::compound::LabeledCompound;
use crate::chemistry::elements::IsotopeTable;
use crate::data::purity::TracerPurity;
use crate::error::CorrectionError;

/// What a slot of a combination record stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Natural abundance of a non-tracer element's heavy isotope.
    Natural,
    /// Natural abundance on the unlabeled tracer-element atoms.
    TracerNatural,
    /// Distribution of labeled positions over a tracer-element isotope.
    Purity,
    /// The tracer isotope itself; always the last slot.
    Tracer,
}

/// One slot of the shared slot order: which isotope it tracks and the
/// mass delta one atom in this slot contributes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Slot {
    pub kind: SlotKind,
    pub element: String,
    pub isotope: String,
    pub delta: u32,
}

/// Slots of one probability group: a contiguous slot range sharing the
/// atom pools and abundances of one element.
#[derive(Clone, Debug)]
pub struct SlotGroup {
    pub kind: SlotKind,
    pub element: String,
    pub start: usize,
    pub end: usize,
    /// Precursor-side atom pool. For [`SlotKind::TracerNatural`] this is
    /// the full tracer atom count; the labeled positions of the record's
    /// tracer slot are subtracted at probability time. Unused for
    /// [`SlotKind::Purity`] (the pools are the tracer slot itself).
    pub precursor_pool: u16,
    pub fragment_pool: u16,
    /// One abundance per slot: natural relative intensities, or purity
    /// fractions for a purity group.
    pub abundances: Vec<f64>,
    pub lightest_abundance: f64,
}

/// One enumerated isotope-distribution combination: an `(N, n)` pair per
/// slot, the summed mass offsets on precursor and fragment side, and the
/// probability assigned later by the probability engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Combination {
    pub slots: Vec<(u16, u16)>,
    pub mass: (u32, u32),
    pub probability: f64,
}

/// The full enumerator output for one correction call.
#[derive(Clone, Debug)]
pub struct CombinationSet {
    pub slots: Vec<Slot>,
    pub groups: Vec<SlotGroup>,
    pub records: Vec<Combination>,
    /// Valid tracer `(N, n)` pairs in row order; their count must equal
    /// the measurement count.
    pub tracer_pairs: Vec<(u16, u16)>,
    pub tracer_delta: u32,
}

impl CombinationSet {
    /// The tracer slot value of a record; the tracer slot is always last.
    pub fn tracer_slot(&self, record: &Combination) -> (u16, u16) {
        record.slots[self.slots.len() - 1]
    }
}

/// Enumerate the `(N, n)` pairs of one heavy isotope with mass delta
/// `delta` in an element with `precursor`/`fragment` atoms, subject to
/// conservation and the tracer mass caps.
///
/// # Arguments
///
/// * `precursor` - atom count of the element on the precursor side
/// * `fragment` - atom count of the element on the fragment side
/// * `delta` - mass delta of the heavy isotope
/// * `cap` - maximum mass offset on (precursor, fragment) side
///
/// # Examples
///
/// ```
/// use isocorrect::algorithm::combination::isotope_pairs;
///
/// // two atoms, no fragmentation: the fragment keeps every heavy atom
/// let pairs = isotope_pairs(2, 2, 1, (2, 2));
/// assert_eq!(pairs, vec![(0, 0), (1, 1), (2, 2)]);
/// ```
pub fn isotope_pairs(precursor: u16, fragment: u16, delta: u32, cap: (u32, u32)) -> Vec<(u16, u16)> {
    let mut pairs = Vec::new();
    for n_prec in 0..=precursor {
        if delta * n_prec as u32 > cap.0 {
            break;
        }
        for n_frag in 0..=fragment.min(n_prec) {
            if delta * n_frag as u32 > cap.1 {
                break;
            }
            // atoms lost in fragmentation absorb at most precursor - fragment
            // heavy atoms
            if (precursor - fragment) + n_frag < n_prec {
                continue;
            }
            pairs.push((n_prec, n_frag));
        }
    }
    pairs
}

/// Enumerate the valid tracer `(M, m)` pairs for the given tracer atom
/// counts. Their order (ascending in `M`, then `m`) is the row order of
/// the correction matrix.
///
/// # Examples
///
/// ```
/// use isocorrect::algorithm::combination::tracer_pairs;
///
/// // isotopologue: fragment offset always equals precursor offset
/// assert_eq!(tracer_pairs(2, 2), vec![(0, 0), (1, 1), (2, 2)]);
/// // losing two carbons allows the offsets to differ by up to two
/// assert_eq!(
///     tracer_pairs(3, 1),
///     vec![(0, 0), (1, 0), (1, 1), (2, 0), (2, 1), (3, 1)]
/// );
/// ```
pub fn tracer_pairs(precursor: u16, fragment: u16) -> Vec<(u16, u16)> {
    let mut pairs = Vec::new();
    for m_prec in 0..=precursor {
        for m_frag in 0..=fragment.min(m_prec) {
            if (precursor - fragment) + m_frag < m_prec {
                continue;
            }
            pairs.push((m_prec, m_frag));
        }
    }
    pairs
}

/// Cross-isotope merge of one element: Cartesian product of the per-isotope
/// pair sets, filtered by the element-level conservation constraints and
/// the tracer mass caps. Returns the joint slot values and their mass
/// contribution.
pub(crate) fn merge_isotope_pairs(
    pair_sets: &[Vec<(u16, u16)>],
    deltas: &[u32],
    precursor: u16,
    fragment: u16,
    cap: (u32, u32),
) -> Vec<(Vec<(u16, u16)>, (u32, u32))> {
    pair_sets
        .iter()
        .map(|set| set.iter().copied())
        .multi_cartesian_product()
        .filter_map(|joint| {
            let sum_prec: u32 = joint.iter().map(|&(n, _)| n as u32).sum();
            let sum_frag: u32 = joint.iter().map(|&(_, n)| n as u32).sum();
            if sum_prec > precursor as u32 || sum_frag > fragment as u32 {
                return None;
            }
            if (precursor - fragment) as u32 + sum_frag < sum_prec {
                return None;
            }
            let mass_prec: u32 = joint
                .iter()
                .zip(deltas.iter())
                .map(|(&(n, _), &d)| n as u32 * d)
                .sum();
            let mass_frag: u32 = joint
                .iter()
                .zip(deltas.iter())
                .map(|(&(_, n), &d)| n as u32 * d)
                .sum();
            if mass_prec > cap.0 || mass_frag > cap.1 {
                return None;
            }
            Some((joint, (mass_prec, mass_frag)))
        })
        .collect()
}

/// One stage of the cross-element merge: extend every partial record with
/// every record of the next element, dropping products over the mass caps.
fn product_stage(
    partial: Vec<(Vec<(u16, u16)>, (u32, u32))>,
    stage: &[(Vec<(u16, u16)>, (u32, u32))],
    cap: (u32, u32),
) -> Vec<(Vec<(u16, u16)>, (u32, u32))> {
    let mut merged = Vec::with_capacity(partial.len());
    for (pairs, mass) in &partial {
        for (stage_pairs, stage_mass) in stage {
            let combined = (mass.0 + stage_mass.0, mass.1 + stage_mass.1);
            if combined.0 > cap.0 || combined.1 > cap.1 {
                continue;
            }
            let mut joint = pairs.clone();
            joint.extend_from_slice(stage_pairs);
            merged.push((joint, combined));
        }
    }
    merged
}

/// All vectors of `parts` nonnegative integers summing to `total`, in a
/// fixed recursive order.
fn compositions(total: u16, parts: usize) -> Vec<Vec<u16>> {
    fn fill(index: usize, remaining: u16, current: &mut Vec<u16>, out: &mut Vec<Vec<u16>>) {
        if index + 1 == current.len() {
            current[index] = remaining;
            out.push(current.clone());
            return;
        }
        for value in 0..=remaining {
            current[index] = value;
            fill(index + 1, remaining - value, current, out);
        }
    }

    let mut out = Vec::new();
    let mut current = vec![0u16; parts];
    fill(0, total, &mut current, &mut out);
    out
}

/// Enumerate all isotope-distribution combinations for a compound.
///
/// Slot order: per non-tracer element (sorted by symbol) one slot per
/// heavy isotope (sorted by name); optionally one slot per heavy isotope
/// of the tracer element for natural abundance on the unlabeled tracer
/// atoms; optionally one slot per tracer-element isotope for purity; the
/// tracer slot last. The order is identical across runs for identical
/// element and isotope names.
pub fn enumerate_combinations(
    table: &IsotopeTable,
    compound: &LabeledCompound,
    natural_abundance_on_tracer: bool,
    purity: Option<&TracerPurity>,
) -> Result<CombinationSet, CorrectionError> {
    let tracer_element = table.element(&compound.tracer.element)?;
    let tracer_delta = table.mass_delta(&compound.tracer.isotope)?;
    let tracer_precursor = compound.precursor.tracer_atoms as u16;
    let tracer_fragment = compound.fragment.tracer_atoms as u16;
    let cap = (
        tracer_delta * tracer_precursor as u32,
        tracer_delta * tracer_fragment as u32,
    );

    let mut slots: Vec<Slot> = Vec::new();
    let mut groups: Vec<SlotGroup> = Vec::new();
    let mut partial: Vec<(Vec<(u16, u16)>, (u32, u32))> = vec![(Vec::new(), (0, 0))];

    // non-tracer elements in deterministic symbol order
    let mut symbols: Vec<&String> = compound.precursor.elements.keys().collect();
    symbols.sort();
    for symbol in symbols {
        let element = table.element(symbol)?;
        if element.is_inert() {
            continue;
        }
        let precursor = compound.precursor.elements[symbol.as_str()] as u16;
        let fragment = compound.fragment.elements[symbol.as_str()] as u16;
        let heavy = element.heavy_isotopes();
        let deltas: Vec<u32> = heavy.iter().map(|iso| iso.delta).collect();
        let pair_sets: Vec<Vec<(u16, u16)>> = heavy
            .iter()
            .map(|iso| isotope_pairs(precursor, fragment, iso.delta, cap))
            .collect();
        let merged = merge_isotope_pairs(&pair_sets, &deltas, precursor, fragment, cap);

        let start = slots.len();
        for iso in heavy {
            slots.push(Slot {
                kind: SlotKind::Natural,
                element: element.symbol.clone(),
                isotope: iso.name.clone(),
                delta: iso.delta,
            });
        }
        groups.push(SlotGroup {
            kind: SlotKind::Natural,
            element: element.symbol.clone(),
            start,
            end: slots.len(),
            precursor_pool: precursor,
            fragment_pool: fragment,
            abundances: heavy.iter().map(|iso| iso.abundance).collect(),
            lightest_abundance: element.lightest().abundance,
        });
        partial = product_stage(partial, &merged, cap);
    }

    // natural abundance on the unlabeled tracer atoms
    let mut tracer_natural_range: Option<(usize, usize)> = None;
    if natural_abundance_on_tracer {
        let heavy = tracer_element.heavy_isotopes();
        let deltas: Vec<u32> = heavy.iter().map(|iso| iso.delta).collect();
        let pair_sets: Vec<Vec<(u16, u16)>> = heavy
            .iter()
            .map(|iso| isotope_pairs(tracer_precursor, tracer_fragment, iso.delta, cap))
            .collect();
        let merged =
            merge_isotope_pairs(&pair_sets, &deltas, tracer_precursor, tracer_fragment, cap);

        let start = slots.len();
        for iso in heavy {
            slots.push(Slot {
                kind: SlotKind::TracerNatural,
                element: tracer_element.symbol.clone(),
                isotope: iso.name.clone(),
                delta: iso.delta,
            });
        }
        tracer_natural_range = Some((start, slots.len()));
        groups.push(SlotGroup {
            kind: SlotKind::TracerNatural,
            element: tracer_element.symbol.clone(),
            start,
            end: slots.len(),
            precursor_pool: tracer_precursor,
            fragment_pool: tracer_fragment,
            abundances: heavy.iter().map(|iso| iso.abundance).collect(),
            lightest_abundance: tracer_element.lightest().abundance,
        });
        partial = product_stage(partial, &merged, cap);
    }

    // purity slots cover every isotope of the tracer element, the
    // lightest included
    let purity_isotopes = &tracer_element.isotopes;
    if let Some(purity) = purity {
        let start = slots.len();
        for iso in purity_isotopes {
            slots.push(Slot {
                kind: SlotKind::Purity,
                element: tracer_element.symbol.clone(),
                isotope: iso.name.clone(),
                delta: iso.delta,
            });
        }
        groups.push(SlotGroup {
            kind: SlotKind::Purity,
            element: tracer_element.symbol.clone(),
            start,
            end: slots.len(),
            precursor_pool: 0,
            fragment_pool: 0,
            abundances: purity_isotopes
                .iter()
                .map(|iso| purity.fraction_of(&iso.name))
                .collect(),
            lightest_abundance: 0.0,
        });
    }

    slots.push(Slot {
        kind: SlotKind::Tracer,
        element: compound.tracer.element.clone(),
        isotope: compound.tracer.isotope.clone(),
        delta: tracer_delta,
    });

    let pairs = tracer_pairs(tracer_precursor, tracer_fragment);
    let tracer_index = purity_isotopes
        .iter()
        .position(|iso| iso.name == compound.tracer.isotope)
        .ok_or_else(|| CorrectionError::UnknownIsotope(compound.tracer.isotope.clone()))?;
    let purity_deltas: Vec<u32> = purity_isotopes.iter().map(|iso| iso.delta).collect();

    let mut records: Vec<Combination> = Vec::new();
    for (base_pairs, base_mass) in &partial {
        for &(m_prec, m_frag) in &pairs {
            if let Some((start, end)) = tracer_natural_range {
                // natural-abundance atoms and labeled positions share the
                // tracer atom budget
                let nat_prec: u32 = base_pairs[start..end].iter().map(|&(n, _)| n as u32).sum();
                let nat_frag: u32 = base_pairs[start..end].iter().map(|&(_, n)| n as u32).sum();
                if nat_prec + m_prec as u32 > tracer_precursor as u32
                    || nat_frag + m_frag as u32 > tracer_fragment as u32
                {
                    continue;
                }
            }

            if purity.is_none() {
                let mass = (
                    base_mass.0 + tracer_delta * m_prec as u32,
                    base_mass.1 + tracer_delta * m_frag as u32,
                );
                if mass.0 > cap.0 || mass.1 > cap.1 {
                    continue;
                }
                let mut record_slots = base_pairs.clone();
                record_slots.push((m_prec, m_frag));
                records.push(Combination {
                    slots: record_slots,
                    mass,
                    probability: 0.0,
                });
                continue;
            }

            // purity expansion: distribute the labeled positions over all
            // tracer-element isotopes; the all-pure choice comes first
            let mut pure_prec = vec![0u16; purity_isotopes.len()];
            let mut pure_frag = vec![0u16; purity_isotopes.len()];
            pure_prec[tracer_index] = m_prec;
            pure_frag[tracer_index] = m_frag;

            let mut expansion = vec![(pure_prec.clone(), pure_frag.clone())];
            for dist_prec in compositions(m_prec, purity_isotopes.len()) {
                for dist_frag in compositions(m_frag, purity_isotopes.len()) {
                    if dist_prec == pure_prec && dist_frag == pure_frag {
                        continue;
                    }
                    let valid = dist_prec.iter().zip(dist_frag.iter()).all(|(&np, &nf)| {
                        nf <= np && (m_prec - m_frag) + nf >= np
                    });
                    if valid {
                        expansion.push((dist_prec.clone(), dist_frag));
                    }
                }
            }

            for (dist_prec, dist_frag) in expansion {
                let mass = (
                    base_mass.0
                        + dist_prec
                            .iter()
                            .zip(purity_deltas.iter())
                            .map(|(&n, &d)| n as u32 * d)
                            .sum::<u32>(),
                    base_mass.1
                        + dist_frag
                            .iter()
                            .zip(purity_deltas.iter())
                            .map(|(&n, &d)| n as u32 * d)
                            .sum::<u32>(),
                );
                if mass.0 > cap.0 || mass.1 > cap.1 {
                    continue;
                }
                let mut record_slots = base_pairs.clone();
                record_slots.extend(dist_prec.iter().zip(dist_frag.iter()).map(|(&a, &b)| (a, b)));
                record_slots.push((m_prec, m_frag));
                records.push(Combination {
                    slots: record_slots,
                    mass,
                    probability: 0.0,
                });
            }
        }
    }

    Ok(CombinationSet {
        slots,
        groups,
        records,
        tracer_pairs: pairs,
        tracer_delta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::compound::{CompoundSide, TracerSpec};

    fn glucose() -> LabeledCompound {
        let side = CompoundSide::from_formula(6, "H12O6").unwrap();
        LabeledCompound::new("GLC", TracerSpec::new(13, "C"), side.clone(), side)
    }

    #[test]
    fn test_isotope_pairs_respects_caps() {
        // O18 has delta 2; a cap of 2 allows at most one heavy atom
        let pairs = isotope_pairs(6, 6, 2, (2, 2));
        assert_eq!(pairs, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_isotope_pairs_fragmented() {
        // losing one atom lets the precursor hold one more heavy atom
        let pairs = isotope_pairs(3, 2, 1, (10, 10));
        assert_eq!(
            pairs,
            vec![(0, 0), (1, 0), (1, 1), (2, 1), (2, 2), (3, 2)]
        );
    }

    #[test]
    fn test_tracer_pairs_fragmented_count() {
        // 13C5 precursor, 13C3 fragment: n <= N <= n + 2
        let pairs = tracer_pairs(5, 3);
        assert_eq!(pairs.len(), 12);
        assert!(pairs.iter().all(|&(m, n)| n <= m && m <= n + 2));
        assert_eq!(pairs[0], (0, 0));
        assert_eq!(*pairs.last().unwrap(), (5, 3));
    }

    #[test]
    fn test_slot_order_is_deterministic() {
        let table = IsotopeTable::natural();
        let compound = glucose();
        let a = enumerate_combinations(&table, &compound, false, None).unwrap();
        let b = enumerate_combinations(&table, &compound, false, None).unwrap();
        let names_a: Vec<&str> = a.slots.iter().map(|s| s.isotope.as_str()).collect();
        let names_b: Vec<&str> = b.slots.iter().map(|s| s.isotope.as_str()).collect();
        assert_eq!(names_a, names_b);
        // elements sorted by symbol, isotopes by name, tracer last
        assert_eq!(names_a, vec!["H2", "O17", "O18", "C13"]);
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_mass_caps_bound_records() {
        let table = IsotopeTable::natural();
        let compound = glucose();
        let set = enumerate_combinations(&table, &compound, false, None).unwrap();
        assert_eq!(set.tracer_pairs.len(), 7);
        for record in &set.records {
            assert!(record.mass.0 <= 6);
            assert!(record.mass.1 <= 6);
            // conservation on the fragment side of an isotopologue
            assert_eq!(record.mass.0, record.mass.1);
        }
    }

    #[test]
    fn test_zero_tracer_budget_collapses_to_identity() {
        let table = IsotopeTable::natural();
        let side = CompoundSide::from_formula(0, "H2O").unwrap();
        let compound = LabeledCompound::new("W", TracerSpec::new(13, "C"), side.clone(), side);
        let set = enumerate_combinations(&table, &compound, false, None).unwrap();
        assert_eq!(set.tracer_pairs, vec![(0, 0)]);
        assert_eq!(set.records.len(), 1);
        assert_eq!(set.records[0].mass, (0, 0));
    }

    #[test]
    fn test_purity_expansion_keeps_pure_record_first() {
        let table = IsotopeTable::natural();
        let side = CompoundSide::new(2, Default::default());
        let compound = LabeledCompound::new("X", TracerSpec::new(13, "C"), side.clone(), side);
        let purity = TracerPurity::parse_line("C12 C13 : 0.01 0.99").unwrap();
        let set = enumerate_combinations(&table, &compound, false, Some(&purity)).unwrap();

        // slots: purity C12, purity C13, tracer
        assert_eq!(set.slots.len(), 3);
        assert_eq!(set.slots[0].kind, SlotKind::Purity);
        assert_eq!(set.slots[2].kind, SlotKind::Tracer);

        // the first record of the (2, 2) tracer pair carries both labeled
        // positions on C13
        let full: Vec<&Combination> = set
            .records
            .iter()
            .filter(|r| set.tracer_slot(r) == (2, 2))
            .collect();
        assert_eq!(full[0].slots[1], (2, 2));
        assert_eq!(full[0].mass, (2, 2));
        // impure distributions shift mass below the pure record
        assert!(full.iter().skip(1).all(|r| r.mass.0 < 2));
    }

    #[test]
    fn test_natural_abundance_on_tracer_shares_budget() {
        let table = IsotopeTable::natural();
        let side = CompoundSide::new(2, Default::default());
        let compound = LabeledCompound::new("X", TracerSpec::new(13, "C"), side.clone(), side);
        let set = enumerate_combinations(&table, &compound, true, None).unwrap();
        let tracer_index = set.slots.len() - 1;
        for record in &set.records {
            let (nat, _) = record.slots[0];
            let (labeled, _) = record.slots[tracer_index];
            assert!(nat + labeled <= 2);
        }
    }
}
