use std::collections::HashMap;

use statrs::function::factorial::binomial;

use crate::algorithm::combination::{CombinationSet, SlotKind};

/// Per-call scratch state: a binomial-coefficient cache and a memo for
/// per-group probabilities keyed by the slot `(N, n)` tuples. Both live
/// for one correction call only.
#[derive(Debug, Default)]
pub struct ProbabilityCache {
    binomials: HashMap<(u64, u64), f64>,
    groups: HashMap<(usize, (u16, u16), Vec<(u16, u16)>), f64>,
}

impl ProbabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached binomial coefficient `C(n, k)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocorrect::algorithm::probability::ProbabilityCache;
    ///
    /// let mut cache = ProbabilityCache::new();
    /// assert_eq!(cache.binomial(5, 2), 10.0);
    /// assert_eq!(cache.binomial(6, 0), 1.0);
    /// ```
    pub fn binomial(&mut self, n: u64, k: u64) -> f64 {
        *self
            .binomials
            .entry((n, k))
            .or_insert_with(|| binomial(n, k))
    }
}

/// Probability of one isotope configuration on an atom pool.
///
/// The precursor side places `counts[i].0` atoms of slot isotope `i`
/// (abundance `abundances[i]`) among `precursor_pool` atoms, the lightest
/// isotope taking the remainder: a multinomial placement coefficient times
/// the Bernoulli abundance factors. The fragment side keeps
/// `counts[i].1` of them among `fragment_pool` atoms: a fragment
/// multinomial coefficient times a running hypergeometric term that
/// decrements the precursor-remaining denominator after every draw,
/// lightest-isotope draws first, then slot order.
///
/// Configurations that violate the pool bounds come out as 0.
pub fn pool_probability(
    cache: &mut ProbabilityCache,
    precursor_pool: u16,
    fragment_pool: u16,
    counts: &[(u16, u16)],
    abundances: &[f64],
    lightest_abundance: f64,
) -> f64 {
    let pool = precursor_pool as i64;
    let fragment = fragment_pool as i64;
    let heavy_prec: i64 = counts.iter().map(|&(n, _)| n as i64).sum();
    let heavy_frag: i64 = counts.iter().map(|&(_, n)| n as i64).sum();
    let lightest_prec = pool - heavy_prec;
    let lightest_frag = fragment - heavy_frag;
    if lightest_prec < 0 || lightest_frag < 0 {
        return 0.0;
    }

    let mut probability = 1.0;

    // multinomial placement and abundance factors on the precursor pool
    let mut remaining = pool;
    for (&(n, _), &abundance) in counts.iter().zip(abundances.iter()) {
        probability *= cache.binomial(remaining as u64, n as u64);
        probability *= abundance.powi(n as i32);
        remaining -= n as i64;
    }
    probability *= lightest_abundance.powi(lightest_prec as i32);

    // fragment multinomial coefficient
    let mut remaining = fragment;
    for &(_, n) in counts {
        probability *= cache.binomial(remaining as u64, n as u64);
        remaining -= n as i64;
    }

    // running hypergeometric coupling, lightest first
    let mut drawn = 0i64;
    for step in 0..lightest_frag {
        probability *= (lightest_prec - step) as f64 / (pool - drawn) as f64;
        drawn += 1;
    }
    for &(n_prec, n_frag) in counts {
        for step in 0..n_frag as i64 {
            probability *= (n_prec as i64 - step) as f64 / (pool - drawn) as f64;
            drawn += 1;
        }
    }

    probability
}

/// Assign every combination record its probability: the product over all
/// slot groups of the group's pool probability. The tracer slot itself is
/// deterministic and contributes a factor of 1; purity groups draw on the
/// labeled positions of the record's tracer slot, natural-abundance-on-
/// tracer groups on the unlabeled remainder.
pub fn assign_probabilities(set: &mut CombinationSet) {
    let mut cache = ProbabilityCache::new();
    let tracer_index = set.slots.len() - 1;
    let groups = set.groups.clone();

    for record in &mut set.records {
        let (labeled_prec, labeled_frag) = record.slots[tracer_index];
        let mut probability = 1.0;

        for (group_index, group) in groups.iter().enumerate() {
            let counts = &record.slots[group.start..group.end];
            let pools = match group.kind {
                SlotKind::Natural => (group.precursor_pool, group.fragment_pool),
                SlotKind::TracerNatural => (
                    group.precursor_pool - labeled_prec,
                    group.fragment_pool - labeled_frag,
                ),
                SlotKind::Purity => (labeled_prec, labeled_frag),
                SlotKind::Tracer => continue,
            };

            let key = (group_index, pools, counts.to_vec());
            let probability_of_group = match cache.groups.get(&key) {
                Some(&cached) => cached,
                None => {
                    let computed = pool_probability(
                        &mut cache,
                        pools.0,
                        pools.1,
                        counts,
                        &group.abundances,
                        group.lightest_abundance,
                    );
                    cache.groups.insert(key, computed);
                    computed
                }
            };
            probability *= probability_of_group;
        }
        record.probability = probability;
    }
}
