//!
//! Reduces a set of exact CAN identifiers a node wants to receive into a small number of
//! identifier/mask acceptance filters that fit in a CAN controller's limited filter-bank count
//!
//! This crate is a supporting collaborator of the transport core: the core tells a driver which
//! subjects and services it has subscriptions for (as exact 29-bit CAN identifiers, one per
//! subscribed source if redundancy matters, or a representative identifier otherwise); this
//! crate turns that list into the smallest set of (identifier, mask) pairs, of at most a given
//! size, that still accepts every one of the original identifiers. Accepting some additional,
//! unwanted identifiers along the way is unavoidable once the filter count is smaller than the
//! exact-identifier count, but the merge order below chooses merges that add the fewest of them.
//!

#![no_std]

extern crate alloc;

use alloc::vec::Vec;

/// An identifier/mask acceptance filter: a frame is accepted if `frame_id & mask == id & mask`
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Filter {
    id: u32,
    mask: u32,
}

impl Filter {
    /// Creates a filter that exactly matches one identifier
    pub fn exact(id: u32) -> Self {
        Filter {
            id,
            mask: u32::MAX,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Returns true if this filter would accept `candidate_id`
    pub fn accepts(&self, candidate_id: u32) -> bool {
        (candidate_id & self.mask) == (self.id & self.mask)
    }

    /// Returns the number of distinct identifiers (within a `bits`-wide identifier space) this
    /// filter accepts
    fn acceptance_count(&self, bits: u32) -> u64 {
        let relevant_mask = self.mask & ((1u64 << bits) - 1) as u32;
        1u64 << relevant_mask.count_zeros().min(bits)
    }

    /// Returns the narrowest filter that accepts every identifier either `self` or `other`
    /// accepts
    ///
    /// This is the identifier/mask union used by `optimize`: clear every mask bit on which the
    /// two filters disagree (either in mask or in the masked identifier bits), then widen the
    /// identifier down to the bits that remain relevant.
    fn merge(&self, other: &Filter) -> Filter {
        let common_mask = self.mask & other.mask & !(self.id ^ other.id);
        Filter {
            id: self.id & common_mask,
            mask: common_mask,
        }
    }
}

/// Merges `filters` pairwise until at most `target_count` remain, each time combining the pair
/// whose merge accepts the fewest additional identifiers
///
/// `id_bits` is the width of the identifier space (29 for a Cyphal/CAN extended identifier);
/// it bounds the cost calculation so that an all-ones mask of unused high bits does not skew the
/// choice of merge.
///
/// If `filters` already has `target_count` or fewer entries, it is returned unchanged (as the
/// smallest filter that matches each input exactly, via [`Filter::exact`] if not already merged).
pub fn optimize(filters: &[u32], target_count: usize, id_bits: u32) -> Vec<Filter> {
    let mut current: Vec<Filter> = filters.iter().map(|&id| Filter::exact(id)).collect();
    current.dedup_by(|a, b| a.id == b.id && a.mask == b.mask);

    while current.len() > target_count.max(1) {
        let mut best: Option<(usize, usize, u64)> = None;
        for i in 0..current.len() {
            for j in (i + 1)..current.len() {
                let merged = current[i].merge(&current[j]);
                let added = merged
                    .acceptance_count(id_bits)
                    .saturating_sub(current[i].acceptance_count(id_bits))
                    .saturating_sub(current[j].acceptance_count(id_bits));
                if best.map_or(true, |(_, _, best_cost)| added < best_cost) {
                    best = Some((i, j, added));
                }
            }
        }
        let (i, j, _) = best.expect("at least two filters remain in this branch");
        let merged = current[i].merge(&current[j]);
        // Remove the higher index first so the lower index stays valid.
        current.remove(j);
        current.remove(i);
        current.push(merged);
    }

    current
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec;

    #[test]
    fn fewer_inputs_than_target_is_unchanged() {
        let result = optimize(&[0x100, 0x200], 4, 29);
        assert_eq!(2, result.len());
    }

    #[test]
    fn merging_to_one_filter_accepts_every_input() {
        let ids = [0x100u32, 0x101, 0x180, 0x1FF];
        let result = optimize(&ids, 1, 29);
        assert_eq!(1, result.len());
        for &id in &ids {
            assert!(result[0].accepts(id));
        }
    }

    #[test]
    fn merge_accepts_both_original_identifiers() {
        let a = Filter::exact(0b0000);
        let b = Filter::exact(0b0001);
        let merged = a.merge(&b);
        assert!(merged.accepts(0b0000));
        assert!(merged.accepts(0b0001));
    }

    #[test]
    fn exact_filter_accepts_only_its_identifier() {
        let filter = Filter::exact(0x123);
        assert!(filter.accepts(0x123));
        assert!(!filter.accepts(0x124));
    }

    #[test]
    fn optimize_reduces_to_target_count() {
        let ids: Vec<u32> = vec![0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70];
        let result = optimize(&ids, 3, 29);
        assert_eq!(3, result.len());
        for &id in &ids {
            assert!(result.iter().any(|f| f.accepts(id)));
        }
    }
}
