//! Record-level merge semantics, written once against [`Mergeable`]

use crate::models::{Identifier, Mergeable, RecordStatus};

/// Copy every identifier of `subsumed` that `survivor` does not already carry.
///
/// This is a plain union keyed on domain, value and check digit; conflicting
/// identifiers in the same domain are not reconciled. Returns how many
/// identifiers were copied.
pub fn union_identifiers<R: Mergeable>(survivor: &mut R, subsumed: &R) -> usize {
    let missing: Vec<Identifier> = subsumed
        .identifiers()
        .iter()
        .filter(|id| !survivor.identifiers().contains(id))
        .cloned()
        .collect();
    let copied = missing.len();
    survivor.identifiers_mut().extend(missing);
    copied
}

/// Fold `subsumed` into `survivor`: the subsumed record takes `status`
/// (obsolete for automatic merges, nullified for manual ones) and the survivor
/// gains its identifiers. Relationship edits are up to the caller.
pub fn absorb<R: Mergeable>(survivor: &mut R, subsumed: &mut R, status: RecordStatus) -> usize {
    subsumed.set_status(RecordStatus::Obsolete);
    let copied = union_identifiers(survivor, subsumed);
    if status != RecordStatus::Obsolete {
        subsumed.set_status(status);
    }
    copied
}
