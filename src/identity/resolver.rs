//! Identity resolution: which records denote the same entity
//!
//! Policy is deliberately conservative. Records join only on an equal
//! StableKey; two different natural keys are never merged however similar
//! they look. A missed merge shows up as a visible duplicate a person can
//! fix; a wrong merge silently corrupts case data.

use super::normalize::normalize_natural_key;
use crate::record::{SourceRecord, StableKey};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Namespace for singleton keys of records with no usable identity.
const SINGLETON_NAMESPACE: Uuid = Uuid::from_u128(0x6a1d_43f2_9c0e_4b7a_8e55_1f3c_2d90_aa17);

/// Natural-key → external-id observations, per (case, kind).
///
/// Learned from records that carry both. A natural key observed with exactly
/// one external id resolves to that id; one observed with several is
/// ambiguous and resolves to neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityIndex {
    aliases: BTreeMap<String, BTreeSet<String>>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `natural` (already normalized) names `external_id`.
    pub fn observe(&mut self, natural: &str, external_id: &str) {
        self.aliases
            .entry(natural.to_string())
            .or_default()
            .insert(external_id.to_string());
    }

    /// The single external id bound to a normalized natural key, if unambiguous.
    pub fn external_for(&self, natural: &str) -> Option<&str> {
        match self.aliases.get(natural) {
            Some(ids) if ids.len() == 1 => ids.iter().next().map(String::as_str),
            _ => None,
        }
    }

    pub fn is_ambiguous(&self, natural: &str) -> bool {
        self.aliases.get(natural).is_some_and(|ids| ids.len() > 1)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// A group of records the resolver considers one entity.
#[derive(Debug, Clone)]
pub struct EquivalenceClass {
    pub stable_key: StableKey,
    /// Members in deterministic order: source priority, then source id,
    /// then recency
    pub members: Vec<SourceRecord>,
}

/// Stateless identity resolver.
///
/// All methods are pure functions of their arguments; the caller owns the
/// `IdentityIndex` and stores the updated copy `partition` returns.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Fold alias observations from `records` into a copy of `index`.
    pub fn learn(&self, index: &IdentityIndex, records: &[SourceRecord]) -> IdentityIndex {
        let mut learned = index.clone();
        for record in records {
            if let (Some(external), Some(natural)) = (
                record.durable_id(),
                record.natural_key.as_deref().and_then(normalize_natural_key),
            ) {
                learned.observe(&natural, external);
            }
        }
        learned
    }

    /// StableKey for a natural key as it appears in a payload.
    ///
    /// Returns `None` when the key normalizes to nothing.
    pub fn key_for_natural(&self, raw: &str, index: &IdentityIndex) -> Option<StableKey> {
        let natural = normalize_natural_key(raw)?;
        Some(match index.external_for(&natural) {
            Some(external) => StableKey::external(external),
            None => StableKey::natural(natural),
        })
    }

    /// StableKey for one record, given what the index has observed.
    pub fn stable_key(&self, record: &SourceRecord, index: &IdentityIndex) -> StableKey {
        if let Some(external) = record.durable_id() {
            return StableKey::external(external);
        }
        record
            .natural_key
            .as_deref()
            .and_then(|raw| self.key_for_natural(raw, index))
            .unwrap_or_else(|| Self::singleton_key(record))
    }

    /// Whether two records resolve to the same entity.
    pub fn same_entity(&self, a: &SourceRecord, b: &SourceRecord, index: &IdentityIndex) -> bool {
        let index = self.learn(index, &[a.clone(), b.clone()]);
        self.stable_key(a, &index) == self.stable_key(b, &index)
    }

    /// Partition records into equivalence classes.
    ///
    /// Alias observations from the whole batch are learned before any key is
    /// assigned, so the result does not depend on input order. Returns the
    /// classes (sorted by key) and the updated index.
    pub fn partition(
        &self,
        records: Vec<SourceRecord>,
        index: &IdentityIndex,
    ) -> (Vec<EquivalenceClass>, IdentityIndex) {
        let learned = self.learn(index, &records);

        let mut groups: BTreeMap<StableKey, Vec<SourceRecord>> = BTreeMap::new();
        for record in records {
            let key = self.stable_key(&record, &learned);
            groups.entry(key).or_default().push(record);
        }

        let classes = groups
            .into_iter()
            .map(|(stable_key, mut members)| {
                members.sort_by_cached_key(|r| {
                    (
                        Reverse(r.source_kind.priority()),
                        r.source_id.clone(),
                        Reverse(r.last_updated),
                        serde_json::to_string(&r.fields).unwrap_or_default(),
                    )
                });
                EquivalenceClass { stable_key, members }
            })
            .collect();

        (classes, learned)
    }

    /// Deterministic key for a record with no external id and no usable
    /// natural key. Scoped by source, so it never joins another source's record.
    fn singleton_key(record: &SourceRecord) -> StableKey {
        let fields = serde_json::to_string(&record.fields).unwrap_or_default();
        Self::singleton_for(&format!("{}\n{}", record.source_id, fields))
    }

    /// Deterministic singleton key derived from arbitrary content.
    pub fn singleton_for(seed: &str) -> StableKey {
        StableKey::singleton(Uuid::new_v5(&SINGLETON_NAMESPACE, seed.as_bytes()))
    }
}
