//! Merge engine: reduce one entity's contributions to a canonical record
//!
//! Field policy:
//! - Set-valued fields: union across prior state and every contribution,
//!   in first-seen order.
//! - Scalars: an extraction wins only if its confidence is at least the
//!   field's existing confidence; otherwise Snapshot > Durable > Cache,
//!   skipping empty values; otherwise the prior value is kept.
//!
//! `merge` is a pure function of its inputs. Timestamps on the output come
//! from the inputs, never from the clock.

use super::policy::MergePolicy;
use crate::bus::SyncEvent;
use crate::identity::EquivalenceClass;
use crate::record::{
    CanonicalRecord, CaseId, EntityKind, FieldOrigin, FieldValue, Origin, SourceId,
    SourceRecord, StableKey, CONFIDENCE_FIELD,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Set-valued field that collects the documents an entity was extracted from.
pub const DOCUMENT_REFS_FIELD: &str = "document_refs";

/// Confidence comparisons tolerate float noise from serialization round trips.
const CONFIDENCE_EPSILON: f64 = 1e-9;

/// A field that could not be parsed and was dropped from its record.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed field '{field}' from {source_id}: {reason}")]
pub struct MalformedField {
    pub source_id: SourceId,
    pub field: String,
    pub reason: String,
}

/// One source's parsed view of an entity, ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub source_id: SourceId,
    /// `Origin::Source(kind)` or `Origin::Extraction`
    pub origin: Origin,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Contribution {
    /// Parse a source record. Unparseable fields are dropped and reported.
    pub fn from_source(record: &SourceRecord, policy: &MergePolicy) -> (Self, Vec<MalformedField>) {
        let (fields, malformed) = parse_fields(&record.source_id, &record.fields, policy);
        let contribution = Self {
            source_id: record.source_id.clone(),
            origin: Origin::Source(record.source_kind),
            confidence: record
                .declared_confidence()
                .unwrap_or(policy.source_confidence),
            observed_at: record.last_updated,
            fields,
        };
        (contribution, malformed)
    }

    /// Parse an extraction event as a synthetic highest-priority source.
    ///
    /// The originating document is added to `document_refs` for every kind
    /// except documents themselves.
    pub fn from_event(event: &SyncEvent, policy: &MergePolicy) -> (Self, Vec<MalformedField>) {
        let source_id = event.source_id();
        let (mut fields, malformed) = parse_fields(&source_id, &event.extracted_fields, policy);

        if event.entity_kind != EntityKind::Document {
            let doc = FieldValue::from(event.source_document_id.clone());
            let refs = fields
                .remove(DOCUMENT_REFS_FIELD)
                .map(FieldValue::into_members)
                .unwrap_or_default();
            let mut members = vec![doc];
            members.extend(refs);
            // The event's own document first; duplicates collapse in the union
            fields.insert(DOCUMENT_REFS_FIELD.to_string(), FieldValue::List(members));
        }

        let contribution = Self {
            source_id,
            origin: Origin::Extraction,
            confidence: event.confidence,
            observed_at: event.emitted_at,
            fields,
        };
        (contribution, malformed)
    }

    /// Processing order: Snapshot, Durable, Cache, then extractions oldest first.
    fn order_key(&self) -> (u8, DateTime<Utc>, &SourceId) {
        match self.origin {
            Origin::Source(kind) => (3 - kind.priority(), DateTime::<Utc>::default(), &self.source_id),
            Origin::Extraction => (3, self.observed_at, &self.source_id),
            Origin::Union => (4, self.observed_at, &self.source_id),
        }
    }

    fn non_empty(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).filter(|v| !v.is_empty())
    }
}

fn parse_fields(
    source_id: &SourceId,
    raw: &BTreeMap<String, Value>,
    policy: &MergePolicy,
) -> (BTreeMap<String, FieldValue>, Vec<MalformedField>) {
    let mut fields = BTreeMap::new();
    let mut malformed = Vec::new();

    for (name, value) in raw {
        if name == CONFIDENCE_FIELD {
            continue;
        }
        let parsed = FieldValue::from_json(value)
            .and_then(|v| match v {
                Some(v) => policy.check_type(name, &v).map(|_| Some(v)),
                None => Ok(None),
            });
        match parsed {
            Ok(Some(v)) => {
                let v = if policy.is_set_field(name) && !v.is_list() {
                    FieldValue::List(vec![v])
                } else {
                    v
                };
                fields.insert(name.clone(), v);
            }
            Ok(None) => {}
            Err(reason) => malformed.push(MalformedField {
                source_id: source_id.clone(),
                field: name.clone(),
                reason,
            }),
        }
    }

    (fields, malformed)
}

/// Result of one merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub record: CanonicalRecord,
    /// False when the merge reproduced the prior record exactly
    pub changed: bool,
}

/// A scalar candidate value.
struct Candidate<'a> {
    value: &'a FieldValue,
    source_id: &'a SourceId,
    confidence: f64,
    observed_at: DateTime<Utc>,
}

/// Deterministic field-level merge.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    policy: MergePolicy,
}

impl MergeEngine {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Parse every member of a class, logging and dropping malformed fields.
    pub fn contributions(&self, class: &EquivalenceClass) -> Vec<Contribution> {
        class
            .members
            .iter()
            .map(|record| {
                let (contribution, malformed) = Contribution::from_source(record, &self.policy);
                for m in &malformed {
                    tracing::warn!(
                        stable_key = %class.stable_key,
                        source = %m.source_id,
                        field = %m.field,
                        reason = %m.reason,
                        "dropping malformed field"
                    );
                }
                contribution
            })
            .collect()
    }

    /// Merge contributions (plus any prior canonical state) into one record.
    pub fn merge(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
        stable_key: &StableKey,
        prior: Option<&CanonicalRecord>,
        mut contributions: Vec<Contribution>,
    ) -> MergeOutcome {
        contributions.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        let mut provenance = prior.map(|p| p.provenance.clone()).unwrap_or_default();
        for c in &contributions {
            if !provenance.contains(&c.source_id) {
                provenance.push(c.source_id.clone());
            }
        }

        let mut names: BTreeSet<&str> = BTreeSet::new();
        if let Some(p) = prior {
            names.extend(p.fields.keys().map(String::as_str));
        }
        for c in &contributions {
            names.extend(c.fields.keys().map(String::as_str));
        }

        let mut fields = BTreeMap::new();
        let mut origins = BTreeMap::new();
        for name in names {
            let prior_value = prior.and_then(|p| p.fields.get(name));
            let prior_origin = prior.and_then(|p| p.origins.get(name));

            let set_valued = self.policy.is_set_field(name)
                || prior_value.is_some_and(FieldValue::is_list)
                || contributions
                    .iter()
                    .any(|c| c.fields.get(name).is_some_and(FieldValue::is_list));

            let resolved = if set_valued {
                union_field(name, prior_value, prior_origin, &contributions)
            } else {
                pick_scalar(name, prior_value, prior_origin, &contributions)
            };

            if let Some((value, origin)) = resolved {
                fields.insert(name.to_string(), value);
                origins.insert(name.to_string(), origin);
            }
        }

        let confidence = contributions
            .iter()
            .map(|c| c.confidence)
            .chain(prior.map(|p| p.confidence))
            .fold(0.0_f64, f64::max);

        let last_merged_at = contributions
            .iter()
            .map(|c| c.observed_at)
            .chain(prior.map(|p| p.last_merged_at))
            .max()
            .unwrap_or_default();

        let record = CanonicalRecord {
            stable_key: stable_key.clone(),
            case_id: case_id.clone(),
            kind,
            fields,
            origins,
            provenance,
            confidence,
            last_merged_at,
        };

        let changed = prior.map_or(true, |p| p != &record);
        tracing::debug!(
            case = %case_id,
            kind = %kind,
            stable_key = %stable_key,
            contributions = contributions.len(),
            changed,
            "merged record"
        );

        MergeOutcome { record, changed }
    }

    /// Fold a record filed under an alias key into the record its key now
    /// resolves to. The primary's scalars stand; the alias fills gaps and its
    /// set members and provenance are unioned in.
    pub fn absorb(&self, primary: &CanonicalRecord, alias: &CanonicalRecord) -> CanonicalRecord {
        let mut out = primary.clone();
        for source in &alias.provenance {
            if !out.provenance.contains(source) {
                out.provenance.push(source.clone());
            }
        }

        for (name, value) in &alias.fields {
            let Some(alias_origin) = alias.origins.get(name) else {
                continue;
            };
            let existing = out.fields.get(name).cloned();
            match existing {
                None => {
                    out.fields.insert(name.clone(), value.clone());
                    out.origins.insert(name.clone(), alias_origin.clone());
                }
                Some(existing) if existing.is_list() || value.is_list() => {
                    let mut seen = HashSet::new();
                    let members: Vec<FieldValue> = existing
                        .into_members()
                        .into_iter()
                        .chain(value.clone().into_members())
                        .filter(|m| seen.insert(m.member_key()))
                        .collect();
                    out.fields.insert(name.clone(), FieldValue::List(members));
                    if let Some(o) = out.origins.get_mut(name) {
                        o.origin = Origin::Union;
                        o.confidence = o.confidence.max(alias_origin.confidence);
                        o.observed_at = o.observed_at.max(alias_origin.observed_at);
                    }
                }
                Some(_) => {}
            }
        }

        out.confidence = out.confidence.max(alias.confidence);
        out.last_merged_at = out.last_merged_at.max(alias.last_merged_at);
        out
    }

    /// Remove an explicitly retracted source from a record.
    ///
    /// Scalars that source supplied are dropped; set members are kept.
    /// Returns `None` when no contributing source remains.
    pub fn retract(&self, record: &CanonicalRecord, source_id: &SourceId) -> Option<CanonicalRecord> {
        let provenance: Vec<SourceId> = record
            .provenance
            .iter()
            .filter(|s| *s != source_id)
            .cloned()
            .collect();
        if provenance.is_empty() {
            return None;
        }

        let mut out = record.clone();
        out.provenance = provenance;
        let supplied: Vec<String> = out
            .origins
            .iter()
            .filter(|(_, o)| o.origin != Origin::Union && &o.source_id == source_id)
            .map(|(name, _)| name.clone())
            .collect();
        for name in supplied {
            out.fields.remove(&name);
            out.origins.remove(&name);
        }
        Some(out)
    }
}

fn union_field(
    name: &str,
    prior_value: Option<&FieldValue>,
    prior_origin: Option<&FieldOrigin>,
    contributions: &[Contribution],
) -> Option<(FieldValue, FieldOrigin)> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut members: Vec<FieldValue> = Vec::new();
    let mut push = |value: FieldValue, members: &mut Vec<FieldValue>| {
        if !value.is_empty() && seen.insert(value.member_key()) {
            members.push(value);
        }
    };

    if let Some(v) = prior_value {
        for m in v.clone().into_members() {
            push(m, &mut members);
        }
    }

    let mut origin = prior_origin.cloned().map(|mut o| {
        o.origin = Origin::Union;
        o
    });

    for c in contributions {
        let Some(v) = c.non_empty(name) else {
            continue;
        };
        for m in v.clone().into_members() {
            push(m, &mut members);
        }
        origin = Some(match origin {
            Some(mut o) => {
                o.confidence = o.confidence.max(c.confidence);
                o.observed_at = o.observed_at.max(c.observed_at);
                o
            }
            None => FieldOrigin {
                origin: Origin::Union,
                source_id: c.source_id.clone(),
                confidence: c.confidence,
                observed_at: c.observed_at,
            },
        });
    }

    if members.is_empty() {
        return None;
    }
    origin.map(|o| (FieldValue::List(members), o))
}

fn pick_scalar(
    name: &str,
    prior_value: Option<&FieldValue>,
    prior_origin: Option<&FieldOrigin>,
    contributions: &[Contribution],
) -> Option<(FieldValue, FieldOrigin)> {
    let prior_value = prior_value.filter(|v| !v.is_empty());

    // A source absent from this pass still stands at its own priority
    let prior_source = match (prior_value, prior_origin) {
        (Some(value), Some(o)) => match o.origin {
            Origin::Source(kind) if !contributions.iter().any(|c| c.source_id == o.source_id) => Some((
                kind,
                Candidate {
                    value,
                    source_id: &o.source_id,
                    confidence: o.confidence,
                    observed_at: o.observed_at,
                },
            )),
            _ => None,
        },
        _ => None,
    };

    // Highest priority source; newest observation breaks ties within a kind
    let best_source = contributions
        .iter()
        .filter_map(|c| match c.origin {
            Origin::Source(kind) => c.non_empty(name).map(|value| {
                (
                    kind,
                    Candidate {
                        value,
                        source_id: &c.source_id,
                        confidence: c.confidence,
                        observed_at: c.observed_at,
                    },
                )
            }),
            _ => None,
        })
        .chain(prior_source)
        .min_by(|(ka, a), (kb, b)| {
            kb.priority()
                .cmp(&ka.priority())
                .then(b.observed_at.cmp(&a.observed_at))
                .then(a.source_id.cmp(b.source_id))
        });

    // An extraction must at least match what the field already stands on
    let existing_confidence = prior_value
        .and(prior_origin)
        .map(|o| o.confidence)
        .into_iter()
        .chain(
            contributions
                .iter()
                .filter(|c| matches!(c.origin, Origin::Source(_)) && c.non_empty(name).is_some())
                .map(|c| c.confidence),
        )
        .fold(0.0_f64, f64::max);

    let prior_extraction = match (prior_value, prior_origin) {
        (Some(value), Some(o)) if o.origin == Origin::Extraction => Some(Candidate {
            value,
            source_id: &o.source_id,
            confidence: o.confidence,
            observed_at: o.observed_at,
        }),
        _ => None,
    };

    let best_extraction = contributions
        .iter()
        .filter(|c| c.origin == Origin::Extraction)
        .filter_map(|c| {
            c.non_empty(name).map(|value| Candidate {
                value,
                source_id: &c.source_id,
                confidence: c.confidence,
                observed_at: c.observed_at,
            })
        })
        .chain(prior_extraction)
        .filter(|c| c.confidence + CONFIDENCE_EPSILON >= existing_confidence)
        .max_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then(a.observed_at.cmp(&b.observed_at))
                .then_with(|| b.source_id.cmp(a.source_id))
        });

    if let Some(c) = best_extraction {
        return Some((
            c.value.clone(),
            FieldOrigin {
                origin: Origin::Extraction,
                source_id: c.source_id.clone(),
                confidence: c.confidence,
                observed_at: c.observed_at,
            },
        ));
    }

    if let Some((kind, c)) = best_source {
        return Some((
            c.value.clone(),
            FieldOrigin {
                origin: Origin::Source(kind),
                source_id: c.source_id.clone(),
                confidence: c.confidence,
                observed_at: c.observed_at,
            },
        ));
    }

    // Nobody offered a value this time: keep what we had
    match (prior_value, prior_origin) {
        (Some(v), Some(o)) => Some((v.clone(), o.clone())),
        _ => None,
    }
}
