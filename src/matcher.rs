use crate::schema::{EventRecord, RecordKey, RecordSource};
use log::{debug, warn};
use std::collections::HashSet;

/// A pairing of zero-or-one NBIM record with zero-or-one custody record
/// sharing an identity key. At least one side is always present when the
/// matcher builds it; a one-sided match is a missing-record break by
/// construction.
#[derive(Debug, Clone)]
pub struct RecordMatch {
    pub key: RecordKey,
    pub nbim: Option<EventRecord>,
    pub custody: Option<EventRecord>,
}

impl RecordMatch {
    pub fn is_complete(&self) -> bool {
        self.nbim.is_some() && self.custody.is_some()
    }

    /// The side present on a one-sided match, if any record is present at all.
    pub fn present_side(&self) -> Option<RecordSource> {
        match (&self.nbim, &self.custody) {
            (Some(_), None) => Some(RecordSource::Nbim),
            (None, Some(_)) => Some(RecordSource::Custody),
            _ => None,
        }
    }

    /// Either record, preferring NBIM, for display fields.
    pub fn any_record(&self) -> Option<&EventRecord> {
        self.nbim.as_ref().or(self.custody.as_ref())
    }
}

/// A same-key row beyond the first within one source. Reported, never
/// silently merged into the match.
#[derive(Debug, Clone)]
pub struct DuplicateRecord {
    pub key: RecordKey,
    pub source: RecordSource,
    pub record: EventRecord,
}

/// A row whose identity key is malformed (empty ISIN or event key). Excluded
/// from matching, reported separately.
#[derive(Debug, Clone)]
pub struct UnmatchableRecord {
    pub source: RecordSource,
    pub record: EventRecord,
    pub reason: String,
}

/// Output of the matching pass. `matches` preserves NBIM appearance order,
/// followed by custody-only keys in custody appearance order, so every
/// downstream aggregate iterates deterministically.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    pub matches: Vec<RecordMatch>,
    pub duplicates: Vec<DuplicateRecord>,
    pub unmatchable: Vec<UnmatchableRecord>,
}

impl MatchSet {
    pub fn complete_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_complete()).count()
    }
}

/// Pairs the two collections by identity key.
///
/// Every well-formed key present in either collection appears in exactly one
/// match. Within one source the first appearance of a key wins; later rows
/// with the same key are reported as duplicates.
pub fn match_records(nbim: &[EventRecord], custody: &[EventRecord]) -> MatchSet {
    let mut set = MatchSet::default();

    let firsts_nbim = collect_firsts(nbim, RecordSource::Nbim, &mut set);
    let mut firsts_custody = collect_firsts(custody, RecordSource::Custody, &mut set);

    // NBIM rows drive the primary ordering; each consumes its custody
    // counterpart when one exists.
    for (key, record) in firsts_nbim {
        let custody_record = firsts_custody
            .iter()
            .position(|(k, _)| *k == key)
            .map(|idx| firsts_custody.remove(idx).1);

        set.matches.push(RecordMatch {
            key,
            nbim: Some(record),
            custody: custody_record,
        });
    }

    // Whatever custody rows remain have no NBIM counterpart.
    for (key, record) in firsts_custody {
        set.matches.push(RecordMatch {
            key,
            nbim: None,
            custody: Some(record),
        });
    }

    debug!(
        "Matched {} keys ({} complete, {} duplicates, {} unmatchable)",
        set.matches.len(),
        set.complete_count(),
        set.duplicates.len(),
        set.unmatchable.len()
    );

    set
}

/// First occurrence per key, in appearance order. Malformed keys and
/// repeats are diverted into the match set's report lists.
fn collect_firsts(
    records: &[EventRecord],
    source: RecordSource,
    set: &mut MatchSet,
) -> Vec<(RecordKey, EventRecord)> {
    let mut firsts: Vec<(RecordKey, EventRecord)> = Vec::new();
    let mut seen: HashSet<RecordKey> = HashSet::new();

    for record in records {
        let key = record.key();
        if !key.is_well_formed() {
            warn!("{source} row excluded from matching: malformed identity key");
            set.unmatchable.push(UnmatchableRecord {
                source,
                record: record.clone(),
                reason: "empty ISIN or event key".to_string(),
            });
            continue;
        }

        if seen.insert(key.clone()) {
            firsts.push((key, record.clone()));
        } else {
            set.duplicates.push(DuplicateRecord {
                key,
                source,
                record: record.clone(),
            });
        }
    }

    firsts
}
