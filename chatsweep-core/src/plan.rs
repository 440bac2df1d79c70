//! Grouping and canonical-record selection.
//!
//! Pure in-memory work: no store access, no logging. The resolver turns a
//! [`DedupPlan`] into deletions.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::{MissingTimestampPolicy, ResolverConfig, TieBreak};
use crate::models::ChatRecord;
use crate::pair::ParticipantPairKey;

/// One participant pair that has more than one chat record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: ParticipantPairKey,
    pub kept: String,
    pub marked: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupPlan {
    pub total_fetched: usize,
    pub two_party: usize,
    /// Records ignored because they do not have exactly two participants.
    pub skipped: usize,
    /// Duplicate groups in the order their key was first seen.
    pub groups: Vec<DuplicateGroup>,
}

impl DedupPlan {
    /// Ids to delete, group by group.
    pub fn marked_ids(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.marked.iter().map(String::as_str))
    }

    pub fn marked_count(&self) -> usize {
        self.groups.iter().map(|g| g.marked.len()).sum()
    }
}

/// Two-party records bucketed by participant pair, before selection.
#[derive(Debug)]
pub struct PairGroups<'a> {
    pub total_fetched: usize,
    pub two_party: usize,
    pub skipped: usize,
    /// Buckets in the order their key was first seen; each bucket in fetch order.
    pub buckets: Vec<(ParticipantPairKey, Vec<&'a ChatRecord>)>,
}

impl PairGroups<'_> {
    pub fn duplicate_buckets(&self) -> usize {
        self.buckets.iter().filter(|(_, b)| b.len() > 1).count()
    }
}

/// Bucket two-party records by participant pair. Other records are counted as skipped.
pub fn group_by_pair(records: &[ChatRecord]) -> PairGroups<'_> {
    let mut groups = PairGroups {
        total_fetched: records.len(),
        two_party: 0,
        skipped: 0,
        buckets: Vec::new(),
    };
    let mut index: HashMap<ParticipantPairKey, usize> = HashMap::new();

    for record in records {
        let Some(key) = ParticipantPairKey::for_record(record) else {
            groups.skipped += 1;
            continue;
        };
        groups.two_party += 1;

        match index.get(&key) {
            Some(&i) => groups.buckets[i].1.push(record),
            None => {
                index.insert(key.clone(), groups.buckets.len());
                groups.buckets.push((key, vec![record]));
            }
        }
    }

    groups
}

/// Pick the survivor of every bucket with more than one record.
pub fn select_canonical(groups: PairGroups<'_>, config: &ResolverConfig) -> DedupPlan {
    let mut plan = DedupPlan {
        total_fetched: groups.total_fetched,
        two_party: groups.two_party,
        skipped: groups.skipped,
        groups: Vec::new(),
    };

    for (key, mut bucket) in groups.buckets {
        if bucket.len() < 2 {
            continue;
        }

        sort_by_age(&mut bucket, config);

        let kept = bucket[0].id.clone();
        let marked = bucket[1..].iter().map(|r| r.id.clone()).collect();
        plan.groups.push(DuplicateGroup { key, kept, marked });
    }

    plan
}

/// Group two-party records by participant pair and pick one survivor per pair.
pub fn build_plan(records: &[ChatRecord], config: &ResolverConfig) -> DedupPlan {
    select_canonical(group_by_pair(records), config)
}

/// Sort key in epoch millis, with the missing-timestamp policy applied.
pub fn effective_millis(record: &ChatRecord, policy: MissingTimestampPolicy) -> i64 {
    match (record.created_at, policy) {
        (Some(ts), _) => ts.timestamp_millis(),
        (None, MissingTimestampPolicy::Earliest) => 0,
        (None, MissingTimestampPolicy::Latest) => i64::MAX,
    }
}

/// Oldest first. `sort_by` is stable, so `TieBreak::FetchOrder` keeps fetch order on ties.
fn sort_by_age(bucket: &mut [&ChatRecord], config: &ResolverConfig) {
    let policy = config.missing_timestamp;
    bucket.sort_by(|a, b| {
        effective_millis(a, policy)
            .cmp(&effective_millis(b, policy))
            .then_with(|| match config.tie_break {
                TieBreak::RecordId => a.id.cmp(&b.id),
                TieBreak::FetchOrder => Ordering::Equal,
            })
    });
}
