//! Duplicate chat resolver.
//!
//! One pass: `Fetching → Grouping → Selecting → Deleting → Done`. A failed
//! fetch ends the pass in `FatalError` before anything is deleted. A failed
//! delete is logged and recorded, and the pass moves on to the next record.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ResolverConfig, SweepConfig};
use crate::error::SweepError;
use crate::plan::{self, DuplicateGroup};
use crate::store::{self, ChatStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepPhase {
    Fetching,
    Grouping,
    Selecting,
    Deleting,
    Done,
    FatalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub store: String,
    pub dry_run: bool,
    pub total_fetched: usize,
    pub two_party: usize,
    pub skipped: usize,
    pub duplicate_groups: usize,
    pub marked: usize,
    pub deleted: usize,
    pub failures: Vec<DeleteFailure>,
    pub groups: Vec<DuplicateGroup>,
    pub elapsed_ms: u64,
}

impl SweepReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct Resolver {
    store: Arc<dyn ChatStore>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(store: Arc<dyn ChatStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// Build the configured store and a resolver over it.
    pub async fn from_config(config: &SweepConfig) -> Result<Self, SweepError> {
        let store = store::create_store(config).await?;
        Ok(Self::new(store, config.resolver.clone()))
    }

    /// Run a full sweep against the store.
    pub async fn run(&self) -> Result<SweepReport, SweepError> {
        let start = Instant::now();
        let mut phase = SweepPhase::Fetching;

        tracing::info!(
            store = self.store.name(),
            dry_run = self.config.dry_run,
            tie_break = ?self.config.tie_break,
            missing_timestamp = ?self.config.missing_timestamp,
            "Starting duplicate chat sweep"
        );

        let records = match self.store.fetch_all().await {
            Ok(records) => records,
            Err(e) => {
                advance(&mut phase, SweepPhase::FatalError);
                tracing::error!(error = %e, "Failed to fetch chats; nothing was deleted");
                return Err(SweepError::Fetch(e));
            }
        };
        tracing::info!(total = records.len(), "Fetched chat records");

        advance(&mut phase, SweepPhase::Grouping);
        let groups = plan::group_by_pair(&records);
        for record in records.iter().filter(|r| !r.is_two_party()) {
            tracing::debug!(
                id = %record.id,
                participants = record.participants.len(),
                "Skipping chat without exactly two participants"
            );
        }
        tracing::info!(
            two_party = groups.two_party,
            pairs = groups.buckets.len(),
            duplicate_pairs = groups.duplicate_buckets(),
            "Grouped chats by participant pair"
        );
        if groups.skipped > 0 {
            tracing::warn!(
                skipped = groups.skipped,
                "Ignored chats without exactly two participants"
            );
        }

        advance(&mut phase, SweepPhase::Selecting);
        let plan = plan::select_canonical(groups, &self.config);
        for group in &plan.groups {
            tracing::info!(
                participants = %group.key,
                count = group.marked.len() + 1,
                "Found duplicate chats"
            );
            tracing::info!(id = %group.kept, "Keeping chat");
            for id in &group.marked {
                tracing::info!(id = %id, "Marking chat for deletion");
            }
        }
        tracing::info!(
            groups = plan.groups.len(),
            marked = plan.marked_count(),
            "Duplicate chats to delete"
        );

        let mut deleted = 0usize;
        let mut failures = Vec::new();

        if self.config.dry_run {
            tracing::info!("Dry run: skipping deletions");
        } else {
            advance(&mut phase, SweepPhase::Deleting);
            for id in plan.marked_ids() {
                match self.store.delete(id).await {
                    Ok(()) => {
                        deleted += 1;
                        tracing::info!(id = id, "Deleted duplicate chat");
                    }
                    Err(e) => {
                        tracing::error!(id = id, error = %e, "Failed to delete chat");
                        failures.push(DeleteFailure {
                            id: id.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        advance(&mut phase, SweepPhase::Done);

        let report = SweepReport {
            store: self.store.name().to_string(),
            dry_run: self.config.dry_run,
            total_fetched: plan.total_fetched,
            two_party: plan.two_party,
            skipped: plan.skipped,
            duplicate_groups: plan.groups.len(),
            marked: plan.marked_count(),
            deleted,
            failures,
            groups: plan.groups,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        tracing::info!(
            fetched = report.total_fetched,
            skipped = report.skipped,
            groups = report.duplicate_groups,
            deleted = report.deleted,
            failed = report.failures.len(),
            elapsed_ms = report.elapsed_ms,
            "Duplicate chat sweep complete"
        );

        Ok(report)
    }
}

fn advance(phase: &mut SweepPhase, next: SweepPhase) {
    tracing::debug!(from = ?*phase, to = ?next, "Sweep phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TieBreak;
    use crate::models::ChatRecord;
    use crate::store::MemoryChatStore;
    use chrono::{TimeZone, Utc};

    fn chat(id: &str, participants: &[&str], millis: Option<i64>) -> ChatRecord {
        ChatRecord::new(
            id,
            participants.iter().map(|p| p.to_string()).collect(),
            millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        )
    }

    fn resolver(store: &Arc<MemoryChatStore>, config: ResolverConfig) -> Resolver {
        Resolver::new(store.clone(), config)
    }

    #[tokio::test]
    async fn test_keeps_earliest_and_deletes_the_rest() {
        let store = Arc::new(MemoryChatStore::new(vec![
            chat("c1", &["alice", "bob"], Some(50)),
            chat("c2", &["bob", "alice"], Some(10)),
            chat("c3", &["alice", "bob"], Some(30)),
        ]));

        let report = resolver(&store, ResolverConfig::default()).run().await.unwrap();

        assert_eq!(store.ids(), vec!["c2"]);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.marked, 2);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_fatal_and_deletes_nothing() {
        let store = Arc::new(MemoryChatStore::new(vec![
            chat("c1", &["alice", "bob"], Some(1)),
            chat("c2", &["alice", "bob"], Some(2)),
        ]));
        store.fail_fetch("store offline");

        let result = resolver(&store, ResolverConfig::default()).run().await;

        assert!(matches!(result, Err(SweepError::Fetch(_))));
        assert!(store.delete_attempts().is_empty());
        assert_eq!(store.ids().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_stop_other_deletions() {
        let store = Arc::new(MemoryChatStore::new(vec![
            chat("a1", &["alice", "bob"], Some(1)),
            chat("a2", &["alice", "bob"], Some(2)),
            chat("a3", &["alice", "bob"], Some(3)),
            chat("b1", &["carol", "dave"], Some(1)),
            chat("b2", &["carol", "dave"], Some(2)),
        ]));
        store.fail_delete("a2");

        let report = resolver(&store, ResolverConfig::default()).run().await.unwrap();

        assert_eq!(store.delete_attempts(), vec!["a2", "a3", "b2"]);
        assert_eq!(store.ids(), vec!["a1", "a2", "b1"]);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "a2");
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_deleting() {
        let store = Arc::new(MemoryChatStore::new(vec![
            chat("c1", &["alice", "bob"], Some(2)),
            chat("c2", &["alice", "bob"], Some(1)),
        ]));
        let config = ResolverConfig {
            dry_run: true,
            ..Default::default()
        };

        let report = resolver(&store, config).run().await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.marked, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.groups[0].kept, "c2");
        assert!(store.delete_attempts().is_empty());
        assert_eq!(store.ids().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_order_tie_break_keeps_first_fetched() {
        let store = Arc::new(MemoryChatStore::new(vec![
            chat("later-id", &["carol", "dave"], Some(5)),
            chat("early-id", &["dave", "carol"], Some(5)),
        ]));
        let config = ResolverConfig {
            tie_break: TieBreak::FetchOrder,
            ..Default::default()
        };

        resolver(&store, config).run().await.unwrap();

        assert_eq!(store.ids(), vec!["later-id"]);
    }

    #[tokio::test]
    async fn test_report_serializes_keys_as_strings() {
        let store = Arc::new(MemoryChatStore::new(vec![
            chat("c1", &["bob", "alice"], Some(1)),
            chat("c2", &["alice", "bob"], Some(2)),
        ]));

        let report = resolver(&store, ResolverConfig::default()).run().await.unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["store"], "memory");
        assert_eq!(json["groups"][0]["key"], "alice_bob");
        assert_eq!(json["groups"][0]["kept"], "c1");
        assert_eq!(json["groups"][0]["marked"][0], "c2");
    }
}
