//! Last-result and counter aggregation behind a single lock.

use crate::types::{CheckResult, Target};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Aggregated state of one target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSnapshot {
    pub url: String,
    pub host: String,
    pub path: String,
    /// Absent until the first check completes
    pub last_result: Option<CheckResult>,
    /// Status label → number of results carrying it
    pub counters: BTreeMap<String, u64>,
}

impl TargetSnapshot {
    fn new(url: &str, host: &str, path: &str) -> Self {
        Self {
            url: url.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            last_result: None,
            counters: BTreeMap::new(),
        }
    }

    /// Count for one status label, zero if never seen.
    pub fn counter(&self, label: &str) -> u64 {
        self.counters.get(label).copied().unwrap_or(0)
    }

    /// Sum over all labels
    pub fn total(&self) -> u64 {
        self.counters.values().sum()
    }
}

/// Owned, consistent copy of the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Configured targets first, in configured order
    pub targets: Vec<TargetSnapshot>,
}

impl StoreSnapshot {
    pub fn get(&self, url: &str) -> Option<&TargetSnapshot> {
        self.targets.iter().find(|t| t.url == url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetSnapshot> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<TargetSnapshot>,
    index: HashMap<String, usize>,
}

impl State {
    fn insert(&mut self, entry: TargetSnapshot) -> usize {
        if let Some(&idx) = self.index.get(&entry.url) {
            return idx;
        }
        let idx = self.entries.len();
        self.index.insert(entry.url.clone(), idx);
        self.entries.push(entry);
        idx
    }
}

/// In-memory aggregation of check results.
///
/// The last result and the counter increment for a result are applied under
/// one write lock, so readers never see one without the other.
#[derive(Debug, Default)]
pub struct AggregationStore {
    inner: RwLock<State>,
}

impl AggregationStore {
    /// Create a store with an empty counter map for every target.
    pub fn new(targets: &[Arc<Target>]) -> Self {
        let mut state = State::default();
        for target in targets {
            state.insert(TargetSnapshot::new(
                target.as_str(),
                target.host(),
                target.path(),
            ));
        }
        Self {
            inner: RwLock::new(state),
        }
    }

    /// Record one result.
    pub async fn ingest(&self, result: CheckResult) {
        let label = result.status_label();
        let mut state = self.inner.write().await;

        let existing = state.index.get(&result.url).copied();
        let idx = match existing {
            Some(idx) => idx,
            None => {
                warn!(url = %result.url, "Result for unconfigured target");
                state.insert(TargetSnapshot::new(&result.url, &result.host, &result.path))
            }
        };

        let entry = &mut state.entries[idx];
        *entry.counters.entry(label).or_insert(0) += 1;
        entry.last_result = Some(result);
    }

    /// Copy the current state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.inner.read().await;
        StoreSnapshot {
            targets: state.entries.clone(),
        }
    }

    /// Number of tracked targets
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drain `results` into the store until the queue closes or `cancel` fires.
    ///
    /// On cancellation the queue is closed and whatever is already buffered
    /// is still ingested.
    pub async fn consume(&self, mut results: mpsc::Receiver<CheckResult>, cancel: CancellationToken) {
        debug!("Result consumer started");

        loop {
            tokio::select! {
                biased;
                received = results.recv() => match received {
                    Some(result) => self.ingest(result).await,
                    None => {
                        debug!("Result queue closed, consumer stopping");
                        return;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }

        results.close();
        let mut drained = 0usize;
        while let Some(result) = results.recv().await {
            self.ingest(result).await;
            drained += 1;
        }
        debug!(drained, "Result consumer stopped");
    }
}
