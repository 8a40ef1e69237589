//! Optimistic-concurrency transactions over a versioned document ledger.
//!
//! A transaction body reads documents (remembering the version it saw) and buffers
//! writes. Commit hands both sets to the ledger, which applies the writes only if
//! nothing it read has moved on. On a conflict the driver runs the body again in a
//! fresh transaction, so bodies must be check-then-write and free of outside effects.

use crate::domain::ports::{Document, DocumentKey, Ledger};
use crate::domain::settings::RetryPolicy;
use crate::utils::error::{PatternError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub struct Transaction {
    ledger: Arc<dyn Ledger>,
    read_set: BTreeMap<DocumentKey, u64>,
    writes: BTreeMap<DocumentKey, Option<Value>>,
}

impl Transaction {
    fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            read_set: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Reads a document, seeing this transaction's own pending writes first.
    pub async fn get(&mut self, key: &DocumentKey) -> Result<Option<Value>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }

        let document = self.ledger.read(key).await?;
        let version = document.as_ref().map(|d| d.version).unwrap_or(0);
        let observed = *self.read_set.entry(key.clone()).or_insert(version);
        if observed != version {
            // Someone committed between two reads of the same document.
            return Err(PatternError::OccConflict {
                document: key.to_string(),
            });
        }
        Ok(document.map(|d| d.data))
    }

    pub fn put(&mut self, key: DocumentKey, data: Value) {
        self.writes.insert(key, Some(data));
    }

    pub fn delete(&mut self, key: DocumentKey) {
        self.writes.insert(key, None);
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    async fn commit(self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.ledger
            .commit(
                self.read_set.into_iter().collect(),
                self.writes.into_iter().collect(),
            )
            .await
    }
}

/// Runs transaction bodies against a ledger, re-running them on OCC conflicts.
#[derive(Clone)]
pub struct LedgerDriver {
    ledger: Arc<dyn Ledger>,
    policy: RetryPolicy,
}

impl LedgerDriver {
    pub fn new(ledger: Arc<dyn Ledger>, policy: RetryPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn execute<T, F>(&self, body: F) -> Result<T>
    where
        T: Send,
        F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, Result<T>> + Send + Sync,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut txn = Transaction::new(Arc::clone(&self.ledger));
            let result = body(&mut txn).await;
            let outcome = match result {
                Ok(value) => txn.commit().await.map(|_| value),
                Err(e) => Err(e),
            };

            match outcome {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        "{}; retrying transaction in {:?}",
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::error!(attempt, "Giving up after repeated conflicts: {}", e);
                    return Err(e);
                }
                other => return other,
            }
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    documents: HashMap<DocumentKey, Document>,
    injected_conflicts: u32,
    commits: u64,
}

/// Mutex-guarded ledger for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail as if another writer got there first.
    pub fn inject_conflicts(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.injected_conflicts = count;
        }
    }

    pub fn commit_count(&self) -> u64 {
        self.state.lock().map(|s| s.commits).unwrap_or(0)
    }

    pub fn version(&self, key: &DocumentKey) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.documents.get(key).map(|d| d.version))
            .unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> PatternError {
    PatternError::storage("ledger state lock poisoned")
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn read(&self, key: &DocumentKey) -> Result<Option<Document>> {
        Ok(self.state.lock().map_err(poisoned)?.documents.get(key).cloned())
    }

    async fn commit(
        &self,
        read_set: Vec<(DocumentKey, u64)>,
        writes: Vec<(DocumentKey, Option<Value>)>,
    ) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            let document = writes
                .first()
                .map(|(key, _)| key.to_string())
                .unwrap_or_default();
            return Err(PatternError::OccConflict { document });
        }

        for (key, observed) in &read_set {
            let current = state.documents.get(key).map(|d| d.version).unwrap_or(0);
            if current != *observed {
                return Err(PatternError::OccConflict {
                    document: key.to_string(),
                });
            }
        }

        for (key, data) in writes {
            match data {
                Some(data) => {
                    let version = state.documents.get(&key).map(|d| d.version).unwrap_or(0) + 1;
                    state.documents.insert(key, Document { data, version });
                }
                None => {
                    state.documents.remove(&key);
                }
            }
        }
        state.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key(id: &str) -> DocumentKey {
        DocumentKey::new("counters", id)
    }

    async fn increment(driver: &LedgerDriver, id: &str) -> Result<i64> {
        let key = key(id);
        driver
            .execute(move |txn| {
                let key = key.clone();
                Box::pin(async move {
                    let current = txn
                        .get(&key)
                        .await?
                        .and_then(|v| v["value"].as_i64())
                        .unwrap_or(0);
                    txn.put(key, json!({ "value": current + 1 }));
                    Ok(current + 1)
                })
            })
            .await
    }

    #[tokio::test]
    async fn test_commit_applies_writes_and_bumps_version() {
        let ledger = Arc::new(InMemoryLedger::new());
        let driver = LedgerDriver::new(ledger.clone(), RetryPolicy::no_delay(3));

        assert_eq!(increment(&driver, "a").await.unwrap(), 1);
        assert_eq!(increment(&driver, "a").await.unwrap(), 2);
        assert_eq!(ledger.version(&key("a")), 2);
        assert_eq!(ledger.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_conflict_reruns_body_until_it_commits() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.inject_conflicts(2);
        let driver = LedgerDriver::new(ledger.clone(), RetryPolicy::no_delay(4));

        assert_eq!(increment(&driver, "a").await.unwrap(), 1);
        assert_eq!(ledger.version(&key("a")), 1);
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_attempts() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.inject_conflicts(10);
        let driver = LedgerDriver::new(ledger.clone(), RetryPolicy::no_delay(3));

        let err = increment(&driver, "a").await.unwrap_err();
        assert!(matches!(err, PatternError::OccConflict { .. }));
        assert_eq!(ledger.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writer_between_read_and_commit() {
        let ledger = Arc::new(InMemoryLedger::new());
        let driver = LedgerDriver::new(ledger.clone(), RetryPolicy::no_delay(3));
        let rival = LedgerDriver::new(ledger.clone(), RetryPolicy::no_delay(1));
        increment(&driver, "a").await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result = driver
            .execute(move |txn| {
                let rival = rival.clone();
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    let current = txn.get(&key("a")).await?.unwrap()["value"]
                        .as_i64()
                        .unwrap();
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        // Another invocation sneaks in after our read.
                        increment(&rival, "a").await?;
                    }
                    txn.put(key("a"), json!({ "value": current * 10 }));
                    Ok(current * 10)
                })
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(result, 20);
        assert_eq!(ledger.version(&key("a")), 3);
    }

    #[tokio::test]
    async fn test_non_conflict_errors_are_not_retried() {
        let ledger = Arc::new(InMemoryLedger::new());
        let driver = LedgerDriver::new(ledger, RetryPolicy::no_delay(5));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = driver
            .execute(move |_txn| {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(PatternError::not_found("Person", "x"))
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PatternError::NotFound { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reads_see_own_writes_and_delete() {
        let ledger = Arc::new(InMemoryLedger::new());
        let driver = LedgerDriver::new(ledger.clone(), RetryPolicy::no_delay(1));
        increment(&driver, "a").await.unwrap();

        let seen = driver
            .execute(|txn| {
                Box::pin(async move {
                    txn.delete(key("a"));
                    txn.get(&key("a")).await
                })
            })
            .await
            .unwrap();

        assert!(seen.is_none());
        assert_eq!(ledger.version(&key("a")), 0);
    }
}
