//! In-process shadow store with optimistic per-document transactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

use super::{
    DocumentWrite, Mutator, ShadowStore, Snapshot, SnapshotStream, StoreError, StoreResult,
};
use crate::models::{merge_fields, resolve_server_timestamps, ShadowPath};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const NOTIFICATION_CAPACITY: usize = 64;
const LISTENER_BUFFER: usize = 16;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
enum Notification {
    Changed(Snapshot),
    Disconnected,
}

struct DocumentEntry {
    fields: Option<crate::models::Fields>,
    update_time: Option<DateTime<Utc>>,
    version: u64,
    notifier: broadcast::Sender<Notification>,
}

impl DocumentEntry {
    fn new() -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            fields: None,
            update_time: None,
            version: 0,
            notifier,
        }
    }

    fn snapshot(&self, path: &ShadowPath) -> Snapshot {
        Snapshot {
            path: path.clone(),
            fields: self.fields.clone(),
            update_time: self.update_time,
        }
    }
}

#[derive(Default)]
struct State {
    documents: HashMap<ShadowPath, DocumentEntry>,
    failing_commits: u32,
}

impl State {
    fn entry(&mut self, path: &ShadowPath) -> &mut DocumentEntry {
        self.documents
            .entry(path.clone())
            .or_insert_with(DocumentEntry::new)
    }
}

/// Shadow store kept in process memory.
///
/// Transactions are optimistic: the mutator runs against a versioned
/// pre-image and the commit only lands if the version is unchanged, otherwise
/// the transaction is retried up to the attempt budget.
#[derive(Clone)]
pub struct MemoryShadowStore {
    state: Arc<Mutex<State>>,
    max_attempts: u32,
    clock: Clock,
}

impl Default for MemoryShadowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryShadowStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            clock: Arc::new(Utc::now),
        }
    }

    /// Number of times a contended transaction is attempted before aborting.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Source of commit times used to resolve server timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Make the next `count` commits fail as if the backend were unreachable.
    pub fn fail_next_commits(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_commits = count;
        }
    }

    /// Drop every open listener, as a lost realtime connection would.
    pub fn disconnect_listeners(&self) {
        if let Ok(state) = self.state.lock() {
            for entry in state.documents.values() {
                let _ = entry.notifier.send(Notification::Disconnected);
            }
        }
    }

    /// Number of listeners currently attached to `path`.
    pub fn listener_count(&self, path: &ShadowPath) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|state| {
                state
                    .documents
                    .get(path)
                    .map(|entry| entry.notifier.receiver_count())
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn read_versioned(&self, path: &ShadowPath) -> StoreResult<(Snapshot, u64)> {
        let state = self.lock()?;
        Ok(state.documents.get(path).map_or_else(
            || (Snapshot::missing(path.clone()), 0),
            |entry| (entry.snapshot(path), entry.version),
        ))
    }

    /// Apply `write` if the document is still at `expected_version`.
    ///
    /// `None` as the expected version skips the check.
    fn commit(
        &self,
        path: &ShadowPath,
        expected_version: Option<u64>,
        write: DocumentWrite,
    ) -> StoreResult<Option<Snapshot>> {
        let now = (self.clock)();
        let mut state = self.lock()?;
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(StoreError::Unavailable(format!(
                "commit to {path} failed: backend unreachable"
            )));
        }

        let entry = state.entry(path);
        if expected_version.is_some_and(|expected| expected != entry.version) {
            return Ok(None);
        }

        let DocumentWrite { mut fields, merge } = write;
        resolve_server_timestamps(&mut fields, now);
        match (&mut entry.fields, merge) {
            (Some(existing), true) => merge_fields(existing, fields),
            (slot, _) => *slot = Some(fields),
        }
        entry.version += 1;
        entry.update_time = Some(now);

        let snapshot = entry.snapshot(path);
        let _ = entry.notifier.send(Notification::Changed(snapshot.clone()));
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl ShadowStore for MemoryShadowStore {
    async fn get(&self, path: &ShadowPath) -> StoreResult<Snapshot> {
        Ok(self.read_versioned(path)?.0)
    }

    async fn set(&self, path: &ShadowPath, write: DocumentWrite) -> StoreResult<Snapshot> {
        self.commit(path, None, write)?
            .ok_or_else(|| StoreError::Unavailable(format!("unconditional write to {path} lost")))
    }

    async fn run_transaction(
        &self,
        path: &ShadowPath,
        mutator: Mutator<'_>,
    ) -> StoreResult<Snapshot> {
        for attempt in 1..=self.max_attempts {
            let (pre_image, version) = self.read_versioned(path)?;
            let write = mutator(&pre_image);
            // A remote commit is a suspension point; other writers may land here.
            tokio::task::yield_now().await;

            if let Some(committed) = self.commit(path, Some(version), write)? {
                return Ok(committed);
            }
            tracing::debug!("Transaction on {} lost a race (attempt {})", path, attempt);
        }

        Err(StoreError::Contention {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }

    fn listen(&self, path: &ShadowPath) -> StoreResult<SnapshotStream> {
        let (initial, mut notifications) = {
            let mut state = self.lock()?;
            let entry = state.entry(path);
            (entry.snapshot(path), entry.notifier.subscribe())
        };

        let (sender, receiver) = mpsc::channel(LISTENER_BUFFER);
        let path = path.clone();
        let task = tokio::spawn(async move {
            if sender.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                let item = match notifications.recv().await {
                    Ok(Notification::Changed(snapshot)) => Ok(snapshot),
                    Ok(Notification::Disconnected) => {
                        Err(StoreError::Disconnected(path.to_string()))
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Listener for {} skipped {} snapshot(s)", path, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => return,
                };
                let done = item.is_err();
                if sender.send(item).await.is_err() || done {
                    return;
                }
            }
        });

        Ok(SnapshotStream::new(receiver, task))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{DeviceId, FieldValue, Fields, ShadowSlot};

    fn desired_path() -> ShadowPath {
        DeviceId::parse("luz_do_quarto")
            .unwrap()
            .path(ShadowSlot::Desired)
    }

    fn counter_write(snapshot: &Snapshot) -> DocumentWrite {
        let current = snapshot
            .fields
            .as_ref()
            .and_then(|fields| fields.get("n"))
            .and_then(FieldValue::as_integer)
            .unwrap_or(0);
        let mut fields = Fields::new();
        fields.insert("n".to_string(), (current + 1).into());
        DocumentWrite::merge(fields)
    }

    #[tokio::test]
    async fn missing_document_reads_as_not_found() {
        let store = MemoryShadowStore::new();
        let snapshot = store.get(&desired_path()).await.unwrap();
        assert!(!snapshot.exists());
    }

    #[tokio::test]
    async fn merge_write_preserves_other_fields() {
        let store = MemoryShadowStore::new();
        let path = desired_path();
        let mut first = Fields::new();
        first.insert("a".to_string(), 1_i64.into());
        first.insert("b".to_string(), 2_i64.into());
        store.set(&path, DocumentWrite::replace(first)).await.unwrap();

        let mut second = Fields::new();
        second.insert("b".to_string(), 3_i64.into());
        let snapshot = store.set(&path, DocumentWrite::merge(second)).await.unwrap();

        let fields = snapshot.fields.unwrap();
        assert_eq!(fields["a"], FieldValue::Integer(1));
        assert_eq!(fields["b"], FieldValue::Integer(3));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_transactions_never_share_a_pre_image() {
        let store = MemoryShadowStore::new();
        let path = desired_path();

        let (left, right) = tokio::join!(
            store.run_transaction(&path, &counter_write),
            store.run_transaction(&path, &counter_write),
        );

        let mut committed = vec![
            left.unwrap().fields.unwrap()["n"].as_integer(),
            right.unwrap().fields.unwrap()["n"].as_integer(),
        ];
        committed.sort_unstable();
        assert_eq!(committed, vec![Some(1), Some(2)]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn exhausted_attempts_abort_with_contention() {
        let store = MemoryShadowStore::new().with_max_attempts(1);
        let path = desired_path();

        let (left, right) = tokio::join!(
            store.run_transaction(&path, &counter_write),
            store.run_transaction(&path, &counter_write),
        );

        let failures = [&left, &right].iter().filter(|result| result.is_err()).count();
        assert_eq!(failures, 1);
        assert!([left, right]
            .into_iter()
            .any(|result| matches!(result, Err(StoreError::Contention { attempts: 1, .. }))));
    }

    #[tokio::test]
    async fn injected_commit_failure_surfaces_once() {
        let store = MemoryShadowStore::new();
        let path = desired_path();
        store.fail_next_commits(1);

        assert!(matches!(
            store.run_transaction(&path, &counter_write).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.run_transaction(&path, &counter_write).await.is_ok());
    }

    #[tokio::test]
    async fn listener_receives_initial_then_changes() {
        let store = MemoryShadowStore::new();
        let path = desired_path();
        let mut stream = store.listen(&path).unwrap();

        let initial = stream.next().await.unwrap().unwrap();
        assert!(!initial.exists());

        store.run_transaction(&path, &counter_write).await.unwrap();
        let changed = stream.next().await.unwrap().unwrap();
        assert_eq!(changed.fields.unwrap()["n"], FieldValue::Integer(1));
    }

    #[tokio::test]
    async fn disconnect_ends_listener_with_error() {
        let store = MemoryShadowStore::new();
        let path = desired_path();
        let mut stream = store.listen(&path).unwrap();
        stream.next().await.unwrap().unwrap();

        store.disconnect_listeners();
        assert!(matches!(
            stream.next().await,
            Some(Err(StoreError::Disconnected(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn server_timestamp_uses_store_clock() {
        let fixed = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let store = MemoryShadowStore::new().with_clock(move || fixed);
        let path = desired_path();
        let mut fields = Fields::new();
        fields.insert("updatedAt".to_string(), FieldValue::ServerTimestamp);

        let snapshot = store.set(&path, DocumentWrite::merge(fields)).await.unwrap();
        assert_eq!(
            snapshot.fields.unwrap()["updatedAt"],
            FieldValue::Timestamp(fixed)
        );
        assert_eq!(snapshot.update_time, Some(fixed));
    }
}
