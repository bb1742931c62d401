use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::models::UpdatedBy;
use crate::store::MemoryShadowStore;

const WAIT: Duration = Duration::from_secs(2);

fn device() -> DeviceId {
    DeviceId::parse("luz_do_quarto").unwrap()
}

fn client_with(store: &MemoryShadowStore, options: ShadowOptions) -> ShadowClient {
    ShadowClient::new(Arc::new(store.clone()), options)
}

fn client(store: &MemoryShadowStore) -> ShadowClient {
    client_with(store, ShadowOptions::default())
}

async fn seed_desired(store: &MemoryShadowStore, on: bool, seq: i64) {
    let mut fields = Fields::new();
    fields.insert("on".to_string(), on.into());
    fields.insert("seq".to_string(), seq.into());
    store
        .set(&device().path(ShadowSlot::Desired), DocumentWrite::merge(fields))
        .await
        .unwrap();
}

async fn write_reported(store: &MemoryShadowStore, on: bool, by: &str) {
    let mut fields = Fields::new();
    fields.insert("on".to_string(), on.into());
    fields.insert("by".to_string(), by.into());
    fields.insert("updatedAt".to_string(), FieldValue::ServerTimestamp);
    store
        .set(&device().path(ShadowSlot::Reported), DocumentWrite::merge(fields))
        .await
        .unwrap();
}

#[tokio::test]
async fn toggle_from_existing_seq_increments_by_one() {
    let store = MemoryShadowStore::new();
    seed_desired(&store, false, 5).await;

    let desired = client(&store)
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();

    assert_eq!(desired.on, Some(true));
    assert_eq!(desired.seq, Some(6));
    assert_eq!(desired.source.as_deref(), Some("web"));
    assert_eq!(desired.uid.as_deref(), Some("web"));
    assert_eq!(
        desired.updated_by,
        Some(UpdatedBy {
            source: "web".to_string(),
            uid: "web".to_string(),
        })
    );
    assert!(desired.updated_at.is_some());
}

#[tokio::test]
async fn serial_toggles_increase_seq_by_exactly_one() {
    let store = MemoryShadowStore::new();
    let client = client_with(
        &store,
        ShadowOptions {
            seq_seed: SeqSeed::Fixed(0),
            ..ShadowOptions::default()
        },
    );
    let principal = Principal::from_uid(Some("user-1"));

    let mut seqs = Vec::new();
    for step in 0..6 {
        let desired = client
            .set_desired(&device(), step % 2 == 0, &principal)
            .await
            .unwrap();
        seqs.push(desired.seq.unwrap());
    }

    assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    let stored = client.fetch_desired(&device()).await.unwrap().unwrap();
    assert_eq!(stored.seq, Some(5));
    assert_eq!(stored.uid.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn whole_double_seq_written_by_other_clients_still_increments() {
    let store = MemoryShadowStore::new();
    let mut fields = Fields::new();
    fields.insert("on".to_string(), false.into());
    fields.insert("seq".to_string(), FieldValue::Double(5.0));
    store
        .set(&device().path(ShadowSlot::Desired), DocumentWrite::merge(fields))
        .await
        .unwrap();

    let desired = client(&store)
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();

    assert_eq!(desired.seq, Some(6));
}

#[test]
fn fractional_seq_restarts_from_seed() {
    let path = device().path(ShadowSlot::Desired);
    let with_seq = |seq: FieldValue| {
        let mut fields = Fields::new();
        fields.insert("seq".to_string(), seq);
        Snapshot {
            path: path.clone(),
            fields: Some(fields),
            update_time: None,
        }
    };

    assert_eq!(next_seq(&with_seq(FieldValue::Integer(41)), 0), 42);
    assert_eq!(next_seq(&with_seq(FieldValue::Double(41.0)), 0), 42);
    assert_eq!(next_seq(&with_seq(FieldValue::Double(41.5)), 7), 7);
    assert_eq!(next_seq(&with_seq("41".into()), 7), 7);
    assert_eq!(next_seq(&Snapshot::missing(path.clone()), 7), 7);
}

#[tokio::test]
async fn first_write_seeds_from_wall_clock_seconds() {
    let store = MemoryShadowStore::new();
    let before = Utc::now().timestamp();
    let desired = client(&store)
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();
    let after = Utc::now().timestamp();

    let seq = desired.seq.unwrap();
    assert!(seq >= before && seq <= after);
}

#[tokio::test]
async fn non_integer_seq_is_reseeded() {
    let store = MemoryShadowStore::new();
    let mut fields = Fields::new();
    fields.insert("seq".to_string(), "five".into());
    store
        .set(&device().path(ShadowSlot::Desired), DocumentWrite::merge(fields))
        .await
        .unwrap();

    let client = client_with(
        &store,
        ShadowOptions {
            seq_seed: SeqSeed::Fixed(100),
            ..ShadowOptions::default()
        },
    );
    let desired = client
        .set_desired(&device(), false, &Principal::from_uid(None))
        .await
        .unwrap();
    assert_eq!(desired.seq, Some(100));
}

#[tokio::test]
async fn update_preserves_fields_written_by_others() {
    let store = MemoryShadowStore::new();
    let mut fields = Fields::new();
    fields.insert("brightness".to_string(), 80_i64.into());
    fields.insert("seq".to_string(), 1_i64.into());
    store
        .set(&device().path(ShadowSlot::Desired), DocumentWrite::merge(fields))
        .await
        .unwrap();

    client(&store)
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();

    let snapshot = store.get(&device().path(ShadowSlot::Desired)).await.unwrap();
    assert_eq!(
        snapshot.fields.unwrap()["brightness"],
        FieldValue::Integer(80)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_toggles_from_two_clients_commit_distinct_seqs() {
    let store = MemoryShadowStore::new();
    seed_desired(&store, false, 5).await;
    let first = client(&store);
    let second = client(&store);
    let alice = Principal::from_uid(Some("alice"));
    let bob = Principal::from_uid(Some("bob"));

    let device = device();

    let (left, right) = tokio::join!(
        first.set_desired(&device, true, &alice),
        second.set_desired(&device, true, &bob),
    );

    let mut seqs = vec![left.unwrap().seq.unwrap(), right.unwrap().seq.unwrap()];
    seqs.sort_unstable();
    assert_eq!(seqs, vec![6, 7]);
}

#[tokio::test(flavor = "current_thread")]
async fn contended_transaction_surfaces_distinct_error() {
    let store = MemoryShadowStore::new().with_max_attempts(1);
    seed_desired(&store, false, 5).await;
    let client = client(&store);
    let principal = Principal::from_uid(None);

    let device = device();

    let (left, right) = tokio::join!(
        client.set_desired(&device, true, &principal),
        client.set_desired(&device, false, &principal),
    );

    let errors = [left, right]
        .into_iter()
        .filter_map(Result::err)
        .collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        ShadowError::Transaction {
            source: StoreError::Contention { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn failed_commit_is_not_retried_locally() {
    let store = MemoryShadowStore::new();
    seed_desired(&store, false, 5).await;
    store.fail_next_commits(1);

    let result = client(&store)
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await;
    assert!(matches!(result, Err(ShadowError::Transaction { .. })));

    let stored = client(&store).fetch_desired(&device()).await.unwrap().unwrap();
    assert_eq!(stored.seq, Some(5));
    assert_eq!(stored.on, Some(false));
}

#[tokio::test]
async fn refresh_reports_missing_then_synced() {
    let store = MemoryShadowStore::new();
    let client = client(&store);

    assert_eq!(
        client.refresh(&device()).await.unwrap(),
        RefreshOutcome::NoReportedYet
    );

    write_reported(&store, true, "esp32").await;
    match client.refresh(&device()).await.unwrap() {
        RefreshOutcome::Synced(reported) => {
            assert_eq!(reported.on, Some(true));
            assert_eq!(reported.by.as_deref(), Some("esp32"));
        }
        RefreshOutcome::NoReportedYet => panic!("expected reported state"),
    }
}

#[derive(Debug)]
enum Seen {
    Desired(Option<DesiredState>),
    Reported(Option<ReportedState>),
}

fn recording_handlers(sender: &mpsc::UnboundedSender<Seen>) -> ShadowHandlers {
    let desired_sender = sender.clone();
    let reported_sender = sender.clone();
    ShadowHandlers::new(
        move |desired| {
            let _ = desired_sender.send(Seen::Desired(desired));
        },
        move |reported| {
            let _ = reported_sender.send(Seen::Reported(reported));
        },
    )
}

async fn next_seen(receiver: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for snapshot")
        .expect("channel closed")
}

#[tokio::test]
async fn subscription_delivers_initial_and_updates_for_both_slots() {
    let store = MemoryShadowStore::new();
    let client = client(&store);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let _subscription = client.subscribe(&device(), recording_handlers(&sender));

    let mut initial_desired = false;
    let mut initial_reported = false;
    for _ in 0..2 {
        match next_seen(&mut receiver).await {
            Seen::Desired(None) => initial_desired = true,
            Seen::Reported(None) => initial_reported = true,
            other => panic!("unexpected initial snapshot {other:?}"),
        }
    }
    assert!(initial_desired && initial_reported);

    client
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();
    match next_seen(&mut receiver).await {
        Seen::Desired(Some(desired)) => assert_eq!(desired.on, Some(true)),
        other => panic!("expected desired update, got {other:?}"),
    }

    write_reported(&store, true, "esp32").await;
    match next_seen(&mut receiver).await {
        Seen::Reported(Some(reported)) => assert_eq!(reported.by.as_deref(), Some("esp32")),
        other => panic!("expected reported update, got {other:?}"),
    }
}

#[tokio::test]
async fn unsubscribe_stops_all_callbacks() {
    let store = MemoryShadowStore::new();
    let client = client(&store);
    let calls = Arc::new(AtomicUsize::new(0));
    let desired_calls = Arc::clone(&calls);
    let reported_calls = Arc::clone(&calls);
    let mut subscription = client.subscribe(
        &device(),
        ShadowHandlers::new(
            move |_| {
                desired_calls.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                reported_calls.fetch_add(1, Ordering::SeqCst);
            },
        ),
    );

    timeout(WAIT, async {
        while calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    subscription.unsubscribe();
    let settled = calls.load(Ordering::SeqCst);

    client
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();
    write_reported(&store, true, "esp32").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), settled);
    assert_eq!(store.listener_count(&device().path(ShadowSlot::Desired)), 0);
}

#[tokio::test]
async fn slots_unsubscribe_independently() {
    let store = MemoryShadowStore::new();
    let client = client(&store);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let mut subscription = client.subscribe(&device(), recording_handlers(&sender));
    next_seen(&mut receiver).await;
    next_seen(&mut receiver).await;

    subscription.unsubscribe_slot(ShadowSlot::Desired);
    assert!(!subscription.is_active(ShadowSlot::Desired));
    assert!(subscription.is_active(ShadowSlot::Reported));

    client
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();
    write_reported(&store, true, "esp32").await;

    match next_seen(&mut receiver).await {
        Seen::Reported(Some(_)) => {}
        other => panic!("only reported updates expected, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn dropped_listener_is_reestablished() {
    let store = MemoryShadowStore::new();
    let client = client_with(
        &store,
        ShadowOptions {
            reconnect: ReconnectPolicy {
                initial_delay_ms: 5,
                max_delay_ms: 20,
                ..ReconnectPolicy::default()
            },
            ..ShadowOptions::default()
        },
    );
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let _subscription = client.subscribe(&device(), recording_handlers(&sender));
    next_seen(&mut receiver).await;
    next_seen(&mut receiver).await;

    store.disconnect_listeners();
    // Each slot re-delivers its current document after reconnecting.
    next_seen(&mut receiver).await;
    next_seen(&mut receiver).await;

    client
        .set_desired(&device(), true, &Principal::from_uid(None))
        .await
        .unwrap();
    match next_seen(&mut receiver).await {
        Seen::Desired(Some(desired)) => assert_eq!(desired.on, Some(true)),
        other => panic!("expected desired update after reconnect, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_reconnects_report_subscription_error() {
    let store = MemoryShadowStore::new();
    let client = client_with(
        &store,
        ShadowOptions {
            reconnect: ReconnectPolicy {
                max_attempts: Some(0),
                ..ReconnectPolicy::default()
            },
            ..ShadowOptions::default()
        },
    );
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let (error_sender, mut errors) = mpsc::unbounded_channel();
    let handlers = recording_handlers(&sender).on_error(move |slot, error| {
        let _ = error_sender.send((slot, error.to_string()));
    });
    let _subscription = client.subscribe(&device(), handlers);
    next_seen(&mut receiver).await;
    next_seen(&mut receiver).await;

    store.disconnect_listeners();

    let mut slots = Vec::new();
    for _ in 0..2 {
        let (slot, message) = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        assert!(message.contains("disconnected"));
        slots.push(slot);
    }
    assert!(slots.contains(&ShadowSlot::Desired));
    assert!(slots.contains(&ShadowSlot::Reported));
}
