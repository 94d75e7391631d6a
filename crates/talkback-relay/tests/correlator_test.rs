use std::sync::Arc;
use std::time::Duration;
use talkback_relay::{
    Correlator, EnvelopeFormat, MemoryStore, PendingRequest, QueueRelay, QueueStore, RelayError,
    ReplyOutcome,
};

const INBOX: &str = "inbox:VoiceBot";

fn setup(format: EnvelopeFormat) -> (MemoryStore, Correlator) {
    let store = MemoryStore::new();
    let relay = QueueRelay::new(Arc::new(store.clone()), "message_queue", "inbox:");
    let correlator = Correlator::new(relay, "web", format, Duration::from_millis(500));
    (store, correlator)
}

async fn reply(correlator: &Correlator, envelope: &str) {
    correlator
        .relay()
        .deliver_to_inbox("VoiceBot", envelope)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn exact_match_is_replied() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);
    let request = PendingRequest::new(7, "abc123", Duration::from_secs(60));

    reply(&correlator, "to-web:7:abc123 world").await;

    let outcome = correlator.await_reply("VoiceBot", &request).await.unwrap();
    assert_eq!(outcome, ReplyOutcome::Replied("world".to_string()));
    assert!(store.is_empty(INBOX));
}

#[tokio::test(start_paused = true)]
async fn reply_arriving_mid_wait_is_picked_up() {
    let (_store, correlator) = setup(EnvelopeFormat::Correlated);
    let request = PendingRequest::new(7, "abc123", Duration::from_secs(60));

    let operator = correlator.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        reply(&operator, "to-web:7:abc123 later").await;
    });

    let outcome = correlator.await_reply("VoiceBot", &request).await.unwrap();
    assert_eq!(outcome, ReplyOutcome::Replied("later".to_string()));
    assert!(!request.is_expired());
}

#[tokio::test(start_paused = true)]
async fn mismatched_user_is_consumed_and_request_times_out() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);
    let request = PendingRequest::new(7, "abc123", Duration::from_secs(60));

    reply(&correlator, "to-web:9:abc123 world").await;

    let outcome = correlator.await_reply("VoiceBot", &request).await.unwrap();
    assert_eq!(outcome, ReplyOutcome::TimedOut);
    assert!(store.is_empty(INBOX), "mismatched entry must not be requeued");
    assert!(request.is_expired());
}

#[tokio::test(start_paused = true)]
async fn timeout_leaves_nothing_dangling() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);
    let request = PendingRequest::new(7, "abc123", Duration::from_secs(60));

    let started = tokio::time::Instant::now();
    let outcome = correlator.await_reply("VoiceBot", &request).await.unwrap();

    assert_eq!(outcome, ReplyOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(started.elapsed() < Duration::from_secs(61));
    assert!(store.is_empty(INBOX));
}

#[tokio::test(start_paused = true)]
async fn malformed_entries_are_dropped_before_the_match() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);
    let request = PendingRequest::new(7, "abc123", Duration::from_secs(60));

    // Pushed first, so served last.
    reply(&correlator, "to-web:7:abc123 world").await;
    reply(&correlator, "hello world").await;
    store.push_front(INBOX, "not json").await.unwrap();

    let outcome = correlator.await_reply("VoiceBot", &request).await.unwrap();
    assert_eq!(outcome, ReplyOutcome::Replied("world".to_string()));
    assert!(store.is_empty(INBOX));
}

#[tokio::test]
async fn newest_entry_is_served_first() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);

    reply(&correlator, "to-web:7:a A").await;
    reply(&correlator, "to-web:7:b B").await;

    let front = correlator.relay().peek_front(INBOX).await.unwrap().unwrap();
    assert!(front.contains("to-web:7:b B"));

    // Waiting for A consumes B on the way.
    let request = PendingRequest::new(7, "a", Duration::from_secs(60));
    let outcome = correlator.await_reply("VoiceBot", &request).await.unwrap();
    assert_eq!(outcome, ReplyOutcome::Replied("A".to_string()));
    assert!(store.is_empty(INBOX));
}

#[tokio::test(start_paused = true)]
async fn concurrent_waiters_each_get_one_verdict() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);

    reply(&correlator, "to-web:1:m1 one").await;
    assert_eq!(store.len(INBOX), 1);

    let first = PendingRequest::new(1, "m1", Duration::from_secs(5));
    let second = PendingRequest::new(2, "m2", Duration::from_secs(5));
    let (a, b) = tokio::join!(
        correlator.await_reply("VoiceBot", &first),
        correlator.await_reply("VoiceBot", &second),
    );

    // The single entry is popped by exactly one waiter.
    assert_eq!(a.unwrap(), ReplyOutcome::Replied("one".to_string()));
    assert_eq!(b.unwrap(), ReplyOutcome::TimedOut);
    assert!(store.is_empty(INBOX));
}

#[tokio::test(start_paused = true)]
async fn legacy_format_takes_the_first_reply() {
    let (store, correlator) = setup(EnvelopeFormat::Legacy);
    let request = PendingRequest::new(7, "ignored", Duration::from_secs(60));

    reply(&correlator, "to-web hi there").await;

    let outcome = correlator.await_reply("VoiceBot", &request).await.unwrap();
    assert_eq!(outcome, ReplyOutcome::Replied("hi there".to_string()));
    assert!(store.is_empty(INBOX));
}

#[tokio::test(start_paused = true)]
async fn store_outage_is_surfaced() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);
    let request = PendingRequest::new(7, "abc123", Duration::from_secs(60));

    store.set_unavailable(true);
    let err = correlator.await_reply("VoiceBot", &request).await.unwrap_err();
    assert!(matches!(err, RelayError::StoreUnavailable(_)));
}

#[tokio::test]
async fn outbound_request_lands_on_the_shared_queue() {
    let (store, correlator) = setup(EnvelopeFormat::Correlated);
    let envelope = correlator.encode_request(7, "abc123", "hello");

    correlator
        .relay()
        .send_request("VoiceBot", &envelope)
        .await
        .unwrap();

    let raw = store.pop_front("message_queue").await.unwrap().unwrap();
    let entry: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(entry["text"], "from-web:7:abc123 hello");
    assert_eq!(entry["recipient"], "VoiceBot");
}
