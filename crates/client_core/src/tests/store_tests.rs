use super::*;
use chrono::{DateTime, Duration, Utc};
use shared::{domain::UserId, protocol::AuthorDisplay};

fn ts(seconds: i64) -> DateTime<Utc> {
    let base: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().expect("timestamp");
    base + Duration::seconds(seconds)
}

fn msg(id: &str, seconds: i64) -> Message {
    Message {
        id: MessageId::from(id),
        channel_id: ChannelId::from("ch-1"),
        author_id: UserId::from("u-1"),
        content: format!("message {id}"),
        created_at: ts(seconds),
        author_display: AuthorDisplay::Unresolved {
            user_id: UserId::from("u-1"),
        },
    }
}

#[test]
fn merge_is_idempotent() {
    let current = vec![msg("a", 0), msg("b", 1)];
    let batch = vec![msg("b", 1), msg("c", 2)];

    let once = merge(&current, batch.clone());
    let twice = merge(&once, batch);

    assert_eq!(once, twice);
}

#[test]
fn merge_overwrites_known_ids_with_incoming_fields() {
    let current = vec![msg("a", 0)];
    let mut replacement = msg("a", 0);
    replacement.content = "edited on the way in".to_string();

    let merged = merge(&current, vec![replacement.clone()]);

    assert_eq!(merged, vec![replacement]);
}

#[test]
fn merge_never_yields_duplicate_ids() {
    let current = vec![msg("a", 0), msg("b", 1)];
    let merged = merge(&current, vec![msg("b", 1), msg("b", 1), msg("c", 2)]);

    let mut ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), merged.len());
    assert_eq!(merged.len(), 3);
}

#[test]
fn merge_sorts_by_timestamp_then_id() {
    let merged = merge(&[], vec![msg("b", 5), msg("c", 5), msg("a", 9), msg("d", 1)]);

    let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["d", "b", "c", "a"]);
}

#[test]
fn merge_order_is_independent_of_arrival_order() {
    let first = msg("t1", 1);
    let second = msg("t2", 2);

    let forward = merge(&merge(&[], vec![first.clone()]), vec![second.clone()]);
    let backward = merge(&merge(&[], vec![second]), vec![first]);

    assert_eq!(forward, backward);
    assert_eq!(forward[0].id.as_str(), "t1");
    assert_eq!(forward[1].id.as_str(), "t2");
}

#[test]
fn confirm_swaps_pending_entry_for_persisted_row() {
    let mut store = MessageStore::new(ChannelId::from("ch-1"));
    let mut pending = msg("x", 3);
    pending.id = MessageId::local();
    let local_id = pending.id.clone();
    store.apply(vec![msg("a", 0), pending]);

    let mut confirmed = msg("m-100", 4);
    confirmed.content = "message x".to_string();
    let snapshot = store.confirm(&local_id, confirmed);

    assert_eq!(snapshot.len(), 2);
    assert!(!store.contains(&local_id));
    assert_eq!(snapshot[1].id.as_str(), "m-100");
    assert_eq!(snapshot[1].content, "message x");
}

#[test]
fn confirm_collapses_with_row_already_delivered_by_the_feed() {
    let mut store = MessageStore::new(ChannelId::from("ch-1"));
    let mut pending = msg("x", 3);
    pending.id = MessageId::local();
    let local_id = pending.id.clone();
    // The row feed may beat the insert acknowledgement to the store.
    store.apply(vec![pending, msg("m-100", 4)]);

    let snapshot = store.confirm(&local_id, msg("m-100", 4));

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id.as_str(), "m-100");
}

#[test]
fn remove_discards_the_entry_and_keeps_order() {
    let mut store = MessageStore::new(ChannelId::from("ch-1"));
    store.apply(vec![msg("a", 0), msg("b", 1), msg("c", 2)]);

    let snapshot = store.remove(&MessageId::from("b"));

    let ids: Vec<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert!(!store.is_empty());
    assert_eq!(store.len(), 2);
}
