use super::*;
use shared::{
    domain::{ChannelId, MessageId, UserId},
    protocol::AuthorDisplay,
};

fn batch(count: usize, start_second: i64) -> Vec<Message> {
    let base: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().expect("timestamp");
    (0..count)
        .map(|i| Message {
            id: MessageId::from(format!("m-{:04}", start_second + i as i64).as_str()),
            channel_id: ChannelId::from("ch-1"),
            author_id: UserId::from("u-1"),
            content: "hi".to_string(),
            created_at: base + chrono::Duration::seconds(start_second + i as i64),
            author_display: AuthorDisplay::Unresolved {
                user_id: UserId::from("u-1"),
            },
        })
        .collect()
}

#[test]
fn fresh_cursor_cannot_page_until_seeded() {
    let cursor = PaginationCursor::default();
    assert!(cursor.has_more);
    assert!(!cursor.loading);
    assert!(!cursor.can_load_older());
}

#[test]
fn seed_with_a_short_page_exhausts_history() {
    let mut cursor = PaginationCursor::default();
    let page = batch(30, 100);

    cursor.seed(&page, 50);

    assert!(!cursor.has_more);
    assert_eq!(cursor.oldest_loaded_at, Some(page[0].created_at));
    assert!(!cursor.can_load_older());
}

#[test]
fn seed_with_a_full_page_leaves_more_to_load() {
    let mut cursor = PaginationCursor::default();
    let page = batch(50, 100);

    cursor.seed(&page, 50);

    assert!(cursor.has_more);
    assert!(cursor.can_load_older());
}

#[test]
fn seed_with_an_empty_channel_leaves_cursor_unseeded() {
    let mut cursor = PaginationCursor::default();

    cursor.seed(&[], 50);

    assert_eq!(cursor.oldest_loaded_at, None);
    assert!(!cursor.has_more);
    assert!(!cursor.can_load_older());
}

#[test]
fn advance_moves_the_boundary_to_the_new_minimum() {
    let mut cursor = PaginationCursor::default();
    cursor.seed(&batch(50, 100), 50);

    let older = batch(50, 20);
    cursor.advance(&older, 50);

    assert_eq!(cursor.oldest_loaded_at, Some(older[0].created_at));
    assert!(cursor.has_more);
}

#[test]
fn advance_with_a_partial_page_exhausts_history() {
    let mut cursor = PaginationCursor::default();
    cursor.seed(&batch(50, 100), 50);

    cursor.advance(&batch(7, 40), 50);

    assert!(!cursor.has_more);
}

#[test]
fn advance_with_an_empty_batch_exhausts_without_moving() {
    let mut cursor = PaginationCursor::default();
    cursor.seed(&batch(50, 100), 50);
    let boundary = cursor.oldest_loaded_at;

    cursor.advance(&[], 50);

    assert!(!cursor.has_more);
    assert_eq!(cursor.oldest_loaded_at, boundary);
}

#[test]
fn loading_flag_blocks_reentrant_loads() {
    let mut cursor = PaginationCursor::default();
    cursor.seed(&batch(50, 100), 50);
    assert!(cursor.can_load_older());

    cursor.loading = true;
    assert!(!cursor.can_load_older());

    cursor.loading = false;
    assert!(cursor.can_load_older());
}
