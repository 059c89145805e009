use super::*;
use crate::test_helpers::{ME, OTHER, confirmed, ids, pending};

fn store_of(messages: Vec<Message>) -> ConversationStore {
    let mut store = ConversationStore::new();
    for message in messages {
        store.push(message);
    }
    store
}

#[test]
fn insert_by_created_at_appends_newest_at_tail() {
    let mut store = store_of(vec![confirmed(1, OTHER, "a", 100), confirmed(2, OTHER, "b", 200)]);
    let index = store.insert_by_created_at(confirmed(3, OTHER, "c", 300));
    assert_eq!(index, 2);
}

#[test]
fn insert_by_created_at_steps_back_past_newer_entries() {
    let mut store = store_of(vec![confirmed(1, OTHER, "a", 100), confirmed(3, OTHER, "c", 300)]);
    let index = store.insert_by_created_at(confirmed(2, OTHER, "b", 200));
    assert_eq!(index, 1);
    assert_eq!(ids(store.messages()), vec![MessageId::Server(1), MessageId::Server(2), MessageId::Server(3)]);
}

#[test]
fn insert_by_created_at_keeps_arrival_order_for_equal_timestamps() {
    let mut store = store_of(vec![confirmed(1, OTHER, "a", 100)]);
    store.insert_by_created_at(confirmed(2, OTHER, "b", 100));
    assert_eq!(ids(store.messages()), vec![MessageId::Server(1), MessageId::Server(2)]);
}

#[test]
fn insert_by_created_at_goes_first_when_oldest() {
    let mut store = store_of(vec![confirmed(2, OTHER, "b", 200)]);
    assert_eq!(store.insert_by_created_at(confirmed(1, OTHER, "a", 100)), 0);
}

#[test]
fn replace_keeps_position() {
    let mut store = store_of(vec![pending(1, "hi", 100), confirmed(9, OTHER, "yo", 150)]);
    let index = store.replace(MessageId::Temp(TempId(1)), confirmed(501, ME, "hi", 100));
    assert_eq!(index, Ok(0));
    assert_eq!(ids(store.messages()), vec![MessageId::Server(501), MessageId::Server(9)]);
}

#[test]
fn replace_of_missing_entry_hands_the_message_back() {
    let mut store = store_of(vec![confirmed(9, OTHER, "yo", 150)]);
    let back = store.replace(MessageId::Temp(TempId(4)), confirmed(501, ME, "hi", 100));
    assert_eq!(back.map_err(|m| m.id), Err(MessageId::Server(501)));
    assert_eq!(ids(store.messages()), vec![MessageId::Server(9)]);
}

#[test]
fn remove_reports_former_index_and_insert_at_clamps() {
    let mut store = store_of(vec![confirmed(1, OTHER, "a", 1), confirmed(2, OTHER, "b", 2)]);
    let (index, removed) = store.remove(MessageId::Server(2)).expect("present");
    assert_eq!(index, 1);
    assert_eq!(store.insert_at(10, removed), 1);
    assert_eq!(store.remove(MessageId::Server(77)), None);
}

#[test]
fn first_pending_like_matches_trimmed_text_and_reply_target() {
    let mut reply = pending(2, "ok", 100);
    reply.reply_to_id = Some(10);
    let store = store_of(vec![pending(1, "ok", 90), reply]);

    let mut incoming = confirmed(501, ME, "  ok ", 100);
    incoming.reply_to_id = Some(10);
    assert_eq!(store.first_pending_like(ME, &incoming), Some(TempId(2)));

    let plain = confirmed(502, ME, "ok", 100);
    assert_eq!(store.first_pending_like(ME, &plain), Some(TempId(1)));
    assert_eq!(store.first_pending_like(OTHER, &plain), None);
    assert_eq!(store.first_pending_like(ME, &confirmed(503, ME, "other", 100)), None);
}

#[test]
fn pending_count_ignores_confirmed_entries() {
    let store = store_of(vec![pending(1, "a", 1), confirmed(2, ME, "b", 2), pending(3, "c", 3)]);
    assert_eq!(store.pending_count(), 2);
    assert_eq!(store.len(), 3);
    assert!(store.contains(MessageId::Temp(TempId(3))));
}
