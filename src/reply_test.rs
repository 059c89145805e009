use super::*;
use crate::optimistic::OptimisticSendCoordinator;
use crate::reconcile::{self, ReconciliationEngine};
use crate::test_helpers::{ME, OTHER, confirmed, pending};
use crate::types::{Draft, LocalUser, TempId};

fn store_of(messages: Vec<Message>) -> ConversationStore {
    let mut store = ConversationStore::new();
    for message in messages {
        store.push(message);
    }
    store
}

#[test]
fn reply_keeps_quoting_parent_after_edit_and_delete() {
    let engine = ReconciliationEngine::new(ME);
    let mut coordinator = OptimisticSendCoordinator::new(LocalUser { id: ME, name: "Ann".into() });
    let mut store = store_of(vec![confirmed(10, OTHER, "Ship it", 100)]);

    let snapshot = capture(&store, MessageId::Server(10)).expect("capture");
    let draft = Draft { reply_to: Some(snapshot), ..Draft::text("On it") };
    let request = coordinator.begin_send(&mut store, 7, draft, 200).expect("send");
    assert_eq!(request.body.reply_to_message_id, Some(10));
    assert_eq!(quoted_snippet(&store.messages()[1]).as_deref(), Some("Ship it"));

    let mut server = confirmed(11, ME, "On it", 201);
    server.reply_to_id = Some(10);
    server.reply_to = store.messages()[1].reply_to.clone();
    coordinator.complete_send(&mut store, &engine, request.ticket, Ok(server));

    let mut edited = confirmed(10, OTHER, "Hold off", 100);
    edited.is_edited = true;
    reconcile::apply_update(&mut store, &edited);
    let reply = store.get(MessageId::Server(11)).expect("reply");
    assert_eq!(quoted_snippet(reply).as_deref(), Some("Ship it"));

    reconcile::apply_delete(&mut store, 10);
    let reply = store.get(MessageId::Server(11)).expect("reply");
    assert_eq!(quoted_snippet(reply).as_deref(), Some("Ship it"));
    assert!(!parent_available(&store, reply));
}

#[test]
fn capture_rejects_pending_and_unknown_parents() {
    let store = store_of(vec![pending(1, "draft", 100)]);
    assert!(matches!(capture(&store, MessageId::Temp(TempId(1))), Err(ChatError::ReplyTargetUnconfirmed)));
    assert!(matches!(capture(&store, MessageId::Server(9)), Err(ChatError::UnknownMessage(_))));
}

#[test]
fn snippet_truncates_long_parents_on_char_boundary() {
    let long = "é".repeat(SNIPPET_MAX_CHARS + 5);
    let mut reply = confirmed(2, ME, "yes", 1);
    reply.reply_to = Some(ReplySnapshot { id: 1, content: Some(long), sender_name: "Bo".into(), sender_id: OTHER });
    let snippet = quoted_snippet(&reply).expect("snippet");
    assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS + 1);
    assert!(snippet.ends_with('…'));
}

#[test]
fn snippet_for_attachment_only_parent_and_non_replies() {
    let mut reply = confirmed(2, ME, "nice", 1);
    assert_eq!(quoted_snippet(&reply), None);
    reply.reply_to = Some(ReplySnapshot { id: 1, content: None, sender_name: "Bo".into(), sender_id: OTHER });
    assert_eq!(quoted_snippet(&reply).as_deref(), Some(ATTACHMENT_ONLY_SNIPPET));
}

#[test]
fn reply_count_is_derived_from_the_store() {
    let mut a = confirmed(2, ME, "a", 2);
    a.reply_to_id = Some(1);
    let mut b = confirmed(3, OTHER, "b", 3);
    b.reply_to_id = Some(1);
    let mut store = store_of(vec![confirmed(1, OTHER, "root", 1), a, b]);
    assert_eq!(reply_count(&store, 1), 2);
    reconcile::apply_delete(&mut store, 3);
    assert_eq!(reply_count(&store, 1), 1);
    assert!(parent_available(&store, &store.messages()[1]));
}
