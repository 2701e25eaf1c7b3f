use std::time::Duration;

use shared::error::ErrorCode;

use super::*;
use crate::test_support::{harness, harness_on};

#[tokio::test]
async fn lawyer_message_is_stored_armed_and_listed() {
    let h = harness().await;
    let sent = send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "Hello")
        .await
        .expect("send");
    assert!(!sent.viewed);
    assert_eq!(sent.sender, SenderRef::User(h.lawyer.user_id));
    assert_eq!(
        sent.receiver_client.as_ref().map(|c| c.first_name.as_str()),
        Some("Carl")
    );
    assert!(h.ctx.scheduler.is_armed(sent.id).await);

    let history = list_case_messages(&h.ctx, &h.lawyer, h.case_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Hello");
    assert!(!history[0].viewed);
}

#[tokio::test]
async fn non_participant_receiver_is_rejected_without_a_row() {
    let h = harness().await;
    let err = send_message(&h.ctx, &h.client_login, h.case_id, h.other_client, "psst")
        .await
        .expect_err("stranger receiver");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let history = list_case_messages(&h.ctx, &h.lawyer, h.case_id)
        .await
        .expect("history");
    assert!(history.is_empty());
    assert_eq!(h.ctx.scheduler.pending_count().await, 0);
}

#[tokio::test]
async fn outsider_lawyer_cannot_send() {
    let h = harness().await;
    let err = send_message(&h.ctx, &h.outsider, h.case_id, h.client, "hi")
        .await
        .expect_err("outsider");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn empty_content_is_a_validation_error() {
    let h = harness().await;
    let err = send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "")
        .await
        .expect_err("empty");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn client_can_reply_in_its_case() {
    let h = harness().await;
    let sent = send_message(&h.ctx, &h.client_login, h.case_id, h.client, "Thanks")
        .await
        .expect("reply");
    assert_eq!(sent.sender, SenderRef::Client(h.client));
}

#[tokio::test]
async fn mark_viewed_transitions_once_and_cancels_timer() {
    let h = harness().await;
    let sent = send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "Hello")
        .await
        .expect("send");

    let first = mark_viewed(&h.ctx, &h.client_login, sent.id)
        .await
        .expect("first view");
    assert!(first.transitioned);
    assert!(first.message.viewed);
    assert!(first.notify_users.contains(&h.lawyer.user_id));
    assert!(first.notify_users.contains(&h.client_login.user_id));
    assert!(!h.ctx.scheduler.is_armed(sent.id).await);

    let second = mark_viewed(&h.ctx, &h.lawyer, sent.id)
        .await
        .expect("second view");
    assert!(!second.transitioned);
    assert!(second.notify_users.is_empty());
    assert_eq!(second.message.viewed_at, first.message.viewed_at);
}

#[tokio::test]
async fn only_receiver_or_responsible_lawyer_may_mark_viewed() {
    let h = harness().await;
    let sent = send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "Hello")
        .await
        .expect("send");
    let err = mark_viewed(&h.ctx, &h.outsider, sent.id)
        .await
        .expect_err("outsider");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = mark_viewed(&h.ctx, &h.admin, sent.id)
        .await
        .expect_err("admin");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn messages_of_other_tenants_are_not_found() {
    let h = harness().await;
    let sent = send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "Hello")
        .await
        .expect("send");
    let other = h.ctx.storage.create_tenant("globex").await.expect("tenant");
    let foreign = Identity {
        tenant_id: other,
        ..h.lawyer.clone()
    };
    let err = mark_viewed(&h.ctx, &foreign, sent.id)
        .await
        .expect_err("cross tenant");
    assert_eq!(err.code, ErrorCode::NotFound);
    let err = list_case_messages(&h.ctx, &foreign, h.case_id)
        .await
        .expect_err("cross tenant history");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn clients_only_see_their_own_thread() {
    let h = harness().await;
    h.ctx
        .storage
        .add_participant_client(
            h.case_id,
            h.other_client,
            shared::domain::CaseClientRole::OtherContact,
        )
        .await
        .expect("participant");
    send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "for carl")
        .await
        .expect("send");
    send_message(&h.ctx, &h.lawyer, h.case_id, h.other_client, "for olga")
        .await
        .expect("send");

    let carl = list_case_messages(&h.ctx, &h.client_login, h.case_id)
        .await
        .expect("client history");
    assert_eq!(carl.len(), 1);
    assert_eq!(carl[0].content, "for carl");

    let admin = list_case_messages(&h.ctx, &h.admin, h.case_id)
        .await
        .expect("admin history");
    assert_eq!(admin.len(), 2);
}

#[tokio::test]
async fn room_join_requires_read_access() {
    let h = harness().await;
    let client = authorize_room_join(&h.ctx, &h.client_login, h.case_id)
        .await
        .expect("client joins");
    assert_eq!(client, Actor::Client(h.client));
    let admin = authorize_room_join(&h.ctx, &h.admin, h.case_id)
        .await
        .expect("admin joins");
    assert_eq!(admin, Actor::Admin(h.admin.user_id));
    let err = authorize_room_join(&h.ctx, &h.outsider, h.case_id)
        .await
        .expect_err("outsider");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn room_visibility_matches_history_rules() {
    let h = harness().await;
    let to_carl = send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "Carl only")
        .await
        .expect("send");

    assert!(visible_to(Actor::Lawyer(h.outsider.user_id), &to_carl));
    assert!(visible_to(Actor::Admin(h.admin.user_id), &to_carl));
    assert!(visible_to(Actor::Client(h.client), &to_carl));
    assert!(!visible_to(Actor::Client(h.other_client), &to_carl));
}

#[tokio::test]
async fn concurrent_marks_on_a_pooled_database_transition_once() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("messages.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
    let h = harness_on(&database_url, Duration::from_secs(60)).await;
    let sent = send_message(&h.ctx, &h.lawyer, h.case_id, h.client, "Sign here")
        .await
        .expect("send");
    assert!(h.ctx.scheduler.is_armed(sent.id).await);

    let (by_client, by_lawyer) = tokio::join!(
        mark_viewed(&h.ctx, &h.client_login, sent.id),
        mark_viewed(&h.ctx, &h.lawyer, sent.id),
    );
    let by_client = by_client.expect("client mark");
    let by_lawyer = by_lawyer.expect("lawyer mark");

    assert_eq!(
        [by_client.transitioned, by_lawyer.transitioned]
            .iter()
            .filter(|t| **t)
            .count(),
        1
    );
    let losing = if by_client.transitioned { &by_lawyer } else { &by_client };
    assert!(losing.notify_users.is_empty());
    assert_eq!(by_client.message.viewed_at, by_lawyer.message.viewed_at);
    assert!(!h.ctx.scheduler.is_armed(sent.id).await);
}
