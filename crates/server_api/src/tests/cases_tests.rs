use shared::{
    domain::{CaseClientRole, CaseStatus, CaseUserRole},
    error::ErrorCode,
};

use super::*;
use crate::test_support::{harness, staff};

fn create_request(client_id: ClientId) -> CreateCaseRequest {
    CreateCaseRequest {
        title: "Estate of Diaz".to_string(),
        description: Some("Probate filing".to_string()),
        status: "In Progress".to_string(),
        client_id,
    }
}

#[tokio::test]
async fn create_case_returns_primary_participants() {
    let h = harness().await;
    let detail = create_case(&h.ctx, &h.lawyer, &create_request(h.client))
        .await
        .expect("create");
    assert_eq!(detail.case.status, CaseStatus::InProgress);
    assert_eq!(detail.case.lawyer_primary_id, h.lawyer.user_id);
    assert_eq!(detail.participants_users.len(), 1);
    assert_eq!(
        detail.participants_users[0].role_in_case,
        CaseUserRole::LeadLawyer
    );
    assert_eq!(detail.participants_clients.len(), 1);
    assert_eq!(
        detail.participants_clients[0].participation,
        CaseClientRole::MainContact
    );
    assert!(detail.messages.is_empty());
}

#[tokio::test]
async fn create_case_for_unknown_client_is_not_found() {
    let h = harness().await;
    let err = create_case(&h.ctx, &h.lawyer, &create_request(ClientId(9999)))
        .await
        .expect_err("unknown client");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn create_case_requires_permission() {
    let h = harness().await;
    let mut limited = h.lawyer.clone();
    limited.permissions.clear();
    let err = create_case(&h.ctx, &limited, &create_request(h.client))
        .await
        .expect_err("no permission");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn create_case_validates_fields() {
    let h = harness().await;
    let request = CreateCaseRequest {
        title: String::new(),
        description: None,
        status: "Archived".to_string(),
        client_id: h.client,
    };
    let err = create_case(&h.ctx, &h.lawyer, &request)
        .await
        .expect_err("invalid");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.errors.len(), 2);
}

#[tokio::test]
async fn client_lists_only_its_cases() {
    let h = harness().await;
    create_case(&h.ctx, &h.lawyer, &create_request(h.other_client))
        .await
        .expect("second case");

    let mine = list_cases(&h.ctx, &h.client_login, None)
        .await
        .expect("client list");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, h.case_id);

    let all = list_cases(&h.ctx, &h.admin, None).await.expect("admin list");
    assert_eq!(all.len(), 2);

    let filtered = list_cases(&h.ctx, &h.admin, Some(h.other_client))
        .await
        .expect("filtered");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].client_primary_id, h.other_client);
}

#[tokio::test]
async fn staff_listing_needs_view_all_permission() {
    let h = harness().await;
    let mut limited = h.lawyer.clone();
    limited.permissions.clear();
    let err = list_cases(&h.ctx, &limited, None)
        .await
        .expect_err("no permission");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn cross_tenant_case_is_not_found() {
    let h = harness().await;
    let other = h.ctx.storage.create_tenant("globex").await.expect("tenant");
    let foreign_admin = staff(&h.ctx, other, "gus@globex.test", "Gus", Role::Admin).await;
    let err = get_case(&h.ctx, &foreign_admin, h.case_id)
        .await
        .expect_err("cross tenant");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn admin_reads_but_cannot_edit_foreign_case() {
    let h = harness().await;
    get_case(&h.ctx, &h.admin, h.case_id)
        .await
        .expect("admin read");
    let err = update_case(
        &h.ctx,
        &h.admin,
        h.case_id,
        &UpdateCaseRequest {
            title: Some("Renamed".to_string()),
            ..UpdateCaseRequest::default()
        },
    )
    .await
    .expect_err("admin write");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn lead_lawyer_updates_status_only() {
    let h = harness().await;
    let updated = update_case(
        &h.ctx,
        &h.lawyer,
        h.case_id,
        &UpdateCaseRequest {
            status: Some("Closed".to_string()),
            ..UpdateCaseRequest::default()
        },
    )
    .await
    .expect("update");
    assert_eq!(updated.status, CaseStatus::Closed);
    assert_eq!(updated.title, "Diaz v. Landlord");
}

#[tokio::test]
async fn support_lawyer_gains_write_access() {
    let h = harness().await;
    let err = delete_case(&h.ctx, &h.outsider, h.case_id)
        .await
        .expect_err("not yet a participant");
    assert_eq!(err.code, ErrorCode::Forbidden);

    add_participant_user(
        &h.ctx,
        &h.lawyer,
        h.case_id,
        &AddParticipantUserRequest {
            user_id: h.outsider.user_id,
            role_in_case: CaseUserRole::SupportLawyer,
        },
    )
    .await
    .expect("add support");

    delete_case(&h.ctx, &h.outsider, h.case_id)
        .await
        .expect("delete");
    let err = get_case(&h.ctx, &h.lawyer, h.case_id)
        .await
        .expect_err("gone");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn duplicate_participants_conflict() {
    let h = harness().await;
    let err = add_participant_client(
        &h.ctx,
        &h.lawyer,
        h.case_id,
        &AddParticipantClientRequest {
            client_id: h.client,
            participation: CaseClientRole::OtherContact,
        },
    )
    .await
    .expect_err("primary client again");
    assert_eq!(err.code, ErrorCode::Conflict);

    let clients = add_participant_client(
        &h.ctx,
        &h.lawyer,
        h.case_id,
        &AddParticipantClientRequest {
            client_id: h.other_client,
            participation: CaseClientRole::OtherContact,
        },
    )
    .await
    .expect("add other");
    assert_eq!(clients.len(), 2);
}

#[tokio::test]
async fn detail_hides_other_threads_from_clients() {
    let h = harness().await;
    add_participant_client(
        &h.ctx,
        &h.lawyer,
        h.case_id,
        &AddParticipantClientRequest {
            client_id: h.other_client,
            participation: CaseClientRole::OtherContact,
        },
    )
    .await
    .expect("add other");
    messages::send_message(&h.ctx, &h.lawyer, h.case_id, h.other_client, "private")
        .await
        .expect("send");

    let detail = get_case(&h.ctx, &h.client_login, h.case_id)
        .await
        .expect("client detail");
    assert!(detail.messages.is_empty());
    assert_eq!(detail.participants_clients.len(), 2);
}
