use super::*;

struct Fixture {
    storage: Storage,
    tenant: TenantId,
    lawyer: UserId,
    client: ClientId,
    case_id: CaseId,
}

async fn fixture() -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let tenant = storage.create_tenant("acme").await.expect("tenant");
    let lawyer = storage
        .create_user(
            tenant,
            NewUser {
                email: "lena@acme.test",
                first_name: "Lena",
                last_name: "Park",
                role: Role::Lawyer,
            },
        )
        .await
        .expect("lawyer");
    let client = storage
        .create_client(
            tenant,
            NewClient {
                first_name: "Carl",
                last_name: "Diaz",
                email: Some("carl@mail.test"),
                ..NewClient::default()
            },
        )
        .await
        .expect("client");
    let case_id = storage
        .create_case(
            tenant,
            NewCase {
                title: "Diaz v. Landlord",
                description: None,
                status: CaseStatus::Open,
                lawyer_primary_id: lawyer,
                client_primary_id: client,
            },
        )
        .await
        .expect("case");
    Fixture {
        storage,
        tenant,
        lawyer,
        client,
        case_id,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn create_case_records_primary_participants() {
    let f = fixture().await;

    let users = f
        .storage
        .list_participant_users(f.case_id)
        .await
        .expect("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, f.lawyer);
    assert_eq!(users[0].role_in_case, CaseUserRole::LeadLawyer);

    let clients = f
        .storage
        .list_participant_clients(f.case_id)
        .await
        .expect("clients");
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].client_id, f.client);
    assert_eq!(clients[0].participation, CaseClientRole::MainContact);
}

#[tokio::test]
async fn create_case_rejects_client_from_other_tenant() {
    let f = fixture().await;
    let other = f.storage.create_tenant("globex").await.expect("tenant");
    let foreign_client = f
        .storage
        .create_client(
            other,
            NewClient {
                first_name: "Fay",
                last_name: "Ng",
                ..NewClient::default()
            },
        )
        .await
        .expect("client");

    let result = f
        .storage
        .create_case(
            f.tenant,
            NewCase {
                title: "Crossed wires",
                description: None,
                status: CaseStatus::Open,
                lawyer_primary_id: f.lawyer,
                client_primary_id: foreign_client,
            },
        )
        .await;
    assert!(result.is_err());
    let cases = f
        .storage
        .list_cases(f.tenant, CaseListFilter::default())
        .await
        .expect("cases");
    assert_eq!(cases.len(), 1);
}

#[tokio::test]
async fn participants_union_primaries_with_join_tables() {
    let f = fixture().await;
    let support = f
        .storage
        .create_user(
            f.tenant,
            NewUser {
                email: "sam@acme.test",
                first_name: "Sam",
                last_name: "Okafor",
                role: Role::Lawyer,
            },
        )
        .await
        .expect("support");
    f.storage
        .add_participant_user(f.case_id, support, CaseUserRole::SupportLawyer)
        .await
        .expect("add support");

    let participants = f
        .storage
        .case_participants(f.tenant, f.case_id)
        .await
        .expect("participants")
        .expect("case exists");
    assert_eq!(participants.primary_lawyer, f.lawyer);
    assert!(participants.lawyer_ids.contains(&f.lawyer));
    assert!(participants.lawyer_ids.contains(&support));
    assert_eq!(
        participants.client_ids.iter().copied().collect::<Vec<_>>(),
        vec![f.client]
    );
}

#[tokio::test]
async fn duplicate_participant_is_a_unique_violation() {
    let f = fixture().await;
    let err = f
        .storage
        .add_participant_client(f.case_id, f.client, CaseClientRole::OtherContact)
        .await
        .expect_err("duplicate participant");
    assert!(is_unique_violation(&err));
}

#[tokio::test]
async fn case_lookups_are_tenant_scoped() {
    let f = fixture().await;
    let other = f.storage.create_tenant("globex").await.expect("tenant");

    assert!(f
        .storage
        .get_case(other, f.case_id)
        .await
        .expect("lookup")
        .is_none());
    assert!(f
        .storage
        .case_participants(other, f.case_id)
        .await
        .expect("lookup")
        .is_none());
    assert!(!f.storage.delete_case(other, f.case_id).await.expect("delete"));
}

#[tokio::test]
async fn update_case_applies_only_supplied_fields() {
    let f = fixture().await;
    let updated = f
        .storage
        .update_case(
            f.tenant,
            f.case_id,
            CaseChanges {
                status: Some(CaseStatus::OnHold),
                ..CaseChanges::default()
            },
        )
        .await
        .expect("update")
        .expect("case exists");
    assert_eq!(updated.status, CaseStatus::OnHold);
    assert_eq!(updated.title, "Diaz v. Landlord");
    assert!(updated.updated_at >= updated.created_at);
}

#[tokio::test]
async fn mark_viewed_transitions_exactly_once() {
    let f = fixture().await;
    let message = f
        .storage
        .insert_message(NewMessage {
            tenant_id: f.tenant,
            case_id: f.case_id,
            content: "Please sign the attached form",
            sender: SenderRef::User(f.lawyer),
            receiver_client_id: f.client,
        })
        .await
        .expect("message");
    assert!(!message.viewed);
    assert!(message.viewed_at.is_none());

    let first = f
        .storage
        .mark_message_viewed(f.tenant, message.message_id)
        .await
        .expect("first mark")
        .expect("message exists");
    assert!(matches!(first, ViewTransition::Transitioned(_)));
    let first_viewed_at = first.message().viewed_at;
    assert!(first_viewed_at.is_some());

    let second = f
        .storage
        .mark_message_viewed(f.tenant, message.message_id)
        .await
        .expect("second mark")
        .expect("message exists");
    assert!(matches!(second, ViewTransition::AlreadyViewed(_)));
    assert_eq!(second.message().viewed_at, first_viewed_at);
}

#[tokio::test]
async fn mark_viewed_from_other_tenant_finds_nothing() {
    let f = fixture().await;
    let other = f.storage.create_tenant("globex").await.expect("tenant");
    let message = f
        .storage
        .insert_message(NewMessage {
            tenant_id: f.tenant,
            case_id: f.case_id,
            content: "hello",
            sender: SenderRef::User(f.lawyer),
            receiver_client_id: f.client,
        })
        .await
        .expect("message");

    let outcome = f
        .storage
        .mark_message_viewed(other, message.message_id)
        .await
        .expect("mark");
    assert!(outcome.is_none());
    let reloaded = f
        .storage
        .load_message(f.tenant, message.message_id)
        .await
        .expect("load")
        .expect("message exists");
    assert!(!reloaded.viewed);
}

#[tokio::test]
async fn client_visibility_filters_history() {
    let f = fixture().await;
    let other_client = f
        .storage
        .create_client(
            f.tenant,
            NewClient {
                first_name: "Olga",
                last_name: "Berg",
                ..NewClient::default()
            },
        )
        .await
        .expect("client");
    f.storage
        .add_participant_client(f.case_id, other_client, CaseClientRole::OtherContact)
        .await
        .expect("participant");

    for (content, receiver) in [("one", f.client), ("two", other_client), ("three", f.client)] {
        f.storage
            .insert_message(NewMessage {
                tenant_id: f.tenant,
                case_id: f.case_id,
                content,
                sender: SenderRef::User(f.lawyer),
                receiver_client_id: receiver,
            })
            .await
            .expect("message");
    }

    let all = f
        .storage
        .list_case_messages(f.tenant, f.case_id, MessageVisibility::All)
        .await
        .expect("all");
    assert_eq!(
        all.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["one", "two", "three"]
    );

    let mine = f
        .storage
        .list_case_messages(f.tenant, f.case_id, MessageVisibility::Client(f.client))
        .await
        .expect("client view");
    assert_eq!(
        mine.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["one", "three"]
    );
}

#[tokio::test]
async fn notification_target_reflects_current_viewed_flag() {
    let f = fixture().await;
    let message = f
        .storage
        .insert_message(NewMessage {
            tenant_id: f.tenant,
            case_id: f.case_id,
            content: "Hearing moved",
            sender: SenderRef::User(f.lawyer),
            receiver_client_id: f.client,
        })
        .await
        .expect("message");

    let before = f
        .storage
        .notification_target(message.message_id)
        .await
        .expect("target")
        .expect("exists");
    assert!(!before.viewed);
    assert_eq!(before.case_title, "Diaz v. Landlord");
    assert_eq!(before.receiver_email.as_deref(), Some("carl@mail.test"));

    f.storage
        .mark_message_viewed(f.tenant, message.message_id)
        .await
        .expect("mark");
    let after = f
        .storage
        .notification_target(message.message_id)
        .await
        .expect("target")
        .expect("exists");
    assert!(after.viewed);
}

#[tokio::test]
async fn deleting_case_removes_messages() {
    let f = fixture().await;
    let message = f
        .storage
        .insert_message(NewMessage {
            tenant_id: f.tenant,
            case_id: f.case_id,
            content: "bye",
            sender: SenderRef::Client(f.client),
            receiver_client_id: f.client,
        })
        .await
        .expect("message");

    assert!(f.storage.delete_case(f.tenant, f.case_id).await.expect("delete"));
    assert!(f
        .storage
        .load_message(f.tenant, message.message_id)
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn invite_redeems_once() {
    let f = fixture().await;
    let expires_at = Utc::now() + chrono::Duration::hours(24);
    let invite_id = f
        .storage
        .create_invite(NewInvite {
            tenant_id: f.tenant,
            case_id: f.case_id,
            email: "new@mail.test",
            token: "tok-123",
            expires_at,
        })
        .await
        .expect("invite");
    assert!(f
        .storage
        .has_pending_invite(f.tenant, f.case_id, "NEW@mail.test", Utc::now())
        .await
        .expect("pending"));

    let invite = f
        .storage
        .load_invite_by_token("tok-123")
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(invite.invite_id, invite_id);
    assert!(!invite.is_used);

    let newcomer = f
        .storage
        .redeem_invite(invite_id, "Nia", "Cole")
        .await
        .expect("redeem")
        .expect("first redemption wins");
    assert!(f
        .storage
        .redeem_invite(invite_id, "Nia", "Cole")
        .await
        .expect("second redeem")
        .is_none());
    let created = f
        .storage
        .get_client(f.tenant, newcomer)
        .await
        .expect("lookup")
        .expect("client created");
    assert_eq!(created.email.as_deref(), Some("new@mail.test"));
    assert_eq!(created.first_name, "Nia");

    let participants = f
        .storage
        .case_participants(f.tenant, f.case_id)
        .await
        .expect("participants")
        .expect("case");
    assert!(participants.client_ids.contains(&newcomer));
    assert!(!f
        .storage
        .has_pending_invite(f.tenant, f.case_id, "new@mail.test", Utc::now())
        .await
        .expect("pending"));
}

#[tokio::test]
async fn redemption_reuses_client_with_matching_email() {
    let f = fixture().await;
    let invite_id = f
        .storage
        .create_invite(NewInvite {
            tenant_id: f.tenant,
            case_id: f.case_id,
            email: "CARL@mail.test",
            token: "tok-carl",
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
        .await
        .expect("invite");
    let redeemed = f
        .storage
        .redeem_invite(invite_id, "Carlos", "Diaz")
        .await
        .expect("redeem");
    assert_eq!(redeemed, Some(f.client));
    assert_eq!(f.storage.list_clients(f.tenant).await.expect("clients").len(), 1);
}

#[tokio::test]
async fn update_client_is_tenant_scoped_and_partial() {
    let f = fixture().await;
    let other = f.storage.create_tenant("globex").await.expect("tenant");
    assert!(f
        .storage
        .update_client(
            other,
            f.client,
            ClientChanges {
                first_name: Some("Mallory"),
                ..ClientChanges::default()
            },
        )
        .await
        .expect("update")
        .is_none());

    let updated = f
        .storage
        .update_client(
            f.tenant,
            f.client,
            ClientChanges {
                phone_number: Some("+1 555 0100"),
                ..ClientChanges::default()
            },
        )
        .await
        .expect("update")
        .expect("client exists");
    assert_eq!(updated.first_name, "Carl");
    assert_eq!(updated.email.as_deref(), Some("carl@mail.test"));
    assert_eq!(updated.phone_number.as_deref(), Some("+1 555 0100"));
}

#[tokio::test]
async fn update_client_to_taken_email_is_a_unique_violation() {
    let f = fixture().await;
    let olga = f
        .storage
        .create_client(
            f.tenant,
            NewClient {
                first_name: "Olga",
                last_name: "Berg",
                email: Some("olga@mail.test"),
                ..NewClient::default()
            },
        )
        .await
        .expect("client");
    let err = f
        .storage
        .update_client(
            f.tenant,
            olga,
            ClientChanges {
                email: Some("carl@mail.test"),
                ..ClientChanges::default()
            },
        )
        .await
        .expect_err("duplicate email");
    assert!(is_unique_violation(&err));
}

#[tokio::test]
async fn delete_client_refuses_referenced_clients() {
    let f = fixture().await;
    let other = f.storage.create_tenant("globex").await.expect("tenant");
    assert_eq!(
        f.storage.delete_client(other, f.client).await.expect("delete"),
        ClientRemoval::NotFound
    );
    assert_eq!(
        f.storage.delete_client(f.tenant, f.client).await.expect("delete"),
        ClientRemoval::InUse
    );

    let olga = f
        .storage
        .create_client(
            f.tenant,
            NewClient {
                first_name: "Olga",
                last_name: "Berg",
                ..NewClient::default()
            },
        )
        .await
        .expect("client");
    f.storage
        .add_participant_client(f.case_id, olga, CaseClientRole::OtherContact)
        .await
        .expect("participant");
    assert_eq!(
        f.storage.delete_client(f.tenant, olga).await.expect("delete"),
        ClientRemoval::Removed
    );
    assert!(f.storage.get_client(f.tenant, olga).await.expect("lookup").is_none());
    let participants = f
        .storage
        .list_participant_clients(f.case_id)
        .await
        .expect("participants");
    assert_eq!(participants.len(), 1);
}

#[tokio::test]
async fn grants_and_reads_permissions() {
    let f = fixture().await;
    f.storage
        .upsert_permission("can_view_all_cases", Some("List every case"))
        .await
        .expect("permission");
    f.storage
        .grant_permission(f.lawyer, "can_view_all_cases")
        .await
        .expect("grant");
    f.storage
        .grant_permission(f.lawyer, "can_view_all_cases")
        .await
        .expect("grant twice");
    assert!(f
        .storage
        .grant_permission(f.lawyer, "can_fly")
        .await
        .is_err());

    let names = f
        .storage
        .permissions_for_user(f.lawyer)
        .await
        .expect("permissions");
    assert_eq!(names, vec!["can_view_all_cases".to_string()]);
}
