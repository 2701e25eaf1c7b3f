use std::{sync::Arc, time::Duration};

use notify::MemoryNotifier;
use shared::domain::{CaseId, CaseStatus, ClientId, Role, TenantId};
use storage::{NewCase, NewClient, NewUser, Storage};

use crate::{
    guard::permissions::CATALOGUE,
    identity::{identity_for_user, Identity, TokenService},
    ApiContext,
};

pub(crate) struct Harness {
    pub ctx: ApiContext,
    pub notifier: MemoryNotifier,
    pub tenant: TenantId,
    /// Primary lawyer of `case_id`, holding every permission.
    pub lawyer: Identity,
    pub admin: Identity,
    /// A lawyer of the same tenant who is not on the case.
    pub outsider: Identity,
    /// Client-role login linked to `client`.
    pub client_login: Identity,
    pub client: ClientId,
    /// A tenant client that does not participate in the case.
    pub other_client: ClientId,
    pub case_id: CaseId,
}

pub(crate) async fn harness() -> Harness {
    harness_with_grace(Duration::from_secs(60)).await
}

pub(crate) async fn harness_with_grace(grace_period: Duration) -> Harness {
    harness_on("sqlite::memory:", grace_period).await
}

/// Same seed data on the given database, e.g. a temp file for multi-connection pools.
pub(crate) async fn harness_on(database_url: &str, grace_period: Duration) -> Harness {
    let storage = Storage::new(database_url).await.expect("db");
    for (name, description) in CATALOGUE {
        storage
            .upsert_permission(name, Some(*description))
            .await
            .expect("permission");
    }
    let notifier = MemoryNotifier::new();
    let ctx = ApiContext::new(
        storage.clone(),
        TokenService::new("test-secret", 3600),
        Arc::new(notifier.clone()),
        grace_period,
    );

    let tenant = storage.create_tenant("acme").await.expect("tenant");
    let lawyer = staff(&ctx, tenant, "lena@acme.test", "Lena", Role::Lawyer).await;
    let admin = staff(&ctx, tenant, "ada@acme.test", "Ada", Role::Admin).await;
    let outsider = staff(&ctx, tenant, "otto@acme.test", "Otto", Role::Lawyer).await;

    let client_user = storage
        .create_user(
            tenant,
            NewUser {
                email: "carl@mail.test",
                first_name: "Carl",
                last_name: "Diaz",
                role: Role::Client,
            },
        )
        .await
        .expect("client user");
    let client = storage
        .create_client(
            tenant,
            NewClient {
                first_name: "Carl",
                last_name: "Diaz",
                email: Some("carl@mail.test"),
                phone_number: None,
                user_id: Some(client_user),
            },
        )
        .await
        .expect("client");
    let other_client = storage
        .create_client(
            tenant,
            NewClient {
                first_name: "Olga",
                last_name: "Berg",
                email: Some("olga@mail.test"),
                ..NewClient::default()
            },
        )
        .await
        .expect("other client");
    let client_login = identity_for_user(&ctx, tenant, client_user)
        .await
        .expect("client identity");

    let case_id = storage
        .create_case(
            tenant,
            NewCase {
                title: "Diaz v. Landlord",
                description: None,
                status: CaseStatus::Open,
                lawyer_primary_id: lawyer.user_id,
                client_primary_id: client,
            },
        )
        .await
        .expect("case");

    Harness {
        ctx,
        notifier,
        tenant,
        lawyer,
        admin,
        outsider,
        client_login,
        client,
        other_client,
        case_id,
    }
}

pub(crate) async fn staff(
    ctx: &ApiContext,
    tenant: TenantId,
    email: &str,
    first_name: &str,
    role: Role,
) -> Identity {
    let user_id = ctx
        .storage
        .create_user(
            tenant,
            NewUser {
                email,
                first_name,
                last_name: "Staff",
                role,
            },
        )
        .await
        .expect("user");
    for (name, _) in CATALOGUE {
        ctx.storage
            .grant_permission(user_id, name)
            .await
            .expect("grant");
    }
    identity_for_user(ctx, tenant, user_id)
        .await
        .expect("identity")
}
