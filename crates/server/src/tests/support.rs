use std::{sync::Arc, time::Duration};

use notify::MemoryNotifier;
use server_api::{
    guard::permissions::CATALOGUE, identity::identity_for_user, ApiContext, Identity,
    TokenService,
};
use shared::domain::{CaseId, CaseStatus, ClientId, Role, TenantId};
use storage::{NewCase, NewClient, NewUser, Storage};

use crate::{app_state::AppState, realtime::RealtimeHub};

pub(crate) struct Fixture {
    pub state: Arc<AppState>,
    pub notifier: MemoryNotifier,
    pub lawyer: Identity,
    pub client_login: Identity,
    /// Lawyer of another tenant holding every permission.
    pub foreigner: Identity,
    pub client: ClientId,
    pub other_client: ClientId,
    pub case_id: CaseId,
}

impl Fixture {
    pub fn token(&self, identity: &Identity) -> String {
        self.state
            .api
            .tokens
            .issue(identity)
            .expect("issue token")
            .token
    }
}

pub(crate) async fn fixture() -> Fixture {
    fixture_on("sqlite::memory:").await
}

/// Same seed data on the given database, e.g. a temp file for multi-connection pools.
pub(crate) async fn fixture_on(database_url: &str) -> Fixture {
    let storage = Storage::new(database_url).await.expect("db");
    for (name, description) in CATALOGUE {
        storage
            .upsert_permission(name, Some(*description))
            .await
            .expect("permission");
    }
    let notifier = MemoryNotifier::new();
    let api = ApiContext::new(
        storage.clone(),
        TokenService::new("test-secret", 3600),
        Arc::new(notifier.clone()),
        Duration::from_secs(60),
    );

    let tenant = storage.create_tenant("acme").await.expect("tenant");
    let lawyer = staff(&api, tenant, "lena@acme.test").await;
    let foreign_tenant = storage.create_tenant("globex").await.expect("tenant");
    let foreigner = staff(&api, foreign_tenant, "fred@globex.test").await;

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
    let client_login = identity_for_user(&api, tenant, client_user)
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

    Fixture {
        state: Arc::new(AppState {
            api,
            hub: RealtimeHub::new(),
        }),
        notifier,
        lawyer,
        client_login,
        foreigner,
        client,
        other_client,
        case_id,
    }
}

async fn staff(api: &ApiContext, tenant: TenantId, email: &str) -> Identity {
    let user_id = api
        .storage
        .create_user(
            tenant,
            NewUser {
                email,
                first_name: "Lena",
                last_name: "Staff",
                role: Role::Lawyer,
            },
        )
        .await
        .expect("user");
    for (name, _) in CATALOGUE {
        api.storage
            .grant_permission(user_id, name)
            .await
            .expect("grant");
    }
    identity_for_user(api, tenant, user_id)
        .await
        .expect("identity")
}
