use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use notify::LogNotifier;
use server_api::{guard::permissions::CATALOGUE, identity::identity_for_user, ApiContext, TokenService};
use shared::{
    domain::{CaseClientRole, CaseId, CaseUserRole, ClientId, Role, TenantId, UserId},
    error::ApiException,
};
use storage::{NewClient, NewUser, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/casework.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Applies migrations and seeds the permission catalogue.
    Migrate,
    CreateTenant {
        name: String,
    },
    CreateUser {
        tenant_id: i64,
        email: String,
        first_name: String,
        last_name: String,
        /// Admin, Lawyer or Client.
        role: String,
        /// Grants every catalogue permission.
        #[arg(long)]
        all_permissions: bool,
    },
    CreateClient {
        tenant_id: i64,
        first_name: String,
        last_name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Links a Client-role login to this client.
        #[arg(long)]
        user_id: Option<i64>,
    },
    Grant {
        user_id: i64,
        permission: String,
    },
    AddLawyer {
        case_id: i64,
        user_id: i64,
        #[arg(long)]
        lead: bool,
    },
    AddClient {
        case_id: i64,
        client_id: i64,
    },
    /// Prints a bearer token for an active user.
    MintToken {
        tenant_id: i64,
        user_id: i64,
        #[arg(long, env = "APP__JWT_SECRET", default_value = "dev-secret-change-me")]
        secret: String,
        #[arg(long, default_value_t = 8 * 3600)]
        ttl_seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Migrate => {
            for (name, description) in CATALOGUE {
                storage.upsert_permission(name, Some(*description)).await?;
            }
            println!("migrated; {} permissions seeded", CATALOGUE.len());
        }
        Command::CreateTenant { name } => {
            let tenant_id = storage.create_tenant(&name).await?;
            println!("created tenant_id={tenant_id}");
        }
        Command::CreateUser {
            tenant_id,
            email,
            first_name,
            last_name,
            role,
            all_permissions,
        } => {
            let role = Role::parse(&role).ok_or_else(|| anyhow!("unknown role '{role}'"))?;
            let user_id = storage
                .create_user(
                    TenantId(tenant_id),
                    NewUser {
                        email: &email,
                        first_name: &first_name,
                        last_name: &last_name,
                        role,
                    },
                )
                .await?;
            if all_permissions {
                for (name, _) in CATALOGUE {
                    storage.grant_permission(user_id, name).await?;
                }
            }
            println!("created user_id={user_id}");
        }
        Command::CreateClient {
            tenant_id,
            first_name,
            last_name,
            email,
            phone,
            user_id,
        } => {
            let client_id = storage
                .create_client(
                    TenantId(tenant_id),
                    NewClient {
                        first_name: &first_name,
                        last_name: &last_name,
                        email: email.as_deref(),
                        phone_number: phone.as_deref(),
                        user_id: user_id.map(UserId),
                    },
                )
                .await?;
            println!("created client_id={client_id}");
        }
        Command::Grant {
            user_id,
            permission,
        } => {
            storage
                .grant_permission(UserId(user_id), &permission)
                .await?;
            println!("granted {permission} to user_id={user_id}");
        }
        Command::AddLawyer {
            case_id,
            user_id,
            lead,
        } => {
            let role = if lead {
                CaseUserRole::LeadLawyer
            } else {
                CaseUserRole::SupportLawyer
            };
            storage
                .add_participant_user(CaseId(case_id), UserId(user_id), role)
                .await?;
            println!("added user_id={user_id} to case_id={case_id} as {}", role.as_str());
        }
        Command::AddClient { case_id, client_id } => {
            storage
                .add_participant_client(
                    CaseId(case_id),
                    ClientId(client_id),
                    CaseClientRole::OtherContact,
                )
                .await?;
            println!("added client_id={client_id} to case_id={case_id}");
        }
        Command::MintToken {
            tenant_id,
            user_id,
            secret,
            ttl_seconds,
        } => {
            let ctx = ApiContext::new(
                storage,
                TokenService::new(secret, ttl_seconds),
                Arc::new(LogNotifier),
                Duration::from_secs(300),
            );
            let identity = identity_for_user(&ctx, TenantId(tenant_id), UserId(user_id))
                .await
                .map_err(ApiException::from)?;
            let token = ctx.tokens.issue(&identity)?;
            println!("{}", token.token);
        }
    }

    Ok(())
}
