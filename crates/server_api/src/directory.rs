use shared::{
    domain::{ClientId, Role, UserId},
    error::ApiError,
    protocol::{
        ClientSummary, CreateClientRequest, PermissionSummary, UpdateClientRequest, UserSummary,
    },
};
use storage::{ClientChanges, ClientRemoval, NewClient, StoredClient, StoredUser};
use tracing::info;

use crate::{
    conflict_or_internal,
    guard::{self, permissions},
    identity::Identity,
    internal,
    validation::{Validator, MAX_NAME_CHARS},
    ApiContext,
};

pub async fn list_users(
    ctx: &ApiContext,
    identity: &Identity,
) -> Result<Vec<UserSummary>, ApiError> {
    require_staff(identity)?;
    let users = ctx
        .storage
        .list_users(identity.tenant_id)
        .await
        .map_err(internal)?;
    Ok(users.into_iter().map(user_summary).collect())
}

pub async fn get_user(
    ctx: &ApiContext,
    identity: &Identity,
    user_id: UserId,
) -> Result<UserSummary, ApiError> {
    if identity.user_id != user_id {
        require_staff(identity)?;
    }
    ctx.storage
        .get_user(identity.tenant_id, user_id)
        .await
        .map_err(internal)?
        .map(user_summary)
        .ok_or_else(|| ApiError::not_found("user not found"))
}

pub async fn list_permissions(
    ctx: &ApiContext,
    identity: &Identity,
) -> Result<Vec<PermissionSummary>, ApiError> {
    guard::require_permission(identity, permissions::CAN_DEFINE_USER_PERMISSIONS)?;
    let permissions = ctx.storage.list_permissions().await.map_err(internal)?;
    Ok(permissions
        .into_iter()
        .map(|p| PermissionSummary {
            id: p.id,
            name: p.name,
            description: p.description,
        })
        .collect())
}

pub async fn list_clients(
    ctx: &ApiContext,
    identity: &Identity,
) -> Result<Vec<ClientSummary>, ApiError> {
    require_staff(identity)?;
    let clients = ctx
        .storage
        .list_clients(identity.tenant_id)
        .await
        .map_err(internal)?;
    Ok(clients.into_iter().map(client_summary).collect())
}

pub async fn get_client(
    ctx: &ApiContext,
    identity: &Identity,
    client_id: ClientId,
) -> Result<ClientSummary, ApiError> {
    require_staff(identity)?;
    ctx.storage
        .get_client(identity.tenant_id, client_id)
        .await
        .map_err(internal)?
        .map(client_summary)
        .ok_or_else(|| ApiError::not_found("client not found"))
}

pub async fn create_client(
    ctx: &ApiContext,
    identity: &Identity,
    request: &CreateClientRequest,
) -> Result<ClientSummary, ApiError> {
    require_staff(identity)?;
    let mut validator = Validator::new();
    validator
        .length("firstName", &request.first_name, 1, MAX_NAME_CHARS)
        .length("lastName", &request.last_name, 1, MAX_NAME_CHARS);
    if let Some(email) = request.email.as_deref() {
        validator.email("email", email);
    }
    validator.finish()?;

    let client_id = ctx
        .storage
        .create_client(
            identity.tenant_id,
            NewClient {
                first_name: request.first_name.trim(),
                last_name: request.last_name.trim(),
                email: request.email.as_deref(),
                phone_number: request.phone_number.as_deref(),
                user_id: None,
            },
        )
        .await
        .map_err(|e| conflict_or_internal(e, "a client with this email already exists"))?;
    info!(tenant_id = %identity.tenant_id, %client_id, "client created");
    get_client(ctx, identity, client_id).await
}

pub async fn update_client(
    ctx: &ApiContext,
    identity: &Identity,
    client_id: ClientId,
    request: &UpdateClientRequest,
) -> Result<ClientSummary, ApiError> {
    require_staff(identity)?;
    let mut validator = Validator::new();
    if let Some(first_name) = request.first_name.as_deref() {
        validator.length("firstName", first_name, 1, MAX_NAME_CHARS);
    }
    if let Some(last_name) = request.last_name.as_deref() {
        validator.length("lastName", last_name, 1, MAX_NAME_CHARS);
    }
    if let Some(email) = request.email.as_deref() {
        validator.email("email", email);
    }
    validator.finish()?;

    ctx.storage
        .get_client(identity.tenant_id, client_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("client not found"))?;
    if let Some(email) = request.email.as_deref() {
        let holder = ctx
            .storage
            .find_client_by_email(identity.tenant_id, email)
            .await
            .map_err(internal)?;
        if holder.is_some_and(|c| c.client_id != client_id) {
            return Err(ApiError::conflict("a client with this email already exists"));
        }
    }

    let updated = ctx
        .storage
        .update_client(
            identity.tenant_id,
            client_id,
            ClientChanges {
                first_name: request.first_name.as_deref().map(str::trim),
                last_name: request.last_name.as_deref().map(str::trim),
                email: request.email.as_deref(),
                phone_number: request.phone_number.as_deref(),
            },
        )
        .await
        .map_err(|e| conflict_or_internal(e, "a client with this email already exists"))?
        .ok_or_else(|| ApiError::not_found("client not found"))?;
    info!(tenant_id = %identity.tenant_id, %client_id, "client updated");
    Ok(client_summary(updated))
}

pub async fn delete_client(
    ctx: &ApiContext,
    identity: &Identity,
    client_id: ClientId,
) -> Result<(), ApiError> {
    require_staff(identity)?;
    let removal = ctx
        .storage
        .delete_client(identity.tenant_id, client_id)
        .await
        .map_err(internal)?;
    match removal {
        ClientRemoval::Removed => {
            info!(tenant_id = %identity.tenant_id, %client_id, "client deleted");
            Ok(())
        }
        ClientRemoval::NotFound => Err(ApiError::not_found("client not found")),
        ClientRemoval::InUse => Err(ApiError::conflict(
            "client is still referenced by cases or messages",
        )),
    }
}

fn require_staff(identity: &Identity) -> Result<(), ApiError> {
    match identity.role {
        Role::Admin | Role::Lawyer => Ok(()),
        Role::Client => Err(ApiError::forbidden("staff only")),
    }
}

fn user_summary(user: StoredUser) -> UserSummary {
    UserSummary {
        id: user.user_id,
        first_name: user.first_name,
        last_name: user.last_name,
        email: user.email,
        role: user.role,
        is_active: user.is_active,
        created_at: user.created_at,
    }
}

pub(crate) fn client_summary(client: StoredClient) -> ClientSummary {
    ClientSummary {
        id: client.client_id,
        first_name: client.first_name,
        last_name: client.last_name,
        email: client.email,
        phone_number: client.phone_number,
        user_id: client.user_id,
        created_at: client.created_at,
    }
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
