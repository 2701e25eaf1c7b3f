use shared::{
    domain::{CaseId, ClientId, Role, SenderRef, UserId},
    error::ApiError,
};
use storage::CaseParticipants;

use crate::{identity::Identity, internal, ApiContext};

pub mod permissions {
    pub const CAN_CREATE_CASE: &str = "can_create_case";
    pub const CAN_EDIT_CASE: &str = "can_edit_case";
    pub const CAN_DELETE_CASE: &str = "can_delete_case";
    pub const CAN_VIEW_ALL_CASES: &str = "can_view_all_cases";
    pub const CAN_ASSIGN_CASE_MEMBERS: &str = "can_assign_case_members";
    pub const CAN_DEFINE_USER_PERMISSIONS: &str = "can_define_user_permissions";
    pub const CAN_CREATE_USER: &str = "can_create_user";
    pub const CAN_SEND_MESSAGES: &str = "can_send_messages";
    pub const CAN_VIEW_MESSAGE_HISTORY: &str = "can_view_message_history";
    pub const CAN_MARK_MESSAGE_AS_VIEWED: &str = "can_mark_message_as_viewed";

    /// Names and descriptions seeded into a fresh database.
    pub const CATALOGUE: &[(&str, &str)] = &[
        ("can_edit_office_info", "Edit the office profile"),
        ("can_create_user", "Create lawyer and staff accounts"),
        ("can_edit_user_data", "Edit user data"),
        ("can_deactivate_user", "Activate or deactivate users"),
        ("can_define_user_permissions", "Grant permissions to users"),
        ("can_view_user_logs", "View access and activity history"),
        ("can_create_case", "Create cases"),
        ("can_edit_case", "Edit case data"),
        ("can_delete_case", "Delete cases"),
        ("can_archive_case", "Archive and unarchive cases"),
        ("can_assign_case_members", "Assign team members and contacts to cases"),
        ("can_view_all_cases", "List every case of the office"),
        ("can_export_case_data", "Export case data"),
        ("can_send_messages", "Send messages to clients"),
        ("can_view_message_history", "Read message history per case"),
        ("can_mark_message_as_viewed", "Mark messages as viewed"),
        ("can_receive_message_alerts", "Receive unread message alerts"),
        ("can_upload_document", "Send documents to clients"),
        ("can_receive_documents", "Receive documents from clients"),
        ("can_change_password", "Change own password"),
        ("can_edit_personal_profile", "Edit own profile"),
        ("can_manage_notifications", "Toggle notifications"),
    ];
}

/// The caller as seen by case-level checks. Client logins are resolved to their client record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Admin(UserId),
    Lawyer(UserId),
    Client(ClientId),
}

impl Actor {
    pub fn sender_ref(self) -> SenderRef {
        match self {
            Actor::Admin(user_id) | Actor::Lawyer(user_id) => SenderRef::User(user_id),
            Actor::Client(client_id) => SenderRef::Client(client_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseAccess {
    Read,
    Write,
}

pub fn require_permission(identity: &Identity, permission: &str) -> Result<(), ApiError> {
    if identity.has_permission(permission) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "missing permission '{permission}'"
        )))
    }
}

pub async fn resolve_actor(ctx: &ApiContext, identity: &Identity) -> Result<Actor, ApiError> {
    match identity.role {
        Role::Admin => Ok(Actor::Admin(identity.user_id)),
        Role::Lawyer => Ok(Actor::Lawyer(identity.user_id)),
        Role::Client => ctx
            .storage
            .client_for_user(identity.tenant_id, identity.user_id)
            .await
            .map_err(internal)?
            .map(Actor::Client)
            .ok_or_else(|| ApiError::forbidden("login is not linked to a client record")),
    }
}

/// Effective participant sets, read fresh. Cases outside the caller's tenant are NotFound.
pub async fn resolve_participants(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
) -> Result<CaseParticipants, ApiError> {
    ctx.storage
        .case_participants(identity.tenant_id, case_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("case not found"))
}

/// Admins may read any case of their tenant. Every write needs the effective lawyer set,
/// and clients only ever read.
pub fn require_case_access(
    actor: Actor,
    participants: &CaseParticipants,
    access: CaseAccess,
) -> Result<(), ApiError> {
    let allowed = match (actor, access) {
        (Actor::Admin(_), CaseAccess::Read) => true,
        (Actor::Admin(user_id) | Actor::Lawyer(user_id), _) => {
            participants.lawyer_ids.contains(&user_id)
        }
        (Actor::Client(client_id), CaseAccess::Read) => {
            participants.client_ids.contains(&client_id)
        }
        (Actor::Client(_), CaseAccess::Write) => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden("not a participant of this case"))
    }
}

/// Checks sender and receiver against one participant snapshot.
pub fn require_message_send_authority(
    actor: Actor,
    participants: &CaseParticipants,
    receiver_client_id: ClientId,
) -> Result<SenderRef, ApiError> {
    let sender_ok = match actor {
        Actor::Admin(user_id) | Actor::Lawyer(user_id) => {
            participants.lawyer_ids.contains(&user_id)
        }
        Actor::Client(client_id) => participants.client_ids.contains(&client_id),
    };
    if !sender_ok {
        return Err(ApiError::forbidden("sender is not a participant of this case"));
    }
    if !participants.client_ids.contains(&receiver_client_id) {
        return Err(ApiError::forbidden(
            "receiver is not a client participant of this case",
        ));
    }
    Ok(actor.sender_ref())
}

/// Only the receiving client or a lawyer responsible for the case may mark a message viewed.
pub fn require_view_authority(
    actor: Actor,
    participants: &CaseParticipants,
    receiver_client_id: ClientId,
) -> Result<(), ApiError> {
    let allowed = match actor {
        Actor::Admin(user_id) | Actor::Lawyer(user_id) => {
            participants.lawyer_ids.contains(&user_id)
        }
        Actor::Client(client_id) => client_id == receiver_client_id,
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "only the receiver or a responsible lawyer may mark this message viewed",
        ))
    }
}

#[cfg(test)]
#[path = "tests/guard_tests.rs"]
mod tests;
