use std::collections::{BTreeSet, HashMap};

use shared::{
    domain::{CaseId, ClientId, MessageId, SenderRef, UserId},
    error::ApiError,
    protocol::{MessagePayload, PersonSummary},
};
use storage::{MessageVisibility, NewMessage, StoredMessage, ViewTransition};
use tracing::info;

use crate::{
    guard::{self, Actor, CaseAccess},
    identity::Identity,
    internal, validation, ApiContext,
};

/// Result of a mark-viewed call. `notify_users` is empty unless this call made the transition.
#[derive(Debug, Clone)]
pub struct ViewOutcome {
    pub message: MessagePayload,
    pub transitioned: bool,
    pub notify_users: Vec<UserId>,
}

pub async fn send_message(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
    receiver_client_id: ClientId,
    content: &str,
) -> Result<MessagePayload, ApiError> {
    validation::message_content(content)?;
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    let sender = guard::require_message_send_authority(actor, &participants, receiver_client_id)?;

    let stored = ctx
        .storage
        .insert_message(NewMessage {
            tenant_id: identity.tenant_id,
            case_id,
            content,
            sender,
            receiver_client_id,
        })
        .await
        .map_err(internal)?;
    ctx.scheduler.arm(stored.message_id).await;
    info!(
        tenant_id = %identity.tenant_id,
        %case_id,
        message_id = %stored.message_id,
        "message stored"
    );

    let mut people = PeopleCache::default();
    people.payload(ctx, stored).await
}

pub async fn mark_viewed(
    ctx: &ApiContext,
    identity: &Identity,
    message_id: MessageId,
) -> Result<ViewOutcome, ApiError> {
    let message = ctx
        .storage
        .load_message(identity.tenant_id, message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))?;
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, message.case_id).await?;
    guard::require_view_authority(actor, &participants, message.receiver_client_id)?;

    let transition = ctx
        .storage
        .mark_message_viewed(identity.tenant_id, message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))?;

    let (stored, transitioned) = match transition {
        ViewTransition::Transitioned(stored) => (stored, true),
        ViewTransition::AlreadyViewed(stored) => (stored, false),
    };

    let mut notify_users = Vec::new();
    if transitioned {
        ctx.scheduler.cancel(message_id).await;
        let linked = ctx
            .storage
            .linked_users_for_clients(identity.tenant_id, &participants.client_ids)
            .await
            .map_err(internal)?;
        let recipients: BTreeSet<UserId> = participants
            .lawyer_ids
            .iter()
            .copied()
            .chain(linked)
            .collect();
        notify_users = recipients.into_iter().collect();
        info!(tenant_id = %identity.tenant_id, %message_id, "message viewed");
    }

    let mut people = PeopleCache::default();
    let message = people.payload(ctx, stored).await?;
    Ok(ViewOutcome {
        message,
        transitioned,
        notify_users,
    })
}

/// History of a case, oldest first, filtered to what the caller may see.
pub async fn list_case_messages(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
) -> Result<Vec<MessagePayload>, ApiError> {
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Read)?;
    load_visible_messages(ctx, identity, actor, case_id).await
}

pub(crate) async fn load_visible_messages(
    ctx: &ApiContext,
    identity: &Identity,
    actor: Actor,
    case_id: CaseId,
) -> Result<Vec<MessagePayload>, ApiError> {
    let visibility = match actor {
        Actor::Client(client_id) => MessageVisibility::Client(client_id),
        Actor::Admin(_) | Actor::Lawyer(_) => MessageVisibility::All,
    };
    let messages = ctx
        .storage
        .list_case_messages(identity.tenant_id, case_id, visibility)
        .await
        .map_err(internal)?;

    let mut people = PeopleCache::default();
    let mut payloads = Vec::with_capacity(messages.len());
    for message in messages {
        payloads.push(people.payload(ctx, message).await?);
    }
    Ok(payloads)
}

/// Realtime room joins need read access to the case. The resolved actor decides which
/// room traffic the connection may receive.
pub async fn authorize_room_join(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
) -> Result<Actor, ApiError> {
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Read)?;
    Ok(actor)
}

/// Same rule as the history listing: staff see everything, a client only what it sent or
/// received.
pub fn visible_to(actor: Actor, message: &MessagePayload) -> bool {
    match actor {
        Actor::Admin(_) | Actor::Lawyer(_) => true,
        Actor::Client(client_id) => {
            message.receiver_client_id == client_id
                || message.sender == SenderRef::Client(client_id)
        }
    }
}

#[derive(Default)]
struct PeopleCache {
    users: HashMap<UserId, Option<PersonSummary>>,
    clients: HashMap<ClientId, Option<PersonSummary>>,
}

impl PeopleCache {
    async fn user(
        &mut self,
        ctx: &ApiContext,
        message: &StoredMessage,
        user_id: UserId,
    ) -> Result<Option<PersonSummary>, ApiError> {
        if let Some(cached) = self.users.get(&user_id) {
            return Ok(cached.clone());
        }
        let resolved = ctx
            .storage
            .get_user(message.tenant_id, user_id)
            .await
            .map_err(internal)?
            .map(|user| PersonSummary {
                id: user.user_id.0,
                first_name: user.first_name,
                last_name: user.last_name,
                email: Some(user.email),
            });
        self.users.insert(user_id, resolved.clone());
        Ok(resolved)
    }

    async fn client(
        &mut self,
        ctx: &ApiContext,
        message: &StoredMessage,
        client_id: ClientId,
    ) -> Result<Option<PersonSummary>, ApiError> {
        if let Some(cached) = self.clients.get(&client_id) {
            return Ok(cached.clone());
        }
        let resolved = ctx
            .storage
            .get_client(message.tenant_id, client_id)
            .await
            .map_err(internal)?
            .map(|client| PersonSummary {
                id: client.client_id.0,
                first_name: client.first_name,
                last_name: client.last_name,
                email: client.email,
            });
        self.clients.insert(client_id, resolved.clone());
        Ok(resolved)
    }

    async fn payload(
        &mut self,
        ctx: &ApiContext,
        message: StoredMessage,
    ) -> Result<MessagePayload, ApiError> {
        let sender_display = match message.sender {
            SenderRef::User(user_id) => self.user(ctx, &message, user_id).await?,
            SenderRef::Client(client_id) => self.client(ctx, &message, client_id).await?,
        };
        let receiver_client = self
            .client(ctx, &message, message.receiver_client_id)
            .await?;
        Ok(MessagePayload {
            id: message.message_id,
            tenant_id: message.tenant_id,
            case_id: message.case_id,
            content: message.content,
            sender: message.sender,
            sender_display,
            receiver_client_id: message.receiver_client_id,
            receiver_client,
            viewed: message.viewed,
            viewed_at: message.viewed_at,
            created_at: message.created_at,
        })
    }
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
