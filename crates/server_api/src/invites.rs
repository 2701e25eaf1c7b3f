use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use notify::Notification;
use shared::{
    domain::CaseId,
    error::{ApiError, FieldError},
    protocol::{
        InviteClientRequest, InviteResponse, RegisterViaInviteRequest, RegisterViaInviteResponse,
    },
};
use storage::NewInvite;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    conflict_or_internal, directory,
    guard::{self, CaseAccess},
    identity::Identity,
    internal,
    validation::{Validator, MAX_NAME_CHARS},
    ApiContext,
};

/// Issues a single-use registration link for `email` on a case the caller works on.
pub async fn invite_client(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
    request: &InviteClientRequest,
) -> Result<InviteResponse, ApiError> {
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Write)?;

    let email = request.email.trim();
    Validator::new().email("email", email).finish()?;

    let existing = ctx
        .storage
        .find_client_by_email(identity.tenant_id, email)
        .await
        .map_err(internal)?;
    if existing.is_some_and(|client| participants.client_ids.contains(&client.client_id)) {
        return Err(ApiError::conflict("this email already belongs to a client of the case"));
    }
    let now = Utc::now();
    let pending = ctx
        .storage
        .has_pending_invite(identity.tenant_id, case_id, email, now)
        .await
        .map_err(internal)?;
    if pending {
        return Err(ApiError::conflict("an invite for this email is already pending"));
    }

    let token = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
    let expires_at = now + ctx.invite_ttl;
    let invite_id = ctx
        .storage
        .create_invite(NewInvite {
            tenant_id: identity.tenant_id,
            case_id,
            email,
            token: &token,
            expires_at,
        })
        .await
        .map_err(|e| conflict_or_internal(e, "invite token collision, retry"))?;
    info!(tenant_id = %identity.tenant_id, %case_id, %invite_id, "invite issued");

    let case_title = ctx
        .storage
        .get_case(identity.tenant_id, case_id)
        .await
        .map_err(internal)?
        .map(|case| case.title)
        .unwrap_or_default();
    let register_url = match ctx.client_url.as_deref() {
        Some(base) => format!("{}/register?token={token}", base.trim_end_matches('/')),
        None => format!("/register?token={token}"),
    };
    if let Err(err) = ctx
        .notifier
        .send(Notification::case_invite(email, &case_title, &register_url))
        .await
    {
        warn!(%invite_id, error = %err, "invite email delivery failed");
    }

    Ok(InviteResponse {
        invite_id,
        expires_at,
    })
}

/// Unauthenticated redemption. Creates or reuses the tenant's client for the invited email
/// and adds it to the case in the same transaction that consumes the invite.
pub async fn register_via_invite(
    ctx: &ApiContext,
    request: &RegisterViaInviteRequest,
) -> Result<RegisterViaInviteResponse, ApiError> {
    Validator::new()
        .length("token", &request.token, 1, 256)
        .length("firstName", &request.first_name, 1, MAX_NAME_CHARS)
        .length("lastName", &request.last_name, 1, MAX_NAME_CHARS)
        .finish()?;

    let invite = ctx
        .storage
        .load_invite_by_token(request.token.trim())
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("invite not found"))?;
    if invite.is_used {
        return Err(invite_rejected("invite has already been used"));
    }
    if invite.expires_at <= Utc::now() {
        return Err(invite_rejected("invite has expired"));
    }

    let client_id = ctx
        .storage
        .redeem_invite(
            invite.invite_id,
            request.first_name.trim(),
            request.last_name.trim(),
        )
        .await
        .map_err(|e| conflict_or_internal(e, "a client with this email already exists"))?
        .ok_or_else(|| invite_rejected("invite has already been used"))?;
    info!(
        tenant_id = %invite.tenant_id,
        case_id = %invite.case_id,
        %client_id,
        "invite redeemed"
    );

    let client = ctx
        .storage
        .get_client(invite.tenant_id, client_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("client not found"))?;
    Ok(RegisterViaInviteResponse {
        client: directory::client_summary(client),
        case_id: invite.case_id,
    })
}

fn invite_rejected(message: &str) -> ApiError {
    ApiError::validation(vec![FieldError::new("token", message)])
}

#[cfg(test)]
#[path = "tests/invites_tests.rs"]
mod tests;
