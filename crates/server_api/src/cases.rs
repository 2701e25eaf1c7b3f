use shared::{
    domain::{CaseId, ClientId, Role},
    error::{ApiError, FieldError},
    protocol::{
        AddParticipantClientRequest, AddParticipantUserRequest, CaseDetail, CaseSummary,
        CreateCaseRequest, ParticipantClientSummary, ParticipantUserSummary, PersonSummary,
        UpdateCaseRequest,
    },
};
use storage::{CaseChanges, CaseListFilter, NewCase, StoredCase};
use tracing::info;

use crate::{
    conflict_or_internal,
    guard::{self, permissions, Actor, CaseAccess},
    identity::Identity,
    internal, messages,
    validation::{Validator, MAX_DESCRIPTION_CHARS, MAX_TITLE_CHARS},
    ApiContext,
};

/// Creates a case led by the caller. The lead-lawyer and main-contact rows are written with it.
pub async fn create_case(
    ctx: &ApiContext,
    identity: &Identity,
    request: &CreateCaseRequest,
) -> Result<CaseDetail, ApiError> {
    guard::require_permission(identity, permissions::CAN_CREATE_CASE)?;
    if identity.role == Role::Client {
        return Err(ApiError::forbidden("clients cannot create cases"));
    }

    let mut validator = Validator::new();
    validator
        .length("title", &request.title, 1, MAX_TITLE_CHARS)
        .optional_length(
            "description",
            request.description.as_deref(),
            MAX_DESCRIPTION_CHARS,
        );
    let status = validator.status("status", &request.status);
    validator.finish()?;
    let Some(status) = status else {
        return Err(ApiError::validation(Vec::new()));
    };

    ctx.storage
        .get_client(identity.tenant_id, request.client_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("client not found"))?;

    let case_id = ctx
        .storage
        .create_case(
            identity.tenant_id,
            NewCase {
                title: request.title.trim(),
                description: request.description.as_deref(),
                status,
                lawyer_primary_id: identity.user_id,
                client_primary_id: request.client_id,
            },
        )
        .await
        .map_err(internal)?;
    info!(tenant_id = %identity.tenant_id, %case_id, "case created");

    get_case(ctx, identity, case_id).await
}

/// Clients see the cases they take part in; everyone else needs `can_view_all_cases`.
pub async fn list_cases(
    ctx: &ApiContext,
    identity: &Identity,
    client_filter: Option<ClientId>,
) -> Result<Vec<CaseSummary>, ApiError> {
    let actor = guard::resolve_actor(ctx, identity).await?;
    let filter = match actor {
        Actor::Client(client_id) => CaseListFilter {
            visible_to_client: Some(client_id),
            primary_client: None,
        },
        Actor::Admin(_) | Actor::Lawyer(_) => {
            guard::require_permission(identity, permissions::CAN_VIEW_ALL_CASES)?;
            CaseListFilter {
                visible_to_client: None,
                primary_client: client_filter,
            }
        }
    };
    let cases = ctx
        .storage
        .list_cases(identity.tenant_id, filter)
        .await
        .map_err(internal)?;

    let mut summaries = Vec::with_capacity(cases.len());
    for case in cases {
        summaries.push(summarize(ctx, case).await?);
    }
    Ok(summaries)
}

pub async fn get_case(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
) -> Result<CaseDetail, ApiError> {
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Read)?;
    let case = load_case(ctx, identity, case_id).await?;
    detail(ctx, identity, actor, case).await
}

pub async fn update_case(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
    request: &UpdateCaseRequest,
) -> Result<CaseSummary, ApiError> {
    guard::require_permission(identity, permissions::CAN_EDIT_CASE)?;
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Write)?;

    let mut validator = Validator::new();
    if let Some(title) = request.title.as_deref() {
        validator.length("title", title, 1, MAX_TITLE_CHARS);
    }
    validator.optional_length(
        "description",
        request.description.as_deref(),
        MAX_DESCRIPTION_CHARS,
    );
    let status = match request.status.as_deref() {
        Some(raw) => validator.status("status", raw),
        None => None,
    };
    validator.finish()?;

    let updated = ctx
        .storage
        .update_case(
            identity.tenant_id,
            case_id,
            CaseChanges {
                title: request.title.as_deref().map(str::trim),
                description: request.description.as_deref(),
                status,
            },
        )
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("case not found"))?;
    info!(tenant_id = %identity.tenant_id, %case_id, "case updated");
    summarize(ctx, updated).await
}

pub async fn delete_case(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
) -> Result<(), ApiError> {
    guard::require_permission(identity, permissions::CAN_DELETE_CASE)?;
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Write)?;

    let deleted = ctx
        .storage
        .delete_case(identity.tenant_id, case_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("case not found"));
    }
    info!(tenant_id = %identity.tenant_id, %case_id, "case deleted");
    Ok(())
}

pub async fn add_participant_user(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
    request: &AddParticipantUserRequest,
) -> Result<Vec<ParticipantUserSummary>, ApiError> {
    guard::require_permission(identity, permissions::CAN_ASSIGN_CASE_MEMBERS)?;
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Write)?;

    let user = ctx
        .storage
        .get_user(identity.tenant_id, request.user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    if user.role == Role::Client {
        return Err(ApiError::validation(vec![FieldError::new(
            "userId",
            "client logins join cases through their client record",
        )]));
    }
    if participants.lawyer_ids.contains(&request.user_id) {
        return Err(ApiError::conflict("user already participates in this case"));
    }

    ctx.storage
        .add_participant_user(case_id, request.user_id, request.role_in_case)
        .await
        .map_err(|e| conflict_or_internal(e, "user already participates in this case"))?;
    info!(
        tenant_id = %identity.tenant_id,
        %case_id,
        user_id = %request.user_id,
        "case user added"
    );

    participant_users(ctx, case_id).await
}

pub async fn add_participant_client(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
    request: &AddParticipantClientRequest,
) -> Result<Vec<ParticipantClientSummary>, ApiError> {
    guard::require_permission(identity, permissions::CAN_ASSIGN_CASE_MEMBERS)?;
    let actor = guard::resolve_actor(ctx, identity).await?;
    let participants = guard::resolve_participants(ctx, identity, case_id).await?;
    guard::require_case_access(actor, &participants, CaseAccess::Write)?;

    ctx.storage
        .get_client(identity.tenant_id, request.client_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("client not found"))?;
    if participants.client_ids.contains(&request.client_id) {
        return Err(ApiError::conflict("client already participates in this case"));
    }

    ctx.storage
        .add_participant_client(case_id, request.client_id, request.participation)
        .await
        .map_err(|e| conflict_or_internal(e, "client already participates in this case"))?;
    info!(
        tenant_id = %identity.tenant_id,
        %case_id,
        client_id = %request.client_id,
        "case client added"
    );

    participant_clients(ctx, case_id).await
}

async fn load_case(
    ctx: &ApiContext,
    identity: &Identity,
    case_id: CaseId,
) -> Result<StoredCase, ApiError> {
    ctx.storage
        .get_case(identity.tenant_id, case_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("case not found"))
}

async fn detail(
    ctx: &ApiContext,
    identity: &Identity,
    actor: Actor,
    case: StoredCase,
) -> Result<CaseDetail, ApiError> {
    let case_id = case.case_id;
    let participants_users = participant_users(ctx, case_id).await?;
    let participants_clients = participant_clients(ctx, case_id).await?;
    let messages = messages::load_visible_messages(ctx, identity, actor, case_id).await?;
    Ok(CaseDetail {
        case: summarize(ctx, case).await?,
        participants_users,
        participants_clients,
        messages,
    })
}

async fn participant_users(
    ctx: &ApiContext,
    case_id: CaseId,
) -> Result<Vec<ParticipantUserSummary>, ApiError> {
    let users = ctx
        .storage
        .list_participant_users(case_id)
        .await
        .map_err(internal)?;
    Ok(users
        .into_iter()
        .map(|u| ParticipantUserSummary {
            user_id: u.user_id,
            role_in_case: u.role_in_case,
            first_name: u.first_name,
            last_name: u.last_name,
        })
        .collect())
}

async fn participant_clients(
    ctx: &ApiContext,
    case_id: CaseId,
) -> Result<Vec<ParticipantClientSummary>, ApiError> {
    let clients = ctx
        .storage
        .list_participant_clients(case_id)
        .await
        .map_err(internal)?;
    Ok(clients
        .into_iter()
        .map(|c| ParticipantClientSummary {
            client_id: c.client_id,
            participation: c.participation,
            first_name: c.first_name,
            last_name: c.last_name,
            email: c.email,
        })
        .collect())
}

async fn summarize(ctx: &ApiContext, case: StoredCase) -> Result<CaseSummary, ApiError> {
    let client = ctx
        .storage
        .get_client(case.tenant_id, case.client_primary_id)
        .await
        .map_err(internal)?
        .map(|c| PersonSummary {
            id: c.client_id.0,
            first_name: c.first_name,
            last_name: c.last_name,
            email: c.email,
        });
    let lawyer = ctx
        .storage
        .get_user(case.tenant_id, case.lawyer_primary_id)
        .await
        .map_err(internal)?
        .map(|u| PersonSummary {
            id: u.user_id.0,
            first_name: u.first_name,
            last_name: u.last_name,
            email: Some(u.email),
        });
    Ok(CaseSummary {
        id: case.case_id,
        tenant_id: case.tenant_id,
        title: case.title,
        description: case.description,
        status: case.status,
        lawyer_primary_id: case.lawyer_primary_id,
        client_primary_id: case.client_primary_id,
        created_at: case.created_at,
        updated_at: case.updated_at,
        client,
        lawyer,
    })
}

#[cfg(test)]
#[path = "tests/cases_tests.rs"]
mod tests;
