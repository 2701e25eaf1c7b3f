use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use server_api::{guard::Actor, messages, Identity};
use shared::{
    domain::{CaseId, TenantId, UserId},
    protocol::{ClientRequest, MessagePayload, ServerEvent},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::app_state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionId(u64);

struct Connection {
    tenant_id: TenantId,
    user_id: UserId,
    /// Joined rooms with the actor resolved at join time.
    rooms: HashMap<CaseId, Actor>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Process-local registry of live sockets and the case rooms they joined.
#[derive(Default)]
pub(crate) struct RealtimeHub {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    case_locks: Mutex<HashMap<(TenantId, CaseId), Arc<tokio::sync::Mutex<()>>>>,
}

impl RealtimeHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections().insert(
            id,
            Connection {
                tenant_id,
                user_id,
                rooms: HashMap::new(),
                tx,
            },
        );
        (id, rx)
    }

    pub(crate) fn unregister(&self, id: ConnectionId) {
        self.connections().remove(&id);
    }

    pub(crate) fn join_room(&self, id: ConnectionId, case_id: CaseId, actor: Actor) -> bool {
        match self.connections().get_mut(&id) {
            Some(connection) => connection.rooms.insert(case_id, actor).is_none(),
            None => false,
        }
    }

    pub(crate) fn send_to_connection(&self, id: ConnectionId, event: ServerEvent) {
        if let Some(connection) = self.connections().get(&id) {
            let _ = connection.tx.send(event);
        }
    }

    /// Delivers a new message to room members of its tenant that may see it, plus `origin`.
    /// Client connections only get messages they sent or received.
    pub(crate) fn broadcast_message(
        &self,
        origin: Option<ConnectionId>,
        payload: &MessagePayload,
    ) -> usize {
        let connections = self.connections();
        let mut delivered = 0;
        for (id, connection) in connections.iter() {
            let member = connection.tenant_id == payload.tenant_id
                && connection
                    .rooms
                    .get(&payload.case_id)
                    .is_some_and(|actor| messages::visible_to(*actor, payload));
            if (member || origin == Some(*id))
                && connection
                    .tx
                    .send(ServerEvent::NewMessage(payload.clone()))
                    .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Delivers to each listed user's own connections, whatever rooms they joined.
    pub(crate) fn send_to_users(
        &self,
        tenant_id: TenantId,
        user_ids: &[UserId],
        event: ServerEvent,
    ) -> usize {
        let connections = self.connections();
        let mut delivered = 0;
        for connection in connections.values() {
            if connection.tenant_id == tenant_id
                && user_ids.contains(&connection.user_id)
                && connection.tx.send(event.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    fn case_locks(&self) -> MutexGuard<'_, HashMap<(TenantId, CaseId), Arc<tokio::sync::Mutex<()>>>> {
        self.case_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serializes create-then-broadcast per case so rooms observe creation order.
    /// Pair every call with [`RealtimeHub::release_case_lock`].
    pub(crate) fn case_lock(&self, tenant_id: TenantId, case_id: CaseId) -> Arc<tokio::sync::Mutex<()>> {
        self.case_locks()
            .entry((tenant_id, case_id))
            .or_default()
            .clone()
    }

    /// Drops the caller's handle and removes the entry once nobody else holds or waits on it.
    pub(crate) fn release_case_lock(
        &self,
        tenant_id: TenantId,
        case_id: CaseId,
        lock: Arc<tokio::sync::Mutex<()>>,
    ) {
        let mut locks = self.case_locks();
        drop(lock);
        let key = (tenant_id, case_id);
        if locks
            .get(&key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&key);
        }
    }

    pub(crate) fn case_lock_count(&self) -> usize {
        self.case_locks().len()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections().len()
    }
}

pub(crate) async fn ws_connection(state: Arc<AppState>, socket: WebSocket, identity: Identity) {
    let (connection_id, events_rx) = state.hub.register(identity.tenant_id, identity.user_id);
    info!(
        tenant_id = %identity.tenant_id,
        user_id = %identity.user_id,
        connections = state.hub.connection_count(),
        "realtime connection opened"
    );

    let (mut sender, mut receiver) = socket.split();
    let send_task = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(events_rx);
        while let Some(event) = events.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientRequest>(&text) {
                Ok(request) => handle_request(&state, connection_id, &identity, request).await,
                Err(err) => {
                    debug!(error = %err, "unparseable realtime frame");
                    state.hub.send_to_connection(
                        connection_id,
                        ServerEvent::MessageError("malformed request".to_string()),
                    );
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unregister(connection_id);
    send_task.abort();
    info!(user_id = %identity.user_id, "realtime connection closed");
}

pub(crate) async fn handle_request(
    state: &AppState,
    connection_id: ConnectionId,
    identity: &Identity,
    request: ClientRequest,
) {
    match request {
        ClientRequest::JoinCase { case_id } => {
            match messages::authorize_room_join(&state.api, identity, case_id).await {
                Ok(actor) => {
                    state.hub.join_room(connection_id, case_id, actor);
                    debug!(user_id = %identity.user_id, %case_id, "joined case room");
                }
                Err(err) => {
                    warn!(user_id = %identity.user_id, %case_id, error = %err.message, "join refused");
                    state
                        .hub
                        .send_to_connection(connection_id, ServerEvent::MessageError(err.message));
                }
            }
        }
        ClientRequest::SendMessage {
            content,
            case_id,
            receiver_client_id,
        } => {
            // Unauthorized callers never create a lock entry.
            if let Err(err) = messages::authorize_room_join(&state.api, identity, case_id).await {
                warn!(user_id = %identity.user_id, %case_id, error = %err.message, "send refused");
                state
                    .hub
                    .send_to_connection(connection_id, ServerEvent::MessageError(err.message));
                return;
            }
            let lock = state.hub.case_lock(identity.tenant_id, case_id);
            {
                let _ordered = lock.lock().await;
                match messages::send_message(&state.api, identity, case_id, receiver_client_id, &content)
                    .await
                {
                    Ok(payload) => {
                        state.hub.broadcast_message(Some(connection_id), &payload);
                    }
                    Err(err) => {
                        warn!(user_id = %identity.user_id, %case_id, error = %err.message, "send refused");
                        state
                            .hub
                            .send_to_connection(connection_id, ServerEvent::MessageError(err.message));
                    }
                }
            }
            state.hub.release_case_lock(identity.tenant_id, case_id, lock);
        }
        ClientRequest::MarkMessageViewed { message_id } => {
            match messages::mark_viewed(&state.api, identity, message_id).await {
                Ok(outcome) if outcome.transitioned => {
                    state.hub.send_to_users(
                        identity.tenant_id,
                        &outcome.notify_users,
                        ServerEvent::MessageViewed(message_id),
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(user_id = %identity.user_id, %message_id, error = %err.message, "view refused");
                    state
                        .hub
                        .send_to_connection(connection_id, ServerEvent::MessageError(err.message));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
