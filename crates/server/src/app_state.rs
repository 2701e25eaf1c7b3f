use server_api::ApiContext;

use crate::realtime::RealtimeHub;

pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) hub: RealtimeHub,
}
