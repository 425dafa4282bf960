use std::sync::Arc;

use crate::adapters::line::LineClient;
use crate::bot_store::BotStore;
use crate::message_router::MessageRouter;

use super::config::ServiceConfig;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) config: Arc<ServiceConfig>,
    pub(super) store: Arc<BotStore>,
    pub(super) line: Arc<LineClient>,
    pub(super) router: Arc<MessageRouter>,
}
