pub mod adapters;
pub mod ai_reply;
pub mod bot_store;
pub mod dispatch;
pub mod message_router;
pub mod roster;
pub mod service;
