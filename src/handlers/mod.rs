pub mod auth;
pub mod config_handlers;
pub mod health_handlers;
pub mod object_handlers;
