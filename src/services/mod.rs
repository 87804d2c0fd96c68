pub mod auth_service;
pub mod delivery_service;
pub mod history_service;
pub mod prune_service;
pub mod queue_service;
pub mod rate_limit_service;
