pub mod expiry_reaper;
pub mod health_service;
pub mod message_service;
