//! Request handlers.

pub mod accounts;
pub mod admin_permissions;
pub mod audit;
pub mod auth;
pub mod health;
pub mod settings;
