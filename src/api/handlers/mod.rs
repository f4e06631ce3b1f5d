//! Route handlers for the portal session service.

pub mod auth;
pub mod health;
pub mod root;
