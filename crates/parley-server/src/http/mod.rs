//! HTTP handlers.

pub mod upgrade;
pub mod users;
