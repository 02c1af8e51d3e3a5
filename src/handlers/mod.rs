//! HTTP handlers, grouped by surface.

pub mod admin;
pub mod auth;
pub mod client;
pub mod health;
pub mod iam;
pub mod public;
pub mod worker;
