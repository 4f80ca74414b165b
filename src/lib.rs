//! Project/component forests with a secondary pointer graph.
//!
//! The [`db::Database`] handle owns every operation: node creation and
//! ordering, soft deletion, pointers, privacy, forking, templating,
//! registrations and private links. Each operation takes the acting
//! [`models::Auth`] and returns a [`error::NodeError`] on failure.

pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod models;
pub mod render;
