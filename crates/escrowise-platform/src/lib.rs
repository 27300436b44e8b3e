//! # Escrowise Platform
//! Admin control plane for scheduled reports: REST API + audit log.

pub mod admin;
pub mod db;

pub use admin::{AdminServer, AdminState, ApiError};
pub use db::{AuditEntry, AuditStats, PlatformDb};
