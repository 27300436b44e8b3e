//! # Escrowise Core
//!
//! Shared building blocks for the report dispatcher and the admin API:
//! configuration loading, the error taxonomy, and the delivery trait that the
//! email channel implements.

pub mod config;
pub mod error;
pub mod traits;

pub use config::EscrowiseConfig;
pub use error::{EscrowiseError, Result};
pub use traits::{Notifier, ReportEmail};
