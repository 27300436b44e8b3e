//! # Escrowise Channels
//! Outbound transports implementing [`escrowise_core::Notifier`].

pub mod email;

pub use email::EmailNotifier;
