//! Shared domain types and configuration for the Knatty assistant.

pub mod config;
pub mod domain;
pub mod errors;

pub use domain::message::{data_uri, Message, Origin};
pub use domain::transcript::{Transcript, GREETING};
pub use errors::{ApplicationError, InterfaceError};
