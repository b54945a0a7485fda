pub mod message;
pub mod transcript;
