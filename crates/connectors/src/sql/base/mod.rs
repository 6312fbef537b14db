pub mod error;
pub mod metadata;
