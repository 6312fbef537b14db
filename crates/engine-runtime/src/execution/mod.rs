pub mod endpoints;
pub mod executor;
pub mod verifier;
