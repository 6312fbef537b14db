pub mod adapter;
pub mod connect;
pub mod encoder;
pub mod query;
