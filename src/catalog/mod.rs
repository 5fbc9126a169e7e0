pub mod aggregate;
pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod error;
pub mod source;
pub mod types;
