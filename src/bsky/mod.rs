pub mod api_types;
pub mod client;
pub mod posts;
pub mod types;
