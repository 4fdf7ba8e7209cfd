pub mod api;
pub mod fetch;
pub mod http;
pub mod types;
