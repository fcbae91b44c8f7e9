//! HTTP surface over the forecast pipeline.

pub mod error;
pub mod forecast;
pub mod routes;
pub mod status;

pub use routes::create_router;
