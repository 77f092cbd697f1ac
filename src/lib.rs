pub(crate) mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod sanitize;
pub mod state;
pub mod stream;
pub mod transport;
