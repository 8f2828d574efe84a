pub mod attendance;
pub mod auth;
pub mod authenticator;
pub mod bars;
pub mod error;
pub mod middleware;
pub mod provider;
pub mod routes;
pub mod search;
pub mod session;
pub mod storage;

pub use routes::router;
