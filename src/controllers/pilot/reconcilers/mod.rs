pub mod auth;
pub mod gateways;
pub mod routes;
