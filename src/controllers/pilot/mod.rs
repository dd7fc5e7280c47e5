pub mod controller;

pub use controller::{needs_gateway_address, plan};

pub mod reconcilers;
pub use reconcilers::routes::{compute, DesiredRoutes, IngressResponse, RouteResponse};
