pub mod controller;

pub use controller::plan;

mod reconcilers;
pub use reconcilers::manifests::GatewayKind;
