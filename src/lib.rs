use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML Error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid data on relation {endpoint}:{relation_id} from {app}: {message}")]
    InvalidRelationData {
        endpoint: String,
        relation_id: u64,
        app: String,
        message: String,
    },

    #[error("Invalid unit name {0:?}, expected <application>/<number>")]
    InvalidUnitName(String),

    #[error("Invalid schema version {0:?}, expected v<number>")]
    InvalidSchemaVersion(String),

    #[error("Manifest object has no apiVersion/kind: {0}")]
    UntypedManifestObject(String),

    #[error("istioctl {command} failed ({status}): {stderr}")]
    Istioctl {
        command: String,
        status: String,
        stderr: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::YamlError(_) => "YamlError",
            Error::KubeError(_) => "KubeError",
            Error::IoError(_) => "IoError",
            Error::InvalidRelationData { .. } => "InvalidRelationData",
            Error::InvalidUnitName(_) => "InvalidUnitName",
            Error::InvalidSchemaVersion(_) => "InvalidSchemaVersion",
            Error::UntypedManifestObject(_) => "UntypedManifestObject",
            Error::Istioctl { .. } => "Istioctl",
        }
    }
}

/// Framework snapshot handed to each hook invocation
pub mod context;

pub mod controllers;

/// Triggers, plans and hook outcomes
pub mod hooks;

/// istioctl invocations
pub mod istioctl;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::{encode as encode_metrics, Metrics};

/// Executing plans against the cluster
pub mod reconcilers;

/// Typed relation payloads
pub mod relations;

/// Istio CRDs and the workload objects owned by the gateway charm
pub mod resources;
