use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::{Serialize, Serializer};

pub mod istio;

use istio::{DestinationRule, EnvoyFilter, Gateway, RbacConfig, VirtualService};

/// The closed set of Istio kinds the pilot operator creates
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ResourceKind {
    VirtualService,
    DestinationRule,
    Gateway,
    EnvoyFilter,
    RbacConfig,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::VirtualService,
        ResourceKind::DestinationRule,
        ResourceKind::Gateway,
        ResourceKind::EnvoyFilter,
        ResourceKind::RbacConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualService => "VirtualService",
            ResourceKind::DestinationRule => "DestinationRule",
            ResourceKind::Gateway => "Gateway",
            ResourceKind::EnvoyFilter => "EnvoyFilter",
            ResourceKind::RbacConfig => "RbacConfig",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A desired Istio object
#[derive(Clone, Debug, PartialEq)]
pub enum IstioResource {
    VirtualService(VirtualService),
    DestinationRule(DestinationRule),
    Gateway(Gateway),
    EnvoyFilter(EnvoyFilter),
    RbacConfig(RbacConfig),
}

impl IstioResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            IstioResource::VirtualService(_) => ResourceKind::VirtualService,
            IstioResource::DestinationRule(_) => ResourceKind::DestinationRule,
            IstioResource::Gateway(_) => ResourceKind::Gateway,
            IstioResource::EnvoyFilter(_) => ResourceKind::EnvoyFilter,
            IstioResource::RbacConfig(_) => ResourceKind::RbacConfig,
        }
    }

    pub fn name(&self) -> String {
        match self {
            IstioResource::VirtualService(o) => o.name_any(),
            IstioResource::DestinationRule(o) => o.name_any(),
            IstioResource::Gateway(o) => o.name_any(),
            IstioResource::EnvoyFilter(o) => o.name_any(),
            IstioResource::RbacConfig(o) => o.name_any(),
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            IstioResource::VirtualService(o) => &mut o.metadata,
            IstioResource::DestinationRule(o) => &mut o.metadata,
            IstioResource::Gateway(o) => &mut o.metadata,
            IstioResource::EnvoyFilter(o) => &mut o.metadata,
            IstioResource::RbacConfig(o) => &mut o.metadata,
        }
    }

    /// Merge `labels` into the object's labels
    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        merge_labels(self.metadata_mut(), labels);
        self
    }
}

fn merge_labels(metadata: &mut ObjectMeta, labels: &BTreeMap<String, String>) {
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

impl Serialize for IstioResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IstioResource::VirtualService(o) => o.serialize(serializer),
            IstioResource::DestinationRule(o) => o.serialize(serializer),
            IstioResource::Gateway(o) => o.serialize(serializer),
            IstioResource::EnvoyFilter(o) => o.serialize(serializer),
            IstioResource::RbacConfig(o) => o.serialize(serializer),
        }
    }
}

/// A core Kubernetes object owned by the gateway operator
#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadResource {
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
    Deployment(Deployment),
    Service(Service),
}

impl WorkloadResource {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkloadResource::ServiceAccount(_) => "ServiceAccount",
            WorkloadResource::Role(_) => "Role",
            WorkloadResource::RoleBinding(_) => "RoleBinding",
            WorkloadResource::Deployment(_) => "Deployment",
            WorkloadResource::Service(_) => "Service",
        }
    }

    pub fn name(&self) -> String {
        match self {
            WorkloadResource::ServiceAccount(o) => o.name_any(),
            WorkloadResource::Role(o) => o.name_any(),
            WorkloadResource::RoleBinding(o) => o.name_any(),
            WorkloadResource::Deployment(o) => o.name_any(),
            WorkloadResource::Service(o) => o.name_any(),
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            WorkloadResource::ServiceAccount(o) => &mut o.metadata,
            WorkloadResource::Role(o) => &mut o.metadata,
            WorkloadResource::RoleBinding(o) => &mut o.metadata,
            WorkloadResource::Deployment(o) => &mut o.metadata,
            WorkloadResource::Service(o) => &mut o.metadata,
        }
    }

    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        merge_labels(self.metadata_mut(), labels);
        self
    }
}

impl Serialize for WorkloadResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WorkloadResource::ServiceAccount(o) => o.serialize(serializer),
            WorkloadResource::Role(o) => o.serialize(serializer),
            WorkloadResource::RoleBinding(o) => o.serialize(serializer),
            WorkloadResource::Deployment(o) => o.serialize(serializer),
            WorkloadResource::Service(o) => o.serialize(serializer),
        }
    }
}
