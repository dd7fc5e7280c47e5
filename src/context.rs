use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_GATEWAY: &str = "istio-gateway";
pub const DEFAULT_PROXY_IMAGE: &str = "docker.io/istio/proxyv2:1.11.0";

/// Relation endpoints the operators take part in
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    Ingress,
    IngressAuth,
    IstioPilot,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Ingress => "ingress",
            Endpoint::IngressAuth => "ingress-auth",
            Endpoint::IstioPilot => "istio-pilot",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the framework knows at the time a hook fires.
///
/// The snapshot is read once per invocation and never written back; whatever the
/// hook wants to publish is returned in its outcome instead.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct HookContext {
    /// Model name, which is also the Kubernetes namespace the operator lives in
    pub model: String,
    /// Name of the application running this hook
    pub app: String,
    #[serde(default)]
    pub leader: bool,
    #[serde(default)]
    pub config: CharmConfig,
    /// Application data bags, keyed by endpoint. Our own application's bags are included.
    #[serde(default)]
    pub relations: BTreeMap<Endpoint, Vec<RelationData>>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CharmConfig {
    /// Comma separated gateway names; the first one is used for routes
    pub default_gateways: Option<String>,
    /// `ingress` or `egress`, for the gateway operator
    pub kind: Option<String>,
    pub proxy_image: Option<String>,
}

impl CharmConfig {
    pub fn default_gateways(&self) -> Vec<String> {
        self.default_gateways
            .as_deref()
            .unwrap_or(DEFAULT_GATEWAY)
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn proxy_image(&self) -> &str {
        self.proxy_image.as_deref().unwrap_or(DEFAULT_PROXY_IMAGE)
    }
}

/// One application's data bag on one relation
#[derive(Deserialize, Clone, Debug, Default)]
pub struct RelationData {
    pub id: u64,
    pub app: String,
    /// Negotiated schema version, e.g. `v3`
    pub version: Option<String>,
    /// Units of the remote side of the relation
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default)]
    pub data: serde_yaml::Value,
}

impl RelationData {
    pub fn has_data(&self) -> bool {
        match &self.data {
            serde_yaml::Value::Null => false,
            serde_yaml::Value::Mapping(m) => !m.is_empty(),
            _ => true,
        }
    }
}

impl HookContext {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&yaml)
    }

    /// Whether any relation exists on `endpoint`, data or not
    pub fn has_relation(&self, endpoint: Endpoint) -> bool {
        self.relations
            .get(&endpoint)
            .is_some_and(|records| !records.is_empty())
    }

    /// Data bags sent by other applications on `endpoint`, ordered by relation id
    pub fn remote_data(&self, endpoint: Endpoint) -> Vec<&RelationData> {
        let mut records: Vec<&RelationData> = self
            .relations
            .get(&endpoint)
            .into_iter()
            .flatten()
            .filter(|r| r.app != self.app)
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.app.cmp(&b.app)));
        records
    }
}
