//! Istio custom resources managed by the pilot operator.
//!
//! Only the fields the operators actually write are modelled. These are
//! client-side views of CRDs owned by Istio; no schemas are generated from them.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VirtualService defines HTTP routing rules for a set of hosts
/// API: networking.istio.io/v1alpha3
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "VirtualService",
    derive = "PartialEq",
    namespaced
)]
pub struct VirtualServiceSpec {
    /// Gateways (as `<namespace>/<name>`) the routes are attached to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    pub hosts: Vec<String>,
    pub http: Vec<HttpRoute>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct HttpRoute {
    pub name: String,
    #[serde(rename = "match")]
    pub matches: Vec<HttpMatchRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<HttpRewrite>,
    pub route: Vec<HttpRouteDestination>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct HttpMatchRequest {
    pub uri: StringMatch,
}

/// Serialized as a single-key object, e.g. `{"prefix": "/app/"}`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct HttpRewrite {
    pub uri: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct HttpRouteDestination {
    pub destination: Destination,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Destination {
    /// Fully qualified service host, e.g. `svc.ns.svc.cluster.local`
    pub host: String,
    pub port: PortSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct PortSelector {
    pub number: u16,
}

/// DestinationRule defines the subsets of a destination host
/// API: networking.istio.io/v1alpha3
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "DestinationRule",
    derive = "PartialEq",
    namespaced
)]
pub struct DestinationRuleSpec {
    pub host: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsets: Vec<Subset>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Subset {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Gateway describes a load balancer at the edge of the mesh
/// API: networking.istio.io/v1beta1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1beta1",
    kind = "Gateway",
    derive = "PartialEq",
    namespaced
)]
pub struct GatewaySpec {
    /// Labels selecting the gateway workload this configuration applies to
    pub selector: BTreeMap<String, String>,
    pub servers: Vec<Server>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Server {
    pub hosts: Vec<String>,
    pub port: ServerPort,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ServerPort {
    pub name: String,
    pub number: u16,
    pub protocol: String,
}

/// EnvoyFilter patches the proxy configuration of selected workloads
/// API: networking.istio.io/v1alpha3
///
/// This is the legacy `filters` form, which is what the gateways we deploy understand.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "EnvoyFilter",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilterSpec {
    pub workload_labels: BTreeMap<String, String>,
    pub filters: Vec<Filter>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub listener_match: ListenerMatch,
    pub insert_position: InsertPosition,
    pub filter_type: String,
    pub filter_name: String,
    pub filter_config: ExtAuthzConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListenerMatch {
    pub listener_type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct InsertPosition {
    pub index: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuthzConfig {
    pub http_service: ExtAuthzHttpService,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuthzHttpService {
    pub server_uri: ServerUri,
    pub authorization_request: AuthorizationRequest,
    pub authorization_response: AuthorizationResponse,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerUri {
    pub uri: String,
    /// Envoy cluster name, `outbound|<port>||<host>`
    pub cluster: String,
    pub timeout: String,
    pub failure_mode_allow: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub allowed_headers: HeaderPatterns,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResponse {
    pub allowed_upstream_headers: HeaderPatterns,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct HeaderPatterns {
    pub patterns: Vec<StringMatch>,
}

/// RbacConfig toggles Istio's legacy RBAC engine
/// API: rbac.istio.io/v1alpha1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "rbac.istio.io",
    version = "v1alpha1",
    kind = "RbacConfig",
    derive = "PartialEq",
    namespaced
)]
pub struct RbacConfigSpec {
    pub mode: RbacMode,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RbacMode {
    Off,
    On,
    OnWithInclusion,
    OnWithExclusion,
}
