use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::{Endpoint, HookContext, RelationData};
use crate::{Error, Result};

/// Version of a relation's data schema, `v<N>`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    /// Schemas before v3 have no way to carry data back to the requirer
    pub fn supports_response(&self) -> bool {
        self.0 >= 3
    }

    pub fn supports_namespace(&self) -> bool {
        self.0 >= 2
    }

    pub fn supports_per_unit_routes(&self) -> bool {
        self.0 >= 3
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix('v')
            .and_then(|n| n.parse().ok())
            .map(SchemaVersion)
            .ok_or_else(|| Error::InvalidSchemaVersion(s.into()))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A unit identifier such as `app/0`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnitName {
    pub app: String,
    pub ordinal: u32,
}

impl UnitName {
    /// Name of the StatefulSet pod backing this unit
    pub fn pod_name(&self) -> String {
        format!("{}-{}", self.app, self.ordinal)
    }
}

impl FromStr for UnitName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        static REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = REGEX.get_or_init(|| {
            Regex::new(r"^(?P<app>[^/\s]+)/(?P<ordinal>[0-9]+)$").expect("valid unit name regex")
        });

        let captures = regex
            .captures(s)
            .ok_or_else(|| Error::InvalidUnitName(s.into()))?;
        let ordinal = captures["ordinal"]
            .parse()
            .map_err(|_| Error::InvalidUnitName(s.into()))?;

        Ok(UnitName {
            app: captures["app"].into(),
            ordinal,
        })
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.ordinal)
    }
}

/// A validated request for ingress from one related application
#[derive(Clone, Debug, PartialEq)]
pub struct RouteRequest {
    pub relation_id: u64,
    pub application: String,
    pub version: SchemaVersion,
    /// Target Kubernetes service
    pub service: String,
    pub port: u16,
    /// Path prefix matched at the gateway
    pub prefix: String,
    /// Namespace of the target service; the operator's own namespace when unset
    pub namespace: Option<String>,
    /// Path the matched prefix is rewritten to; the prefix itself when unset
    pub rewrite: Option<String>,
    pub per_unit_routes: bool,
    /// Units of the requiring application, sorted by name
    pub units: Vec<UnitName>,
}

#[derive(Deserialize)]
struct RawRoute {
    service: Option<String>,
    port: Option<u16>,
    prefix: Option<String>,
    rewrite: Option<String>,
    namespace: Option<String>,
    #[serde(default)]
    per_unit_routes: bool,
}

impl RouteRequest {
    pub fn from_relation(record: &RelationData) -> Result<Self> {
        let version = version(Endpoint::Ingress, record)?;
        let raw: RawRoute = payload(Endpoint::Ingress, record)?;

        let missing = |field: &str| invalid(Endpoint::Ingress, record, format!("missing `{field}`"));

        let mut unit_names: Vec<&str> = record.units.iter().map(String::as_str).collect();
        unit_names.sort_unstable();
        let units = unit_names
            .into_iter()
            .map(UnitName::from_str)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| invalid(Endpoint::Ingress, record, e.to_string()))?;

        Ok(RouteRequest {
            relation_id: record.id,
            application: record.app.clone(),
            version,
            service: raw.service.ok_or_else(|| missing("service"))?,
            port: raw.port.ok_or_else(|| missing("port"))?,
            prefix: raw.prefix.ok_or_else(|| missing("prefix"))?,
            namespace: raw.namespace.filter(|_| version.supports_namespace()),
            rewrite: raw.rewrite,
            per_unit_routes: raw.per_unit_routes && version.supports_per_unit_routes(),
            units,
        })
    }
}

/// Routes requested by every other application on the `ingress` endpoint.
///
/// Applications that have not sent anything yet are skipped.
pub fn ingress_routes(ctx: &HookContext) -> Result<Vec<RouteRequest>> {
    ctx.remote_data(Endpoint::Ingress)
        .into_iter()
        .filter(|r| r.has_data())
        .map(RouteRequest::from_relation)
        .collect()
}

/// A request to put an external authorization service in front of the gateway
#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AuthRoute {
    #[serde(skip)]
    pub relation_id: u64,
    #[serde(skip)]
    pub application: String,
    pub service: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub allowed_request_headers: Vec<String>,
    #[serde(default)]
    pub allowed_response_headers: Vec<String>,
}

/// Every other application's data on the `ingress-auth` endpoint, including incomplete ones
pub fn auth_routes(ctx: &HookContext) -> Result<Vec<AuthRoute>> {
    ctx.remote_data(Endpoint::IngressAuth)
        .into_iter()
        .filter(|r| r.has_data())
        .map(|record| {
            let mut route: AuthRoute = payload(Endpoint::IngressAuth, record)?;
            route.relation_id = record.id;
            route.application = record.app.clone();
            Ok(route)
        })
        .collect()
}

/// How gateways reach istiod
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PilotInfo {
    pub service_name: String,
    pub service_port: String,
}

/// The pilot's connection info, if a pilot has published it
pub fn pilot_info(ctx: &HookContext) -> Result<Option<PilotInfo>> {
    ctx.remote_data(Endpoint::IstioPilot)
        .into_iter()
        .find(|r| r.has_data())
        .map(|record| payload(Endpoint::IstioPilot, record))
        .transpose()
}

fn version(endpoint: Endpoint, record: &RelationData) -> Result<SchemaVersion> {
    record
        .version
        .as_deref()
        .ok_or_else(|| invalid(endpoint, record, "no schema version negotiated".into()))?
        .parse()
        .map_err(|e: Error| invalid(endpoint, record, e.to_string()))
}

fn payload<T: DeserializeOwned>(endpoint: Endpoint, record: &RelationData) -> Result<T> {
    serde_yaml::from_value(record.data.clone())
        .map_err(|e| invalid(endpoint, record, e.to_string()))
}

fn invalid(endpoint: Endpoint, record: &RelationData, message: String) -> Error {
    Error::InvalidRelationData {
        endpoint: endpoint.to_string(),
        relation_id: record.id,
        app: record.app.clone(),
        message,
    }
}
