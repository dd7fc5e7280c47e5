use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::relations::{RouteRequest, UnitName};
use crate::resources::istio::{
    Destination, DestinationRule, DestinationRuleSpec, HttpMatchRequest, HttpRewrite, HttpRoute,
    HttpRouteDestination, PortSelector, StringMatch, Subset, VirtualService, VirtualServiceSpec,
};
use crate::resources::IstioResource;

const BASE_ROUTE_NAME: &str = "app-route";
const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

/// Data sent back to a requiring application
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IngressResponse {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_urls: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteResponse {
    pub relation_id: u64,
    pub application: String,
    pub data: IngressResponse,
}

/// Result of one reconciliation pass over the ingress routes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesiredRoutes {
    /// VirtualServices and DestinationRules, grouped per application in relation order
    pub documents: Vec<IstioResource>,
    pub responses: Vec<RouteResponse>,
}

/// Compute the routing objects and responses for every requesting application.
///
/// `namespace` is the operator's own namespace, which also holds `default_gateway`.
/// Callers must only invoke this once the gateway has an external address.
pub fn compute(
    routes: &[RouteRequest],
    default_gateway: &str,
    namespace: &str,
    gateway_address: &str,
) -> DesiredRoutes {
    let mut ordered: Vec<&RouteRequest> = routes.iter().collect();
    ordered.sort_by(|a, b| {
        a.relation_id
            .cmp(&b.relation_id)
            .then_with(|| a.application.cmp(&b.application))
    });

    let gateway = format!("{namespace}/{default_gateway}");
    let mut desired = DesiredRoutes::default();

    for route in ordered {
        let target_namespace = route.namespace.as_deref().unwrap_or(namespace);
        let host = format!("{}.{target_namespace}.svc.cluster.local", route.service);
        let rewrite = route.rewrite.as_deref().unwrap_or(&route.prefix);
        let units: &[UnitName] = if route.per_unit_routes {
            &route.units
        } else {
            &[]
        };

        let mut http = vec![http_route(
            BASE_ROUTE_NAME.into(),
            route.prefix.clone(),
            rewrite,
            &host,
            route.port,
            None,
        )];
        http.extend(units.iter().map(|unit| {
            http_route(
                format!("unit-{}-route", unit.ordinal),
                unit_path(&route.prefix, unit.ordinal),
                rewrite,
                &host,
                route.port,
                Some(unit.pod_name()),
            )
        }));

        desired
            .documents
            .push(IstioResource::VirtualService(VirtualService {
                metadata: object_meta(&route.service, namespace),
                spec: VirtualServiceSpec {
                    gateways: vec![gateway.clone()],
                    hosts: vec!["*".into()],
                    http,
                },
            }));

        if route.per_unit_routes {
            desired
                .documents
                .push(IstioResource::DestinationRule(DestinationRule {
                    metadata: object_meta(&route.service, namespace),
                    spec: DestinationRuleSpec {
                        host: host.clone(),
                        subsets: units
                            .iter()
                            .map(|unit| Subset {
                                name: unit.pod_name(),
                                labels: BTreeMap::from([(
                                    POD_NAME_LABEL.to_string(),
                                    unit.pod_name(),
                                )]),
                            })
                            .collect(),
                    },
                }));
        }

        if route.version.supports_response() {
            let prefix = route.prefix.trim_matches('/');
            desired.responses.push(RouteResponse {
                relation_id: route.relation_id,
                application: route.application.clone(),
                data: IngressResponse {
                    url: format!("http://{gateway_address}/{prefix}/"),
                    unit_urls: route.per_unit_routes.then(|| {
                        units
                            .iter()
                            .map(|unit| {
                                (
                                    unit.to_string(),
                                    unit_url(gateway_address, prefix, unit.ordinal),
                                )
                            })
                            .collect()
                    }),
                },
            });
        }
    }

    desired
}

/// Path prefix matching a single unit of an application routed at `prefix`
pub fn unit_path(prefix: &str, ordinal: u32) -> String {
    if prefix == "/" {
        format!("/unit-{ordinal}/")
    } else if let Some(stripped) = prefix.strip_suffix('/') {
        format!("{stripped}-unit-{ordinal}/")
    } else {
        format!("{prefix}-unit-{ordinal}")
    }
}

/// `trimmed_prefix` is the route prefix without surrounding slashes
fn unit_url(address: &str, trimmed_prefix: &str, ordinal: u32) -> String {
    format!("http://{address}/{trimmed_prefix}-unit-{ordinal}/")
}

fn object_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        ..Default::default()
    }
}

fn http_route(
    name: String,
    prefix: String,
    rewrite: &str,
    host: &str,
    port: u16,
    subset: Option<String>,
) -> HttpRoute {
    HttpRoute {
        name,
        matches: vec![HttpMatchRequest {
            uri: StringMatch::Prefix(prefix),
        }],
        rewrite: Some(HttpRewrite {
            uri: rewrite.into(),
        }),
        route: vec![HttpRouteDestination {
            destination: Destination {
                host: host.into(),
                port: PortSelector { number: port },
                subset,
            },
        }],
    }
}
