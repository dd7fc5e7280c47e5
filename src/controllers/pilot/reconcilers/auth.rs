use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::relations::AuthRoute;
use crate::resources::istio::{
    AuthorizationRequest, AuthorizationResponse, EnvoyFilter, EnvoyFilterSpec, ExtAuthzConfig,
    ExtAuthzHttpService, Filter, HeaderPatterns, InsertPosition, ListenerMatch, RbacConfig,
    RbacConfigSpec, RbacMode, ServerUri, StringMatch,
};
use crate::resources::IstioResource;
use crate::{Error, Result};

const AUTH_TIMEOUT: &str = "10s";

/// RBAC must be off for the ext_authz filter to have the final say
fn rbac_config(namespace: &str) -> IstioResource {
    IstioResource::RbacConfig(RbacConfig {
        metadata: ObjectMeta {
            name: Some("default".into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        spec: RbacConfigSpec {
            mode: RbacMode::Off,
        },
    })
}

fn exact(headers: &[String]) -> HeaderPatterns {
    HeaderPatterns {
        patterns: headers.iter().cloned().map(StringMatch::Exact).collect(),
    }
}

fn auth_filter(route: &AuthRoute, service: &str, namespace: &str) -> Result<IstioResource> {
    let port = route.port.ok_or_else(|| Error::InvalidRelationData {
        endpoint: "ingress-auth".into(),
        relation_id: route.relation_id,
        app: route.application.clone(),
        message: "missing `port`".into(),
    })?;
    let host = format!("{service}.{namespace}.svc.cluster.local");

    Ok(IstioResource::EnvoyFilter(EnvoyFilter {
        metadata: ObjectMeta {
            name: Some(format!("authn-filter-{service}")),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        spec: EnvoyFilterSpec {
            workload_labels: BTreeMap::from([("istio".into(), "ingressgateway".into())]),
            filters: vec![Filter {
                listener_match: ListenerMatch {
                    listener_type: "GATEWAY".into(),
                },
                insert_position: InsertPosition {
                    index: "FIRST".into(),
                },
                filter_type: "HTTP".into(),
                filter_name: "envoy.ext_authz".into(),
                filter_config: ExtAuthzConfig {
                    http_service: ExtAuthzHttpService {
                        server_uri: ServerUri {
                            uri: format!("http://{host}:{port}"),
                            cluster: format!("outbound|{port}||{host}"),
                            timeout: AUTH_TIMEOUT.into(),
                            failure_mode_allow: false,
                        },
                        authorization_request: AuthorizationRequest {
                            allowed_headers: exact(&route.allowed_request_headers),
                        },
                        authorization_response: AuthorizationResponse {
                            allowed_upstream_headers: exact(&route.allowed_response_headers),
                        },
                    },
                },
            }],
        },
    }))
}

/// The auth objects for a complete set of auth routes.
///
/// Returns `None` while any route is still missing its service, in which case
/// nothing should be changed yet.
pub fn auth_resources(routes: &[AuthRoute], namespace: &str) -> Result<Option<Vec<IstioResource>>> {
    let Some(services) = routes
        .iter()
        .map(|r| r.service.as_deref())
        .collect::<Option<Vec<_>>>()
    else {
        return Ok(None);
    };

    if routes.is_empty() {
        return Ok(Some(vec![]));
    }

    let mut resources = vec![rbac_config(namespace)];
    for (route, service) in routes.iter().zip(services) {
        resources.push(auth_filter(route, service, namespace)?);
    }
    Ok(Some(resources))
}
