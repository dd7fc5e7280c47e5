use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;

use crate::relations::PilotInfo;
use crate::resources::WorkloadResource;

const HTTP_TARGET_PORT: i32 = 8080;
const HTTPS_TARGET_PORT: i32 = 8443;
const STATUS_PORT: i32 = 15021;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayKind {
    Ingress,
    Egress,
}

impl GatewayKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingress" => Some(GatewayKind::Ingress),
            "egress" => Some(GatewayKind::Egress),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Ingress => "ingress",
            GatewayKind::Egress => "egress",
        }
    }

    /// Value of the `istio` label, which is what Gateways select on
    pub fn istio_label(&self) -> String {
        format!("{}gateway", self.as_str())
    }

    pub fn workload_name(&self) -> String {
        format!("istio-{}", self.istio_label())
    }

    fn service_type(&self) -> &'static str {
        match self {
            // only ingress needs to be reachable from outside the cluster
            GatewayKind::Ingress => "LoadBalancer",
            GatewayKind::Egress => "ClusterIP",
        }
    }
}

fn labels(kind: GatewayKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".into(), kind.workload_name()),
        ("istio".into(), kind.istio_label()),
    ])
}

fn object_meta(kind: GatewayKind, namespace: &str, name: impl Into<String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        labels: Some(labels(kind)),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn env_from_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: None,
                field_path: field_path.into(),
            }),
            ..Default::default()
        }),
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port: port,
        protocol: Some("TCP".into()),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.into()),
        port,
        protocol: Some("TCP".into()),
        target_port: Some(IntOrString::Int(target)),
        ..Default::default()
    }
}

/// The objects making up one gateway workload, in apply order
pub fn manifests(
    kind: GatewayKind,
    namespace: &str,
    pilot: &PilotInfo,
    image: &str,
) -> Vec<WorkloadResource> {
    let name = kind.workload_name();
    let service_account = format!("{name}-service-account");
    let role = format!("{name}-sds");
    let pilot_address = format!("{}:{}", pilot.service_name, pilot.service_port);

    let proxy = Container {
        name: "istio-proxy".into(),
        image: Some(image.into()),
        args: Some(
            [
                "proxy",
                "router",
                "--domain",
                "$(POD_NAMESPACE).svc.cluster.local",
                "--proxyLogLevel=warning",
                "--proxyComponentLogLevel=misc:error",
                "--log_output_level=default:info",
            ]
            .map(String::from)
            .to_vec(),
        ),
        env: Some(vec![
            env("JWT_POLICY", "first-party-jwt"),
            env("PILOT_CERT_PROVIDER", "istiod"),
            env("CA_ADDR", pilot_address.clone()),
            env_from_field("POD_NAME", "metadata.name"),
            env_from_field("POD_NAMESPACE", "metadata.namespace"),
            env_from_field("INSTANCE_IP", "status.podIP"),
            env_from_field("SERVICE_ACCOUNT", "spec.serviceAccountName"),
            env("ISTIO_META_WORKLOAD_NAME", name.clone()),
            env("ISTIO_META_CLUSTER_ID", "Kubernetes"),
            env(
                "PROXY_CONFIG",
                json!({ "discoveryAddress": pilot_address }).to_string(),
            ),
        ]),
        ports: Some(vec![
            container_port("http2", HTTP_TARGET_PORT),
            container_port("https", HTTPS_TARGET_PORT),
            container_port("status-port", STATUS_PORT),
        ]),
        ..Default::default()
    };

    vec![
        WorkloadResource::ServiceAccount(ServiceAccount {
            metadata: object_meta(kind, namespace, service_account.clone()),
            ..Default::default()
        }),
        WorkloadResource::Role(Role {
            metadata: object_meta(kind, namespace, role.clone()),
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec!["".into()]),
                resources: Some(vec!["secrets".into()]),
                verbs: vec!["get".into(), "watch".into(), "list".into()],
                ..Default::default()
            }]),
        }),
        WorkloadResource::RoleBinding(RoleBinding {
            metadata: object_meta(kind, namespace, role.clone()),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".into(),
                kind: "Role".into(),
                name: role,
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".into(),
                name: service_account.clone(),
                namespace: Some(namespace.into()),
                api_group: None,
            }]),
        }),
        WorkloadResource::Deployment(Deployment {
            metadata: object_meta(kind, namespace, name.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels(kind)),
                    match_expressions: None,
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels(kind)),
                        annotations: Some(BTreeMap::from([(
                            "sidecar.istio.io/inject".into(),
                            "false".into(),
                        )])),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(service_account),
                        containers: vec![proxy],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }),
        WorkloadResource::Service(Service {
            metadata: object_meta(kind, namespace, name),
            spec: Some(ServiceSpec {
                type_: Some(kind.service_type().into()),
                selector: Some(labels(kind)),
                ports: Some(vec![
                    service_port("http2", 80, HTTP_TARGET_PORT),
                    service_port("https", 443, HTTPS_TARGET_PORT),
                    service_port("status-port", STATUS_PORT, STATUS_PORT),
                ]),
                ..Default::default()
            }),
            status: None,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pilot() -> PilotInfo {
        PilotInfo {
            service_name: "istiod.kubeflow.svc".into(),
            service_port: "15012".into(),
        }
    }

    #[test]
    fn kind_parsing() {
        assert_eq!(GatewayKind::parse("ingress"), Some(GatewayKind::Ingress));
        assert_eq!(GatewayKind::parse("egress"), Some(GatewayKind::Egress));
        assert_eq!(GatewayKind::parse("Ingress"), None);
        assert_eq!(GatewayKind::Egress.workload_name(), "istio-egressgateway");
    }

    #[test]
    fn objects_in_apply_order() {
        let objects = manifests(GatewayKind::Ingress, "kubeflow", &pilot(), "proxy:1");
        let kinds: Vec<_> = objects.iter().map(|o| (o.kind(), o.name())).collect();
        assert_eq!(
            kinds,
            vec![
                ("ServiceAccount", "istio-ingressgateway-service-account".to_string()),
                ("Role", "istio-ingressgateway-sds".to_string()),
                ("RoleBinding", "istio-ingressgateway-sds".to_string()),
                ("Deployment", "istio-ingressgateway".to_string()),
                ("Service", "istio-ingressgateway".to_string()),
            ]
        );
    }

    #[test]
    fn proxy_points_at_pilot() {
        let objects = manifests(GatewayKind::Egress, "kubeflow", &pilot(), "proxy:1");
        let WorkloadResource::Deployment(deployment) = &objects[3] else {
            panic!("expected a deployment")
        };
        let container = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        let env = container.env.as_ref().unwrap();

        assert_eq!(container.image.as_deref(), Some("proxy:1"));
        let ca_addr = env.iter().find(|e| e.name == "CA_ADDR").unwrap();
        assert_eq!(ca_addr.value.as_deref(), Some("istiod.kubeflow.svc:15012"));
        let proxy_config = env.iter().find(|e| e.name == "PROXY_CONFIG").unwrap();
        assert_eq!(
            proxy_config.value.as_deref(),
            Some(r#"{"discoveryAddress":"istiod.kubeflow.svc:15012"}"#)
        );
    }

    #[test]
    fn only_ingress_is_exposed_externally() {
        for (kind, expected) in [
            (GatewayKind::Ingress, "LoadBalancer"),
            (GatewayKind::Egress, "ClusterIP"),
        ] {
            let objects = manifests(kind, "kubeflow", &pilot(), "proxy:1");
            let WorkloadResource::Service(service) = &objects[4] else {
                panic!("expected a service")
            };
            let spec = service.spec.as_ref().unwrap();
            assert_eq!(spec.type_.as_deref(), Some(expected));
            assert_eq!(
                spec.selector.as_ref().unwrap()["istio"],
                kind.istio_label()
            );
        }
    }
}
