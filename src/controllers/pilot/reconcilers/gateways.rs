use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::resources::istio::{Gateway, GatewaySpec, Server, ServerPort};
use crate::resources::IstioResource;

/// One plain HTTP `Gateway` on the ingress gateway workload per configured name
pub fn default_gateways(names: &[String], namespace: &str) -> Vec<IstioResource> {
    names
        .iter()
        .map(|name| {
            IstioResource::Gateway(Gateway {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.into()),
                    ..Default::default()
                },
                spec: GatewaySpec {
                    selector: BTreeMap::from([("istio".into(), "ingressgateway".into())]),
                    servers: vec![Server {
                        hosts: vec!["*".into()],
                        port: ServerPort {
                            name: "http".into(),
                            number: 80,
                            protocol: "HTTP".into(),
                        },
                    }],
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn one_gateway_per_name() {
        let gateways = default_gateways(&["istio-gateway".into(), "second".into()], "kubeflow");

        assert_eq!(gateways.len(), 2);
        assert_eq!(gateways[1].name(), "second");
        assert_json_eq!(
            serde_json::to_value(&gateways[0]).unwrap(),
            json!({
                "apiVersion": "networking.istio.io/v1beta1",
                "kind": "Gateway",
                "metadata": {"name": "istio-gateway", "namespace": "kubeflow"},
                "spec": {
                    "selector": {"istio": "ingressgateway"},
                    "servers": [
                        {"hosts": ["*"], "port": {"name": "http", "number": 80, "protocol": "HTTP"}}
                    ],
                },
            })
        );
    }
}
