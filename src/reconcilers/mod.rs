use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{pinned_kind, Scope};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::controllers::Context;
use crate::hooks::{HookOutcome, Plan, Step};
use crate::resources::istio::{DestinationRule, EnvoyFilter, Gateway, RbacConfig, VirtualService};
use crate::resources::{IstioResource, ResourceKind, WorkloadResource};
use crate::{Error, Result};

/// Marks every object an application created, so it can find them again
pub const CREATED_BY_LABEL: &str = "app.juju.is/created-by";

pub fn created_by_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CREATED_BY_LABEL.into(), app.into())])
}

pub fn created_by_selector(app: &str) -> String {
    format!("{CREATED_BY_LABEL}={app}")
}

/// Which API errors a delete tolerates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Only a missing object is fine
    Normal,
    /// The application is going away; credentials may already have been revoked
    Teardown,
}

async fn apply<K>(api: &Api<K>, field_manager: &str, obj: &K) -> Result<()>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize,
    <K as Resource>::DynamicType: Default,
{
    let name = obj.name_any();
    debug!(
        "Applying {} {} in namespace {}",
        K::kind(&Default::default()),
        name,
        obj.namespace().unwrap_or_default()
    );
    let params = PatchParams::apply(field_manager).force();
    api.patch(&name, &params, &Patch::Apply(obj)).await?;
    Ok(())
}

/// Whether a failed delete can be treated as done
fn tolerated(err: &kube::Error, mode: DeleteMode) -> bool {
    match err {
        kube::Error::Api(kube::error::ErrorResponse { code: 404, .. }) => true,
        kube::Error::Api(kube::error::ErrorResponse { code: 401, .. }) => {
            mode == DeleteMode::Teardown
        }
        _ => false,
    }
}

async fn delete<K>(api: &Api<K>, kind: &str, name: &str, mode: DeleteMode) -> Result<bool>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    debug!("Ensuring {kind} {name} does not exist");
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(err) if tolerated(&err, mode) => {
            if let kube::Error::Api(kube::error::ErrorResponse { code: 401, message, .. }) = &err {
                warn!("Ignoring unauthorized delete of {kind} {name} during teardown: {message}");
            }
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

/// Delete everything of type `K` labelled as created by `app`
async fn prune<K>(ctx: &Context, mode: DeleteMode) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
    <K as Resource>::DynamicType: Default,
{
    let kind = K::kind(&Default::default()).to_string();
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let existing = match api
        .list(&ListParams::default().labels(&created_by_selector(&ctx.app)))
        .await
    {
        Ok(existing) => existing,
        // A 404 on the collection means the CRD is not served
        Err(err) if tolerated(&err, DeleteMode::Normal) => {
            debug!("{kind} is not served, nothing to prune");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    for obj in existing {
        if delete(&api, &kind, &obj.name_any(), mode).await? {
            ctx.metrics.object_deleted(&kind);
        }
    }
    Ok(())
}

async fn prune_kind(ctx: &Context, kind: ResourceKind, mode: DeleteMode) -> Result<()> {
    match kind {
        ResourceKind::VirtualService => prune::<VirtualService>(ctx, mode).await,
        ResourceKind::DestinationRule => prune::<DestinationRule>(ctx, mode).await,
        ResourceKind::Gateway => prune::<Gateway>(ctx, mode).await,
        ResourceKind::EnvoyFilter => prune::<EnvoyFilter>(ctx, mode).await,
        ResourceKind::RbacConfig => prune::<RbacConfig>(ctx, mode).await,
    }
}

fn api<K>(ctx: &Context) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    Api::namespaced(ctx.client.clone(), &ctx.namespace)
}

async fn apply_istio(ctx: &Context, resource: IstioResource) -> Result<()> {
    let field_manager = ctx.settings.field_manager.as_str();
    match &resource {
        IstioResource::VirtualService(o) => apply(&api(ctx), field_manager, o).await?,
        IstioResource::DestinationRule(o) => apply(&api(ctx), field_manager, o).await?,
        IstioResource::Gateway(o) => apply(&api(ctx), field_manager, o).await?,
        IstioResource::EnvoyFilter(o) => apply(&api(ctx), field_manager, o).await?,
        IstioResource::RbacConfig(o) => apply(&api(ctx), field_manager, o).await?,
    }
    ctx.metrics.object_applied(resource.kind().as_str());
    Ok(())
}

async fn apply_workload(ctx: &Context, resource: WorkloadResource) -> Result<()> {
    let field_manager = ctx.settings.field_manager.as_str();
    match &resource {
        WorkloadResource::ServiceAccount(o) => apply(&api(ctx), field_manager, o).await?,
        WorkloadResource::Role(o) => apply(&api(ctx), field_manager, o).await?,
        WorkloadResource::RoleBinding(o) => apply(&api(ctx), field_manager, o).await?,
        WorkloadResource::Deployment(o) => apply(&api(ctx), field_manager, o).await?,
        WorkloadResource::Service(o) => apply(&api(ctx), field_manager, o).await?,
    }
    ctx.metrics.object_applied(resource.kind());
    Ok(())
}

async fn delete_workload(ctx: &Context, resource: &WorkloadResource, mode: DeleteMode) -> Result<()> {
    let kind = resource.kind();
    let name = resource.name();
    let deleted = match resource {
        WorkloadResource::ServiceAccount(_) => {
            delete(&api::<ServiceAccount>(ctx), kind, &name, mode).await?
        }
        WorkloadResource::Role(_) => delete(&api::<Role>(ctx), kind, &name, mode).await?,
        WorkloadResource::RoleBinding(_) => {
            delete(&api::<RoleBinding>(ctx), kind, &name, mode).await?
        }
        WorkloadResource::Deployment(_) => {
            delete(&api::<Deployment>(ctx), kind, &name, mode).await?
        }
        WorkloadResource::Service(_) => delete(&api::<Service>(ctx), kind, &name, mode).await?,
    };
    if deleted {
        ctx.metrics.object_deleted(kind);
    }
    Ok(())
}

/// Split `istioctl manifest generate` output into objects
fn manifest_objects(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = vec![];
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value)?);
    }
    Ok(objects)
}

/// Delete every object `istioctl install` created
async fn remove_istio(ctx: &Context, mode: DeleteMode) -> Result<()> {
    let manifest = ctx
        .settings
        .istioctl
        .manifest_generate(&ctx.namespace)
        .await?;

    for obj in manifest_objects(&manifest)? {
        let name = obj.name_any();
        let gvk = obj
            .types
            .as_ref()
            .and_then(|types| GroupVersionKind::try_from(types).ok())
            .ok_or_else(|| Error::UntypedManifestObject(name.clone()))?;

        let (resource, capabilities) = match pinned_kind(&ctx.client, &gvk).await {
            Ok(found) => found,
            // Its CRD went first
            Err(kube::Error::Api(kube::error::ErrorResponse { code: 404, .. }))
            | Err(kube::Error::Discovery(_)) => {
                debug!("{} is no longer served, skipping {name}", gvk.kind);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let api: Api<DynamicObject> = match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(
                ctx.client.clone(),
                obj.namespace().as_deref().unwrap_or(&ctx.namespace),
                &resource,
            ),
            Scope::Cluster => Api::all_with(ctx.client.clone(), &resource),
        };
        if delete(&api, &gvk.kind, &name, mode).await? {
            ctx.metrics.object_deleted(&gvk.kind);
        }
    }
    Ok(())
}

/// Carry out `plan` step by step, stopping at the first failure
pub async fn execute(plan: Plan, mode: DeleteMode, ctx: &Context) -> Result<HookOutcome> {
    let labels = created_by_labels(&ctx.app);
    let mut relation_data = vec![];

    for step in plan.steps {
        match step {
            Step::InstallIstio => ctx.settings.istioctl.install(&ctx.namespace).await?,
            Step::RemoveIstio => remove_istio(ctx, mode).await?,
            Step::Prune(kinds) => {
                for kind in kinds {
                    prune_kind(ctx, kind, mode).await?;
                }
            }
            Step::Apply(resources) => {
                for resource in resources {
                    apply_istio(ctx, resource.with_labels(&labels)).await?;
                }
            }
            Step::ApplyWorkloads(resources) => {
                for resource in resources {
                    apply_workload(ctx, resource.with_labels(&labels)).await?;
                }
            }
            Step::DeleteWorkloads(resources) => {
                for resource in &resources {
                    delete_workload(ctx, resource, mode).await?;
                }
            }
            Step::Send(send) => relation_data.push(send),
        }
    }

    Ok(HookOutcome {
        status: plan.status,
        deferred: plan.deferred,
        relation_data,
    })
}

fn load_balancer_address(service: &Service) -> Option<String> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?;
    ingress
        .iter()
        .find_map(|i| i.ip.clone())
        .or_else(|| ingress.iter().find_map(|i| i.hostname.clone()))
}

/// External address of the ingress gateway, once its load balancer has one
pub async fn gateway_address(
    client: &Client,
    namespace: &str,
    selector: &str,
) -> Result<Option<String>> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let services = services
        .list(&ListParams::default().labels(selector))
        .await?;
    Ok(services.items.iter().find_map(load_balancer_address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

    fn service(ingress: Vec<LoadBalancerIngress>) -> Service {
        Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(ingress),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn address_prefers_ip_over_hostname() {
        let svc = service(vec![
            LoadBalancerIngress {
                hostname: Some("lb.example.com".into()),
                ..Default::default()
            },
            LoadBalancerIngress {
                ip: Some("10.0.0.1".into()),
                ..Default::default()
            },
        ]);
        assert_eq!(load_balancer_address(&svc).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn address_falls_back_to_hostname() {
        let svc = service(vec![LoadBalancerIngress {
            hostname: Some("lb.example.com".into()),
            ..Default::default()
        }]);
        assert_eq!(
            load_balancer_address(&svc).as_deref(),
            Some("lb.example.com")
        );
    }

    #[test]
    fn pending_load_balancer_has_no_address() {
        assert_eq!(load_balancer_address(&Service::default()), None);
        assert_eq!(load_balancer_address(&service(vec![])), None);
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} for test"),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn missing_objects_are_always_tolerated() {
        for mode in [DeleteMode::Normal, DeleteMode::Teardown] {
            assert!(tolerated(&api_error(404, "NotFound"), mode));
        }
    }

    #[test]
    fn unauthorized_is_only_tolerated_during_teardown() {
        let err = api_error(401, "Unauthorized");
        assert!(tolerated(&err, DeleteMode::Teardown));
        assert!(!tolerated(&err, DeleteMode::Normal));
    }

    #[test]
    fn other_failures_are_never_tolerated() {
        for mode in [DeleteMode::Normal, DeleteMode::Teardown] {
            assert!(!tolerated(&api_error(403, "Forbidden"), mode));
            assert!(!tolerated(&api_error(500, "InternalError"), mode));
        }
    }

    #[test]
    fn created_by_label() {
        assert_eq!(
            created_by_selector("istio-pilot"),
            "app.juju.is/created-by=istio-pilot"
        );
        assert_eq!(
            created_by_labels("istio-pilot")[CREATED_BY_LABEL],
            "istio-pilot"
        );
    }

    #[test]
    fn manifest_documents_become_objects() {
        let manifest = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: istiod
  namespace: kubeflow
---
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: gateways.networking.istio.io
"#;
        let objects = manifest_objects(manifest).unwrap();
        let names: Vec<_> = objects.iter().map(|o| o.name_any()).collect();
        assert_eq!(names, ["istiod", "gateways.networking.istio.io"]);

        let gvk = GroupVersionKind::try_from(objects[1].types.as_ref().unwrap()).unwrap();
        assert_eq!(gvk.group, "apiextensions.k8s.io");
        assert_eq!(gvk.kind, "CustomResourceDefinition");
    }
}
