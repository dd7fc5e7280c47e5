use tracing::*;

use crate::context::{Endpoint, HookContext};
use crate::hooks::{Plan, RelationSend, Step, Trigger, UnitStatus};
use crate::relations::{self, PilotInfo};
use crate::resources::ResourceKind;
use crate::Result;

use super::reconcilers::{auth, gateways, routes};

/// Port istiod serves xDS and certificates on
pub const ISTIOD_PORT: u16 = 15012;

/// Whether `trigger` needs the ingress gateway's external address to be planned
pub fn needs_gateway_address(trigger: &Trigger) -> bool {
    trigger
        .relation()
        .is_some_and(|ev| ev.endpoint == Endpoint::Ingress)
}

/// Decide what the pilot operator does for `trigger`.
///
/// `gateway_address` is only consulted for ingress relation triggers, see
/// [`needs_gateway_address`].
pub fn plan(trigger: &Trigger, ctx: &HookContext, gateway_address: Option<&str>) -> Result<Plan> {
    if !ctx.leader {
        // Only the leader may touch shared cluster state
        return Ok(Plan::idle(UnitStatus::Waiting(
            "Waiting for leadership".into(),
        )));
    }

    match trigger {
        Trigger::Install => Ok(Plan::new(UnitStatus::Active, vec![Step::InstallIstio])),
        Trigger::ConfigChanged => Ok(plan_default_gateways(ctx)),
        Trigger::Remove => Ok(Plan::new(
            UnitStatus::Active,
            vec![Step::Prune(ResourceKind::ALL.to_vec()), Step::RemoveIstio],
        )),
        Trigger::RelationChanged(ev) if ev.endpoint == Endpoint::IstioPilot => {
            plan_pilot_info(ctx)
        }
        Trigger::RelationChanged(ev)
        | Trigger::RelationDeparted(ev)
        | Trigger::RelationBroken(ev) => match ev.endpoint {
            Endpoint::Ingress => plan_ingress(trigger, ctx, gateway_address),
            Endpoint::IngressAuth => plan_ingress_auth(trigger, ctx),
            Endpoint::IstioPilot => Ok(Plan::idle(UnitStatus::Active)),
        },
    }
}

fn plan_default_gateways(ctx: &HookContext) -> Plan {
    let names = ctx.config.default_gateways();
    if names.is_empty() {
        return Plan::idle(UnitStatus::Blocked(
            "Config item `default-gateways` must be set".into(),
        ));
    }

    Plan::new(
        UnitStatus::Active,
        vec![
            Step::Prune(vec![ResourceKind::Gateway]),
            Step::Apply(gateways::default_gateways(&names, &ctx.model)),
        ],
    )
}

fn plan_pilot_info(ctx: &HookContext) -> Result<Plan> {
    let info = serde_json::to_value(PilotInfo {
        service_name: format!("istiod.{}.svc", ctx.model),
        service_port: ISTIOD_PORT.to_string(),
    })?;

    let steps = ctx
        .remote_data(Endpoint::IstioPilot)
        .into_iter()
        .map(|record| {
            Step::Send(RelationSend {
                endpoint: Endpoint::IstioPilot,
                relation_id: record.id,
                app: record.app.clone(),
                data: info.clone(),
            })
        })
        .collect();

    Ok(Plan::new(UnitStatus::Active, steps))
}

fn plan_ingress(
    trigger: &Trigger,
    ctx: &HookContext,
    gateway_address: Option<&str>,
) -> Result<Plan> {
    let Some(gateway_address) = gateway_address else {
        return Ok(Plan::defer(UnitStatus::Waiting(
            "Waiting for gateway address".into(),
        )));
    };
    let Some(gateway) = ctx.config.default_gateways().into_iter().next() else {
        return Ok(Plan::idle(UnitStatus::Blocked(
            "Config item `default-gateways` must be set".into(),
        )));
    };

    let mut requests = relations::ingress_routes(ctx)?;
    if let Some(broken) = trigger.broken() {
        // The broken relation's data is still readable, but its routes must go
        requests.retain(|r| !(r.relation_id == broken.relation_id && r.application == broken.app));
    }
    debug!("Computing routes for {} applications", requests.len());

    let desired = routes::compute(&requests, &gateway, &ctx.model, gateway_address);

    let mut steps = vec![Step::Prune(vec![
        ResourceKind::VirtualService,
        ResourceKind::DestinationRule,
    ])];
    if !desired.documents.is_empty() {
        steps.push(Step::Apply(desired.documents));
    }
    for response in desired.responses {
        steps.push(Step::Send(RelationSend {
            endpoint: Endpoint::Ingress,
            relation_id: response.relation_id,
            app: response.application,
            data: serde_json::to_value(response.data)?,
        }));
    }

    Ok(Plan::new(UnitStatus::Active, steps))
}

fn plan_ingress_auth(trigger: &Trigger, ctx: &HookContext) -> Result<Plan> {
    let mut requests = relations::auth_routes(ctx)?;
    if let Some(broken) = trigger.broken() {
        requests.retain(|r| !(r.relation_id == broken.relation_id && r.application == broken.app));
    }

    let Some(resources) = auth::auth_resources(&requests, &ctx.model)? else {
        return Ok(Plan::idle(UnitStatus::Waiting(
            "Waiting for auth route connection information.".into(),
        )));
    };

    let mut steps = vec![Step::Prune(vec![
        ResourceKind::EnvoyFilter,
        ResourceKind::RbacConfig,
    ])];
    if !resources.is_empty() {
        steps.push(Step::Apply(resources));
    }
    Ok(Plan::new(UnitStatus::Active, steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::RelationEvent;
    use serde_json::json;

    const CONTEXT: &str = r#"
model: kubeflow
app: istio-pilot
leader: true
relations:
  ingress:
    - id: 1
      app: app
      version: v3
      units: [app/0, app/1]
      data: {service: app, port: 80, prefix: /app/, per_unit_routes: true}
    - id: 2
      app: legacy
      version: v1
      units: [legacy/0]
      data: {service: legacy, port: 8080, prefix: /legacy}
    - id: 1
      app: istio-pilot
      version: v3
      data: {url: "http://stale/"}
  ingress-auth:
    - id: 4
      app: oidc
      version: v1
      data: {service: oidc, port: 8080}
  istio-pilot:
    - id: 6
      app: istio-ingressgateway
      version: v1
    - id: 7
      app: istio-egressgateway
      version: v1
"#;

    fn ctx() -> HookContext {
        HookContext::from_yaml(CONTEXT).unwrap()
    }

    fn ev(endpoint: Endpoint, relation_id: u64, app: &str) -> RelationEvent {
        RelationEvent {
            endpoint,
            relation_id,
            app: app.into(),
        }
    }

    fn applied(plan: &Plan) -> Vec<(ResourceKind, String)> {
        plan.steps
            .iter()
            .filter_map(|s| match s {
                Step::Apply(docs) => Some(docs),
                _ => None,
            })
            .flatten()
            .map(|d| (d.kind(), d.name()))
            .collect()
    }

    fn sent(plan: &Plan) -> Vec<&RelationSend> {
        plan.steps
            .iter()
            .filter_map(|s| match s {
                Step::Send(send) => Some(send),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn not_leader_does_nothing() {
        let mut ctx = ctx();
        ctx.leader = false;

        for trigger in [Trigger::Install, Trigger::ConfigChanged, Trigger::Remove] {
            assert_eq!(
                plan(&trigger, &ctx, Some("1.2.3.4")).unwrap(),
                Plan::idle(UnitStatus::Waiting("Waiting for leadership".into()))
            );
        }
    }

    #[test]
    fn install_runs_istioctl() {
        let plan = plan(&Trigger::Install, &ctx(), None).unwrap();
        assert_eq!(plan.steps, vec![Step::InstallIstio]);
        assert_eq!(plan.status, UnitStatus::Active);
    }

    #[test]
    fn config_changed_replaces_gateways() {
        let plan = plan(&Trigger::ConfigChanged, &ctx(), None).unwrap();
        assert_eq!(plan.steps[0], Step::Prune(vec![ResourceKind::Gateway]));
        assert_eq!(
            applied(&plan),
            vec![(ResourceKind::Gateway, "istio-gateway".to_string())]
        );
    }

    #[test]
    fn config_changed_without_gateways_blocks() {
        let mut ctx = ctx();
        ctx.config.default_gateways = Some(String::new());

        let plan = plan(&Trigger::ConfigChanged, &ctx, None).unwrap();
        assert!(matches!(plan.status, UnitStatus::Blocked(_)));
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn ingress_waits_for_gateway_address() {
        let trigger = Trigger::RelationChanged(ev(Endpoint::Ingress, 1, "app"));
        assert!(needs_gateway_address(&trigger));

        let plan = plan(&trigger, &ctx(), None).unwrap();
        assert!(plan.deferred);
        assert!(plan.steps.is_empty());
        assert_eq!(
            plan.status,
            UnitStatus::Waiting("Waiting for gateway address".into())
        );
    }

    #[test]
    fn ingress_prunes_applies_and_responds() {
        let trigger = Trigger::RelationChanged(ev(Endpoint::Ingress, 1, "app"));

        let plan = plan(&trigger, &ctx(), Some("10.0.0.1")).unwrap();

        assert_eq!(
            plan.steps[0],
            Step::Prune(vec![
                ResourceKind::VirtualService,
                ResourceKind::DestinationRule
            ])
        );
        assert_eq!(
            applied(&plan),
            vec![
                (ResourceKind::VirtualService, "app".to_string()),
                (ResourceKind::DestinationRule, "app".to_string()),
                (ResourceKind::VirtualService, "legacy".to_string()),
            ]
        );
        assert_eq!(
            sent(&plan),
            vec![&RelationSend {
                endpoint: Endpoint::Ingress,
                relation_id: 1,
                app: "app".into(),
                data: json!({
                    "url": "http://10.0.0.1/app/",
                    "unit_urls": {
                        "app/0": "http://10.0.0.1/app-unit-0/",
                        "app/1": "http://10.0.0.1/app-unit-1/",
                    },
                }),
            }]
        );
    }

    #[test]
    fn relation_broken_drops_that_relations_routes() {
        let trigger = Trigger::RelationBroken(ev(Endpoint::Ingress, 1, "app"));

        let plan = plan(&trigger, &ctx(), Some("10.0.0.1")).unwrap();

        assert_eq!(
            applied(&plan),
            vec![(ResourceKind::VirtualService, "legacy".to_string())]
        );
        assert!(sent(&plan).is_empty());
    }

    #[test]
    fn last_relation_broken_only_prunes() {
        let mut ctx = ctx();
        ctx.relations.get_mut(&Endpoint::Ingress).unwrap().retain(|r| r.id == 1);
        let trigger = Trigger::RelationBroken(ev(Endpoint::Ingress, 1, "app"));

        let plan = plan(&trigger, &ctx, Some("10.0.0.1")).unwrap();

        assert_eq!(
            plan.steps,
            vec![Step::Prune(vec![
                ResourceKind::VirtualService,
                ResourceKind::DestinationRule
            ])]
        );
    }

    #[test]
    fn invalid_route_fails_before_pruning() {
        let mut ctx = ctx();
        ctx.relations.get_mut(&Endpoint::Ingress).unwrap()[1].data =
            serde_yaml::from_str("{service: legacy, prefix: /legacy}").unwrap();
        let trigger = Trigger::RelationChanged(ev(Endpoint::Ingress, 2, "legacy"));

        assert!(plan(&trigger, &ctx, Some("10.0.0.1")).is_err());
    }

    #[test]
    fn ingress_auth_applies_rbac_and_filters() {
        let trigger = Trigger::RelationChanged(ev(Endpoint::IngressAuth, 4, "oidc"));
        assert!(!needs_gateway_address(&trigger));

        let plan = plan(&trigger, &ctx(), None).unwrap();

        assert_eq!(
            plan.steps[0],
            Step::Prune(vec![ResourceKind::EnvoyFilter, ResourceKind::RbacConfig])
        );
        assert_eq!(
            applied(&plan),
            vec![
                (ResourceKind::RbacConfig, "default".to_string()),
                (ResourceKind::EnvoyFilter, "authn-filter-oidc".to_string()),
            ]
        );
    }

    #[test]
    fn ingress_auth_without_service_waits() {
        let mut ctx = ctx();
        ctx.relations.get_mut(&Endpoint::IngressAuth).unwrap()[0].data =
            serde_yaml::from_str("{port: 8080}").unwrap();
        let trigger = Trigger::RelationChanged(ev(Endpoint::IngressAuth, 4, "oidc"));

        let plan = plan(&trigger, &ctx, None).unwrap();

        assert!(plan.steps.is_empty());
        assert_eq!(
            plan.status,
            UnitStatus::Waiting("Waiting for auth route connection information.".into())
        );
    }

    #[test]
    fn istio_pilot_relation_gets_istiod_address() {
        let trigger = Trigger::RelationChanged(ev(Endpoint::IstioPilot, 6, "istio-ingressgateway"));

        let plan = plan(&trigger, &ctx(), None).unwrap();

        let targets: Vec<_> = sent(&plan).iter().map(|s| s.relation_id).collect();
        assert_eq!(targets, vec![6, 7]);
        assert_eq!(
            sent(&plan)[0].data,
            json!({"service-name": "istiod.kubeflow.svc", "service-port": "15012"})
        );
    }

    #[test]
    fn remove_prunes_everything_then_uninstalls() {
        let plan = plan(&Trigger::Remove, &ctx(), None).unwrap();
        assert_eq!(
            plan.steps,
            vec![Step::Prune(ResourceKind::ALL.to_vec()), Step::RemoveIstio]
        );
    }
}
