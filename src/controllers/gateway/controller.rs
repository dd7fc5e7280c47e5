use crate::context::{Endpoint, HookContext};
use crate::hooks::{Plan, Step, Trigger, UnitStatus};
use crate::relations::{self, PilotInfo};
use crate::Result;

use super::reconcilers::manifests::{manifests, GatewayKind};

fn kind(ctx: &HookContext) -> Option<GatewayKind> {
    ctx.config.kind.as_deref().and_then(GatewayKind::parse)
}

fn blocked_on_kind() -> Plan {
    Plan::idle(UnitStatus::Blocked("Config item `kind` must be set".into()))
}

/// Decide what the gateway operator does for `trigger`
pub fn plan(trigger: &Trigger, ctx: &HookContext) -> Result<Plan> {
    if !ctx.leader {
        return Ok(Plan::idle(UnitStatus::Waiting(
            "Waiting for leadership".into(),
        )));
    }

    match trigger {
        Trigger::Remove => Ok(plan_remove(ctx)),
        Trigger::RelationBroken(ev) if ev.endpoint == Endpoint::IstioPilot => {
            // The workload keeps running, it just has nobody to talk to
            Ok(Plan::idle(UnitStatus::Blocked(
                "Waiting for istio-pilot relation".into(),
            )))
        }
        _ => plan_install(ctx),
    }
}

fn plan_install(ctx: &HookContext) -> Result<Plan> {
    let Some(kind) = kind(ctx) else {
        return Ok(blocked_on_kind());
    };
    if !ctx.has_relation(Endpoint::IstioPilot) {
        return Ok(Plan::idle(UnitStatus::Blocked(
            "Waiting for istio-pilot relation".into(),
        )));
    }
    let Some(pilot) = relations::pilot_info(ctx)? else {
        return Ok(Plan::idle(UnitStatus::Waiting(
            "Waiting for istio-pilot relation data".into(),
        )));
    };

    let objects = manifests(kind, &ctx.model, &pilot, ctx.config.proxy_image());
    Ok(Plan::new(
        UnitStatus::Active,
        vec![Step::ApplyWorkloads(objects)],
    ))
}

fn plan_remove(ctx: &HookContext) -> Plan {
    let Some(kind) = kind(ctx) else {
        return blocked_on_kind();
    };
    // Only names matter for deletion
    let pilot = PilotInfo {
        service_name: String::new(),
        service_port: String::new(),
    };
    let objects = manifests(kind, &ctx.model, &pilot, ctx.config.proxy_image());
    Plan::new(UnitStatus::Active, vec![Step::DeleteWorkloads(objects)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::RelationEvent;
    use crate::resources::WorkloadResource;

    const CONTEXT: &str = r#"
model: kubeflow
app: istio-ingressgateway
leader: true
config:
  kind: ingress
  proxy-image: proxy:1
relations:
  istio-pilot:
    - id: 3
      app: istio-pilot
      version: v1
      data: {service-name: istiod.kubeflow.svc, service-port: "15012"}
"#;

    fn ctx() -> HookContext {
        HookContext::from_yaml(CONTEXT).unwrap()
    }

    fn names(objects: &[WorkloadResource]) -> Vec<String> {
        objects.iter().map(|o| o.name()).collect()
    }

    #[test]
    fn install_applies_workload() {
        let plan = plan(&Trigger::Install, &ctx()).unwrap();

        assert_eq!(plan.status, UnitStatus::Active);
        let [Step::ApplyWorkloads(objects)] = plan.steps.as_slice() else {
            panic!("expected a single apply, got {:?}", plan.steps)
        };
        assert_eq!(objects.len(), 5);
        assert!(names(objects).contains(&"istio-ingressgateway".to_string()));
    }

    #[test]
    fn invalid_kind_blocks() {
        let mut ctx = ctx();
        for kind in [None, Some("sideways".to_string())] {
            ctx.config.kind = kind;
            assert_eq!(plan(&Trigger::ConfigChanged, &ctx).unwrap(), blocked_on_kind());
            assert_eq!(plan(&Trigger::Remove, &ctx).unwrap(), blocked_on_kind());
        }
    }

    #[test]
    fn waits_for_pilot() {
        let mut ctx = ctx();
        ctx.relations.get_mut(&Endpoint::IstioPilot).unwrap()[0].data = Default::default();

        let plan = plan(&Trigger::Install, &ctx).unwrap();
        assert!(plan.steps.is_empty());
        assert_eq!(
            plan.status,
            UnitStatus::Waiting("Waiting for istio-pilot relation data".into())
        );

        ctx.relations.clear();
        assert_eq!(
            super::plan(&Trigger::Install, &ctx).unwrap().status,
            UnitStatus::Blocked("Waiting for istio-pilot relation".into())
        );
    }

    #[test]
    fn pilot_relation_broken_leaves_workload() {
        let trigger = Trigger::RelationBroken(RelationEvent {
            endpoint: Endpoint::IstioPilot,
            relation_id: 3,
            app: "istio-pilot".into(),
        });

        let plan = plan(&trigger, &ctx()).unwrap();
        assert!(plan.steps.is_empty());
        assert!(matches!(plan.status, UnitStatus::Blocked(_)));
    }

    #[test]
    fn remove_deletes_same_objects() {
        let ctx = ctx();
        let install = plan(&Trigger::Install, &ctx).unwrap();
        let remove = plan(&Trigger::Remove, &ctx).unwrap();

        let (Step::ApplyWorkloads(applied), Step::DeleteWorkloads(deleted)) =
            (&install.steps[0], &remove.steps[0])
        else {
            panic!("unexpected steps")
        };
        assert_eq!(names(applied), names(deleted));
    }

    #[test]
    fn not_leader_does_nothing() {
        let mut ctx = ctx();
        ctx.leader = false;
        assert!(plan(&Trigger::Install, &ctx).unwrap().steps.is_empty());
    }
}
