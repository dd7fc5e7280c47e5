use kube::Client;
use tracing::*;

use crate::context::HookContext;
use crate::hooks::{HookOutcome, Trigger};
use crate::istioctl::Istioctl;
use crate::reconcilers::{self, DeleteMode};
use crate::{Metrics, Result};

pub mod gateway;
pub mod pilot;

/// Which operator this process is acting as
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charm {
    Pilot,
    Gateway,
}

impl Charm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Charm::Pilot => "pilot",
            Charm::Gateway => "gateway",
        }
    }
}

/// Operator settings that come from flags rather than the hook context
#[derive(Clone, Debug)]
pub struct Settings {
    /// Field manager used for server-side apply
    pub field_manager: String,
    pub istioctl: Istioctl,
    /// Where the ingress gateway's load balancer Service lives
    pub gateway_service_namespace: String,
    /// Label selector matching the ingress gateway's load balancer Service
    pub gateway_service_selector: String,
}

/// Context for one hook execution
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub settings: Settings,
    /// Namespace every object is created in
    pub namespace: String,
    /// Application the created objects are labelled with
    pub app: String,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(client: Client, settings: Settings, hook_ctx: &HookContext, metrics: Metrics) -> Self {
        Context {
            client,
            settings,
            namespace: hook_ctx.model.clone(),
            app: hook_ctx.app.clone(),
            metrics,
        }
    }
}

/// Plan `trigger` against the snapshot and carry the plan out
#[instrument(skip(hook_ctx, ctx), fields(charm = charm.as_str(), hook = trigger.name()))]
pub async fn run_hook(
    charm: Charm,
    trigger: &Trigger,
    hook_ctx: &HookContext,
    ctx: &Context,
) -> Result<HookOutcome> {
    let _timer = ctx.metrics.count_and_measure(charm.as_str(), trigger.name());
    info!("Handling {} for {}", trigger.name(), hook_ctx.app);

    let outcome = plan_and_execute(charm, trigger, hook_ctx, ctx).await;
    if let Err(err) = &outcome {
        warn!("{} failed: {err}", trigger.name());
        ctx.metrics
            .hook_failure(charm.as_str(), trigger.name(), err);
    }
    outcome
}

async fn plan_and_execute(
    charm: Charm,
    trigger: &Trigger,
    hook_ctx: &HookContext,
    ctx: &Context,
) -> Result<HookOutcome> {
    let plan = match charm {
        Charm::Pilot => {
            let address = if hook_ctx.leader && pilot::needs_gateway_address(trigger) {
                reconcilers::gateway_address(
                    &ctx.client,
                    &ctx.settings.gateway_service_namespace,
                    &ctx.settings.gateway_service_selector,
                )
                .await?
            } else {
                None
            };
            pilot::plan(trigger, hook_ctx, address.as_deref())?
        }
        Charm::Gateway => gateway::plan(trigger, hook_ctx)?,
    };
    debug!("Planned {} steps, status {:?}", plan.steps.len(), plan.status);

    let mode = match trigger {
        Trigger::Remove => DeleteMode::Teardown,
        _ => DeleteMode::Normal,
    };
    reconcilers::execute(plan, mode, ctx).await
}
