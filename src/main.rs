use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use tracing::*;

use istio_operators::context::HookContext;
use istio_operators::controllers::{self, Charm, Context, Settings};
use istio_operators::hooks::Trigger;
use istio_operators::istioctl::Istioctl;
use istio_operators::telemetry::{self, LogFormat};
use istio_operators::{encode_metrics, Metrics};

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct Arguments {
    /// Hook context snapshot written by the framework
    #[arg(long, env = "ISTIO_OPERATOR_CONTEXT", value_name = "FILE")]
    context: PathBuf,

    #[arg(long, env = "ISTIO_OPERATOR_FIELD_MANAGER", default_value = "istio-operator")]
    field_manager: String,

    #[arg(long, env = "ISTIO_OPERATOR_ISTIOCTL", default_value = "./istioctl")]
    istioctl: PathBuf,

    #[arg(
        long,
        env = "ISTIO_OPERATOR_GATEWAY_SERVICE_NAMESPACE",
        default_value = "istio-system"
    )]
    gateway_service_namespace: String,

    #[arg(
        long,
        env = "ISTIO_OPERATOR_GATEWAY_SERVICE_SELECTOR",
        default_value = "istio=ingressgateway"
    )]
    gateway_service_selector: String,

    #[arg(long, env = "ISTIO_OPERATOR_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,

    /// Write Prometheus text exposition here after the hook ran
    #[arg(long, env = "ISTIO_OPERATOR_METRICS_TEXTFILE", value_name = "FILE")]
    metrics_textfile: Option<PathBuf>,

    /// Write the hook outcome here instead of stdout
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    #[command(subcommand)]
    charm: CharmCommand,
}

#[derive(Debug, clap::Subcommand)]
enum CharmCommand {
    /// Run a hook of the pilot operator
    Pilot {
        #[command(subcommand)]
        hook: Trigger,
    },
    /// Run a hook of the gateway operator
    Gateway {
        #[command(subcommand)]
        hook: Trigger,
    },
}

impl CharmCommand {
    fn split(self) -> (Charm, Trigger) {
        match self {
            CharmCommand::Pilot { hook } => (Charm::Pilot, hook),
            CharmCommand::Gateway { hook } => (Charm::Gateway, hook),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Arguments = Arguments::parse();
    telemetry::init(args.log_format)?;

    let hook_ctx = HookContext::load(&args.context)
        .await
        .with_context(|| format!("reading hook context {}", args.context.display()))?;

    let registry = prometheus::Registry::default();
    let metrics = Metrics::default().register(&registry)?;

    let settings = Settings {
        field_manager: args.field_manager,
        istioctl: Istioctl::new(args.istioctl),
        gateway_service_namespace: args.gateway_service_namespace,
        gateway_service_selector: args.gateway_service_selector,
    };
    let client = Client::try_default().await?;
    let ctx = Context::new(client, settings, &hook_ctx, metrics);

    let (charm, trigger) = args.charm.split();
    let outcome = controllers::run_hook(charm, &trigger, &hook_ctx, &ctx).await;

    if let Some(path) = &args.metrics_textfile {
        if let Err(err) = tokio::fs::write(path, encode_metrics(&registry)?).await {
            warn!("Failed to write metrics to {}: {err}", path.display());
        }
    }

    let outcome = serde_json::to_string_pretty(&outcome?)?;
    match &args.output {
        Some(path) => tokio::fs::write(path, outcome).await?,
        None => println!("{outcome}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use istio_operators::context::Endpoint;
    use istio_operators::hooks::RelationEvent;

    #[test]
    fn arguments_are_consistent() {
        Arguments::command().debug_assert();
    }

    #[test]
    fn relation_hook_arguments() {
        let args = Arguments::try_parse_from([
            "istio-operator",
            "--context",
            "ctx.yaml",
            "pilot",
            "relation-broken",
            "--endpoint",
            "ingress-auth",
            "--relation-id",
            "4",
            "--app",
            "oidc",
        ])
        .unwrap();

        assert_eq!(args.gateway_service_selector, "istio=ingressgateway");
        assert_eq!(args.log_format, LogFormat::Compact);
        assert_eq!(
            args.charm.split(),
            (
                Charm::Pilot,
                Trigger::RelationBroken(RelationEvent {
                    endpoint: Endpoint::IngressAuth,
                    relation_id: 4,
                    app: "oidc".into(),
                })
            )
        );
    }

    #[test]
    fn gateway_lifecycle_hooks() {
        let args =
            Arguments::try_parse_from(["istio-operator", "--context", "c", "gateway", "remove"])
                .unwrap();
        assert_eq!(args.charm.split(), (Charm::Gateway, Trigger::Remove));
    }
}
