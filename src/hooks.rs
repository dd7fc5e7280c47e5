use serde::Serialize;

use crate::context::Endpoint;
use crate::resources::{IstioResource, ResourceKind, WorkloadResource};

/// The lifecycle events an operator reacts to. Each one maps to exactly one reconciliation.
#[derive(clap::Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// The application was deployed
    Install,
    /// The application's configuration changed
    ConfigChanged,
    /// A related application changed its data
    RelationChanged(RelationEvent),
    /// A unit of a related application left
    RelationDeparted(RelationEvent),
    /// A relation is going away; its data is still visible but must be ignored
    RelationBroken(RelationEvent),
    /// The application is being removed
    Remove,
}

#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct RelationEvent {
    #[arg(long, value_enum)]
    pub endpoint: Endpoint,
    #[arg(long)]
    pub relation_id: u64,
    /// Remote application
    #[arg(long)]
    pub app: String,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Install => "install",
            Trigger::ConfigChanged => "config-changed",
            Trigger::RelationChanged(_) => "relation-changed",
            Trigger::RelationDeparted(_) => "relation-departed",
            Trigger::RelationBroken(_) => "relation-broken",
            Trigger::Remove => "remove",
        }
    }

    pub fn relation(&self) -> Option<&RelationEvent> {
        match self {
            Trigger::RelationChanged(ev)
            | Trigger::RelationDeparted(ev)
            | Trigger::RelationBroken(ev) => Some(ev),
            _ => None,
        }
    }

    /// The relation that is going away, if this is a relation-broken trigger
    pub fn broken(&self) -> Option<&RelationEvent> {
        match self {
            Trigger::RelationBroken(ev) => Some(ev),
            _ => None,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Waiting(String),
    Blocked(String),
}

/// Data to publish to one application over one relation
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RelationSend {
    pub endpoint: Endpoint,
    pub relation_id: u64,
    pub app: String,
    pub data: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// `istioctl install` into the model namespace
    InstallIstio,
    /// Delete every object `istioctl` would install
    RemoveIstio,
    /// Delete every object of these kinds created by this application
    Prune(Vec<ResourceKind>),
    Apply(Vec<IstioResource>),
    ApplyWorkloads(Vec<WorkloadResource>),
    DeleteWorkloads(Vec<WorkloadResource>),
    Send(RelationSend),
}

/// Everything a hook intends to do, decided before touching the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub status: UnitStatus,
    /// Ask the framework to re-run this hook later
    pub deferred: bool,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(status: UnitStatus, steps: Vec<Step>) -> Self {
        Plan {
            status,
            deferred: false,
            steps,
        }
    }

    /// Nothing to do, just report `status`
    pub fn idle(status: UnitStatus) -> Self {
        Self::new(status, vec![])
    }

    pub fn defer(status: UnitStatus) -> Self {
        Plan {
            status,
            deferred: true,
            steps: vec![],
        }
    }
}

/// What the framework should do after the hook ran
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct HookOutcome {
    pub status: UnitStatus,
    pub deferred: bool,
    pub relation_data: Vec<RelationSend>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serialization() {
        assert_eq!(
            serde_json::to_value(UnitStatus::Active).unwrap(),
            json!({"status": "active"})
        );
        assert_eq!(
            serde_json::to_value(UnitStatus::Waiting("Waiting for leadership".into())).unwrap(),
            json!({"status": "waiting", "message": "Waiting for leadership"})
        );
    }

    #[test]
    fn only_relation_broken_is_broken() {
        let ev = RelationEvent {
            endpoint: Endpoint::Ingress,
            relation_id: 1,
            app: "app".into(),
        };
        assert_eq!(Trigger::RelationBroken(ev.clone()).broken(), Some(&ev));
        assert_eq!(Trigger::RelationDeparted(ev.clone()).broken(), None);
        assert_eq!(Trigger::RelationDeparted(ev.clone()).relation(), Some(&ev));
        assert_eq!(Trigger::Install.relation(), None);
    }
}
