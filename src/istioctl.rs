use std::path::PathBuf;

use tokio::process::Command;
use tracing::*;

use crate::{Error, Result};

/// Thin wrapper around the `istioctl` binary shipped next to the operator
#[derive(Clone, Debug)]
pub struct Istioctl {
    path: PathBuf,
}

impl Istioctl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn install_args(namespace: &str) -> Vec<String> {
        vec![
            "install".into(),
            "-y".into(),
            "-s".into(),
            "profile=minimal".into(),
            "-s".into(),
            format!("values.global.istioNamespace={namespace}"),
        ]
    }

    fn manifest_args(namespace: &str) -> Vec<String> {
        vec![
            "manifest".into(),
            "generate".into(),
            "-s".into(),
            "profile=minimal".into(),
            "-s".into(),
            format!("values.global.istioNamespace={namespace}"),
        ]
    }

    /// Install the control plane into `namespace`
    pub async fn install(&self, namespace: &str) -> Result<()> {
        info!("Installing istio into namespace {namespace}");
        self.run(&Self::install_args(namespace)).await?;
        Ok(())
    }

    /// The multi-document YAML that `install` would apply
    pub async fn manifest_generate(&self, namespace: &str) -> Result<String> {
        self.run(&Self::manifest_args(namespace)).await
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!("Running {} {}", self.path.display(), args.join(" "));
        let output = Command::new(&self.path).args(args).output().await?;

        if !output.status.success() {
            return Err(Error::Istioctl {
                command: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
