/// Module for the `plan` subcommand, which parses a feature file and prints
/// the directives it would drive, as JSON, without touching any package.
use async_trait::async_trait;
use clap::Args;
use dexcloak_core::feature::{load_features, Directives, PermissionApiMap};
use std::error::Error;
use std::path::PathBuf;

/// Arguments for the `plan` subcommand.
#[derive(Args)]
pub struct PlanArgs {
    /// Feature patch file: a flat JSON object of feature name → value.
    pub features: PathBuf,
    /// PScout-format permission→API map, needed to resolve
    /// real_permission features.
    #[arg(long)]
    perm_api_map: Option<PathBuf>,
}

#[async_trait]
impl super::Command for PlanArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let features = load_features(&self.features)?;
        let perm_map = match &self.perm_api_map {
            Some(path) => Some(PermissionApiMap::load(path)?),
            None => None,
        };
        let directives = Directives::partition(&features, perm_map.as_ref());
        println!("{}", serde_json::to_string_pretty(&directives)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use std::fs;

    #[tokio::test]
    async fn plan_accepts_a_valid_feature_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.json");
        fs::write(
            &path,
            r#"{"url::http://example.com": 0.1, "permission::android.permission.SEND_SMS": 0.9}"#,
        )
        .unwrap();

        let args = PlanArgs {
            features: path,
            perm_api_map: None,
        };
        args.execute().await.unwrap();
    }

    #[tokio::test]
    async fn plan_rejects_a_missing_file() {
        let args = PlanArgs {
            features: PathBuf::from("/definitely/not/here.json"),
            perm_api_map: None,
        };
        assert!(args.execute().await.is_err());
    }
}
