use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;

pub mod patch;
pub mod plan;

#[derive(Subcommand)]
pub enum Cmd {
    /// Patch one APK or every APK under a directory
    Patch(patch::PatchArgs),

    /// Show the directives a feature file produces, without touching anything
    Plan(plan::PlanArgs),
}

#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Patch(args) => args.execute().await,
            Cmd::Plan(args) => args.execute().await,
        }
    }
}
