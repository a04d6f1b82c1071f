//! Runs the patch stages strictly in order over one package context.

use crate::Patcher;
use dexcloak_core::context::ProjectContext;
use dexcloak_utils::errors::PackageError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};

/// Runs every stage in order, sharing one seeded RNG. The first stage
/// failure aborts the package; there is no retry and no partial success.
pub async fn run(
    ctx: &mut ProjectContext,
    stages: &mut [Box<dyn Patcher>],
    seed: u64,
) -> Result<(), PackageError> {
    let mut rng = StdRng::seed_from_u64(seed);

    for stage in stages {
        info!("{:>14} running", stage.name());
        if let Err(source) = stage.apply(ctx, &mut rng).await {
            error!(
                stage = stage.name(),
                package = %ctx.root().display(),
                %source,
                "stage failed, abandoning package"
            );
            return Err(PackageError::Stage {
                stage: stage.name(),
                source,
            });
        }
    }
    Ok(())
}
