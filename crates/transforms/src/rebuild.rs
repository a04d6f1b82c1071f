//! The final stage: rebuild, sign and align the patched tree into the
//! output package.

use crate::tool::ToolSuite;
use crate::Patcher;
use async_trait::async_trait;
use dexcloak_core::context::ProjectContext;
use dexcloak_utils::errors::PatchError;
use rand::rngs::StdRng;
use std::fs;
use tracing::info;

/// The rebuild stage. Holds the tool suite located at startup.
#[derive(Debug)]
pub struct Rebuild {
    tools: ToolSuite,
}

impl Rebuild {
    /// Creates the stage around an already located tool suite.
    pub fn new(tools: ToolSuite) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Patcher for Rebuild {
    fn name(&self) -> &'static str {
        "Rebuild"
    }

    async fn apply(
        &mut self,
        ctx: &mut ProjectContext,
        _rng: &mut StdRng,
    ) -> Result<(), PatchError> {
        let rebuilt = ctx.root().with_extension("rebuilt.apk");

        self.tools.apktool.build(ctx.root(), &rebuilt).await?;
        self.tools.jarsigner.sign(&rebuilt, &ctx.sign).await?;

        if let Some(parent) = ctx.output_apk.parent() {
            fs::create_dir_all(parent)?;
        }
        self.tools.zipalign.align(&rebuilt, &ctx.output_apk).await?;

        info!(output = %ctx.output_apk.display(), "package rebuilt, signed and aligned");
        Ok(())
    }
}
