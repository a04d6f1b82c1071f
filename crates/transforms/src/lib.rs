//! Patch stages for DexCloak: API reflection indirection, manifest mutation,
//! string encryption, and the external rebuild, plus the pipeline that runs
//! them in fixed order over one mutable [`ProjectContext`].

pub mod api_reflection;
pub mod manifest;
pub mod pass;
pub mod rebuild;
pub mod string_encrypt;
pub mod support;
pub mod tool;

mod inject;

use async_trait::async_trait;
use dexcloak_core::context::ProjectContext;
use dexcloak_core::feature::Directives;
use dexcloak_utils::errors::PatchError;
use rand::rngs::StdRng;

/// One patch stage. Stages borrow the context mutably in sequence and must
/// not retain any reference after returning.
#[async_trait]
pub trait Patcher: Send {
    /// Returns the stage's name for logging and failure reporting.
    fn name(&self) -> &'static str;
    /// Applies the stage to the package. Errors abort the whole package.
    async fn apply(
        &mut self,
        ctx: &mut ProjectContext,
        rng: &mut StdRng,
    ) -> Result<(), PatchError>;
}

/// The fixed stage list for one package, in pipeline order.
pub fn standard_stages(directives: &Directives, tools: tool::ToolSuite) -> Vec<Box<dyn Patcher>> {
    vec![
        Box::new(api_reflection::ApiPatcher::new(directives.api.clone())),
        Box::new(manifest::ManifestPatcher::new(directives.manifest.clone())),
        Box::new(string_encrypt::StringPatcher::new(
            directives.strings.clone(),
        )),
        Box::new(rebuild::Rebuild::new(tools)),
    ]
}
