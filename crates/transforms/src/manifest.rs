//! The manifest patch stage: directive-driven element insertion followed by
//! duplicate elimination, structural scrambling, and re-indentation.

use crate::Patcher;
use async_trait::async_trait;
use dexcloak_core::context::ProjectContext;
use dexcloak_core::feature::{ManifestDirective, ManifestKind};
use dexcloak_core::manifest::{indent, remove_duplicates, scramble, Element};
use dexcloak_utils::errors::{ManifestError, PatchError};
use rand::rngs::StdRng;
use rand::Rng;
use std::fs;
use tracing::debug;

/// The manifest patch stage.
#[derive(Debug)]
pub struct ManifestPatcher {
    directives: Vec<ManifestDirective>,
}

impl ManifestPatcher {
    /// Creates the stage for the given insertion directives.
    pub fn new(directives: Vec<ManifestDirective>) -> Self {
        Self { directives }
    }
}

#[async_trait]
impl Patcher for ManifestPatcher {
    fn name(&self) -> &'static str {
        "Manifest"
    }

    async fn apply(
        &mut self,
        ctx: &mut ProjectContext,
        rng: &mut StdRng,
    ) -> Result<(), PatchError> {
        if self.directives.is_empty() {
            return Ok(());
        }
        debug!(count = self.directives.len(), "inserting manifest elements");

        let xml = fs::read_to_string(ctx.manifest_file())?;
        let mut root = Element::parse_document(&xml)?;

        insert_directives(&mut root, &self.directives, rng)?;
        remove_duplicates(&mut root);
        scramble(&mut root, rng);
        indent(&mut root);

        fs::write(ctx.manifest_file(), root.to_document_string())?;
        Ok(())
    }
}

/// Inserts the requested elements plus one decoy activity and one decoy
/// receiver/meta-data pairing unrelated to any directive, diluting the
/// distinctiveness of the inserted set. Permissions and features go under
/// the document root, components under `<application>`.
fn insert_directives(
    root: &mut Element,
    directives: &[ManifestDirective],
    rng: &mut StdRng,
) -> Result<(), ManifestError> {
    let mut decoy_activity = make_activity("test_activity_sss");
    let mut app_additions = vec![make_decoy_receiver("android.arch.lifecycle.VERSION", rng)];
    let mut root_additions: Vec<Element> = Vec::new();

    for directive in directives {
        match directive.kind {
            ManifestKind::Permission => root_additions.push(make_permission(&directive.name)),
            ManifestKind::Feature => root_additions.push(make_feature(&directive.name)),
            ManifestKind::Activity => app_additions.push(make_activity(&directive.name)),
            ManifestKind::Service => app_additions.push(make_component("service", &directive.name)),
            ManifestKind::Receiver => {
                app_additions.push(make_component("receiver", &directive.name));
            }
            ManifestKind::Provider => {
                app_additions.push(make_decoy_receiver(&directive.name, rng));
            }
            ManifestKind::IntentFilter => decoy_activity
                .children
                .push(make_intent_filter("com.google.android.gms.measurement.upload")),
        }
    }

    let application = root
        .children
        .iter_mut()
        .find(|c| c.tag == "application")
        .ok_or(ManifestError::NoApplication)?;
    application.children.push(decoy_activity);
    application.children.append(&mut app_additions);
    root.children.append(&mut root_additions);
    Ok(())
}

fn make_permission(name: &str) -> Element {
    let mut element = Element::new("uses-permission");
    element.set_attr("android:name", name);
    element
}

fn make_feature(name: &str) -> Element {
    let mut element = Element::new("uses-feature");
    element.set_attr("android:name", name);
    element.set_attr("android:required", "true");
    element
}

fn make_activity(name: &str) -> Element {
    make_component("activity", name)
}

fn make_component(tag: &str, name: &str) -> Element {
    let mut element = Element::new(tag);
    element.set_attr("android:name", name);
    element
}

/// Provider directives materialize as an app-widget receiver carrying the
/// requested name in a meta-data child; the same shape doubles as the
/// always-inserted decoy pairing.
fn make_decoy_receiver(meta_name: &str, rng: &mut StdRng) -> Element {
    let mut receiver = Element::new("receiver");
    receiver.set_attr(
        "android:name",
        format!("NonExistProvider{}", rng.random_range(10..100)),
    );
    receiver
        .children
        .push(make_intent_filter("android.appwidget.action.APPWIDGET_UPDATE"));
    let mut meta = Element::new("meta-data");
    meta.set_attr("android:name", meta_name);
    receiver.children.push(meta);
    receiver
}

fn make_intent_filter(action_name: &str) -> Element {
    let mut filter = Element::new("intent-filter");
    let mut action = Element::new("action");
    action.set_attr("android:name", action_name);
    filter.children.push(action);
    filter
}
