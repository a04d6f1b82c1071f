//! The feature-selection contract: loading the externally produced
//! {name → value} map and turning it into typed obfuscation directives.
//!
//! Feature names are composite keys `<category>::<identifier>`. The category
//! decides which subsystem consumes the feature; the value decides the
//! direction (add above 0.5, remove at or below). Nothing here second-guesses
//! the upstream statistics that chose the features.

use crate::descriptor::plain_to_descriptor;
use dexcloak_utils::errors::FeatureError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::warn;

/// The subsystem a feature is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// API call patterns, handled by the reflection stage.
    Api,
    /// Embedded string constants, handled by the string-encryption stage.
    Str,
    /// Manifest declarations, handled by the manifest stage.
    Manifest,
}

/// One named, valued signal selected by the upstream classifier-explanation
/// process. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    /// Target value in [0, 1].
    pub value: f64,
    pub kind: FeatureKind,
}

impl Feature {
    /// Builds a feature, deriving its kind from the category prefix.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        let name = name.into();
        let kind = match name.split("::").next().unwrap_or(name.as_str()) {
            "api_call" | "call" | "real_permission" => FeatureKind::Api,
            "url" | "su_call" => FeatureKind::Str,
            _ => FeatureKind::Manifest,
        };
        Self { name, value, kind }
    }

    /// The category segment before the first `::` (the whole name when there
    /// is no separator).
    pub fn category(&self) -> &str {
        self.name.split("::").next().unwrap_or(&self.name)
    }

    /// The identifier segment after the last `::`.
    pub fn identifier(&self) -> &str {
        self.name.split("::").last().unwrap_or(&self.name)
    }

    /// Directive direction: values above 0.5 request addition of the signal,
    /// everything else requests removal.
    pub fn is_add(&self) -> bool {
        self.value > 0.5
    }
}

/// Loads the feature-patch input: a flat JSON object of name → number pairs.
/// A missing or malformed file is a fatal input error for the package.
pub fn load_features(path: &Path) -> Result<Vec<Feature>, FeatureError> {
    let raw = fs::read_to_string(path).map_err(|source| FeatureError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    let map: BTreeMap<String, f64> = serde_json::from_str(&raw)?;
    let mut features = Vec::with_capacity(map.len());
    for (name, value) in map {
        if !(0.0..=1.0).contains(&value) {
            return Err(FeatureError::ValueOutOfRange { name, value });
        }
        features.push(Feature::new(name, value));
    }
    Ok(features)
}

/// API directives: signatures to rewrite through reflection (`remove`) and
/// signatures to plant as decoy calls (`add`). Removals are consumed first.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ApiDirectives {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

/// String directives: literals to encrypt in place (`remove`) and literals to
/// inject as plaintext decoys (`add`). Removal runs before addition.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StringDirectives {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

/// The manifest element kind a directive materializes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManifestKind {
    Permission,
    Feature,
    Activity,
    Service,
    Receiver,
    Provider,
    IntentFilter,
}

/// One manifest insertion request.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestDirective {
    pub kind: ManifestKind,
    pub name: String,
}

impl ManifestDirective {
    /// Maps an add-direction manifest feature to an insertion request by a
    /// category substring match. Unknown categories produce nothing.
    fn from_feature(feature: &Feature) -> Option<Self> {
        let category = feature.category();
        let kind = if category.contains("permission") {
            ManifestKind::Permission
        } else if category.contains("activity") {
            ManifestKind::Activity
        } else if category.contains("service") {
            ManifestKind::Service
        } else if category.contains("receiver") {
            ManifestKind::Receiver
        } else if category.contains("provider") {
            ManifestKind::Provider
        } else if category.contains("intent") {
            ManifestKind::IntentFilter
        } else if category.contains("feature") {
            ManifestKind::Feature
        } else {
            return None;
        };
        Some(Self {
            kind,
            name: feature.identifier().replace("..", "."),
        })
    }
}

/// The full set of actionable directives for one package, partitioned by
/// target subsystem.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Directives {
    pub api: ApiDirectives,
    pub strings: StringDirectives,
    pub manifest: Vec<ManifestDirective>,
}

impl Directives {
    /// Partitions features into directives. `real_permission::` features
    /// resolve through `perm_map` to that permission's first known API;
    /// without a map (or an entry) they are logged and skipped.
    pub fn partition(features: &[Feature], perm_map: Option<&PermissionApiMap>) -> Self {
        let mut directives = Self::default();
        for feature in features {
            match feature.kind {
                FeatureKind::Api => {
                    let signature = if feature.category() == "real_permission" {
                        match perm_map.and_then(|m| m.first_api(feature.identifier())) {
                            Some(api) => api.to_string(),
                            None => {
                                warn!(
                                    permission = feature.identifier(),
                                    "no known API for permission, skipping feature"
                                );
                                continue;
                            }
                        }
                    } else {
                        feature.identifier().to_string()
                    };
                    if feature.is_add() {
                        directives.api.add.push(signature);
                    } else {
                        directives.api.remove.push(signature);
                    }
                }
                FeatureKind::Str => {
                    let literal = feature.identifier().to_string();
                    if feature.is_add() {
                        directives.strings.add.push(literal);
                    } else {
                        directives.strings.remove.push(literal);
                    }
                }
                FeatureKind::Manifest => {
                    // Manifest features are add-type only.
                    if feature.is_add() {
                        if let Some(directive) = ManifestDirective::from_feature(feature) {
                            directives.manifest.push(directive);
                        }
                    }
                }
            }
        }
        directives
    }
}

/// One API entry in the permission map resource:
/// `[class, method, return type, [parameter types]]`, all in dotted plain
/// form.
type RawPermApi = (String, String, String, Vec<String>);

/// Permission → API lookup built from a PScout-format JSON resource. Only the
/// first API of each permission is retained, already converted to smali
/// signature form.
#[derive(Debug, Clone, Default)]
pub struct PermissionApiMap {
    first_api: HashMap<String, String>,
}

impl PermissionApiMap {
    /// Loads and converts the resource.
    pub fn load(path: &Path) -> Result<Self, FeatureError> {
        let raw = fs::read_to_string(path).map_err(|source| FeatureError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        let entries: HashMap<String, Vec<RawPermApi>> = serde_json::from_str(&raw)?;
        let mut first_api = HashMap::with_capacity(entries.len());
        for (permission, apis) in entries {
            if let Some((class, method, return_type, params)) = apis.into_iter().next() {
                let params: String = params
                    .iter()
                    .map(|p| plain_to_descriptor(p))
                    .collect();
                let signature = format!(
                    "{}->{}({}){}",
                    plain_to_descriptor(&class),
                    method,
                    params,
                    plain_to_descriptor(&return_type)
                );
                first_api.insert(permission, signature);
            }
        }
        Ok(Self { first_api })
    }

    /// The smali signature of the permission's first known API, if any.
    pub fn first_api(&self, permission: &str) -> Option<&str> {
        self.first_api.get(permission).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_derives_from_category_prefix() {
        assert_eq!(Feature::new("api_call::X", 0.9).kind, FeatureKind::Api);
        assert_eq!(Feature::new("call::X", 0.9).kind, FeatureKind::Api);
        assert_eq!(Feature::new("real_permission::X", 0.9).kind, FeatureKind::Api);
        assert_eq!(Feature::new("url::http://x", 0.9).kind, FeatureKind::Str);
        assert_eq!(Feature::new("su_call::su", 0.9).kind, FeatureKind::Str);
        assert_eq!(Feature::new("permission::X", 0.9).kind, FeatureKind::Manifest);
        assert_eq!(Feature::new("activity::X", 0.9).kind, FeatureKind::Manifest);
        // The category is the exact segment before `::`, not a substring of
        // the whole name.
        assert_eq!(Feature::new("recall::X", 0.9).kind, FeatureKind::Manifest);
    }

    #[test]
    fn threshold_splits_add_and_remove() {
        let features = vec![
            Feature::new("api_call::La;->m()V", 0.9),
            Feature::new("api_call::Lb;->m()V", 0.1),
            Feature::new("url::http://add.example", 0.51),
            Feature::new("url::http://remove.example", 0.5),
        ];
        let directives = Directives::partition(&features, None);
        assert_eq!(directives.api.add, vec!["La;->m()V"]);
        assert_eq!(directives.api.remove, vec!["Lb;->m()V"]);
        assert_eq!(directives.strings.add, vec!["http://add.example"]);
        assert_eq!(directives.strings.remove, vec!["http://remove.example"]);
    }

    #[test]
    fn single_api_feature_yields_single_add_directive() {
        let features = vec![Feature::new(
            "api_call::Landroid/telephony/TelephonyManager;->getDeviceId()Ljava/lang/String;",
            0.9,
        )];
        let directives = Directives::partition(&features, None);
        assert_eq!(
            directives.api.add,
            vec!["Landroid/telephony/TelephonyManager;->getDeviceId()Ljava/lang/String;"]
        );
        assert!(directives.api.remove.is_empty());
        assert!(directives.strings.add.is_empty());
        assert!(directives.manifest.is_empty());
    }

    #[test]
    fn url_feature_routes_to_disjoint_paths() {
        let add = Directives::partition(&[Feature::new("url::http://example.com", 0.9)], None);
        let remove = Directives::partition(&[Feature::new("url::http://example.com", 0.1)], None);
        assert_eq!(add.strings.add, vec!["http://example.com"]);
        assert!(add.strings.remove.is_empty());
        assert_eq!(remove.strings.remove, vec!["http://example.com"]);
        assert!(remove.strings.add.is_empty());
    }

    #[test]
    fn manifest_directives_map_by_category() {
        let features = vec![
            Feature::new("permission::android.permission.SEND_SMS", 0.9),
            Feature::new("activity::com.example..Main", 0.9),
            Feature::new("service::com.example.Svc", 0.9),
            Feature::new("intent::android.intent.action.BOOT_COMPLETED", 0.9),
            Feature::new("feature::android.hardware.camera", 0.9),
            // Remove-direction manifest features are dropped.
            Feature::new("permission::android.permission.INTERNET", 0.2),
            // Unknown categories produce nothing.
            Feature::new("widget::whatever", 0.9),
        ];
        let directives = Directives::partition(&features, None);
        let kinds: Vec<ManifestKind> = directives.manifest.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ManifestKind::Permission,
                ManifestKind::Activity,
                ManifestKind::Service,
                ManifestKind::IntentFilter,
                ManifestKind::Feature,
            ]
        );
        // `..` normalizes to `.` in component names.
        assert_eq!(directives.manifest[1].name, "com.example.Main");
    }

    #[test]
    fn unmapped_real_permission_is_skipped() {
        let features = vec![Feature::new("real_permission::android.permission.X", 0.1)];
        let directives = Directives::partition(&features, None);
        assert!(directives.api.remove.is_empty());
    }

    #[test]
    fn real_permission_resolves_through_map() {
        let mut map = PermissionApiMap::default();
        map.first_api.insert(
            "android.permission.READ_PHONE_STATE".to_string(),
            "Landroid/telephony/TelephonyManager;->getDeviceId()Ljava/lang/String;".to_string(),
        );
        let features = vec![Feature::new(
            "real_permission::android.permission.READ_PHONE_STATE",
            0.1,
        )];
        let directives = Directives::partition(&features, Some(&map));
        assert_eq!(
            directives.api.remove,
            vec!["Landroid/telephony/TelephonyManager;->getDeviceId()Ljava/lang/String;"]
        );
    }

    #[test]
    fn load_features_rejects_out_of_range_values() {
        let dir = std::env::temp_dir();
        let path = dir.join("dexcloak_features_bad.json");
        fs::write(&path, r#"{"url::x": 1.5}"#).unwrap();
        assert!(load_features(&path).is_err());
        fs::remove_file(&path).ok();
    }
}
