//! End-to-end feature-map scenarios: from the external JSON contract to the
//! on-disk rewrites they drive.

use dexcloak_core::context::{ProjectContext, SignConfig};
use dexcloak_core::feature::{load_features, Directives};
use dexcloak_transform::api_reflection::ApiPatcher;
use dexcloak_transform::string_encrypt::StringPatcher;
use dexcloak_transform::{pass, Patcher};
use std::fs;
use std::path::{Path, PathBuf};

const GET_DEVICE_ID: &str =
    "Landroid/telephony/TelephonyManager;->getDeviceId()Ljava/lang/String;";

const TARGET: &str = "\
.class public Lcom/example/app/Probe;
.super Ljava/lang/Object;


# direct methods
.method public static probe()V
    .locals 3

    invoke-static {}, Landroid/telephony/TelephonyManager;->getDeviceId()Ljava/lang/String;

    move-result-object v0

    return-void
.end method
";

fn write_package(root: &Path) {
    fs::write(root.join("AndroidManifest.xml"), "<manifest><application /></manifest>").unwrap();
    let smali = root.join("smali/com/example/app");
    fs::create_dir_all(&smali).unwrap();
    fs::write(smali.join("Probe.smali"), TARGET).unwrap();
}

fn open_ctx(root: &Path) -> ProjectContext {
    ProjectContext::open(
        root.to_path_buf(),
        Vec::new(),
        root.join("out.apk"),
        SignConfig {
            keystore: PathBuf::from("ks"),
            keystore_password: "pw".into(),
            key_alias: "alias".into(),
            key_password: "pw".into(),
        },
    )
    .unwrap()
}

#[test]
fn test_device_id_feature_yields_exactly_one_add_directive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("features.json");
    fs::write(&path, format!(r#"{{"api_call::{GET_DEVICE_ID}": 0.9}}"#)).unwrap();

    let features = load_features(&path).unwrap();
    let directives = Directives::partition(&features, None);
    assert_eq!(directives.api.add, vec![GET_DEVICE_ID.to_string()]);
    assert!(directives.api.remove.is_empty());
    assert!(directives.strings.add.is_empty());
    assert!(directives.strings.remove.is_empty());
    assert!(directives.manifest.is_empty());
}

#[tokio::test]
async fn test_remove_directive_rewrites_the_matching_call_site() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());

    let path = dir.path().join("features.json");
    fs::write(&path, format!(r#"{{"api_call::{GET_DEVICE_ID}": 0.1}}"#)).unwrap();
    let features = load_features(&path).unwrap();
    let directives = Directives::partition(&features, None);
    assert_eq!(directives.api.remove, vec![GET_DEVICE_ID.to_string()]);

    let mut ctx = open_ctx(dir.path());
    let before_budget = ctx.budget.used();
    let mut stages: Vec<Box<dyn Patcher>> =
        vec![Box::new(ApiPatcher::new(directives.api.clone()))];
    pass::run(&mut ctx, &mut stages, 42).await.unwrap();

    let patched =
        fs::read_to_string(dir.path().join("smali/com/example/app/Probe.smali")).unwrap();
    // The direct call is gone, replaced by a dispatcher invocation.
    assert!(!patched.contains(&format!("invoke-static {{}}, {GET_DEVICE_ID}")));
    assert!(patched.contains("AdvancedApiReflection;->obfuscate"));
    // Locals grew by exactly four.
    assert!(patched.contains(".locals 7"));
    // Object return: cast, no unboxing.
    assert!(patched.contains("check-cast v0, Ljava/lang/String;"));
    assert!(!patched.contains("intValue"));

    // The budget moved by exactly one no-arg registration:
    // 1 + 4 + 3 + 3 + 3 estimated instructions.
    assert_eq!(ctx.budget.used() - before_budget, 14);
}

#[tokio::test]
async fn test_url_add_and_remove_route_to_disjoint_paths() {
    // Remove: the literal is detected and encrypted.
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("AndroidManifest.xml"), "<manifest><application /></manifest>")
        .unwrap();
    let smali = dir.path().join("smali");
    fs::create_dir_all(&smali).unwrap();
    fs::write(
        smali.join("C.smali"),
        "\
.class public LC;
.super Ljava/lang/Object;


# direct methods
.method public static m()V
    .locals 1

    const-string v0, \"http://example.com\"

    return-void
.end method
",
    )
    .unwrap();

    let remove = Directives::partition(
        &[dexcloak_core::feature::Feature::new("url::http://example.com", 0.1)],
        None,
    );
    assert!(remove.strings.add.is_empty());
    let mut ctx = open_ctx(dir.path());
    let mut stages: Vec<Box<dyn Patcher>> =
        vec![Box::new(StringPatcher::new(remove.strings.clone()))];
    pass::run(&mut ctx, &mut stages, 42).await.unwrap();

    let patched = fs::read_to_string(smali.join("C.smali")).unwrap();
    assert!(!patched.contains("http://example.com"));
    assert!(patched.contains("decryptString"));

    // Add: no encryption happens; without a main activity the plaintext
    // injection has nowhere to go and the file is untouched.
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("AndroidManifest.xml"), "<manifest><application /></manifest>")
        .unwrap();
    let smali = dir.path().join("smali");
    fs::create_dir_all(&smali).unwrap();
    let original = "\
.class public LC;
.super Ljava/lang/Object;


# direct methods
.method public static m()V
    .locals 1

    const-string v0, \"http://example.com\"

    return-void
.end method
";
    fs::write(smali.join("C.smali"), original).unwrap();

    let add = Directives::partition(
        &[dexcloak_core::feature::Feature::new("url::http://example.com", 0.9)],
        None,
    );
    assert!(add.strings.remove.is_empty());
    let mut ctx = open_ctx(dir.path());
    let mut stages: Vec<Box<dyn Patcher>> =
        vec![Box::new(StringPatcher::new(add.strings.clone()))];
    pass::run(&mut ctx, &mut stages, 42).await.unwrap();

    let patched = fs::read_to_string(smali.join("C.smali")).unwrap();
    assert_eq!(patched, original);
    assert!(!ctx.decrypt_support_emitted);
}
