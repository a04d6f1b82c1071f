//! Full patch-stage sequence over an on-disk fixture package, external build
//! steps excluded.

use dexcloak_core::context::{ProjectContext, SignConfig};
use dexcloak_core::feature::{Directives, Feature};
use dexcloak_core::manifest::Element;
use dexcloak_transform::api_reflection::ApiPatcher;
use dexcloak_transform::manifest::ManifestPatcher;
use dexcloak_transform::string_encrypt::{decrypt_string, derive_key, StringPatcher};
use dexcloak_transform::{pass, Patcher};
use std::fs;
use std::path::{Path, PathBuf};

const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <application android:label="Example">
        <activity android:name="com.example.app.MainActivity">
            <intent-filter>
                <action android:name="android.intent.action.MAIN" />
                <category android:name="android.intent.category.LAUNCHER" />
            </intent-filter>
        </activity>
    </application>
</manifest>
"#;

const MAIN_ACTIVITY: &str = "\
.class public Lcom/example/app/MainActivity;
.super Landroid/app/Activity;


# direct methods
.method protected onCreate(Landroid/os/Bundle;)V
    .locals 2

    const-string v0, \"http://tracker.example/beacon\"

    invoke-static {}, Lcom/example/app/Device;->fingerprint()I

    move-result v1

    return-void
.end method
";

const SECRET: &str = "testsecrettestsecrettestsecret00";

fn write_package(root: &Path) {
    fs::write(root.join("AndroidManifest.xml"), MANIFEST).unwrap();
    let smali = root.join("smali/com/example/app");
    fs::create_dir_all(&smali).unwrap();
    fs::write(smali.join("MainActivity.smali"), MAIN_ACTIVITY).unwrap();
}

#[tokio::test]
async fn test_patch_stages_compose_over_one_context() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());

    let features = vec![
        Feature::new("api_call::Lcom/example/app/Device;->fingerprint()I", 0.1),
        Feature::new("url::http://tracker.example/beacon", 0.1),
        Feature::new("permission::android.permission.SEND_SMS", 0.9),
    ];
    let directives = Directives::partition(&features, None);

    let mut ctx = ProjectContext::open(
        dir.path().to_path_buf(),
        features,
        dir.path().join("out.apk"),
        SignConfig {
            keystore: PathBuf::from("ks"),
            keystore_password: "pw".into(),
            key_alias: "alias".into(),
            key_password: "pw".into(),
        },
    )
    .unwrap();
    ctx.set_secret(SECRET);

    let mut stages: Vec<Box<dyn Patcher>> = vec![
        Box::new(ApiPatcher::new(directives.api.clone())),
        Box::new(ManifestPatcher::new(directives.manifest.clone())),
        Box::new(StringPatcher::new(directives.strings.clone())),
    ];
    pass::run(&mut ctx, &mut stages, 42).await.unwrap();

    let activity = dir
        .path()
        .join("smali/com/example/app/MainActivity.smali");
    let patched = fs::read_to_string(activity).unwrap();

    // API call now goes through the dispatcher, with four extra locals.
    assert!(patched.contains(
        "Lcom/apireflectionmanager/AdvancedApiReflection;->obfuscate(ILjava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;"
    ));
    assert!(!patched.contains("invoke-static {}, Lcom/example/app/Device;->fingerprint()I"));
    assert!(patched.contains(".locals 6"));
    assert!(ctx.budget.used() > 0);

    // The tracker URL is encrypted and decrypts back under the package key.
    assert!(!patched.contains("http://tracker.example/beacon"));
    let key = derive_key(SECRET);
    let ciphertext = patched
        .lines()
        .find_map(|line| {
            let value = line.trim().strip_prefix("const-string/jumbo v0, \"")?;
            value.strip_suffix('"').map(str::to_string)
        })
        .unwrap();
    assert_eq!(
        decrypt_string(&ciphertext, &key).as_deref(),
        Some("http://tracker.example/beacon")
    );

    // Both support artifacts were emitted into the smali tree.
    let support_dir = ctx.smali_files()[0].parent().unwrap();
    assert!(support_dir.join("AdvancedApiReflection.smali").is_file());
    assert!(support_dir.join("DecryptString.smali").is_file());
    assert!(ctx.decrypt_support_emitted);

    // The manifest gained the permission and the decoys.
    let manifest =
        Element::parse_document(&fs::read_to_string(ctx.manifest_file()).unwrap()).unwrap();
    assert!(manifest
        .children
        .iter()
        .any(|c| c.tag == "uses-permission"
            && c.attr("android:name") == Some("android.permission.SEND_SMS")));
    let app = manifest.find("application").unwrap();
    assert!(app
        .children
        .iter()
        .any(|c| c.attr("android:name") == Some("test_activity_sss")));
}

#[tokio::test]
async fn test_stage_failure_aborts_the_package() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());
    // A manifest that no longer parses makes the manifest stage fail.
    fs::write(dir.path().join("AndroidManifest.xml"), "<manifest>").unwrap();

    let directives = Directives::partition(
        &[Feature::new("permission::android.permission.SEND_SMS", 0.9)],
        None,
    );
    let mut ctx = ProjectContext::open(
        dir.path().to_path_buf(),
        Vec::new(),
        dir.path().join("out.apk"),
        SignConfig {
            keystore: PathBuf::from("ks"),
            keystore_password: "pw".into(),
            key_alias: "alias".into(),
            key_password: "pw".into(),
        },
    )
    .unwrap();

    let mut stages: Vec<Box<dyn Patcher>> =
        vec![Box::new(ManifestPatcher::new(directives.manifest.clone()))];
    let result = pass::run(&mut ctx, &mut stages, 42).await;
    assert!(result.is_err());
}
