use dexcloak_core::manifest::{
    indent, remove_duplicates, scramble, structurally_equal, Element,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn named(tag: &str, name: &str) -> Element {
    let mut element = Element::new(tag);
    element.set_attr("android:name", name);
    element
}

#[test]
fn test_dedup_three_identical_one_distinct() {
    let mut parent = Element::new("application");
    parent.children = vec![
        named("receiver", "com.example.R"),
        named("receiver", "com.example.R"),
        named("receiver", "com.example.R"),
        named("service", "com.example.S"),
    ];

    remove_duplicates(&mut parent);
    assert_eq!(parent.children.len(), 2);

    let snapshot = parent.clone();
    remove_duplicates(&mut parent);
    assert!(structurally_equal(&parent, &snapshot));
}

#[test]
fn test_mutate_cycle_survives_reserialization() {
    let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android">
    <uses-permission android:name="android.permission.INTERNET" />
    <uses-permission android:name="android.permission.INTERNET" />
    <application>
        <activity android:name="A" />
        <activity android:name="B" />
        <activity android:name="C" />
    </application>
</manifest>
"#;
    let mut root = Element::parse_document(xml).unwrap();
    remove_duplicates(&mut root);
    let mut rng = StdRng::seed_from_u64(9);
    scramble(&mut root, &mut rng);
    indent(&mut root);

    let reparsed = Element::parse_document(&root.to_document_string()).unwrap();
    let permissions = reparsed
        .children
        .iter()
        .filter(|c| c.tag == "uses-permission")
        .count();
    assert_eq!(permissions, 1);
    let app = reparsed.find("application").unwrap();
    let mut names: Vec<&str> = app
        .children
        .iter()
        .filter_map(|c| c.attr("android:name"))
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["A", "B", "C"]);
}
