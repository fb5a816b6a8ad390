use super::*;
use serde_json::json;

#[test]
fn test_extension_metadata_new() {
    let meta = ExtensionMetadata::new("db", Version::new(1, 0, 0));
    assert_eq!(meta.name, "db");
    assert_eq!(meta.version.major, 1);
    assert!(meta.description.is_empty());
    assert!(meta.dependencies.is_empty());
    assert!(!meta.required);
    assert!(meta.tags.is_empty());
}

#[test]
fn test_dependencies_keep_declaration_order() {
    let meta = ExtensionMetadata::new("api", Version::new(1, 0, 0))
        .with_dependencies(["cache", "db", "cache"]);
    assert_eq!(meta.dependencies, vec!["cache".to_string(), "db".to_string()]);
}

#[test]
fn test_builder_flags() {
    let meta = ExtensionMetadata::new("core", Version::new(0, 2, 0))
        .with_description("Core services")
        .required()
        .with_tag("infra")
        .with_tag("infra");
    assert_eq!(meta.description, "Core services");
    assert!(meta.required);
    assert_eq!(meta.tags.len(), 1);
}

#[test]
fn test_required_config_keys() {
    let meta = ExtensionMetadata::new("sync", Version::new(1, 0, 0))
        .with_config_schema(json!({"type": "object", "required": ["token", "interval"]}));
    assert_eq!(meta.required_config_keys(), vec!["token", "interval"]);
}

#[test]
fn test_required_config_keys_without_schema() {
    let meta = ExtensionMetadata::new("plain", Version::new(1, 0, 0));
    assert!(meta.required_config_keys().is_empty());

    let meta = meta.with_config_schema(json!({"type": "object"}));
    assert!(meta.required_config_keys().is_empty());
}

#[test]
fn test_metadata_deserialize_defaults() {
    let meta: ExtensionMetadata = serde_json::from_value(json!({
        "name": "cache",
        "version": {"major": 1, "minor": 2, "patch": 0}
    }))
    .unwrap();
    assert_eq!(meta.name, "cache");
    assert!(meta.dependencies.is_empty());
    assert!(meta.config_schema.is_none());
}
