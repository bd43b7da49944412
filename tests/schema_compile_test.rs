mod common;

use common::collection;
use dynamodel::schema::{load_schema_dir, RawSchemaEntry, SchemaCompiler};
use dynamodel::SchemaCompileErrors;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;

#[test]
fn compiling_twice_is_deterministic() {
    let entry = collection(
        "book",
        json!({
            "title": {"type": "string", "index": true, "maxLength": 120},
            "pages": {"type": "integer"},
            "genre": {"type": "string", "enum": ["novel", "essay"]},
            "meta": {"type": "object", "properties": {"isbn": {"type": "string"}}}
        }),
    );
    let compiler = SchemaCompiler::new();
    let first = compiler.compile(&entry).unwrap();
    let second = compiler.compile(&entry).unwrap();
    assert_eq!(first, second);

    let set_a = compiler.compile_all(&[entry.clone()], 1).unwrap();
    let set_b = compiler.compile_all(&[entry], 1).unwrap();
    assert_eq!(set_a.validators.fingerprint(), set_b.validators.fingerprint());
}

#[test]
fn reserved_property_names_fail() {
    let compiler = SchemaCompiler::new();
    for reserved in ["id", "shortId", "name"] {
        let mut properties = serde_json::Map::new();
        properties.insert(reserved.to_string(), json!({"type": "string"}));
        let entry = collection("book", serde_json::Value::Object(properties));
        let err = compiler.compile(&entry).unwrap_err();
        assert!(
            err.problems.iter().any(|p| p.contains(reserved) && p.contains("reserved")),
            "{:?}",
            err.problems
        );
    }
}

#[test]
fn belongs_to_many_requires_through() {
    let entry = collection(
        "book",
        json!({"authors": {"type": "association", "relationship": "BelongsToMany", "target": "author"}}),
    );
    let err = SchemaCompiler::new().compile(&entry).unwrap_err();
    assert_eq!(err.entity, "book");
    assert!(err.problems.iter().any(|p| p.contains("through")));
}

#[test]
fn nested_associations_are_rejected() {
    let entry = collection(
        "book",
        json!({
            "meta": {
                "type": "object",
                "properties": {
                    "publisher": {"type": "association", "relationship": "BelongsTo", "target": "publisher"}
                }
            }
        }),
    );
    assert!(SchemaCompiler::new().compile(&entry).is_err());
}

#[test]
fn every_failing_entry_is_reported() {
    let entries = vec![
        collection("good", json!({})),
        collection("bad_one", json!({"x": {"type": "nonsense"}})),
        RawSchemaEntry::new(json!({"id": "_hidden", "type": "collection"})),
    ];
    let SchemaCompileErrors(errors) = SchemaCompiler::new().compile_all(&entries, 1).unwrap_err();
    let failing: Vec<_> = errors.iter().map(|e| e.entity.as_str()).collect();
    assert_eq!(failing, vec!["bad_one", "_hidden"]);
}

#[test]
fn schema_directory_keeps_file_attribution() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("shelf.json"),
        r#"{"type": "collection", "name": "Shelf", "collectiveName": "Shelves", "files": "shelves/*"}"#,
    )?;
    fs::write(
        dir.path().join("broken.json"),
        r#"{"type": "collection", "name": "Broken"}"#,
    )?;

    let entries = load_schema_dir(dir.path())?;
    let SchemaCompileErrors(errors) = SchemaCompiler::new().compile_all(&entries, 1).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].entity, "broken");
    assert!(errors[0].to_string().contains("broken.json"));
    Ok(())
}
