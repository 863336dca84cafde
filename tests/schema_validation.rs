//! Validation tests against the catalog's published schemas.
//!
//! These go through the schemas as clients see them in `tools/list`, parsed
//! back with `Schema::from_json`, to check that what is advertised is what is
//! enforced.

use serde_json::{json, Value};

use movie_catalog_mcp::catalog::tools::add_movie_schema;
use movie_catalog_mcp::mcp::schema::{Schema, SchemaError, ViolationKind};

fn reasons(schema: &Schema, value: &Value) -> Vec<(String, String)> {
    schema
        .validate(value)
        .into_iter()
        .map(|v| {
            let reason = serde_json::to_value(&v).unwrap()["reason"]
                .as_str()
                .unwrap()
                .to_string();
            (v.path, reason)
        })
        .collect()
}

#[test]
fn test_advertised_add_movie_schema_round_trips() {
    let advertised = add_movie_schema().to_json();
    let parsed = Schema::from_json(&advertised).unwrap();
    assert_eq!(parsed.to_json(), advertised);

    let keys: Vec<&String> = advertised["properties"].as_object().unwrap().keys().collect();
    assert_eq!(keys, ["title", "year", "rating", "genre", "director", "poster"]);
}

#[test]
fn test_add_movie_schema_boundaries() {
    let schema = add_movie_schema();

    assert!(schema.validate(&json!({"title": "Roundhay Garden Scene", "year": 1888})).is_empty());
    assert!(schema
        .validate(&json!({"title": "Future", "year": 2100, "rating": 10}))
        .is_empty());
    assert!(schema
        .validate(&json!({"title": "Unrated", "year": 2000, "rating": 0.0}))
        .is_empty());

    assert_eq!(
        reasons(&schema, &json!({"title": "Too Early", "year": 1887})),
        vec![("$.year".to_string(), "below_minimum".to_string())]
    );
    assert_eq!(
        reasons(&schema, &json!({"title": "Too Late", "year": 2101, "rating": -0.5})),
        vec![
            ("$.year".to_string(), "above_maximum".to_string()),
            ("$.rating".to_string(), "below_minimum".to_string()),
        ]
    );
}

#[test]
fn test_null_optional_fields_are_absent() {
    let schema = add_movie_schema();
    let value = json!({"title": "Heat", "year": 1995, "rating": null, "genre": null});
    assert!(schema.validate(&value).is_empty());

    let value = json!({"title": null, "year": 1995});
    assert_eq!(
        reasons(&schema, &value),
        vec![("$.title".to_string(), "missing".to_string())]
    );
}

#[test]
fn test_nested_paths() {
    let schema = Schema::object()
        .property(
            "cast",
            Schema::array(
                Schema::object()
                    .property("name", Schema::string().min_length(1))
                    .property("billing", Schema::integer().minimum(1.0))
                    .require(["name"]),
            ),
        )
        .require(["cast"]);

    let value = json!({"cast": [
        {"name": "Al Pacino", "billing": 1},
        {"name": "Robert De Niro", "billing": 2},
        {"billing": 0}
    ]});
    assert_eq!(
        reasons(&schema, &value),
        vec![
            ("$.cast[2].name".to_string(), "missing".to_string()),
            ("$.cast[2].billing".to_string(), "below_minimum".to_string()),
        ]
    );
}

#[test]
fn test_validation_is_deterministic() {
    let schema = add_movie_schema();
    let values = [
        json!({}),
        json!({"title": "", "year": "bad", "rating": 15}),
        json!([1, 2, 3]),
        json!({"title": 7, "year": 1995.5, "poster": false}),
    ];
    for value in &values {
        assert_eq!(schema.validate(value), schema.validate(value));
    }
}

#[test]
fn test_type_mismatch_reports_found_kind() {
    let schema = add_movie_schema();
    let violations = schema.validate(&json!({"title": "Heat", "year": 1995.5}));
    assert_eq!(violations.len(), 1);
    assert!(matches!(
        violations[0].kind,
        ViolationKind::TypeMismatch { found: "number", .. }
    ));
}

#[test]
fn test_from_json_rejects_malformed_documents() {
    assert!(matches!(
        Schema::from_json(&json!({"type": "object"})),
        Err(SchemaError::MissingProperties { .. })
    ));
    assert!(matches!(
        Schema::from_json(&json!({"type": "array"})),
        Err(SchemaError::MissingItems { .. })
    ));
    assert!(matches!(
        Schema::from_json(&json!({"type": "date"})),
        Err(SchemaError::UnsupportedType { .. })
    ));
    assert!(matches!(
        Schema::from_json(&json!({"type": "string", "pattern": "("})),
        Err(SchemaError::InvalidPattern { .. })
    ));
}
