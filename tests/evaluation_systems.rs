mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, seed_class, spawn_sidecar, temp_dir};

fn conceptual_config() -> serde_json::Value {
    json!({
        "type": "conceptual",
        "concepts": [
            { "symbol": "A", "min": 9.0, "max": 10.0, "passing": true },
            { "symbol": "B", "min": 7.0, "max": 8.99, "passing": true },
            { "symbol": "C", "min": 6.0, "max": 6.99, "passing": true },
            { "symbol": "D", "min": 0.0, "max": 5.99, "passing": false }
        ]
    })
}

#[test]
fn conceptual_conversion_maps_ranges_and_symbols() {
    let workspace = temp_dir("progressd-systems");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "create",
        "evaluationSystems.create",
        json!({
            "schoolId": seed.school_id,
            "name": "Concept scale",
            "config": conceptual_config()
        }),
    );
    let system_id = created
        .get("systemId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let converted = request_ok(
        &mut stdin,
        &mut reader,
        "convert",
        "grades.convert",
        json!({ "systemId": system_id, "value": 7.5 }),
    );
    assert_eq!(converted.get("display").and_then(|v| v.as_str()), Some("B"));
    assert_eq!(converted.get("passing").and_then(|v| v.as_bool()), Some(true));

    let failing = request_ok(
        &mut stdin,
        &mut reader,
        "convert-low",
        "grades.convert",
        json!({ "systemId": system_id, "value": 4.2 }),
    );
    assert_eq!(failing.get("display").and_then(|v| v.as_str()), Some("D"));
    assert_eq!(failing.get("passing").and_then(|v| v.as_bool()), Some(false));

    let symbolic = request_ok(
        &mut stdin,
        &mut reader,
        "convert-symbol",
        "grades.convert",
        json!({ "systemId": system_id, "value": "A" }),
    );
    assert_eq!(symbolic.get("value").and_then(|v| v.as_f64()), Some(9.5));

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "convert-bad",
        "grades.convert",
        json!({ "systemId": system_id, "value": "Z" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn resolution_prefers_the_most_specific_scope() {
    let workspace = temp_dir("progressd-systems-resolve");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subject",
        "subject.create",
        json!({ "schoolId": seed.school_id, "name": "Mathematics" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let school_default = request_ok(
        &mut stdin,
        &mut reader,
        "default",
        "evaluationSystems.create",
        json!({
            "schoolId": seed.school_id,
            "name": "School numeric",
            "config": { "type": "numeric", "min": 0.0, "max": 10.0 }
        }),
    );
    let default_id = school_default
        .get("systemId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let level_scoped = request_ok(
        &mut stdin,
        &mut reader,
        "level",
        "evaluationSystems.create",
        json!({
            "schoolId": seed.school_id,
            "name": "Level concepts",
            "config": conceptual_config(),
            "yearLevelId": seed.year_level_id
        }),
    );
    let level_id = level_scoped
        .get("systemId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let subject_scoped = request_ok(
        &mut stdin,
        &mut reader,
        "subject-scoped",
        "evaluationSystems.create",
        json!({
            "schoolId": seed.school_id,
            "name": "Math numeric",
            "config": { "type": "numeric", "min": 0.0, "max": 10.0, "decimalPlaces": 2 },
            "subjectId": subject_id
        }),
    );
    let subject_system_id = subject_scoped
        .get("systemId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let by_subject = request_ok(
        &mut stdin,
        &mut reader,
        "resolve-subject",
        "evaluationSystems.resolve",
        json!({
            "schoolId": seed.school_id,
            "subjectId": subject_id,
            "yearLevelId": seed.year_level_id
        }),
    );
    assert_eq!(
        by_subject
            .get("system")
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str()),
        Some(subject_system_id.as_str())
    );

    let by_level = request_ok(
        &mut stdin,
        &mut reader,
        "resolve-level",
        "evaluationSystems.resolve",
        json!({
            "schoolId": seed.school_id,
            "yearLevelId": seed.year_level_id
        }),
    );
    assert_eq!(
        by_level
            .get("system")
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str()),
        Some(level_id.as_str())
    );

    let fallback = request_ok(
        &mut stdin,
        &mut reader,
        "resolve-default",
        "evaluationSystems.resolve",
        json!({ "schoolId": seed.school_id }),
    );
    assert_eq!(
        fallback
            .get("system")
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str()),
        Some(default_id.as_str())
    );
}

#[test]
fn invalid_configs_are_rejected_at_creation() {
    let workspace = temp_dir("progressd-systems-invalid");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "empty-concepts",
        "evaluationSystems.create",
        json!({
            "schoolId": seed.school_id,
            "name": "Broken",
            "config": { "type": "conceptual", "concepts": [] }
        }),
    );
    assert_eq!(code, "validation_failed");

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "no-levels",
        "evaluationSystems.create",
        json!({
            "schoolId": seed.school_id,
            "name": "Broken too",
            "config": { "type": "descriptive", "performanceLevels": [] }
        }),
    );
    assert_eq!(code, "validation_failed");
}

#[test]
fn descriptive_conversion_uses_nearest_level() {
    let workspace = temp_dir("progressd-systems-descriptive");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "create",
        "evaluationSystems.create",
        json!({
            "schoolId": seed.school_id,
            "name": "Performance levels",
            "config": {
                "type": "descriptive",
                "performanceLevels": [
                    { "name": "Beginning", "value": 2.0, "passing": false },
                    { "name": "Developing", "value": 5.0, "passing": false },
                    { "name": "Proficient", "value": 7.5, "passing": true },
                    { "name": "Advanced", "value": 9.5, "passing": true }
                ]
            }
        }),
    );
    let system_id = created
        .get("systemId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let converted = request_ok(
        &mut stdin,
        &mut reader,
        "convert",
        "grades.convert",
        json!({ "systemId": system_id, "value": 8.0 }),
    );
    assert_eq!(
        converted.get("display").and_then(|v| v.as_str()),
        Some("Proficient")
    );
    assert_eq!(converted.get("passing").and_then(|v| v.as_bool()), Some(true));

    let by_name = request_ok(
        &mut stdin,
        &mut reader,
        "by-name",
        "grades.convert",
        json!({ "systemId": system_id, "value": "Advanced" }),
    );
    assert_eq!(by_name.get("value").and_then(|v| v.as_f64()), Some(9.5));
}
