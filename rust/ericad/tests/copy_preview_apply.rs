mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, select_topic, spawn_sidecar};

fn write_triples(preview: &serde_json::Value) -> Vec<(i64, i64, String)> {
    preview["writes"]
        .as_array()
        .expect("writes")
        .iter()
        .map(|w| {
            (
                w["enrollmentId"].as_i64().expect("enrollmentId"),
                w["categoryId"].as_i64().expect("categoryId"),
                w["scaleCode"].as_str().expect("scaleCode").to_string(),
            )
        })
        .collect()
}

#[test]
fn preview_fills_only_empty_cells_by_default() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "erica-copy-empty");
    let _ = select_topic(&mut stdin, &mut reader, 11, 600);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "copy.preview",
        json!({ "sourceEnrollmentId": 10, "targetEnrollmentIds": [20, 21] }),
    );
    assert_eq!(result["copyOnlyEmpty"], json!(true));
    let preview = &result["preview"];
    assert_eq!(
        write_triples(preview),
        vec![
            (20, 2, "B".to_string()),
            (21, 1, "A".to_string()),
            (21, 2, "B".to_string()),
        ]
    );
    assert_eq!(preview["count"], json!(3));
    assert_eq!(preview["skippedExisting"], json!(1));
    assert_eq!(preview["nothingToCopy"], json!(false));

    // Preview is read-only.
    let diff = request_ok(&mut stdin, &mut reader, "2", "grid.diff", json!({}));
    assert_eq!(diff["count"], json!(0));
}

#[test]
fn overwrite_mode_replaces_existing_cells() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "erica-copy-overwrite");
    let _ = select_topic(&mut stdin, &mut reader, 11, 600);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "copy.preview",
        json!({
            "sourceEnrollmentId": 10,
            "targetEnrollmentIds": [20, 21, 20],
            "copyOnlyEmpty": false
        }),
    );
    assert_eq!(result["preview"]["count"], json!(4));
    assert_eq!(
        write_triples(&result["preview"])[0],
        (20, 1, "A".to_string())
    );
}

#[test]
fn apply_creates_pending_changes_and_is_idempotent() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "erica-copy-apply");
    let _ = select_topic(&mut stdin, &mut reader, 11, 600);

    let params = json!({ "sourceEnrollmentId": 10, "targetEnrollmentIds": [20, 21] });
    let applied = request_ok(&mut stdin, &mut reader, "1", "copy.apply", params.clone());
    assert_eq!(applied["applied"], json!(3));
    assert_eq!(applied["pendingCount"], json!(3));

    let diff = request_ok(&mut stdin, &mut reader, "2", "grid.diff", json!({}));
    assert_eq!(diff["keys"], json!(["20-2", "21-1", "21-2"]));

    let again = request_ok(&mut stdin, &mut reader, "3", "copy.apply", params);
    assert_eq!(again["applied"], json!(0));
    assert_eq!(again["pendingCount"], json!(3));

    let grid = request_ok(&mut stdin, &mut reader, "4", "grid.get", json!({}));
    // Persisted C on (20, 1) untouched.
    assert_eq!(grid["cells"][1][0]["scaleCode"], json!("C"));
    assert_eq!(grid["cells"][1][1]["scaleCode"], json!("B"));
    assert_eq!(grid["cells"][1][1]["dirty"], json!(true));
}

#[test]
fn copy_reads_through_pending_edits_of_the_source() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "erica-copy-overlay");
    let _ = select_topic(&mut stdin, &mut reader, 11, 600);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grid.setPending",
        json!({ "enrollmentId": 10, "categoryId": 1, "scaleCode": "AD" }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "copy.preview",
        json!({ "sourceEnrollmentId": 10, "targetEnrollmentIds": [21] }),
    );
    assert_eq!(
        write_triples(&result["preview"]),
        vec![(21, 1, "AD".to_string()), (21, 2, "B".to_string())]
    );
}

#[test]
fn empty_source_and_bad_targets_are_errors() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "erica-copy-errors");
    let _ = select_topic(&mut stdin, &mut reader, 11, 600);

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "copy.preview",
        json!({ "sourceEnrollmentId": 21, "targetEnrollmentIds": [20] }),
    );
    assert_eq!(preview["preview"]["count"], json!(0));
    assert_eq!(preview["preview"]["writes"], json!([]));
    assert_eq!(preview["preview"]["nothingToCopy"], json!(true));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "copy.apply",
        json!({ "sourceEnrollmentId": 21, "targetEnrollmentIds": [20] }),
    );
    assert_eq!(code, "empty_source_evaluation");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "copy.preview",
        json!({ "sourceEnrollmentId": 10, "targetEnrollmentIds": [] }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "copy.preview",
        json!({ "sourceEnrollmentId": 10, "targetEnrollmentIds": [20, 10] }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "copy.apply",
        json!({ "sourceEnrollmentId": 10, "targetEnrollmentIds": [30] }),
    );
    assert_eq!(code, "not_found");

    let diff = request_ok(&mut stdin, &mut reader, "6", "grid.diff", json!({}));
    assert_eq!(diff["count"], json!(0));
}

#[test]
fn copy_only_empty_default_comes_from_settings() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "erica-copy-setting");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "settings.update",
        json!({ "patch": { "copyOnlyEmptyDefault": false } }),
    );
    let _ = select_topic(&mut stdin, &mut reader, 11, 600);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "copy.preview",
        json!({ "sourceEnrollmentId": 10, "targetEnrollmentIds": [20, 21] }),
    );
    assert_eq!(result["copyOnlyEmpty"], json!(false));
    assert_eq!(result["preview"]["count"], json!(4));
}
