mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

#[test]
fn health_and_workspace_lifecycle() {
    let mut sc = Sidecar::spawn_with(&[]);

    let health = sc.ok("health", json!({}));
    assert!(health["version"].as_str().is_some());
    assert!(health["workspacePath"].is_null());
    assert_eq!(health["cacheEnabled"], json!(true));

    assert_eq!(sc.fails("users.list", json!({})), "no_workspace");
    assert_eq!(sc.fails("workspace.select", json!({})), "bad_params");

    let workspace = temp_dir("schoold-router-smoke");
    sc.ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("school.sqlite3").is_file());

    let status = sc.ok("system.status", json!({}));
    assert_eq!(status["users"], json!(0));
    assert_eq!(status["classes"], json!(0));

    let migrated = sc.ok("system.migrate", json!({}));
    assert_eq!(migrated["message"], json!("Migration successful."));
    assert_eq!(migrated["applied"], json!([]));
}

#[test]
fn unknown_methods_and_bad_json_are_reported() {
    let workspace = temp_dir("schoold-router-errors");
    let mut sc = Sidecar::open(&workspace);

    assert_eq!(sc.fails("grades.explode", json!({})), "not_implemented");

    let reply = sc.send_raw("{not json");
    assert_eq!(reply["ok"], json!(false));
    assert_eq!(reply["error"]["code"], json!("bad_json"));

    // Still serving after the bad line.
    sc.ok("health", json!({}));
}

#[test]
fn every_handler_family_is_routed() {
    let workspace = temp_dir("schoold-router-families");
    let mut sc = Sidecar::open(&workspace);

    for method in [
        "users.list",
        "institutions.list",
        "tariffs.list",
        "billing.overview",
        "usage.byGroup",
        "analytics.overview",
        "joinRequests.listAll",
    ] {
        sc.ok(method, json!({}));
    }
    for method in [
        "classes.listForTeacher",
        "subjects.list",
        "collaborators.forTeacher",
        "calendar.forTeacher",
    ] {
        sc.ok(method, json!({ "teacherId": "nobody" }));
    }
    assert_eq!(sc.fails("dashboard.open", json!({ "userId": "nobody" })), "not_found");
    assert_eq!(sc.fails("materials.download", json!({ "materialId": "x" })), "not_found");
    assert_eq!(sc.fails("announcements.delete", json!({ "announcementId": "x" })), "not_found");
}
