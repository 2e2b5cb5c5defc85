mod common;

use common::{temp_dir, Sidecar, PASSWORD};
use serde_json::json;

#[test]
fn lists_reflect_writes_immediately() {
    let workspace = temp_dir("schoold-cache-invalidation");
    let mut sc = Sidecar::open(&workspace);
    let teacher = sc.active_user("teacher", "teacher", None);

    let before = sc.ok("classes.listForTeacher", json!({ "teacherId": teacher }));
    assert_eq!(before["classes"], json!([]));
    let (class_id, _) = sc.class_for(&teacher, "Latin");
    let after = sc.ok("classes.listForTeacher", json!({ "teacherId": teacher }));
    assert_eq!(after["classes"][0]["id"], json!(class_id));

    let cs = sc.offering(&teacher, &class_id, "Grammar");
    let cats = sc.ok("categories.list", json!({ "courseSubjectId": cs }));
    assert_eq!(cats["categories"], json!([]));
    sc.ok(
        "categories.create",
        json!({ "courseSubjectId": cs, "name": "Quizzes", "weight": 100 }),
    );
    let cats = sc.ok("categories.list", json!({ "courseSubjectId": cs }));
    assert_eq!(cats["categories"][0]["name"], json!("Quizzes"));
    assert_eq!(cats["weightCheck"]["balanced"], json!(true));

    let status = sc.ok("system.status", json!({}));
    assert!(status["cacheEntries"].as_u64().unwrap_or(0) >= 1);

    // Migration wipes every cached entry.
    sc.ok("system.migrate", json!({}));
    let status = sc.ok("system.status", json!({}));
    assert_eq!(status["cacheEntries"], json!(0));
}

#[test]
fn cache_can_be_disabled() {
    let workspace = temp_dir("schoold-cache-off");
    let ws = workspace.to_string_lossy().to_string();
    let mut sc = Sidecar::spawn_with(&["--workspace", &ws, "--no-cache"]);

    assert_eq!(sc.ok("health", json!({}))["cacheEnabled"], json!(false));
    sc.active_user("someone", "student", None);
    sc.ok("users.list", json!({}));
    sc.ok("auth.login", json!({ "username": "someone", "password": PASSWORD }));
    assert_eq!(sc.ok("system.status", json!({}))["cacheEntries"], json!(0));
}
