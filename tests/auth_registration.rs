mod common;

use common::{temp_dir, Sidecar, ADMIN_CODE, PASSWORD, TEACHER_CODE};
use serde_json::json;

fn register(sc: &mut Sidecar, username: &str, role: &str, code: Option<&str>) -> serde_json::Value {
    sc.call(
        "auth.register",
        json!({
            "username": username,
            "password": PASSWORD,
            "fullName": format!("{} Example", username),
            "role": role,
            "registrationCode": code,
        }),
    )
}

#[test]
fn students_wait_for_approval_before_login() {
    let workspace = temp_dir("schoold-auth-student");
    let mut sc = Sidecar::open(&workspace);

    let reg = register(&mut sc, "ana", "student", None);
    assert_eq!(reg["ok"], json!(true), "{}", reg);
    assert_eq!(reg["result"]["active"], json!(false));
    assert_eq!(
        reg["result"]["message"],
        json!("Registration successful! Awaiting admin approval.")
    );
    let user_id = reg["result"]["userId"].as_str().expect("userId").to_string();

    let login = json!({ "username": "ana", "password": PASSWORD });
    assert_eq!(sc.fails("auth.login", login.clone()), "pending_approval");

    let pending = sc.ok("users.pending", json!({}));
    assert_eq!(pending["users"].as_array().map(|a| a.len()), Some(1));

    sc.ok(
        "users.approve",
        json!({ "userId": user_id, "fullName": "Ana Gomez", "groupName": "North High" }),
    );
    let pending = sc.ok("users.pending", json!({}));
    assert_eq!(pending["users"], json!([]));

    let session = sc.ok("auth.login", login);
    assert_eq!(session["user"]["id"], json!(user_id));
    assert_eq!(session["user"]["fullName"], json!("Ana Gomez"));
    assert_eq!(session["user"]["groupName"], json!("North High"));
    assert_eq!(session["user"]["role"], json!("student"));

    assert_eq!(
        sc.fails("auth.login", json!({ "username": "ana", "password": "nope" })),
        "invalid_credentials"
    );
    assert_eq!(
        sc.fails("auth.login", json!({ "username": "ghost", "password": PASSWORD })),
        "invalid_credentials"
    );
}

#[test]
fn privileged_roles_need_the_configured_code() {
    let workspace = temp_dir("schoold-auth-codes");
    let mut sc = Sidecar::open(&workspace);

    let wrong = register(&mut sc, "tom", "teacher", Some("guess"));
    assert_eq!(wrong["error"]["code"], json!("invalid_credentials"));

    let teacher = register(&mut sc, "tom", "teacher", Some(TEACHER_CODE));
    assert_eq!(teacher["result"]["active"], json!(false));

    let admin = register(&mut sc, "root", "admin", Some(ADMIN_CODE));
    assert_eq!(admin["result"]["active"], json!(true));
    assert_eq!(
        admin["result"]["message"],
        json!("Registration successful! Please login.")
    );
    sc.ok("auth.login", json!({ "username": "root", "password": PASSWORD }));

    let dup = register(&mut sc, "root", "student", None);
    assert_eq!(dup["error"]["code"], json!("conflict"));
    assert_eq!(dup["error"]["message"], json!("Username already taken."));

    let bad_role = register(&mut sc, "pat", "parent", None);
    assert_eq!(bad_role["error"]["code"], json!("bad_params"));
}

#[test]
fn self_registration_is_closed_without_codes() {
    let workspace = temp_dir("schoold-auth-closed");
    let ws = workspace.to_string_lossy().to_string();
    let mut sc = Sidecar::spawn_with(&["--workspace", &ws]);

    let teacher = register(&mut sc, "tom", "teacher", Some(TEACHER_CODE));
    assert_eq!(teacher["error"]["code"], json!("registration_closed"));

    // Admin path bypasses codes entirely.
    sc.active_user("tom", "teacher", None);
    sc.ok("auth.login", json!({ "username": "tom", "password": PASSWORD }));
}

#[test]
fn admin_user_management() {
    let workspace = temp_dir("schoold-auth-admin");
    let mut sc = Sidecar::open(&workspace);

    let a = sc.active_user("s1", "student", Some("North"));
    let b = sc.active_user("s2", "student", None);
    let t = sc.active_user("t1", "teacher", Some("North"));

    let listed = sc.ok("users.list", json!({}));
    assert_eq!(listed["users"].as_array().map(|u| u.len()), Some(3));

    sc.ok(
        "users.bulkAssignGroup",
        json!({ "userIds": [&a, &b], "groupName": "South" }),
    );
    let counts = sc.ok("users.countsByGroup", json!({}));
    let south_students = counts["counts"]
        .as_array()
        .expect("counts")
        .iter()
        .find(|c| c["groupName"] == json!("South") && c["role"] == json!("student"))
        .map(|c| c["count"].clone());
    assert_eq!(south_students, Some(json!(2)));

    let updated = sc.ok("users.bulkSetActive", json!({ "role": "student", "active": false }));
    assert_eq!(updated["updated"], json!(2));
    assert_eq!(
        sc.fails("auth.login", json!({ "username": "s1", "password": PASSWORD })),
        "pending_approval"
    );

    sc.ok("users.setPassword", json!({ "userId": t, "password": "changed" }));
    assert_eq!(
        sc.fails("auth.login", json!({ "username": "t1", "password": PASSWORD })),
        "invalid_credentials"
    );
    sc.ok("auth.login", json!({ "username": "t1", "password": "changed" }));

    sc.ok("users.setGroup", json!({ "userId": t, "groupName": null }));

    let (_class_id, _) = sc.class_for(&t, "Owned");
    assert_eq!(sc.fails("users.delete", json!({ "userId": t })), "conflict");
    sc.ok("users.delete", json!({ "userId": b }));
    let listed = sc.ok("users.list", json!({}));
    assert_eq!(listed["users"].as_array().map(|u| u.len()), Some(2));
}

#[test]
fn stored_passwords_are_bcrypt_hashes() {
    let workspace = temp_dir("schoold-auth-bcrypt");
    let mut sc = Sidecar::open(&workspace);
    let reg = register(&mut sc, "root", "admin", Some(ADMIN_CODE));
    assert_eq!(reg["ok"], json!(true), "{}", reg);

    let conn = rusqlite::Connection::open(workspace.join("school.sqlite3")).expect("open db");
    let stored: String = conn
        .query_row(
            "SELECT password_hash FROM users WHERE username = 'root'",
            [],
            |r| r.get(0),
        )
        .expect("stored hash");
    assert!(stored.starts_with("$2"), "{}", stored);
    assert_ne!(stored, PASSWORD);
    assert_eq!(bcrypt::verify(PASSWORD, &stored).ok(), Some(true));

    sc.ok("auth.login", json!({ "username": "root", "password": PASSWORD }));
}
