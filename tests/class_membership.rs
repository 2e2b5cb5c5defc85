mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

#[test]
fn access_codes_enroll_students_and_add_collaborators() {
    let workspace = temp_dir("schoold-class-codes");
    let mut sc = Sidecar::open(&workspace);

    let owner = sc.active_user("owner", "teacher", None);
    let helper = sc.active_user("helper", "teacher", None);
    let student = sc.active_user("kid", "student", None);
    let (class_id, code) = sc.class_for(&owner, "Math 1A");

    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    // Codes are case-insensitive on input.
    let enrolled = sc.ok(
        "classes.enrollByCode",
        json!({ "studentId": student, "accessCode": code.to_lowercase() }),
    );
    assert_eq!(enrolled["classId"], json!(class_id));
    assert_eq!(
        sc.fails(
            "classes.enrollByCode",
            json!({ "studentId": student, "accessCode": code })
        ),
        "conflict"
    );
    assert_eq!(
        sc.fails(
            "classes.enrollByCode",
            json!({ "studentId": student, "accessCode": "ZZZZZZ" })
        ),
        "not_found"
    );

    assert_eq!(
        sc.fails(
            "classes.joinByCode",
            json!({ "teacherId": owner, "accessCode": code })
        ),
        "conflict"
    );
    sc.ok(
        "classes.joinByCode",
        json!({ "teacherId": helper, "accessCode": code }),
    );
    assert_eq!(
        sc.fails(
            "classes.joinByCode",
            json!({ "teacherId": helper, "accessCode": code })
        ),
        "conflict"
    );

    let helper_classes = sc.ok("classes.listForTeacher", json!({ "teacherId": helper }));
    assert_eq!(helper_classes["classes"][0]["role"], json!("collaborator"));
    let owner_classes = sc.ok("classes.listForTeacher", json!({ "teacherId": owner }));
    assert_eq!(owner_classes["classes"][0]["role"], json!("owner"));
    assert_eq!(owner_classes["classes"][0]["studentCount"], json!(1));

    let collaborators = sc.ok("collaborators.list", json!({ "classId": class_id }));
    assert_eq!(collaborators["collaborators"].as_array().map(|c| c.len()), Some(1));
    sc.ok(
        "collaborators.remove",
        json!({ "teacherId": helper, "classId": class_id }),
    );
    let collaborators = sc.ok("collaborators.list", json!({ "classId": class_id }));
    assert_eq!(collaborators["collaborators"], json!([]));

    let check = sc.ok(
        "membership.check",
        json!({ "userId": student, "classId": class_id }),
    );
    assert_eq!(check["member"], json!(true));
}

#[test]
fn join_requests_flow_through_approval() {
    let workspace = temp_dir("schoold-class-requests");
    let mut sc = Sidecar::open(&workspace);

    let owner = sc.active_user("owner", "teacher", None);
    let student = sc.active_user("kid", "student", None);
    let other = sc.active_user("other", "student", None);
    let (class_id, _) = sc.class_for(&owner, "History");

    let req = sc.ok(
        "joinRequests.create",
        json!({ "userId": student, "classId": class_id, "role": "student" }),
    );
    let request_id = req["requestId"].as_str().expect("requestId").to_string();
    assert_eq!(
        sc.fails(
            "joinRequests.create",
            json!({ "userId": student, "classId": class_id, "role": "student" })
        ),
        "conflict"
    );

    let check = sc.ok(
        "membership.check",
        json!({ "userId": student, "classId": class_id }),
    );
    assert_eq!(check["member"], json!(false));
    assert_eq!(check["status"], json!("pending"));

    let for_teacher = sc.ok("joinRequests.listForTeacher", json!({ "teacherId": owner }));
    assert_eq!(for_teacher["requests"].as_array().map(|r| r.len()), Some(1));

    sc.ok(
        "joinRequests.resolve",
        json!({ "requestId": request_id, "action": "approved" }),
    );
    assert_eq!(
        sc.fails(
            "joinRequests.resolve",
            json!({ "requestId": request_id, "action": "rejected" })
        ),
        "conflict"
    );

    let for_teacher = sc.ok("joinRequests.listForTeacher", json!({ "teacherId": owner }));
    assert_eq!(for_teacher["requests"], json!([]));
    let classes = sc.ok("classes.listForStudent", json!({ "studentId": student }));
    assert_eq!(classes["classes"][0]["id"], json!(class_id));

    assert_eq!(
        sc.fails(
            "joinRequests.create",
            json!({ "userId": student, "classId": class_id, "role": "student" })
        ),
        "conflict"
    );

    let rejected = sc.ok(
        "joinRequests.create",
        json!({ "userId": other, "classId": class_id, "role": "student" }),
    );
    sc.ok(
        "joinRequests.resolve",
        json!({ "requestId": rejected["requestId"], "action": "rejected" }),
    );
    let classes = sc.ok("classes.listForStudent", json!({ "studentId": other }));
    assert_eq!(classes["classes"], json!([]));
}

#[test]
fn removing_a_student_drops_their_grades_and_submissions() {
    let workspace = temp_dir("schoold-class-remove");
    let mut sc = Sidecar::open(&workspace);

    let owner = sc.active_user("owner", "teacher", None);
    let student = sc.active_user("kid", "student", None);
    let (class_id, _) = sc.class_for(&owner, "Biology");
    sc.ok("enrollments.add", json!({ "studentId": student, "classId": class_id }));
    let cs = sc.offering(&owner, &class_id, "Cells");
    let a = sc.assignment(&cs, "Lab report", None, 1);

    sc.ok(
        "submissions.submit",
        json!({ "assignmentId": a, "studentId": student, "link": "https://example.org/lab" }),
    );
    sc.grade(&student, &a, 9.0);
    let status = sc.ok("system.status", json!({}));
    assert_eq!(status["submissions"], json!(1));

    sc.ok("enrollments.remove", json!({ "studentId": student, "classId": class_id }));
    let status = sc.ok("system.status", json!({}));
    assert_eq!(status["submissions"], json!(0));
    let grades = sc.ok(
        "grades.forStudent",
        json!({ "studentId": student, "courseSubjectId": cs }),
    );
    assert_eq!(grades["grades"][0]["grade"], json!(null));
    let roster = sc.ok("enrollments.list", json!({ "classId": class_id }));
    assert_eq!(roster["students"], json!([]));
}

#[test]
fn deleting_a_class_cascades_everything() {
    let workspace = temp_dir("schoold-class-delete");
    let mut sc = Sidecar::open(&workspace);

    let owner = sc.active_user("owner", "teacher", None);
    let student = sc.active_user("kid", "student", None);
    let (class_id, _) = sc.class_for(&owner, "Chemistry");
    sc.ok("enrollments.add", json!({ "studentId": student, "classId": class_id }));
    let cs = sc.offering(&owner, &class_id, "Reactions");
    let a = sc.assignment(&cs, "Quiz", None, 1);
    sc.grade(&student, &a, 5.0);
    sc.ok(
        "announcements.create",
        json!({ "classId": class_id, "teacherId": owner, "title": "Hi", "content": "Welcome" }),
    );

    sc.ok("classes.delete", json!({ "classId": class_id }));
    let status = sc.ok("system.status", json!({}));
    assert_eq!(status["classes"], json!(0));
    assert_eq!(status["assignments"], json!(0));
    let classes = sc.ok("classes.listForStudent", json!({ "studentId": student }));
    assert_eq!(classes["classes"], json!([]));
    assert_eq!(sc.fails("classes.delete", json!({ "classId": class_id })), "not_found");
}
