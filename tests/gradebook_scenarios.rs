mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

struct Fixture {
    sc: Sidecar,
    class_id: String,
    course_subject_id: String,
    student: String,
    homework: String,
    exams: String,
}

fn fixture(prefix: &str, system: &str) -> Fixture {
    let workspace = temp_dir(prefix);
    let mut sc = Sidecar::open(&workspace);
    let teacher = sc.active_user("teacher", "teacher", None);
    let student = sc.active_user("student", "student", None);
    let (class_id, _) = sc.class_for(&teacher, "Grade 9");
    sc.ok(
        "classes.updateSettings",
        json!({ "classId": class_id, "passingGrade": 6.0, "evaluationSystem": system }),
    );
    sc.ok("enrollments.add", json!({ "studentId": student, "classId": class_id }));
    let course_subject_id = sc.offering(&teacher, &class_id, "Mathematics");

    let hw = sc.ok(
        "categories.create",
        json!({ "courseSubjectId": course_subject_id, "name": "Homework", "weight": 40 }),
    );
    assert_eq!(hw["weightCheck"], json!({ "total": 40, "balanced": false }));
    let ex = sc.ok(
        "categories.create",
        json!({ "courseSubjectId": course_subject_id, "name": "Exams", "weight": 60 }),
    );
    assert_eq!(ex["weightCheck"], json!({ "total": 100, "balanced": true }));

    Fixture {
        sc,
        class_id,
        course_subject_id,
        student,
        homework: hw["categoryId"].as_str().expect("categoryId").to_string(),
        exams: ex["categoryId"].as_str().expect("categoryId").to_string(),
    }
}

fn averages(report: &serde_json::Value) -> serde_json::Value {
    report["categoryAverages"].clone()
}

#[test]
fn weighted_final_over_both_categories() {
    let mut f = fixture("schoold-gb-weighted", "annual");
    let cs = f.course_subject_id.clone();
    let hw1 = f.sc.assignment(&cs, "HW 1", Some(&f.homework), 1);
    let hw2 = f.sc.assignment(&cs, "HW 2", Some(&f.homework), 1);
    let exam = f.sc.assignment(&cs, "Final exam", Some(&f.exams), 1);
    f.sc.grade(&f.student, &hw1, 8.0);
    f.sc.grade(&f.student, &hw2, 6.0);
    f.sc.grade(&f.student, &exam, 9.0);

    let report = f.sc.ok(
        "gradebook.studentSubject",
        json!({ "studentId": f.student, "courseSubjectId": cs }),
    );
    assert_eq!(report["final"], json!(8.2));
    assert_eq!(
        averages(&report),
        json!([
            { "name": "Homework", "average": 7.0 },
            { "name": "Exams", "average": 9.0 },
        ])
    );
    assert_eq!(report["passes"], json!(true));
    assert!(report.get("periods").is_none());

    let book = f.sc.ok(
        "gradebook.subject",
        json!({ "classId": f.class_id, "courseSubjectId": cs }),
    );
    assert_eq!(book["view"], json!("Annual Progress"));
    assert_eq!(book["students"][0]["final"], json!(8.2));
    assert_eq!(book["students"][0]["cells"][&hw1], json!(8.0));
}

#[test]
fn empty_category_is_left_out_of_the_weighting() {
    let mut f = fixture("schoold-gb-partial", "annual");
    let cs = f.course_subject_id.clone();
    let hw = f.sc.assignment(&cs, "HW 1", Some(&f.homework), 1);
    f.sc.assignment(&cs, "Exam", Some(&f.exams), 1);
    f.sc.grade(&f.student, &hw, 8.0);

    let report = f.sc.ok(
        "gradebook.studentSubject",
        json!({ "studentId": f.student, "courseSubjectId": cs }),
    );
    assert_eq!(report["final"], json!(8.0));
    assert_eq!(
        averages(&report),
        json!([
            { "name": "Homework", "average": 8.0 },
            { "name": "Exams", "average": null },
        ])
    );
}

#[test]
fn year_final_skips_periods_without_records() {
    let mut f = fixture("schoold-gb-year", "semesters");
    let cs = f.course_subject_id.clone();
    let hw = f.sc.assignment(&cs, "HW S1", Some(&f.homework), 1);
    let exam = f.sc.assignment(&cs, "Exam S1", Some(&f.exams), 1);
    f.sc.grade(&f.student, &hw, 7.0);
    f.sc.grade(&f.student, &exam, 7.0);

    let report = f.sc.ok(
        "gradebook.studentSubject",
        json!({ "studentId": f.student, "courseSubjectId": cs }),
    );
    assert_eq!(report["yearFinal"], json!(7.0));
    assert_eq!(report["periods"][0]["label"], json!("1st Semester"));
    assert_eq!(report["periods"][0]["score"], json!(7.0));
    assert_eq!(report["periods"][1]["score"], json!(null));
    assert_eq!(report["passes"], json!(true));

    let class_view = f.sc.ok(
        "gradebook.class",
        json!({ "classId": f.class_id, "view": "year" }),
    );
    assert_eq!(class_view["students"][0]["scores"][0]["score"], json!(7.0));
    assert_eq!(class_view["students"][0]["scores"][0]["belowPassing"], json!(false));

    let second = f.sc.ok(
        "gradebook.class",
        json!({ "classId": f.class_id, "view": 2 }),
    );
    assert_eq!(second["view"], json!("2nd Semester"));
    assert_eq!(second["students"][0]["scores"][0]["score"], json!(0.0));
    assert_eq!(second["students"][0]["scores"][0]["belowPassing"], json!(true));

    assert_eq!(
        f.sc.fails("gradebook.class", json!({ "classId": f.class_id, "view": 3 })),
        "bad_params"
    );
}

#[test]
fn report_marks_pass_and_fail_per_subject() {
    let mut f = fixture("schoold-gb-report", "annual");
    let cs = f.course_subject_id.clone();
    let exam = f.sc.assignment(&cs, "Exam", Some(&f.exams), 1);
    f.sc.grade(&f.student, &exam, 5.5);

    let report = f.sc.ok(
        "gradebook.studentReport",
        json!({ "studentId": f.student, "classId": f.class_id, "view": null }),
    );
    assert_eq!(report["subjects"][0]["subjectName"], json!("Mathematics"));
    assert_eq!(report["subjects"][0]["average"], json!(5.5));
    assert_eq!(report["subjects"][0]["status"], json!("FAIL"));

    f.sc.grade(&f.student, &exam, 6.0);
    let report = f.sc.ok(
        "gradebook.studentReport",
        json!({ "studentId": f.student, "classId": f.class_id }),
    );
    assert_eq!(report["subjects"][0]["status"], json!("PASS"));
}

#[test]
fn pass_mark_uses_the_displayed_average() {
    let workspace = temp_dir("schoold-gb-rounding");
    let mut sc = Sidecar::open(&workspace);
    let teacher = sc.active_user("teacher", "teacher", None);
    let student = sc.active_user("student", "student", None);
    let (class_id, _) = sc.class_for(&teacher, "Grade 10");
    sc.ok("enrollments.add", json!({ "studentId": student, "classId": class_id }));
    let cs = sc.offering(&teacher, &class_id, "History");
    let a1 = sc.assignment(&cs, "Essay", None, 1);
    let a2 = sc.assignment(&cs, "Quiz", None, 1);
    sc.grade(&student, &a1, 6.0);
    sc.grade(&student, &a2, 5.992);

    let report = sc.ok(
        "gradebook.studentReport",
        json!({ "studentId": student, "classId": class_id }),
    );
    assert_eq!(report["subjects"][0]["average"], json!(6.0));
    assert_eq!(report["subjects"][0]["status"], json!("PASS"));

    let book = sc.ok("gradebook.class", json!({ "classId": class_id }));
    let cell = &book["students"][0]["scores"][0];
    assert_eq!(cell["score"], json!(6.0));
    assert_eq!(cell["belowPassing"], json!(false));

    let subject = sc.ok(
        "gradebook.subject",
        json!({ "classId": class_id, "courseSubjectId": cs }),
    );
    assert_eq!(subject["students"][0]["final"], json!(6.0));
    assert_eq!(subject["students"][0]["passes"], json!(true));

    let own = sc.ok(
        "gradebook.studentSubject",
        json!({ "studentId": student, "courseSubjectId": cs }),
    );
    assert_eq!(own["passes"], json!(true));
}

#[test]
fn deleting_a_category_uncategorizes_its_assignments() {
    let mut f = fixture("schoold-gb-catdelete", "annual");
    let cs = f.course_subject_id.clone();
    let hw = f.sc.assignment(&cs, "HW", Some(&f.homework), 1);
    let exam = f.sc.assignment(&cs, "Exam", Some(&f.exams), 1);
    f.sc.grade(&f.student, &hw, 4.0);
    f.sc.grade(&f.student, &exam, 9.0);

    let listed = f.sc.ok("assignments.listForSubject", json!({ "courseSubjectId": cs }));
    assert_eq!(listed["assignments"].as_array().map(|a| a.len()), Some(2));

    let deleted = f.sc.ok("categories.delete", json!({ "categoryId": f.homework }));
    assert_eq!(deleted["detachedAssignments"], json!(1));

    let listed = f.sc.ok("assignments.listForSubject", json!({ "courseSubjectId": cs }));
    let hw_row = listed["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .find(|a| a["id"] == json!(hw))
        .cloned()
        .expect("homework still listed");
    assert_eq!(hw_row["categoryId"], json!(null));

    // The orphaned grade no longer counts.
    let report = f.sc.ok(
        "gradebook.studentSubject",
        json!({ "studentId": f.student, "courseSubjectId": cs }),
    );
    assert_eq!(report["final"], json!(9.0));
    let cats = f.sc.ok("categories.list", json!({ "courseSubjectId": cs }));
    assert_eq!(cats["weightCheck"], json!({ "total": 60, "balanced": false }));
}

#[test]
fn assignment_inputs_are_validated() {
    let mut f = fixture("schoold-gb-validation", "trimesters");
    let cs = f.course_subject_id.clone();
    let base = json!({
        "courseSubjectId": cs,
        "title": "Essay",
        "deadline": "2030-02-30",
        "kind": "assignment",
        "submissionType": "digital",
        "period": 1,
    });
    assert_eq!(f.sc.fails("assignments.create", base.clone()), "bad_params");

    let mut bad_period = base.clone();
    bad_period["deadline"] = json!("2030-02-28");
    bad_period["period"] = json!(4);
    assert_eq!(f.sc.fails("assignments.create", bad_period.clone()), "bad_params");

    let mut bad_kind = bad_period.clone();
    bad_kind["period"] = json!(3);
    bad_kind["kind"] = json!("project");
    assert_eq!(f.sc.fails("assignments.create", bad_kind.clone()), "bad_params");

    let mut ok = bad_kind;
    ok["kind"] = json!("exam");
    f.sc.ok("assignments.create", ok);

    // Trimester 3 work blocks switching down to semesters.
    assert_eq!(
        f.sc.fails(
            "classes.updateSettings",
            json!({ "classId": f.class_id, "passingGrade": 5.0, "evaluationSystem": "semesters" })
        ),
        "conflict"
    );
    assert_eq!(
        f.sc.fails(
            "grades.gradeDirect",
            json!({ "studentId": f.student, "assignmentId": "missing", "grade": 5.0 })
        ),
        "not_found"
    );
}
