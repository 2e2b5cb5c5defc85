//! Gradebook views. Every score shown here comes from `calc`; this module only
//! loads records and shapes the responses.

use crate::calc::{
    self, CategoryAverage, EvaluationSystem, GradeBreakdown, GradeRecord, GradingCategory,
    PeriodView,
};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, required_str, ClassSettings};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

struct Student {
    id: String,
    full_name: String,
}

struct Offering {
    id: String,
    subject_name: String,
}

fn load_records(conn: &Connection, student_id: &str, course_subject_id: &str) -> Result<Vec<GradeRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT g.grade, a.category_id, a.period
             FROM grades g
             JOIN assignments a ON a.id = g.assignment_id
             WHERE g.student_id = ? AND a.course_subject_id = ?",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((student_id, course_subject_id), |r| {
        Ok(GradeRecord {
            grade: r.get(0)?,
            category_id: r.get(1)?,
            period: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn enrolled_students(conn: &Connection, class_id: &str) -> Result<Vec<Student>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.full_name
             FROM enrollments e
             JOIN users u ON u.id = e.student_id
             WHERE e.class_id = ?
             ORDER BY u.full_name",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([class_id], |r| {
        Ok(Student {
            id: r.get(0)?,
            full_name: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn class_offerings(conn: &Connection, class_id: &str) -> Result<Vec<Offering>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT cs.id, s.name
             FROM course_subjects cs
             JOIN subjects s ON s.id = cs.subject_id
             WHERE cs.class_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([class_id], |r| {
        Ok(Offering {
            id: r.get(0)?,
            subject_name: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn resolve_view(params: &serde_json::Value, system: EvaluationSystem) -> Result<PeriodView, HandlerErr> {
    calc::parse_period_view(params.get("view"))
        .and_then(|v| v.resolve(system))
        .map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn rounded_averages(averages: &[CategoryAverage]) -> Vec<serde_json::Value> {
    averages
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "average": c.average.map(calc::round_off_2_decimals),
            })
        })
        .collect()
}

/// Breakdown for one view: a single period, or the year final with category
/// averages taken over the whole year.
fn view_breakdown(
    records: &[GradeRecord],
    categories: &[GradingCategory],
    system: EvaluationSystem,
    view: PeriodView,
) -> GradeBreakdown {
    match view {
        PeriodView::Period(p) => calc::period_breakdown(records, categories, p),
        PeriodView::YearFinal => {
            let mut b = calc::compute(records, categories);
            b.final_score = calc::year_final(records, categories, system);
            b
        }
    }
}

fn warn_if_unbalanced(categories: &[GradingCategory], course_subject_id: &str) {
    if categories.is_empty() {
        return;
    }
    let check = calc::weight_check(categories);
    if !check.balanced {
        tracing::warn!(
            course_subject_id,
            total = check.total,
            "category weights do not add up to 100"
        );
    }
}

fn gradebook_subject(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let conn = helpers::db(state)?;
    let class = helpers::course_subject_class(conn, &course_subject_id)?;
    if class.id != class_id {
        return Err(HandlerErr::bad_params("course subject belongs to another class"));
    }
    let view = resolve_view(params, class.system)?;
    let categories = helpers::load_categories(conn, &course_subject_id)?;
    warn_if_unbalanced(&categories, &course_subject_id);

    let period_filter = match view {
        PeriodView::Period(p) => Some(p),
        PeriodView::YearFinal => None,
    };
    let mut stmt = conn
        .prepare(
            "SELECT id, title, period, category_id
             FROM assignments
             WHERE course_subject_id = ?1 AND (?2 IS NULL OR period = ?2)
             ORDER BY deadline, rowid",
        )
        .map_err(HandlerErr::query)?;
    let assignments = stmt
        .query_map((&course_subject_id, period_filter), |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let period: i64 = r.get(2)?;
            let category_id: Option<String> = r.get(3)?;
            Ok(json!({
                "id": id,
                "title": title,
                "period": period,
                "categoryId": category_id,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut cell_stmt = conn
        .prepare(
            "SELECT g.student_id, g.assignment_id, g.grade
             FROM grades g
             JOIN assignments a ON a.id = g.assignment_id
             WHERE a.course_subject_id = ?1 AND (?2 IS NULL OR a.period = ?2)",
        )
        .map_err(HandlerErr::query)?;
    let mut cells: HashMap<String, serde_json::Map<String, serde_json::Value>> = HashMap::new();
    let rows = cell_stmt
        .query_map((&course_subject_id, period_filter), |r| {
            let student_id: String = r.get(0)?;
            let assignment_id: String = r.get(1)?;
            let grade: Option<f64> = r.get(2)?;
            Ok((student_id, assignment_id, grade))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    for (student_id, assignment_id, grade) in rows {
        cells
            .entry(student_id)
            .or_default()
            .insert(assignment_id, json!(grade));
    }

    let mut students = Vec::new();
    for s in enrolled_students(conn, &class.id)? {
        let records = load_records(conn, &s.id, &course_subject_id)?;
        let b = view_breakdown(&records, &categories, class.system, view);
        let final_score = calc::round_off_2_decimals(b.final_score);
        students.push(json!({
            "studentId": s.id,
            "fullName": s.full_name,
            "categoryAverages": rounded_averages(&b.category_averages),
            "final": final_score,
            "passes": calc::passes(b.final_score, class.passing_grade),
            "cells": cells.remove(&s.id).unwrap_or_default(),
        }));
    }

    Ok(json!({
        "evaluationSystem": class.system.as_str(),
        "view": view.label(class.system),
        "passingGrade": class.passing_grade,
        "weightCheck": calc::weight_check(&categories),
        "categories": categories,
        "assignments": assignments,
        "students": students,
    }))
}

fn subject_scores(
    conn: &Connection,
    class: &ClassSettings,
    offerings: &[(Offering, Vec<GradingCategory>)],
    student_id: &str,
    view: PeriodView,
) -> Result<Vec<(String, String, f64)>, HandlerErr> {
    let mut out = Vec::with_capacity(offerings.len());
    for (o, categories) in offerings {
        let records = load_records(conn, student_id, &o.id)?;
        let score = calc::evaluate(&records, categories, class.system, view)
            .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        out.push((o.id.clone(), o.subject_name.clone(), score));
    }
    Ok(out)
}

fn offerings_with_categories(conn: &Connection, class_id: &str) -> Result<Vec<(Offering, Vec<GradingCategory>)>, HandlerErr> {
    let mut out = Vec::new();
    for o in class_offerings(conn, class_id)? {
        let categories = helpers::load_categories(conn, &o.id)?;
        warn_if_unbalanced(&categories, &o.id);
        out.push((o, categories));
    }
    Ok(out)
}

fn gradebook_class(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let class = helpers::class_settings(conn, &class_id)?;
    let view = resolve_view(params, class.system)?;
    let offerings = offerings_with_categories(conn, &class.id)?;

    let mut rows = Vec::new();
    for s in enrolled_students(conn, &class.id)? {
        let scores: Vec<serde_json::Value> = subject_scores(conn, &class, &offerings, &s.id, view)?
            .into_iter()
            .map(|(cs_id, name, score)| {
                json!({
                    "courseSubjectId": cs_id,
                    "subjectName": name,
                    "score": calc::round_off_2_decimals(score),
                    "belowPassing": !calc::passes(score, class.passing_grade),
                })
            })
            .collect();
        rows.push(json!({
            "studentId": s.id,
            "fullName": s.full_name,
            "scores": scores,
        }));
    }

    let subjects: Vec<serde_json::Value> = offerings
        .iter()
        .map(|(o, _)| json!({ "courseSubjectId": o.id, "subjectName": o.subject_name }))
        .collect();
    Ok(json!({
        "className": class.name,
        "evaluationSystem": class.system.as_str(),
        "view": view.label(class.system),
        "passingGrade": class.passing_grade,
        "subjects": subjects,
        "students": rows,
    }))
}

fn gradebook_student_report(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let class = helpers::class_settings(conn, &class_id)?;
    let view = resolve_view(params, class.system)?;
    let offerings = offerings_with_categories(conn, &class.id)?;

    let subjects: Vec<serde_json::Value> = subject_scores(conn, &class, &offerings, &student_id, view)?
        .into_iter()
        .map(|(cs_id, name, score)| {
            let status = if calc::passes(score, class.passing_grade) {
                "PASS"
            } else {
                "FAIL"
            };
            json!({
                "courseSubjectId": cs_id,
                "subjectName": name,
                "average": calc::round_off_2_decimals(score),
                "status": status,
            })
        })
        .collect();
    Ok(json!({
        "className": class.name,
        "view": view.label(class.system),
        "passingGrade": class.passing_grade,
        "subjects": subjects,
    }))
}

fn gradebook_student_subject(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let conn = helpers::db(state)?;
    let class = helpers::course_subject_class(conn, &course_subject_id)?;
    let categories = helpers::load_categories(conn, &course_subject_id)?;
    let records = load_records(conn, &student_id, &course_subject_id)?;

    let overall = calc::compute(&records, &categories);
    let mut out = json!({
        "evaluationSystem": class.system.as_str(),
        "passingGrade": class.passing_grade,
        "final": calc::round_off_2_decimals(overall.final_score),
        "categoryAverages": rounded_averages(&overall.category_averages),
        "weightCheck": calc::weight_check(&categories),
    });

    let reported = if class.system.is_multi_period() {
        let periods: Vec<serde_json::Value> = calc::period_summaries(&records, &categories, class.system)
            .into_iter()
            .map(|p| {
                json!({
                    "period": p.period,
                    "label": p.label,
                    "recordCount": p.record_count,
                    "score": p.score.map(calc::round_off_2_decimals),
                })
            })
            .collect();
        let year = calc::year_final(&records, &categories, class.system);
        out["periods"] = json!(periods);
        out["yearFinal"] = json!(calc::round_off_2_decimals(year));
        year
    } else {
        overall.final_score
    };
    out["passes"] = json!(calc::passes(reported, class.passing_grade));
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "gradebook.subject" => gradebook_subject(state, p),
        "gradebook.class" => gradebook_class(state, p),
        "gradebook.studentReport" => gradebook_student_report(state, p),
        "gradebook.studentSubject" => gradebook_student_subject(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
