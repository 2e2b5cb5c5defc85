use crate::cache::CachedQuery;
use crate::calc::weight_check;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, cached, new_id, required_i64, required_str, required_text};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const CATEGORY_CACHES: &[CachedQuery] = &[
    CachedQuery::Categories,
    CachedQuery::SubjectAssignments,
    CachedQuery::ClassAssignments,
    CachedQuery::StudentGrades,
];

fn checked_weight(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let weight = required_i64(params, "weight")?;
    if !(0..=100).contains(&weight) {
        return Err(HandlerErr::bad_params("weight must be between 0 and 100"));
    }
    Ok(weight)
}

fn weight_check_json(conn: &Connection, course_subject_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let categories = helpers::load_categories(conn, course_subject_id)?;
    Ok(json!(weight_check(&categories)))
}

fn categories_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    cached(state, CachedQuery::Categories, &course_subject_id, |conn| {
        let categories = helpers::load_categories(conn, &course_subject_id)?;
        let check = weight_check(&categories);
        Ok(json!({ "categories": categories, "weightCheck": check }))
    })
}

fn categories_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let name = required_text(params, "name")?;
    let weight = checked_weight(params)?;

    let conn = helpers::db(state)?;
    helpers::require_row(conn, "course_subjects", &course_subject_id, "course subject")?;
    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM grading_categories WHERE course_subject_id = ?",
            [&course_subject_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let category_id = new_id();
    conn.execute(
        "INSERT INTO grading_categories(id, course_subject_id, name, weight, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&category_id, &course_subject_id, &name, weight, next_order),
    )
    .map_err(|e| HandlerErr::insert("grading_categories", e))?;
    let check = weight_check_json(conn, &course_subject_id)?;

    state.cache.invalidate(CATEGORY_CACHES);
    Ok(json!({ "categoryId": category_id, "weightCheck": check }))
}

fn categories_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let category_id = required_str(params, "categoryId")?;
    let name = required_text(params, "name")?;
    let weight = checked_weight(params)?;

    let conn = helpers::db(state)?;
    let course_subject_id: Option<String> = conn
        .query_row(
            "SELECT course_subject_id FROM grading_categories WHERE id = ?",
            [&category_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(course_subject_id) = course_subject_id else {
        return Err(HandlerErr::not_found("category not found"));
    };
    conn.execute(
        "UPDATE grading_categories SET name = ?, weight = ? WHERE id = ?",
        (&name, weight, &category_id),
    )
    .map_err(|e| HandlerErr::update("grading_categories", e))?;
    let check = weight_check_json(conn, &course_subject_id)?;

    state.cache.invalidate(CATEGORY_CACHES);
    Ok(json!({ "ok": true, "weightCheck": check }))
}

fn categories_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let category_id = required_str(params, "categoryId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "grading_categories", &category_id, "category")?;

    // Assignments survive as uncategorized.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let detached = match tx.execute(
        "UPDATE assignments SET category_id = NULL WHERE category_id = ?",
        [&category_id],
    ) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr::update("assignments", e));
        }
    };
    if let Err(e) = tx.execute("DELETE FROM grading_categories WHERE id = ?", [&category_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::delete("grading_categories", e));
    }
    tx.commit().map_err(HandlerErr::commit)?;

    state.cache.invalidate(CATEGORY_CACHES);
    Ok(json!({ "ok": true, "detachedAssignments": detached }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "categories.list" => categories_list(state, p),
        "categories.create" => categories_create(state, p),
        "categories.update" => categories_update(state, p),
        "categories.delete" => categories_delete(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
