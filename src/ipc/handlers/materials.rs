use crate::cache::CachedQuery;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    self, cached, encode_base64, new_id, now_rfc3339, optional_base64, optional_text,
    required_str, required_text,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn materials_add(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let title = required_text(params, "title")?;
    let description = optional_text(params, "description")?;
    let file_name = optional_text(params, "fileName")?;
    let file_data = optional_base64(params, "fileBase64")?;
    let link = optional_text(params, "link")?;
    if file_data.is_some() && file_name.is_none() {
        return Err(HandlerErr::bad_params("fileName is required with fileBase64"));
    }

    let conn = helpers::db(state)?;
    helpers::require_row(conn, "course_subjects", &course_subject_id, "course subject")?;
    let material_id = new_id();
    conn.execute(
        "INSERT INTO materials(id, course_subject_id, title, description, file_name, file_data, link, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &material_id,
            &course_subject_id,
            &title,
            &description,
            &file_name,
            &file_data,
            &link,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::insert("materials", e))?;
    state.cache.invalidate(&[CachedQuery::Materials]);
    Ok(json!({ "materialId": material_id }))
}

fn materials_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    cached(state, CachedQuery::Materials, &course_subject_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT id, title, description, file_name, COALESCE(LENGTH(file_data), 0), link, created_at
                 FROM materials
                 WHERE course_subject_id = ?
                 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([&course_subject_id], |r| {
                let id: String = r.get(0)?;
                let title: String = r.get(1)?;
                let description: Option<String> = r.get(2)?;
                let file_name: Option<String> = r.get(3)?;
                let size: i64 = r.get(4)?;
                let link: Option<String> = r.get(5)?;
                let created_at: Option<String> = r.get(6)?;
                Ok(json!({
                    "id": id,
                    "title": title,
                    "description": description,
                    "fileName": file_name,
                    "sizeBytes": size,
                    "link": link,
                    "createdAt": created_at,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "materials": rows }))
    })
}

fn materials_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let material_id = required_str(params, "materialId")?;
    let conn = helpers::db(state)?;
    let changed = conn
        .execute("DELETE FROM materials WHERE id = ?", [&material_id])
        .map_err(|e| HandlerErr::delete("materials", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("material not found"));
    }
    state.cache.invalidate(&[CachedQuery::Materials]);
    Ok(json!({ "ok": true }))
}

fn materials_download(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let material_id = required_str(params, "materialId")?;
    let conn = helpers::db(state)?;
    let row: Option<(Option<String>, Option<Vec<u8>>, Option<String>)> = conn
        .query_row(
            "SELECT file_name, file_data, link FROM materials WHERE id = ?",
            [&material_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((file_name, data, link)) = row else {
        return Err(HandlerErr::not_found("material not found"));
    };
    Ok(json!({
        "fileName": file_name,
        "dataBase64": data.as_deref().map(encode_base64),
        "link": link,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "materials.add" => materials_add(state, p),
        "materials.list" => materials_list(state, p),
        "materials.delete" => materials_delete(state, p),
        "materials.download" => materials_download(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
