use crate::cache::CachedQuery;
use crate::calc::round_off_2_decimals;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, cached, optional_text, required_f64, required_text};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::BTreeMap;

const NO_GROUP: &str = "No Group";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn tariffs_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    cached(state, CachedQuery::Tariffs, "", |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT group_name, monthly_fee, billing_currency, notes
                 FROM group_tariffs
                 ORDER BY group_name",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([], |r| {
                let group_name: String = r.get(0)?;
                let fee: f64 = r.get(1)?;
                let currency: String = r.get(2)?;
                let notes: Option<String> = r.get(3)?;
                Ok(json!({
                    "groupName": group_name,
                    "monthlyFee": fee,
                    "currency": currency,
                    "notes": notes,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "tariffs": rows }))
    })
}

fn tariffs_upsert(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_name = required_text(params, "groupName")?;
    let fee = required_f64(params, "monthlyFee")?;
    if fee < 0.0 {
        return Err(HandlerErr::bad_params("monthlyFee must not be negative"));
    }
    let currency = optional_text(params, "currency")?.unwrap_or_else(|| "USD".to_string());
    let notes = optional_text(params, "notes")?;

    let conn = helpers::db(state)?;
    conn.execute(
        "INSERT INTO group_tariffs(group_name, monthly_fee, billing_currency, notes)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(group_name) DO UPDATE SET
           monthly_fee = excluded.monthly_fee,
           billing_currency = excluded.billing_currency,
           notes = excluded.notes",
        (&group_name, fee, &currency, &notes),
    )
    .map_err(|e| HandlerErr::insert("group_tariffs", e))?;
    tracing::info!(group = %group_name, fee, %currency, "tariff saved");
    state.cache.invalidate(&[CachedQuery::Tariffs]);
    Ok(json!({ "ok": true }))
}

fn billing_overview(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT u.group_name, COUNT(*), t.monthly_fee, t.billing_currency, t.notes
             FROM users u
             LEFT JOIN group_tariffs t ON t.group_name = u.group_name
             WHERE u.group_name IS NOT NULL
             GROUP BY u.group_name
             ORDER BY u.group_name",
        )
        .map_err(HandlerErr::query)?;
    let groups = stmt
        .query_map([], |r| {
            let group_name: String = r.get(0)?;
            let users: i64 = r.get(1)?;
            let fee: Option<f64> = r.get(2)?;
            let currency: Option<String> = r.get(3)?;
            let notes: Option<String> = r.get(4)?;
            let tariff = match fee {
                Some(fee) => format!("{:.2} {}", fee, currency.as_deref().unwrap_or("USD")),
                None => "not set".to_string(),
            };
            Ok(json!({
                "groupName": group_name,
                "userCount": users,
                "monthlyFee": fee,
                "currency": currency,
                "tariff": tariff,
                "notes": notes,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "groups": groups }))
}

fn usage_by_group(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = helpers::db(state)?;
    // Submissions are charged to the student's group, materials to the owning
    // teacher's group.
    let mut stmt = conn
        .prepare(
            "SELECT u.group_name, COALESCE(SUM(LENGTH(s.file_data)), 0)
             FROM submissions s
             JOIN users u ON u.id = s.student_id
             GROUP BY u.group_name
             UNION ALL
             SELECT u.group_name, COALESCE(SUM(LENGTH(m.file_data)), 0)
             FROM materials m
             JOIN course_subjects cs ON cs.id = m.course_subject_id
             JOIN users u ON u.id = cs.teacher_id
             GROUP BY u.group_name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            let group: Option<String> = r.get(0)?;
            let bytes: i64 = r.get(1)?;
            Ok((group, bytes))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut totals: BTreeMap<String, i64> = BTreeMap::new();
    for (group, bytes) in rows {
        let key = group.unwrap_or_else(|| NO_GROUP.to_string());
        *totals.entry(key).or_insert(0) += bytes;
    }
    let groups: Vec<serde_json::Value> = totals
        .into_iter()
        .map(|(group, bytes)| {
            json!({
                "groupName": group,
                "bytes": bytes,
                "megabytes": round_off_2_decimals(bytes as f64 / BYTES_PER_MB),
            })
        })
        .collect();
    Ok(json!({ "groups": groups }))
}

fn analytics_overview(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = helpers::db(state)?;

    let mut stmt = conn
        .prepare(
            "SELECT COALESCE(group_name, ?), COUNT(*)
             FROM users
             GROUP BY COALESCE(group_name, ?)
             ORDER BY 1",
        )
        .map_err(HandlerErr::query)?;
    let by_group = stmt
        .query_map([NO_GROUP, NO_GROUP], |r| {
            let group: String = r.get(0)?;
            let count: i64 = r.get(1)?;
            Ok(json!({ "groupName": group, "users": count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut stmt = conn
        .prepare("SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY role")
        .map_err(HandlerErr::query)?;
    let roles = stmt
        .query_map([], |r| {
            let role: String = r.get(0)?;
            let count: i64 = r.get(1)?;
            Ok(json!({ "role": role, "users": count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let (users, classes, subjects, assignments, submissions): (i64, i64, i64, i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM users),
               (SELECT COUNT(*) FROM classes),
               (SELECT COUNT(*) FROM subjects),
               (SELECT COUNT(*) FROM assignments),
               (SELECT COUNT(*) FROM submissions)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "usersByGroup": by_group,
        "roleDistribution": roles,
        "totals": {
            "users": users,
            "classes": classes,
            "subjects": subjects,
            "assignments": assignments,
            "submissions": submissions,
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "tariffs.list" => tariffs_list(state),
        "tariffs.upsert" => tariffs_upsert(state, p),
        "billing.overview" => billing_overview(state),
        "usage.byGroup" => usage_by_group(state),
        "analytics.overview" => analytics_overview(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
