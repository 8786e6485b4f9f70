use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, opt_date, parse_bool, required_date, required_str, required_time,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::Duration;
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn default_session_minutes(conn: &rusqlite::Connection) -> i64 {
    db::settings_get_json(conn, "setup.scheduling")
        .ok()
        .flatten()
        .and_then(|v| v.get("defaultSessionMinutes").and_then(|n| n.as_i64()))
        .filter(|n| (5..=480).contains(n))
        .unwrap_or(55)
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let from = match opt_date(req, "from") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match opt_date(req, "to") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let unassigned_only = match parse_bool(req.params.get("unassignedOnly"), false) {
        Ok(v) => v,
        Err(msg) => {
            return err(&req.id, "bad_params", format!("unassignedOnly {}", msg), None)
        }
    };

    let mut sql = String::from(
        "SELECT s.id, s.class_id, c.name, s.subject, s.date, s.start_time, s.end_time,
                b.room_id, r.name, b.source
         FROM sessions s
         JOIN classes c ON c.id = s.class_id
         LEFT JOIN bookings b ON b.session_id = s.id
         LEFT JOIN rooms r ON r.id = b.room_id",
    );
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = &class_id {
        clauses.push("s.class_id = ?".into());
        binds.push(Value::Text(cid.clone()));
    }
    if let Some(d) = from {
        clauses.push("s.date >= ?".into());
        binds.push(Value::Text(store::fmt_date(d)));
    }
    if let Some(d) = to {
        clauses.push("s.date <= ?".into());
        binds.push(Value::Text(store::fmt_date(d)));
    }
    if unassigned_only {
        clauses.push("b.id IS NULL".into());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.date, s.start_time, s.id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            let id: String = row.get(0)?;
            let class_id: String = row.get(1)?;
            let class_name: String = row.get(2)?;
            let subject: Option<String> = row.get(3)?;
            let date: String = row.get(4)?;
            let start: String = row.get(5)?;
            let end: String = row.get(6)?;
            let room_id: Option<String> = row.get(7)?;
            let room_name: Option<String> = row.get(8)?;
            let source: Option<String> = row.get(9)?;
            Ok(json!({
                "id": id,
                "classId": class_id,
                "className": class_name,
                "subject": subject,
                "date": date,
                "startTime": start,
                "endTime": end,
                "assigned": room_id.is_some(),
                "roomId": room_id,
                "roomName": room_name,
                "source": source
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start = match required_time(req, "startTime") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let end = match req.params.get("endTime").and_then(|v| v.as_str()) {
        Some(raw) => match store::parse_time(raw) {
            Some(t) => t,
            None => return err(&req.id, "bad_params", "endTime must be an HH:MM time", None),
        },
        // NaiveTime addition wraps at midnight; the end > start check below
        // rejects sessions that would spill into the next day.
        None => start + Duration::minutes(default_session_minutes(conn)),
    };
    if end <= start {
        return err(
            &req.id,
            "bad_params",
            "endTime must be after startTime on the same day",
            None,
        );
    }

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sessions(id, class_id, subject, date, start_time, end_time, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &session_id,
            &class_id,
            subject.as_deref(),
            store::fmt_date(date),
            store::fmt_time(start),
            store::fmt_time(end),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "sessionId": session_id,
            "date": store::fmt_date(date),
            "startTime": store::fmt_time(start),
            "endTime": store::fmt_time(end)
        }),
    )
}

fn handle_sessions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let current = match store::get_session(conn, &session_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut date = current.date;
    let mut start = current.start;
    let mut end = current.end;
    let mut subject_change: Option<Option<String>> = None;
    let mut touched = false;

    if let Some(v) = patch.get("date") {
        let Some(parsed) = v.as_str().and_then(store::parse_date) else {
            return err(
                &req.id,
                "bad_params",
                "patch.date must be a YYYY-MM-DD date",
                None,
            );
        };
        date = parsed;
        touched = true;
    }
    if let Some(v) = patch.get("startTime") {
        let Some(parsed) = v.as_str().and_then(store::parse_time) else {
            return err(
                &req.id,
                "bad_params",
                "patch.startTime must be an HH:MM time",
                None,
            );
        };
        start = parsed;
        touched = true;
    }
    if let Some(v) = patch.get("endTime") {
        let Some(parsed) = v.as_str().and_then(store::parse_time) else {
            return err(
                &req.id,
                "bad_params",
                "patch.endTime must be an HH:MM time",
                None,
            );
        };
        end = parsed;
        touched = true;
    }
    if let Some(v) = patch.get("subject") {
        if v.is_null() {
            subject_change = Some(None);
        } else if let Some(s) = v.as_str() {
            let t = s.trim().to_string();
            subject_change = Some(if t.is_empty() { None } else { Some(t) });
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.subject must be a string or null",
                None,
            );
        }
        touched = true;
    }
    if !touched {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }
    if end <= start {
        return err(
            &req.id,
            "bad_params",
            "endTime must be after startTime on the same day",
            None,
        );
    }

    let window_changed = date != current.date || start != current.start || end != current.end;

    // A booked session keeps its room only if the new window still fits.
    if window_changed {
        if let Some(room_id) = &current.booked_room_id {
            let occupied_by: Option<String> = match conn
                .query_row(
                    "SELECT session_id FROM bookings
                     WHERE room_id = ?1 AND date = ?2 AND session_id <> ?3
                       AND start_time < ?4 AND end_time > ?5
                     ORDER BY start_time, session_id LIMIT 1",
                    params![
                        room_id,
                        store::fmt_date(date),
                        session_id,
                        store::fmt_time(end),
                        store::fmt_time(start)
                    ],
                    |r| r.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if let Some(other) = occupied_by {
                return err(
                    &req.id,
                    "room_occupied",
                    "new time conflicts with another booking in the assigned room; clear the assignment first",
                    Some(json!({ "roomId": room_id, "occupiedBy": other })),
                );
            }
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let update_result = match &subject_change {
        Some(subject) => tx.execute(
            "UPDATE sessions
             SET date = ?, start_time = ?, end_time = ?, subject = ?,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            params![
                store::fmt_date(date),
                store::fmt_time(start),
                store::fmt_time(end),
                subject.as_deref(),
                session_id
            ],
        ),
        None => tx.execute(
            "UPDATE sessions
             SET date = ?, start_time = ?, end_time = ?,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            params![
                store::fmt_date(date),
                store::fmt_time(start),
                store::fmt_time(end),
                session_id
            ],
        ),
    };
    if let Err(e) = update_result {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    // Keep the denormalized window on the booking in step.
    if window_changed && current.booked_room_id.is_some() {
        if let Err(e) = tx.execute(
            "UPDATE bookings SET date = ?, start_time = ?, end_time = ? WHERE session_id = ?",
            params![
                store::fmt_date(date),
                store::fmt_time(start),
                store::fmt_time(end),
                session_id
            ],
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "bookings" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_sessions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    {
        let conn = match db_conn(state, req) {
            Ok(c) => c,
            Err(e) => return e,
        };

        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?", [&session_id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "session not found", None);
        }

        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };
        if let Err(e) = tx.execute("DELETE FROM bookings WHERE session_id = ?", [&session_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "bookings" })),
            );
        }
        if let Err(e) = tx.execute("DELETE FROM sessions WHERE id = ?", [&session_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "sessions" })),
            );
        }
        if let Err(e) = tx.commit() {
            return err(&req.id, "db_commit_failed", e.to_string(), None);
        }
    }

    // A manual room choice for a deleted session has nothing to apply to.
    state.overrides.clear(&session_id);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.update" => Some(handle_sessions_update(state, req)),
        "sessions.delete" => Some(handle_sessions_delete(state, req)),
        _ => None,
    }
}
