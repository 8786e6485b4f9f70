use rusqlite::{params_from_iter, types::Value, OptionalExtension};
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, opt_date, parse_bool, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, CommitOutcome};

fn handle_assignments_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let room_id = match required_str(req, "roomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let force = match parse_bool(req.params.get("force"), false) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("force {}", msg), None),
    };

    let session = match store::get_session(conn, &session_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let room = match store::get_room(conn, &room_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "room not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !room.active {
        return err(
            &req.id,
            "room_inactive",
            format!("room {} is inactive", room.name),
            Some(json!({ "roomId": room.id })),
        );
    }

    let headcount = match store::class_headcount(conn, &session.class_id) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let over_capacity = headcount > room.capacity;
    if over_capacity && !force {
        return err(
            &req.id,
            "capacity_exceeded",
            format!(
                "room {} seats {} but {} needs {}",
                room.name, room.capacity, session.class_name, headcount
            ),
            Some(json!({
                "roomId": room.id,
                "capacity": room.capacity,
                "headcount": headcount,
                "shortfall": headcount - room.capacity
            })),
        );
    }
    // "forced" marks a booking that knowingly overfills the room, so the
    // schedule views can flag it. A force flag on a fitting room is a no-op.
    let source = if over_capacity { "forced" } else { "manual" };

    match store::commit_booking(conn, &room.id, &session.id, source, &now_ts()) {
        Ok(CommitOutcome::Committed { booking_id }) => ok(
            &req.id,
            json!({
                "bookingId": booking_id,
                "sessionId": session.id,
                "roomId": room.id,
                "source": source
            }),
        ),
        Ok(CommitOutcome::Conflict { occupied_by }) => err(
            &req.id,
            "room_occupied",
            format!(
                "room {} is occupied over {}-{}",
                room.name,
                store::fmt_time(session.start),
                store::fmt_time(session.end)
            ),
            Some(json!({ "roomId": room.id, "occupiedBy": occupied_by })),
        ),
        Err(e) => err(&req.id, "db_write_failed", format!("{e:?}"), None),
    }
}

fn handle_assignments_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
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
    match store::clear_booking(conn, &session_id) {
        Ok(cleared) => ok(&req.id, json!({ "cleared": cleared })),
        Err(e) => err(&req.id, "db_delete_failed", format!("{e:?}"), None),
    }
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let room_id = req
        .params
        .get("roomId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
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

    let mut sql = String::from(
        "SELECT b.id, b.session_id, s.class_id, c.name, s.subject,
                b.room_id, r.name, b.date, b.start_time, b.end_time, b.source
         FROM bookings b
         JOIN sessions s ON s.id = b.session_id
         JOIN classes c ON c.id = s.class_id
         JOIN rooms r ON r.id = b.room_id",
    );
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(rid) = &room_id {
        clauses.push("b.room_id = ?".into());
        binds.push(Value::Text(rid.clone()));
    }
    if let Some(cid) = &class_id {
        clauses.push("s.class_id = ?".into());
        binds.push(Value::Text(cid.clone()));
    }
    if let Some(d) = from {
        clauses.push("b.date >= ?".into());
        binds.push(Value::Text(store::fmt_date(d)));
    }
    if let Some(d) = to {
        clauses.push("b.date <= ?".into());
        binds.push(Value::Text(store::fmt_date(d)));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY b.date, b.start_time, r.name, b.id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            let booking_id: String = row.get(0)?;
            let session_id: String = row.get(1)?;
            let class_id: String = row.get(2)?;
            let class_name: String = row.get(3)?;
            let subject: Option<String> = row.get(4)?;
            let room_id: String = row.get(5)?;
            let room_name: String = row.get(6)?;
            let date: String = row.get(7)?;
            let start: String = row.get(8)?;
            let end: String = row.get(9)?;
            let source: String = row.get(10)?;
            Ok(json!({
                "bookingId": booking_id,
                "sessionId": session_id,
                "classId": class_id,
                "className": class_name,
                "subject": subject,
                "roomId": room_id,
                "roomName": room_name,
                "date": date,
                "startTime": start,
                "endTime": end,
                "source": source
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(bookings) => ok(&req.id, json!({ "bookings": bookings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.assign" => Some(handle_assignments_assign(state, req)),
        "assignments.clear" => Some(handle_assignments_clear(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        _ => None,
    }
}
