use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_opt_i64, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_rooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "rooms": [] }));
    };
    let active_only = match parse_bool(req.params.get("activeOnly"), false) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("activeOnly {}", msg), None),
    };

    // (name, id) is the planner's room order; the list mirrors it so what the
    // UI shows matches what the planner walks.
    let sql = format!(
        "SELECT
           r.id, r.name, r.capacity, r.building, r.floor, r.active,
           (SELECT COUNT(*) FROM bookings b WHERE b.room_id = r.id) AS booking_count
         FROM rooms r
         {}
         ORDER BY r.name, r.id",
        if active_only { "WHERE r.active = 1" } else { "" }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: i64 = row.get(2)?;
            let building: Option<String> = row.get(3)?;
            let floor: Option<i64> = row.get(4)?;
            let active: i64 = row.get(5)?;
            let booking_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "capacity": capacity,
                "building": building,
                "floor": floor,
                "active": active != 0,
                "bookingCount": booking_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(rooms) => ok(&req.id, json!({ "rooms": rooms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_rooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let capacity = match req.params.get("capacity").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing capacity", None),
    };
    if capacity < 1 {
        return err(
            &req.id,
            "bad_params",
            "capacity must be a positive integer",
            None,
        );
    }
    let building = match parse_opt_string(req.params.get("building")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("building {}", msg), None),
    };
    let floor = match parse_opt_i64(req.params.get("floor")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("floor {}", msg), None),
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("active {}", msg), None),
    };

    let room_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO rooms(id, name, capacity, building, floor, active)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &room_id,
            &name,
            capacity,
            building.as_deref(),
            floor,
            if active { 1 } else { 0 },
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "rooms" })),
        );
    }

    ok(&req.id, json!({ "roomId": room_id, "name": name }))
}

fn handle_rooms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let room_id = match required_str(req, "roomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("capacity") {
        let Some(n) = v.as_i64() else {
            return err(&req.id, "bad_params", "patch.capacity must be an integer", None);
        };
        if n < 1 {
            return err(
                &req.id,
                "bad_params",
                "capacity must be a positive integer",
                None,
            );
        }
        set_parts.push("capacity = ?".into());
        bind_values.push(Value::Integer(n));
    }
    if let Some(v) = patch.get("building") {
        if v.is_null() {
            set_parts.push("building = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let t = s.trim().to_string();
            set_parts.push("building = ?".into());
            if t.is_empty() {
                bind_values.push(Value::Null);
            } else {
                bind_values.push(Value::Text(t));
            }
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.building must be a string or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("floor") {
        if v.is_null() {
            set_parts.push("floor = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(n) = v.as_i64() {
            set_parts.push("floor = ?".into());
            bind_values.push(Value::Integer(n));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.floor must be an integer or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("active") {
        let Some(b) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.active must be boolean", None);
        };
        set_parts.push("active = ?".into());
        bind_values.push(Value::Integer(if b { 1 } else { 0 }));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE rooms SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(room_id));
    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "room not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_rooms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let room_id = match required_str(req, "roomId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM rooms WHERE id = ?", [&room_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "room not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM bookings WHERE room_id = ?", [&room_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "bookings" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM rooms WHERE id = ?", [&room_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "rooms" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rooms.list" => Some(handle_rooms_list(state, req)),
        "rooms.create" => Some(handle_rooms_create(state, req)),
        "rooms.update" => Some(handle_rooms_update(state, req)),
        "rooms.delete" => Some(handle_rooms_delete(state, req)),
        _ => None,
    }
}
