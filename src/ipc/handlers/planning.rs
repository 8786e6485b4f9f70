use rusqlite::OptionalExtension;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, opt_date, parse_string_array, required_str};
use crate::ipc::types::{AppState, Request};
use crate::planner;
use crate::store::{self, CommitOutcome, PlanScope};

fn handle_planning_set_override(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let room_id = match required_str(req, "roomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Deliberately unvalidated: an override for an unknown or busy room is
    // legal here and surfaces as a planner diagnostic, not an error.
    state.overrides.set(&session_id, &room_id);
    ok(&req.id, json!({ "ok": true, "overrideCount": state.overrides.len() }))
}

fn handle_planning_clear_override(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    state.overrides.clear(&session_id);
    ok(&req.id, json!({ "ok": true, "overrideCount": state.overrides.len() }))
}

fn handle_planning_overrides(state: &mut AppState, req: &Request) -> serde_json::Value {
    let overrides: Vec<serde_json::Value> = state
        .overrides
        .entries()
        .into_iter()
        .map(|(session_id, room_id)| json!({ "sessionId": session_id, "roomId": room_id }))
        .collect();
    ok(&req.id, json!({ "overrides": overrides }))
}

fn handle_planning_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let from = match opt_date(req, "from") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match opt_date(req, "to") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ids = match parse_string_array(req.params.get("sessionIds")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("sessionIds {}", msg), None),
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let scope = PlanScope {
        from,
        to,
        session_ids: if ids.is_empty() { None } else { Some(ids) },
    };

    let rooms = match store::load_rooms(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };
    let sessions = match store::load_candidate_sessions(conn, &scope) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };
    // Seeding from committed bookings only; nothing the run proposes is
    // visible to other requests until planning.commit.
    let bookings = match store::load_bookings(conn, scope.from, scope.to) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };

    match planner::plan(&rooms, &sessions, &bookings, &state.overrides) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "accepted": outcome.accepted,
                "diagnostics": outcome.diagnostics,
                "sessionCount": sessions.len(),
                "roomCount": rooms.len()
            }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

fn handle_planning_commit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(items) = req.params.get("items").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing/invalid items", None);
    };

    // Malformed items fail the whole request before anything is written.
    struct CommitItem {
        session_id: String,
        room_id: String,
        source: String,
    }
    let mut parsed: Vec<CommitItem> = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return err(
                &req.id,
                "bad_params",
                format!("items[{}] must be an object", idx),
                None,
            );
        };
        let Some(session_id) = obj.get("sessionId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                format!("items[{}].sessionId missing/invalid", idx),
                None,
            );
        };
        let Some(room_id) = obj.get("roomId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                format!("items[{}].roomId missing/invalid", idx),
                None,
            );
        };
        let source = match obj.get("source").and_then(|v| v.as_str()) {
            None => "auto",
            Some(s @ ("auto" | "manual")) => s,
            Some(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("items[{}].source must be auto or manual", idx),
                    None,
                )
            }
        };
        parsed.push(CommitItem {
            session_id: session_id.to_string(),
            room_id: room_id.to_string(),
            source: source.to_string(),
        });
    }

    let ts = now_ts();
    let mut committed: Vec<serde_json::Value> = Vec::new();
    let mut rejected: Vec<serde_json::Value> = Vec::new();

    for item in &parsed {
        // Re-validate each placement against current state; a plan that went
        // stale turns into a rejected item, never a failed batch.
        let session_exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?",
                [&item.session_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if session_exists.is_none() {
            rejected.push(json!({
                "sessionId": item.session_id,
                "roomId": item.room_id,
                "code": "session_not_found",
                "message": "session no longer exists"
            }));
            continue;
        }
        let room = match store::get_room(conn, &item.room_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
        };
        let room = match room {
            Some(r) => r,
            None => {
                rejected.push(json!({
                    "sessionId": item.session_id,
                    "roomId": item.room_id,
                    "code": "room_not_found",
                    "message": "room no longer exists"
                }));
                continue;
            }
        };
        if !room.active {
            rejected.push(json!({
                "sessionId": item.session_id,
                "roomId": item.room_id,
                "code": "room_inactive",
                "message": format!("room {} is inactive", room.name)
            }));
            continue;
        }

        match store::commit_booking(conn, &item.room_id, &item.session_id, &item.source, &ts) {
            Ok(CommitOutcome::Committed { booking_id }) => {
                committed.push(json!({
                    "sessionId": item.session_id,
                    "roomId": item.room_id,
                    "bookingId": booking_id,
                    "source": item.source
                }));
            }
            Ok(CommitOutcome::Conflict { occupied_by }) => {
                rejected.push(json!({
                    "sessionId": item.session_id,
                    "roomId": item.room_id,
                    "code": "room_occupied",
                    "message": format!("room {} was booked by another session", room.name),
                    "occupiedBy": occupied_by
                }));
            }
            Err(e) => return err(&req.id, "db_write_failed", format!("{e:?}"), None),
        }
    }

    ok(&req.id, json!({ "committed": committed, "rejected": rejected }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "planning.setOverride" => Some(handle_planning_set_override(state, req)),
        "planning.clearOverride" => Some(handle_planning_clear_override(state, req)),
        "planning.overrides" => Some(handle_planning_overrides(state, req)),
        "planning.run" => Some(handle_planning_run(state, req)),
        "planning.commit" => Some(handle_planning_commit(state, req)),
        _ => None,
    }
}
