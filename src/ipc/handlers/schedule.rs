use std::collections::HashMap;

use chrono::NaiveTime;
use serde_json::json;

use crate::availability::{self, BookedSlot};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_time, required_date, required_str, required_time};
use crate::ipc::types::{AppState, Request};
use crate::store;

/// Working-day window from setup, with fixed fallbacks when the section
/// is missing or unreadable.
fn day_window(conn: &rusqlite::Connection) -> (NaiveTime, NaiveTime) {
    let section = db::settings_get_json(conn, "setup.scheduling").ok().flatten();
    let time_of = |key: &str, fallback: NaiveTime| -> NaiveTime {
        section
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .and_then(store::parse_time)
            .unwrap_or(fallback)
    };
    (
        time_of(
            "dayStart",
            NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
        ),
        time_of(
            "dayEnd",
            NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
        ),
    )
}

fn booked_slots(room_id: &str, date: chrono::NaiveDate, rows: &[store::RoomBookingRow]) -> Vec<BookedSlot> {
    rows.iter()
        .map(|r| BookedSlot {
            room_id: room_id.to_string(),
            session_id: r.session_id.clone(),
            date,
            start: r.start,
            end: r.end,
        })
        .collect()
}

fn handle_schedule_occupancy(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let room_id = match required_str(req, "roomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::get_room(conn, &room_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "room not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let (day_start, day_end) = day_window(conn);
    let start = match opt_time(req, "start") {
        Ok(v) => v.unwrap_or(day_start),
        Err(e) => return e,
    };
    let end = match opt_time(req, "end") {
        Ok(v) => v.unwrap_or(day_end),
        Err(e) => return e,
    };
    if end <= start {
        return err(&req.id, "bad_params", "end must be after start", None);
    }

    let rows = match store::load_room_day(conn, &room_id, date) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let slots = booked_slots(&room_id, date, &rows);
    let by_session: HashMap<&str, &store::RoomBookingRow> =
        rows.iter().map(|r| (r.session_id.as_str(), r)).collect();

    let occupied: Vec<serde_json::Value> = availability::occupancy(&slots, &room_id, date, start, end)
        .into_iter()
        .map(|slot| {
            let detail = by_session.get(slot.session_id.as_str());
            json!({
                "sessionId": slot.session_id,
                "className": detail.map(|d| d.class_name.clone()),
                "subject": detail.and_then(|d| d.subject.clone()),
                "start": store::fmt_time(slot.start),
                "end": store::fmt_time(slot.end),
                "source": detail.map(|d| d.source.clone())
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "roomId": room_id,
            "date": store::fmt_date(date),
            "start": store::fmt_time(start),
            "end": store::fmt_time(end),
            "occupied": occupied
        }),
    )
}

fn handle_schedule_free_slots(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let room_id = match required_str(req, "roomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::get_room(conn, &room_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "room not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let (day_start, day_end) = day_window(conn);
    let window_start = match opt_time(req, "windowStart") {
        Ok(v) => v.unwrap_or(day_start),
        Err(e) => return e,
    };
    let window_end = match opt_time(req, "windowEnd") {
        Ok(v) => v.unwrap_or(day_end),
        Err(e) => return e,
    };
    if window_end <= window_start {
        return err(
            &req.id,
            "bad_params",
            "windowEnd must be after windowStart",
            None,
        );
    }

    let rows = match store::load_room_day(conn, &room_id, date) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let slots = booked_slots(&room_id, date, &rows);
    let occupied = availability::occupancy(&slots, &room_id, date, window_start, window_end);

    let free: Vec<serde_json::Value> = availability::free_slots(&occupied, window_start, window_end)
        .into_iter()
        .map(|gap| {
            json!({
                "start": store::fmt_time(gap.start),
                "end": store::fmt_time(gap.end)
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "roomId": room_id,
            "date": store::fmt_date(date),
            "windowStart": store::fmt_time(window_start),
            "windowEnd": store::fmt_time(window_end),
            "free": free
        }),
    )
}

fn handle_schedule_is_available(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let room_id = match required_str(req, "roomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start = match required_time(req, "start") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end = match required_time(req, "end") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if end <= start {
        return err(&req.id, "bad_params", "end must be after start", None);
    }
    let excluding = req
        .params
        .get("excludingSessionId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    match store::get_room(conn, &room_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "room not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let rows = match store::load_room_day(conn, &room_id, date) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let slots = booked_slots(&room_id, date, &rows);
    let available =
        availability::is_available(&slots, &room_id, date, start, end, excluding.as_deref());

    ok(&req.id, json!({ "available": available }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.occupancy" => Some(handle_schedule_occupancy(state, req)),
        "schedule.freeSlots" => Some(handle_schedule_free_slots(state, req)),
        "schedule.isAvailable" => Some(handle_schedule_is_available(state, req)),
        _ => None,
    }
}
