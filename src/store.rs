use std::collections::HashMap;

use anyhow::{anyhow, Context};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use uuid::Uuid;

use crate::availability::BookedSlot;
use crate::planner::{PlanRoom, PlanSession};

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TIME_FMT: &str = "%H:%M";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let t = s.trim();
    NaiveTime::parse_from_str(t, TIME_FMT)
        .ok()
        .or_else(|| NaiveTime::parse_from_str(t, "%H:%M:%S").ok())
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

/// Times are always stored zero-padded so lexicographic compare in SQL is
/// chronological compare.
pub fn fmt_time(t: NaiveTime) -> String {
    t.format(TIME_FMT).to_string()
}

#[derive(Debug, Clone)]
pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub capacity: i64,
    pub building: Option<String>,
    pub floor: Option<i64>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    pub subject: Option<String>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub booked_room_id: Option<String>,
}

/// One booking of a room on a given day, with class context for display.
#[derive(Debug, Clone)]
pub struct RoomBookingRow {
    pub session_id: String,
    pub class_name: String,
    pub subject: Option<String>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub source: String,
}

/// Which sessions a planning run should consider. With no explicit ids only
/// unassigned sessions are candidates; named ids are planned even when they
/// already hold a booking (their own slot is excluded from conflict checks).
#[derive(Debug, Clone, Default)]
pub struct PlanScope {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub session_ids: Option<Vec<String>>,
}

pub fn get_room(conn: &Connection, id: &str) -> anyhow::Result<Option<RoomRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, capacity, building, floor, active FROM rooms WHERE id = ?1",
            [id],
            |r| {
                Ok(RoomRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    capacity: r.get(2)?,
                    building: r.get(3)?,
                    floor: r.get(4)?,
                    active: r.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn get_session(conn: &Connection, id: &str) -> anyhow::Result<Option<SessionRow>> {
    let raw = conn
        .query_row(
            "SELECT s.id, s.class_id, c.name, s.subject, s.date, s.start_time, s.end_time,
                    b.room_id
             FROM sessions s
             JOIN classes c ON c.id = s.class_id
             LEFT JOIN bookings b ON b.session_id = s.id
             WHERE s.id = ?1",
            [id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()?;
    let Some((id, class_id, class_name, subject, date, start, end, booked_room_id)) = raw else {
        return Ok(None);
    };
    Ok(Some(SessionRow {
        date: parse_date(&date).ok_or_else(|| anyhow!("session {} has an unreadable date", id))?,
        start: parse_time(&start)
            .ok_or_else(|| anyhow!("session {} has an unreadable start time", id))?,
        end: parse_time(&end).ok_or_else(|| anyhow!("session {} has an unreadable end time", id))?,
        id,
        class_id,
        class_name,
        subject,
        booked_room_id,
    }))
}

/// All rooms ordered by (name, id). This ordering is what breaks waste ties
/// in the planner, so it must stay stable across runs.
pub fn load_rooms(conn: &Connection) -> anyhow::Result<Vec<PlanRoom>> {
    let mut stmt =
        conn.prepare("SELECT id, name, capacity, active FROM rooms ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(PlanRoom {
                id: r.get(0)?,
                name: r.get(1)?,
                capacity: r.get(2)?,
                active: r.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Resolved headcount for one class: the expected_headcount override when it
/// is set and positive, otherwise the count of active students.
pub fn class_headcount(conn: &Connection, class_id: &str) -> anyhow::Result<i64> {
    let expected: Option<i64> = conn
        .query_row(
            "SELECT expected_headcount FROM classes WHERE id = ?1",
            [class_id],
            |r| r.get(0),
        )
        .optional()?
        .flatten();
    if let Some(n) = expected {
        if n > 0 {
            return Ok(n);
        }
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?1 AND active = 1",
        [class_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

fn push_date_range(
    clauses: &mut Vec<String>,
    binds: &mut Vec<Value>,
    column_from: &str,
    column_to: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) {
    if let Some(d) = from {
        clauses.push(column_from.to_string());
        binds.push(Value::Text(fmt_date(d)));
    }
    if let Some(d) = to {
        clauses.push(column_to.to_string());
        binds.push(Value::Text(fmt_date(d)));
    }
}

/// Sessions the planner should try to place, ordered by (date, start, id).
/// Headcount is resolved once per class, not once per session.
pub fn load_candidate_sessions(
    conn: &Connection,
    scope: &PlanScope,
) -> anyhow::Result<Vec<PlanSession>> {
    let mut sql = String::from(
        "SELECT s.id, s.class_id, c.name, s.subject, s.date, s.start_time, s.end_time, b.room_id
         FROM sessions s
         JOIN classes c ON c.id = s.class_id
         LEFT JOIN bookings b ON b.session_id = s.id",
    );
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    match &scope.session_ids {
        Some(ids) if !ids.is_empty() => {
            let placeholders = std::iter::repeat("?")
                .take(ids.len())
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("s.id IN ({})", placeholders));
            for id in ids {
                binds.push(Value::Text(id.clone()));
            }
        }
        _ => clauses.push("b.id IS NULL".to_string()),
    }
    push_date_range(
        &mut clauses,
        &mut binds,
        "s.date >= ?",
        "s.date <= ?",
        scope.from,
        scope.to,
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.date, s.start_time, s.id");

    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut headcounts: HashMap<String, i64> = HashMap::new();
    let mut out = Vec::with_capacity(raw.len());
    for (id, class_id, class_name, subject, date, start, end, booked_room_id) in raw {
        let headcount = match headcounts.get(&class_id) {
            Some(n) => *n,
            None => {
                let n = class_headcount(conn, &class_id)?;
                headcounts.insert(class_id.clone(), n);
                n
            }
        };
        out.push(PlanSession {
            date: parse_date(&date)
                .ok_or_else(|| anyhow!("session {} has an unreadable date", id))?,
            start: parse_time(&start)
                .ok_or_else(|| anyhow!("session {} has an unreadable start time", id))?,
            end: parse_time(&end)
                .ok_or_else(|| anyhow!("session {} has an unreadable end time", id))?,
            id,
            class_id,
            class_name,
            subject,
            headcount,
            booked_room_id,
        });
    }
    Ok(out)
}

/// Committed bookings as availability slots, optionally limited to a date
/// range so a scoped planning run does not load the whole calendar.
pub fn load_bookings(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> anyhow::Result<Vec<BookedSlot>> {
    let mut sql =
        String::from("SELECT room_id, session_id, date, start_time, end_time FROM bookings");
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    push_date_range(&mut clauses, &mut binds, "date >= ?", "date <= ?", from, to);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY date, start_time, session_id");

    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (room_id, session_id, date, start, end) in raw {
        out.push(BookedSlot {
            date: parse_date(&date)
                .ok_or_else(|| anyhow!("booking for session {} has an unreadable date", session_id))?,
            start: parse_time(&start).ok_or_else(|| {
                anyhow!("booking for session {} has an unreadable start time", session_id)
            })?,
            end: parse_time(&end).ok_or_else(|| {
                anyhow!("booking for session {} has an unreadable end time", session_id)
            })?,
            room_id,
            session_id,
        })
    }
    Ok(out)
}

/// One room's bookings on one date, with class context, ordered by start.
pub fn load_room_day(
    conn: &Connection,
    room_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<RoomBookingRow>> {
    let mut stmt = conn.prepare(
        "SELECT b.session_id, c.name, s.subject, b.start_time, b.end_time, b.source
         FROM bookings b
         JOIN sessions s ON s.id = b.session_id
         JOIN classes c ON c.id = s.class_id
         WHERE b.room_id = ?1 AND b.date = ?2
         ORDER BY b.start_time, b.end_time, b.session_id",
    )?;
    let raw = stmt
        .query_map(params![room_id, fmt_date(date)], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (session_id, class_name, subject, start, end, source) in raw {
        out.push(RoomBookingRow {
            start: parse_time(&start).ok_or_else(|| {
                anyhow!("booking for session {} has an unreadable start time", session_id)
            })?,
            end: parse_time(&end).ok_or_else(|| {
                anyhow!("booking for session {} has an unreadable end time", session_id)
            })?,
            session_id,
            class_name,
            subject,
            source,
        })
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed { booking_id: String },
    Conflict { occupied_by: String },
}

/// The single write point for bookings. The room window is re-checked against
/// committed state inside the transaction, so a plan that went stale between
/// run and commit degrades to a Conflict instead of a double booking.
pub fn commit_booking(
    conn: &Connection,
    room_id: &str,
    session_id: &str,
    source: &str,
    now_ts: &str,
) -> anyhow::Result<CommitOutcome> {
    let tx = conn.unchecked_transaction()?;

    let session = tx
        .query_row(
            "SELECT date, start_time, end_time FROM sessions WHERE id = ?1",
            [session_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let (date, start, end) =
        session.ok_or_else(|| anyhow!("session not found: {}", session_id))?;

    let occupied_by: Option<String> = tx
        .query_row(
            "SELECT session_id FROM bookings
             WHERE room_id = ?1 AND date = ?2 AND session_id <> ?3
               AND start_time < ?4 AND end_time > ?5
             ORDER BY start_time, session_id LIMIT 1",
            params![room_id, date, session_id, end, start],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(other) = occupied_by {
        return Ok(CommitOutcome::Conflict { occupied_by: other });
    }

    let booking_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO bookings(id, room_id, session_id, date, start_time, end_time, source, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(session_id) DO UPDATE SET
             id = excluded.id,
             room_id = excluded.room_id,
             date = excluded.date,
             start_time = excluded.start_time,
             end_time = excluded.end_time,
             source = excluded.source,
             created_at = excluded.created_at",
        params![booking_id, room_id, session_id, date, start, end, source, now_ts],
    )
    .context("write booking")?;
    tx.commit()?;
    Ok(CommitOutcome::Committed { booking_id })
}

/// Removes a session's booking. Returns false when there was nothing to clear.
pub fn clear_booking(conn: &Connection, session_id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute("DELETE FROM bookings WHERE session_id = ?1", [session_id])?;
    Ok(changed > 0)
}
