use chrono::{NaiveDate, NaiveTime};

/// A (room, session) pairing with the session's window copied in.
/// This is the snapshot row the planner and the schedule queries work on;
/// it never holds a live database handle.
#[derive(Debug, Clone, PartialEq)]
pub struct BookedSlot {
    pub room_id: String,
    pub session_id: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// One occupied stretch of a room, reported with the raw booking window
/// (not clamped to the query window).
#[derive(Debug, Clone, PartialEq)]
pub struct OccupiedSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Half-open interval intersection: touching endpoints do not overlap.
pub fn windows_overlap(
    a_start: NaiveTime,
    a_end: NaiveTime,
    b_start: NaiveTime,
    b_end: NaiveTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// All bookings for `room_id` whose window intersects `[start, end)` on
/// `date`, sorted ascending by start. Entries keep their raw windows; the
/// clamping happens in `free_slots`.
pub fn occupancy(
    bookings: &[BookedSlot],
    room_id: &str,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> Vec<OccupiedSlot> {
    let mut out: Vec<OccupiedSlot> = bookings
        .iter()
        .filter(|b| b.room_id == room_id && b.date == date)
        .filter(|b| windows_overlap(b.start, b.end, start, end))
        .map(|b| OccupiedSlot {
            start: b.start,
            end: b.end,
            session_id: b.session_id.clone(),
        })
        .collect();
    // Ties broken on end then session id so equal inputs always report the
    // same order.
    out.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.end.cmp(&b.end))
            .then(a.session_id.cmp(&b.session_id))
    });
    out
}

/// Complement of `occupied` within `[start, end)`. Each occupied interval is
/// clamped to the query window before subtracting; zero-length gaps are
/// dropped. No occupancy yields the whole window as one slot.
pub fn free_slots(occupied: &[OccupiedSlot], start: NaiveTime, end: NaiveTime) -> Vec<FreeSlot> {
    let mut out = Vec::new();
    if start >= end {
        return out;
    }
    let mut cursor = start;
    for slot in occupied {
        let clamped_start = slot.start.max(start);
        let clamped_end = slot.end.min(end);
        if clamped_start >= clamped_end {
            continue;
        }
        if clamped_start > cursor {
            out.push(FreeSlot {
                start: cursor,
                end: clamped_start,
            });
        }
        if clamped_end > cursor {
            cursor = clamped_end;
        }
    }
    if cursor < end {
        out.push(FreeSlot { start: cursor, end });
    }
    out
}

/// True iff the room has no booking intersecting `[start, end)` on `date`.
/// `excluding` names a session whose own booking is ignored, so a session can
/// be re-checked against a window it already occupies.
pub fn is_available(
    bookings: &[BookedSlot],
    room_id: &str,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    excluding: Option<&str>,
) -> bool {
    !bookings.iter().any(|b| {
        b.room_id == room_id
            && b.date == date
            && excluding != Some(b.session_id.as_str())
            && windows_overlap(b.start, b.end, start, end)
    })
}
