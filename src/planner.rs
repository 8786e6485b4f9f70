use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::availability::{self, BookedSlot};

/// Contract violation raised for malformed planner input. Expected outcomes
/// (conflicts, shortfalls) are never errors; they come back as diagnostics.
#[derive(Debug, Serialize)]
pub struct PlanError {
    pub code: String,
    pub message: String,
}

impl PlanError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        PlanError {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Room row handed to the planner. Callers supply rooms in the order that
/// breaks waste ties, so the ordering is part of the input, not ambient state.
#[derive(Debug, Clone)]
pub struct PlanRoom {
    pub id: String,
    pub name: String,
    pub capacity: i64,
    pub active: bool,
}

/// Candidate session with its class headcount already resolved by the caller.
/// `booked_room_id` carries an existing booking so the session's own slot is
/// ignored when its windows are re-checked.
#[derive(Debug, Clone)]
pub struct PlanSession {
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    pub subject: Option<String>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub headcount: i64,
    pub booked_room_id: Option<String>,
}

/// Transient manual room choices, keyed by session. Last write wins and
/// nothing is validated at set time; conflicts surface when the planner runs.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    by_session: HashMap<String, String>,
}

impl OverrideSet {
    pub fn new() -> Self {
        OverrideSet::default()
    }

    pub fn set(&mut self, session_id: &str, room_id: &str) {
        self.by_session
            .insert(session_id.to_string(), room_id.to_string());
    }

    pub fn clear(&mut self, session_id: &str) {
        self.by_session.remove(session_id);
    }

    pub fn get(&self, session_id: &str) -> Option<&str> {
        self.by_session.get(session_id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }

    /// Pairs of (session id, room id), ordered by session id for stable listings.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .by_session
            .iter()
            .map(|(s, r)| (s.clone(), r.clone()))
            .collect();
        out.sort();
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementSource {
    Auto,
    Manual,
}

impl PlacementSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementSource::Auto => "auto",
            PlacementSource::Manual => "manual",
        }
    }
}

/// A placement the planner proposes. Nothing is written anywhere until the
/// caller commits it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPlacement {
    pub session_id: String,
    pub class_id: String,
    pub class_name: String,
    pub room_id: String,
    pub room_name: String,
    pub date: String,
    pub start: String,
    pub end: String,
    pub headcount: i64,
    pub capacity: i64,
    pub efficiency: f64,
    pub source: PlacementSource,
}

/// Remedies are plain data so they survive serialization; the handler layer
/// turns a chosen remedy back into an ordinary request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Remedy {
    #[serde(rename_all = "camelCase")]
    ClearOverride { session_id: String, room_id: String },
    #[serde(rename_all = "camelCase")]
    UseUndersizedRoom {
        room_id: String,
        room_name: String,
        capacity: i64,
        shortfall: i64,
    },
    #[serde(rename_all = "camelCase")]
    CreateRoom { min_capacity: i64 },
    #[serde(rename_all = "camelCase")]
    Reschedule { session_id: String },
    #[serde(rename_all = "camelCase")]
    InspectRoomSchedule {
        room_id: String,
        room_name: String,
        conflicting_session_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemedyOption {
    pub label: String,
    pub description: String,
    #[serde(flatten)]
    pub action: Remedy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticReason {
    CapacityShortfall,
    RoomsOccupied,
    OverrideConflict,
}

/// Why a session could not be placed, with at least one remedy attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub session_id: String,
    pub class_name: String,
    pub date: String,
    pub start: String,
    pub end: String,
    pub reason: DiagnosticReason,
    pub message: String,
    pub remedies: Vec<RemedyOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    pub accepted: Vec<AcceptedPlacement>,
    pub diagnostics: Vec<Diagnostic>,
}

fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn efficiency(headcount: i64, capacity: i64) -> f64 {
    if capacity > 0 {
        headcount as f64 / capacity as f64
    } else {
        0.0
    }
}

fn validate_sessions(sessions: &[PlanSession]) -> Result<(), PlanError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for s in sessions {
        if !seen.insert(s.id.as_str()) {
            return Err(PlanError::new(
                "duplicate_session",
                format!("session {} appears more than once", s.id),
            ));
        }
        if s.end <= s.start {
            return Err(PlanError::new(
                "bad_session_window",
                format!("session {} has an empty or inverted time window", s.id),
            ));
        }
        if s.headcount < 0 {
            return Err(PlanError::new(
                "bad_headcount",
                format!("session {} has a negative headcount", s.id),
            ));
        }
    }
    Ok(())
}

fn accept(session: &PlanSession, room: &PlanRoom, source: PlacementSource) -> AcceptedPlacement {
    AcceptedPlacement {
        session_id: session.id.clone(),
        class_id: session.class_id.clone(),
        class_name: session.class_name.clone(),
        room_id: room.id.clone(),
        room_name: room.name.clone(),
        date: fmt_date(session.date),
        start: fmt_time(session.start),
        end: fmt_time(session.end),
        headcount: session.headcount,
        capacity: room.capacity,
        efficiency: efficiency(session.headcount, room.capacity),
        source,
    }
}

fn diagnostic(
    session: &PlanSession,
    reason: DiagnosticReason,
    message: String,
    remedies: Vec<RemedyOption>,
) -> Diagnostic {
    Diagnostic {
        session_id: session.id.clone(),
        class_name: session.class_name.clone(),
        date: fmt_date(session.date),
        start: fmt_time(session.start),
        end: fmt_time(session.end),
        reason,
        message,
        remedies,
    }
}

fn clear_override_remedy(session: &PlanSession, room_id: &str) -> RemedyOption {
    RemedyOption {
        label: "Clear override".to_string(),
        description: format!(
            "Remove the manual room choice for {} and let the planner pick a room",
            session.class_name
        ),
        action: Remedy::ClearOverride {
            session_id: session.id.clone(),
            room_id: room_id.to_string(),
        },
    }
}

fn working_slot(session: &PlanSession, room: &PlanRoom) -> BookedSlot {
    BookedSlot {
        room_id: room.id.clone(),
        session_id: session.id.clone(),
        date: session.date,
        start: session.start,
        end: session.end,
    }
}

fn session_fits(working: &[BookedSlot], session: &PlanSession, room: &PlanRoom) -> bool {
    availability::is_available(
        working,
        &room.id,
        session.date,
        session.start,
        session.end,
        Some(&session.id),
    )
}

/// First occupant of the room over the session's window, by start time.
fn first_occupant(working: &[BookedSlot], session: &PlanSession, room: &PlanRoom) -> Option<String> {
    availability::occupancy(working, &room.id, session.date, session.start, session.end)
        .into_iter()
        .find(|o| o.session_id != session.id)
        .map(|o| o.session_id)
}

enum Placement {
    Accepted(AcceptedPlacement, BookedSlot),
    Blocked(Diagnostic),
}

fn place_with_override(
    rooms: &[PlanRoom],
    working: &[BookedSlot],
    session: &PlanSession,
    room_id: &str,
) -> Placement {
    let room = match rooms.iter().find(|r| r.id == room_id) {
        Some(r) => r,
        None => {
            return Placement::Blocked(diagnostic(
                session,
                DiagnosticReason::OverrideConflict,
                format!("manual room {} is not a known room", room_id),
                vec![clear_override_remedy(session, room_id)],
            ));
        }
    };
    if !room.active {
        return Placement::Blocked(diagnostic(
            session,
            DiagnosticReason::OverrideConflict,
            format!("manual room {} is inactive", room.name),
            vec![clear_override_remedy(session, room_id)],
        ));
    }
    if !session_fits(working, session, room) {
        let occupant = first_occupant(working, session, room).unwrap_or_default();
        return Placement::Blocked(diagnostic(
            session,
            DiagnosticReason::OverrideConflict,
            format!(
                "manual room {} occupied by session {} over {}-{}",
                room.name,
                occupant,
                fmt_time(session.start),
                fmt_time(session.end)
            ),
            vec![clear_override_remedy(session, room_id)],
        ));
    }
    Placement::Accepted(
        accept(session, room, PlacementSource::Manual),
        working_slot(session, room),
    )
}

fn capacity_shortfall(
    rooms: &[PlanRoom],
    working: &[BookedSlot],
    session: &PlanSession,
) -> Diagnostic {
    let mut remedies = Vec::new();
    // Largest active room that is actually free over the window; first of
    // equals wins so the suggestion is stable.
    let mut largest: Option<&PlanRoom> = None;
    for room in rooms.iter().filter(|r| r.active) {
        if !session_fits(working, session, room) {
            continue;
        }
        if largest.map(|l| room.capacity > l.capacity).unwrap_or(true) {
            largest = Some(room);
        }
    }
    if let Some(room) = largest {
        remedies.push(RemedyOption {
            label: "Use largest available room".to_string(),
            description: format!(
                "Book {} ({} seats, {} short) despite the shortfall",
                room.name,
                room.capacity,
                session.headcount - room.capacity
            ),
            action: Remedy::UseUndersizedRoom {
                room_id: room.id.clone(),
                room_name: room.name.clone(),
                capacity: room.capacity,
                shortfall: session.headcount - room.capacity,
            },
        });
    }
    remedies.push(RemedyOption {
        label: "Create a larger room".to_string(),
        description: format!("Add a room with at least {} seats", session.headcount),
        action: Remedy::CreateRoom {
            min_capacity: session.headcount,
        },
    });
    diagnostic(
        session,
        DiagnosticReason::CapacityShortfall,
        format!(
            "no room large enough for {} ({} seats needed)",
            session.class_name, session.headcount
        ),
        remedies,
    )
}

fn rooms_occupied(
    candidates: &[(usize, &PlanRoom)],
    working: &[BookedSlot],
    session: &PlanSession,
) -> Diagnostic {
    let mut remedies = vec![RemedyOption {
        label: "Reschedule session".to_string(),
        description: format!(
            "Move the {} session to another time and plan again",
            session.class_name
        ),
        action: Remedy::Reschedule {
            session_id: session.id.clone(),
        },
    }];
    // Point at the tightest-fit candidate so the user inspects the room the
    // planner would have used.
    if let Some((_, room)) = candidates.first() {
        if let Some(occupant) = first_occupant(working, session, room) {
            remedies.push(RemedyOption {
                label: "Inspect room schedule".to_string(),
                description: format!(
                    "Review bookings for {}; session {} holds {}-{}",
                    room.name,
                    occupant,
                    fmt_time(session.start),
                    fmt_time(session.end)
                ),
                action: Remedy::InspectRoomSchedule {
                    room_id: room.id.clone(),
                    room_name: room.name.clone(),
                    conflicting_session_id: occupant,
                },
            });
        }
    }
    diagnostic(
        session,
        DiagnosticReason::RoomsOccupied,
        format!(
            "all suitable rooms occupied at this time ({} candidate{})",
            candidates.len(),
            if candidates.len() == 1 { "" } else { "s" }
        ),
        remedies,
    )
}

fn place_session(
    rooms: &[PlanRoom],
    working: &[BookedSlot],
    overrides: &OverrideSet,
    session: &PlanSession,
) -> Placement {
    if let Some(room_id) = overrides.get(&session.id) {
        return place_with_override(rooms, working, session, room_id);
    }

    let mut candidates: Vec<(usize, &PlanRoom)> = rooms
        .iter()
        .enumerate()
        .filter(|(_, r)| r.active && r.capacity >= session.headcount)
        .collect();
    if candidates.is_empty() {
        return Placement::Blocked(capacity_shortfall(rooms, working, session));
    }
    // Least wasted capacity first; ties fall back to the caller's room order.
    candidates.sort_by_key(|(idx, r)| (r.capacity - session.headcount, *idx));

    for (_, room) in &candidates {
        if session_fits(working, session, room) {
            return Placement::Accepted(
                accept(session, room, PlacementSource::Auto),
                working_slot(session, room),
            );
        }
    }
    Placement::Blocked(rooms_occupied(&candidates, working, session))
}

/// Plans every candidate session against a fixed snapshot of rooms and
/// bookings. Sessions are taken largest class first; placements accepted
/// earlier in the run occupy rooms for the rest of it. The result is a pure
/// proposal and commits nothing.
pub fn plan(
    rooms: &[PlanRoom],
    sessions: &[PlanSession],
    bookings: &[BookedSlot],
    overrides: &OverrideSet,
) -> Result<PlanOutcome, PlanError> {
    validate_sessions(sessions)?;

    let mut working: Vec<BookedSlot> = bookings.to_vec();
    let mut ordered: Vec<&PlanSession> = sessions.iter().collect();
    // Stable sort: equal headcounts keep their input order.
    ordered.sort_by(|a, b| b.headcount.cmp(&a.headcount));

    let mut accepted = Vec::new();
    let mut diagnostics = Vec::new();
    for session in ordered {
        match place_session(rooms, &working, overrides, session) {
            Placement::Accepted(placement, slot) => {
                working.push(slot);
                accepted.push(placement);
            }
            Placement::Blocked(diag) => diagnostics.push(diag),
        }
    }
    Ok(PlanOutcome {
        accepted,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    fn room(id: &str, capacity: i64) -> PlanRoom {
        PlanRoom {
            id: id.to_string(),
            name: id.to_uppercase(),
            capacity,
            active: true,
        }
    }

    fn session(id: &str, headcount: i64, start: NaiveTime, end: NaiveTime) -> PlanSession {
        PlanSession {
            id: id.to_string(),
            class_id: format!("class-{id}"),
            class_name: format!("Class {id}"),
            subject: None,
            date: d("2024-03-04"),
            start,
            end,
            headcount,
            booked_room_id: None,
        }
    }

    fn booked(room_id: &str, session_id: &str, start: NaiveTime, end: NaiveTime) -> BookedSlot {
        BookedSlot {
            room_id: room_id.to_string(),
            session_id: session_id.to_string(),
            date: d("2024-03-04"),
            start,
            end,
        }
    }

    #[test]
    fn best_fit_picks_least_wasteful_room() {
        let rooms = vec![room("small", 30), room("big", 40)];
        let sessions = vec![session("s1", 28, t(9, 0), t(10, 0))];
        let out = plan(&rooms, &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.diagnostics.len(), 0);
        assert_eq!(out.accepted.len(), 1);
        let p = &out.accepted[0];
        assert_eq!(p.room_id, "small");
        assert_eq!(p.source, PlacementSource::Auto);
        assert!((p.efficiency - 28.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn waste_tie_falls_back_to_room_input_order() {
        let rooms = vec![room("first", 30), room("second", 30)];
        let sessions = vec![session("s1", 25, t(9, 0), t(10, 0))];
        let out = plan(&rooms, &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.accepted[0].room_id, "first");
    }

    #[test]
    fn larger_classes_are_placed_first() {
        // Only one room fits both; the larger class wins it even though the
        // smaller session comes first in the input.
        let rooms = vec![room("only", 40)];
        let sessions = vec![
            session("small", 10, t(9, 0), t(10, 0)),
            session("large", 35, t(9, 0), t(10, 0)),
        ];
        let out = plan(&rooms, &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].session_id, "large");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].session_id, "small");
        assert_eq!(out.diagnostics[0].reason, DiagnosticReason::RoomsOccupied);
    }

    #[test]
    fn headcount_tie_keeps_session_input_order() {
        let rooms = vec![room("a", 20), room("b", 20)];
        let sessions = vec![
            session("s1", 18, t(9, 0), t(10, 0)),
            session("s2", 18, t(9, 0), t(10, 0)),
        ];
        let out = plan(&rooms, &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.accepted.len(), 2);
        assert_eq!(out.accepted[0].session_id, "s1");
        assert_eq!(out.accepted[0].room_id, "a");
        assert_eq!(out.accepted[1].room_id, "b");
    }

    #[test]
    fn conflict_diagnostic_names_tightest_room_and_occupant() {
        let rooms = vec![room("only", 40)];
        let sessions = vec![
            session("s1", 30, t(9, 0), t(10, 0)),
            session("s2", 10, t(9, 30), t(10, 30)),
        ];
        let out = plan(&rooms, &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].session_id, "s1");

        let diag = &out.diagnostics[0];
        assert_eq!(diag.session_id, "s2");
        assert_eq!(diag.reason, DiagnosticReason::RoomsOccupied);
        assert!(diag
            .remedies
            .iter()
            .any(|r| matches!(r.action, Remedy::Reschedule { ref session_id } if session_id == "s2")));
        assert!(diag.remedies.iter().any(|r| matches!(
            r.action,
            Remedy::InspectRoomSchedule { ref room_id, ref conflicting_session_id, .. }
                if room_id == "only" && conflicting_session_id == "s1"
        )));
    }

    #[test]
    fn override_is_honored_when_room_is_free() {
        // The override wins even though "tight" would be the better fit.
        let rooms = vec![room("tight", 20), room("roomy", 100)];
        let sessions = vec![session("s1", 18, t(9, 0), t(10, 0))];
        let mut overrides = OverrideSet::new();
        overrides.set("s1", "roomy");
        let out = plan(&rooms, &sessions, &[], &overrides).expect("plan");
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].room_id, "roomy");
        assert_eq!(out.accepted[0].source, PlacementSource::Manual);
    }

    #[test]
    fn override_onto_busy_room_yields_conflict_not_fallback() {
        let rooms = vec![room("free", 30), room("busy", 30)];
        let sessions = vec![session("s1", 20, t(9, 0), t(10, 0))];
        let bookings = vec![booked("busy", "other", t(9, 0), t(11, 0))];
        let mut overrides = OverrideSet::new();
        overrides.set("s1", "busy");
        let out = plan(&rooms, &sessions, &bookings, &overrides).expect("plan");
        // No silent placement in another room.
        assert_eq!(out.accepted.len(), 0);
        let diag = &out.diagnostics[0];
        assert_eq!(diag.reason, DiagnosticReason::OverrideConflict);
        assert!(diag.message.contains("other"));
        assert!(diag.remedies.iter().any(|r| matches!(
            r.action,
            Remedy::ClearOverride { ref session_id, ref room_id }
                if session_id == "s1" && room_id == "busy"
        )));
    }

    #[test]
    fn override_onto_unknown_room_yields_conflict() {
        let rooms = vec![room("a", 30)];
        let sessions = vec![session("s1", 10, t(9, 0), t(10, 0))];
        let mut overrides = OverrideSet::new();
        overrides.set("s1", "missing");
        let out = plan(&rooms, &sessions, &[], &overrides).expect("plan");
        assert_eq!(out.accepted.len(), 0);
        assert_eq!(out.diagnostics[0].reason, DiagnosticReason::OverrideConflict);
        assert!(out.diagnostics[0].message.contains("missing"));
    }

    #[test]
    fn last_override_write_wins() {
        let mut overrides = OverrideSet::new();
        overrides.set("s1", "a");
        overrides.set("s1", "b");
        assert_eq!(overrides.get("s1"), Some("b"));
        overrides.clear("s1");
        assert_eq!(overrides.get("s1"), None);
        assert!(overrides.is_empty());
    }

    #[test]
    fn shortfall_suggests_largest_free_room_and_create() {
        let rooms = vec![room("small", 20), room("mid", 25)];
        let sessions = vec![session("s1", 30, t(9, 0), t(10, 0))];
        // "mid" would be the larger suggestion but it is busy.
        let bookings = vec![booked("mid", "other", t(9, 0), t(10, 0))];
        let out = plan(&rooms, &sessions, &bookings, &OverrideSet::new()).expect("plan");
        let diag = &out.diagnostics[0];
        assert_eq!(diag.reason, DiagnosticReason::CapacityShortfall);
        assert!(diag.message.contains("no room large enough"));
        assert!(diag.remedies.iter().any(|r| matches!(
            r.action,
            Remedy::UseUndersizedRoom { ref room_id, capacity, shortfall, .. }
                if room_id == "small" && capacity == 20 && shortfall == 10
        )));
        assert!(diag
            .remedies
            .iter()
            .any(|r| matches!(r.action, Remedy::CreateRoom { min_capacity } if min_capacity == 30)));
    }

    #[test]
    fn no_rooms_at_all_still_produces_a_remedy() {
        let sessions = vec![session("s1", 12, t(9, 0), t(10, 0))];
        let out = plan(&[], &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.accepted.len(), 0);
        let diag = &out.diagnostics[0];
        assert_eq!(diag.reason, DiagnosticReason::CapacityShortfall);
        assert_eq!(diag.remedies.len(), 1);
        assert!(matches!(
            diag.remedies[0].action,
            Remedy::CreateRoom { min_capacity: 12 }
        ));
    }

    #[test]
    fn inactive_rooms_are_never_assigned() {
        let rooms = vec![PlanRoom {
            active: false,
            ..room("closed", 50)
        }];
        let sessions = vec![session("s1", 10, t(9, 0), t(10, 0))];
        let out = plan(&rooms, &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.accepted.len(), 0);
        assert_eq!(
            out.diagnostics[0].reason,
            DiagnosticReason::CapacityShortfall
        );
    }

    #[test]
    fn session_keeps_its_own_booked_slot_out_of_the_check() {
        let rooms = vec![room("a", 30)];
        let mut s = session("s1", 20, t(9, 0), t(10, 0));
        s.booked_room_id = Some("a".to_string());
        let bookings = vec![booked("a", "s1", t(9, 0), t(10, 0))];
        let mut overrides = OverrideSet::new();
        overrides.set("s1", "a");
        let out = plan(&rooms, &[s], &bookings, &overrides).expect("plan");
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].room_id, "a");
    }

    #[test]
    fn accepted_placements_never_overlap_committed_bookings() {
        let rooms = vec![room("a", 30), room("b", 30)];
        let sessions = vec![
            session("s1", 25, t(9, 0), t(10, 0)),
            session("s2", 20, t(9, 30), t(10, 30)),
            session("s3", 15, t(9, 45), t(10, 15)),
        ];
        let bookings = vec![booked("a", "held", t(8, 30), t(9, 15))];
        let out = plan(&rooms, &sessions, &bookings, &OverrideSet::new()).expect("plan");

        let mut all: Vec<BookedSlot> = bookings.clone();
        for p in &out.accepted {
            all.push(BookedSlot {
                room_id: p.room_id.clone(),
                session_id: p.session_id.clone(),
                date: d(&p.date),
                start: NaiveTime::parse_from_str(&p.start, "%H:%M").expect("time"),
                end: NaiveTime::parse_from_str(&p.end, "%H:%M").expect("time"),
            });
        }
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                let (x, y) = (&all[i], &all[j]);
                if x.room_id == y.room_id && x.date == y.date {
                    assert!(
                        !availability::windows_overlap(x.start, x.end, y.start, y.end),
                        "{} and {} overlap in {}",
                        x.session_id,
                        y.session_id,
                        x.room_id
                    );
                }
            }
        }
        // Every session accounted for exactly once.
        assert_eq!(out.accepted.len() + out.diagnostics.len(), sessions.len());
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let rooms = vec![room("a", 30), room("b", 30), room("c", 45)];
        let sessions = vec![
            session("s1", 28, t(9, 0), t(10, 0)),
            session("s2", 28, t(9, 0), t(10, 0)),
            session("s3", 40, t(9, 0), t(10, 0)),
            session("s4", 5, t(9, 0), t(10, 0)),
        ];
        let bookings = vec![booked("b", "held", t(9, 30), t(10, 30))];
        let first = plan(&rooms, &sessions, &bookings, &OverrideSet::new()).expect("plan");
        let second = plan(&rooms, &sessions, &bookings, &OverrideSet::new()).expect("plan");
        assert_eq!(first, second);
    }

    #[test]
    fn empty_headcount_takes_smallest_room() {
        let rooms = vec![room("big", 40), room("tiny", 8)];
        let sessions = vec![session("s1", 0, t(9, 0), t(10, 0))];
        let out = plan(&rooms, &sessions, &[], &OverrideSet::new()).expect("plan");
        assert_eq!(out.accepted[0].room_id, "tiny");
        assert_eq!(out.accepted[0].efficiency, 0.0);
    }

    #[test]
    fn inverted_window_is_a_contract_error() {
        let rooms = vec![room("a", 30)];
        let sessions = vec![session("s1", 10, t(10, 0), t(10, 0))];
        let err = plan(&rooms, &sessions, &[], &OverrideSet::new()).unwrap_err();
        assert_eq!(err.code, "bad_session_window");
    }

    #[test]
    fn duplicate_session_ids_are_a_contract_error() {
        let rooms = vec![room("a", 30)];
        let sessions = vec![
            session("s1", 10, t(9, 0), t(10, 0)),
            session("s1", 12, t(11, 0), t(12, 0)),
        ];
        let err = plan(&rooms, &sessions, &[], &OverrideSet::new()).unwrap_err();
        assert_eq!(err.code, "duplicate_session");
    }
}
