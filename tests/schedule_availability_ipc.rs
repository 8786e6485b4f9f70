
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

fn create_class_room_and_session(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    date: &str,
    start: &str,
    end: &str,
) -> (String, String, String) {
    let class = request_ok(
        stdin,
        reader,
        "c1",
        "classes.create",
        json!({ "name": "9B Science", "expectedHeadcount": 10 }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let room = request_ok(
        stdin,
        reader,
        "r1",
        "rooms.create",
        json!({ "name": "Lab 2", "capacity": 20 }),
    );
    let room_id = room
        .get("roomId")
        .and_then(|v| v.as_str())
        .expect("roomId")
        .to_string();
    let session = request_ok(
        stdin,
        reader,
        "s1",
        "sessions.create",
        json!({
            "classId": class_id,
            "date": date,
            "startTime": start,
            "endTime": end,
            "subject": "Chemistry"
        }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    (class_id, room_id, session_id)
}

#[test]
fn occupancy_reports_raw_windows_and_free_slots_clamp() {
    let workspace = temp_dir("classroom-availability-raw");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_class_id, room_id, session_id) =
        create_class_room_and_session(&mut stdin, &mut reader, "2026-09-07", "09:00", "10:00");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.assign",
        json!({ "sessionId": session_id, "roomId": room_id }),
    );

    // Booking runs 09:00-10:00; the query window starts mid-booking.
    let occupancy = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.occupancy",
        json!({
            "roomId": room_id,
            "date": "2026-09-07",
            "start": "09:30",
            "end": "10:30"
        }),
    );
    let occupied = occupancy
        .get("occupied")
        .and_then(|v| v.as_array())
        .expect("occupied array");
    assert_eq!(occupied.len(), 1);
    assert_eq!(
        occupied[0].get("start").and_then(|v| v.as_str()),
        Some("09:00"),
        "occupancy reports the booking's own window, not the clamped one"
    );
    assert_eq!(occupied[0].get("end").and_then(|v| v.as_str()), Some("10:00"));
    assert_eq!(
        occupied[0].get("sessionId").and_then(|v| v.as_str()),
        Some(session_id.as_str())
    );

    // Free slots clamp the same booking to the window.
    let free = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.freeSlots",
        json!({
            "roomId": room_id,
            "date": "2026-09-07",
            "windowStart": "09:30",
            "windowEnd": "10:30"
        }),
    );
    let slots = free.get("free").and_then(|v| v.as_array()).expect("free array");
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].get("start").and_then(|v| v.as_str()), Some("10:00"));
    assert_eq!(slots[0].get("end").and_then(|v| v.as_str()), Some("10:30"));

    let busy = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.isAvailable",
        json!({
            "roomId": room_id,
            "date": "2026-09-07",
            "start": "09:30",
            "end": "10:30"
        }),
    );
    assert_eq!(busy.get("available").and_then(|v| v.as_bool()), Some(false));

    // The session's own booking must not block its own re-check.
    let excluding = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.isAvailable",
        json!({
            "roomId": room_id,
            "date": "2026-09-07",
            "start": "09:30",
            "end": "10:30",
            "excludingSessionId": session_id
        }),
    );
    assert_eq!(
        excluding.get("available").and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[test]
fn touching_windows_share_an_endpoint_without_conflict() {
    let workspace = temp_dir("classroom-availability-touching");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (class_id, room_id, first_session) =
        create_class_room_and_session(&mut stdin, &mut reader, "2026-09-07", "09:00", "10:00");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.assign",
        json!({ "sessionId": first_session, "roomId": room_id }),
    );

    let touching = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.isAvailable",
        json!({
            "roomId": room_id,
            "date": "2026-09-07",
            "start": "10:00",
            "end": "11:00"
        }),
    );
    assert_eq!(
        touching.get("available").and_then(|v| v.as_bool()),
        Some(true),
        "end == start is not an overlap"
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.create",
        json!({
            "classId": class_id,
            "date": "2026-09-07",
            "startTime": "10:00",
            "endTime": "11:00"
        }),
    );
    let second_session = second
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.assign",
        json!({ "sessionId": second_session, "roomId": room_id }),
    );

    // Day window defaults to 08:00-17:00 from setup.
    let free = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.freeSlots",
        json!({ "roomId": room_id, "date": "2026-09-07" }),
    );
    let slots = free.get("free").and_then(|v| v.as_array()).expect("free array");
    assert_eq!(slots.len(), 2, "before 09:00 and after 11:00, no zero-length gap between");
    assert_eq!(slots[0].get("start").and_then(|v| v.as_str()), Some("08:00"));
    assert_eq!(slots[0].get("end").and_then(|v| v.as_str()), Some("09:00"));
    assert_eq!(slots[1].get("start").and_then(|v| v.as_str()), Some("11:00"));
    assert_eq!(slots[1].get("end").and_then(|v| v.as_str()), Some("17:00"));
}

#[test]
fn idle_room_is_free_for_the_whole_window() {
    let workspace = temp_dir("classroom-availability-idle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let room = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "rooms.create",
        json!({ "name": "Quiet Room", "capacity": 8 }),
    );
    let room_id = room
        .get("roomId")
        .and_then(|v| v.as_str())
        .expect("roomId")
        .to_string();

    let free = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.freeSlots",
        json!({ "roomId": room_id, "date": "2026-09-07" }),
    );
    let slots = free.get("free").and_then(|v| v.as_array()).expect("free array");
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].get("start").and_then(|v| v.as_str()), Some("08:00"));
    assert_eq!(slots[0].get("end").and_then(|v| v.as_str()), Some("17:00"));

    let occupancy = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.occupancy",
        json!({ "roomId": room_id, "date": "2026-09-07" }),
    );
    assert_eq!(
        occupancy
            .get("occupied")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.freeSlots",
        json!({ "roomId": "no-such-room", "date": "2026-09-07" }),
    );
    assert_eq!(missing.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        missing.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}
