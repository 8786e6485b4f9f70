
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn create_room(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    capacity: i64,
) -> String {
    let room = request_ok(
        stdin,
        reader,
        id,
        "rooms.create",
        json!({ "name": name, "capacity": capacity }),
    );
    room.get("roomId")
        .and_then(|v| v.as_str())
        .expect("roomId")
        .to_string()
}

fn create_class_with_session(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_prefix: &str,
    name: &str,
    headcount: i64,
    date: &str,
    start: &str,
    end: &str,
) -> (String, String) {
    let class = request_ok(
        stdin,
        reader,
        &format!("{}c", id_prefix),
        "classes.create",
        json!({ "name": name, "expectedHeadcount": headcount }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let session = request_ok(
        stdin,
        reader,
        &format!("{}s", id_prefix),
        "sessions.create",
        json!({
            "classId": class_id,
            "date": date,
            "startTime": start,
            "endTime": end
        }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    (class_id, session_id)
}

fn remedy_kinds(diagnostic: &serde_json::Value) -> Vec<String> {
    diagnostic
        .get("remedies")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|r| r.get("kind").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn overlapping_booking_blocks_placement_with_inspect_remedy() {
    let workspace = temp_dir("classroom-conflicts-busy");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let only_room = create_room(&mut stdin, &mut reader, "r1", "Only Room", 30);
    let (_a_class, a_session) = create_class_with_session(
        &mut stdin,
        &mut reader,
        "a",
        "8A French",
        20,
        "2026-09-09",
        "09:00",
        "10:00",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.assign",
        json!({ "sessionId": a_session, "roomId": only_room }),
    );

    // Overlaps 09:30-10:00 with the committed booking.
    let (_b_class, b_session) = create_class_with_session(
        &mut stdin,
        &mut reader,
        "b",
        "8B French",
        20,
        "2026-09-09",
        "09:30",
        "10:30",
    );

    let run = request_ok(&mut stdin, &mut reader, "3", "planning.run", json!({}));
    assert_eq!(
        run.get("accepted").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let diagnostics = run
        .get("diagnostics")
        .and_then(|v| v.as_array())
        .expect("diagnostics array");
    assert_eq!(diagnostics.len(), 1);
    let diag = &diagnostics[0];
    assert_eq!(
        diag.get("sessionId").and_then(|v| v.as_str()),
        Some(b_session.as_str())
    );
    assert_eq!(
        diag.get("reason").and_then(|v| v.as_str()),
        Some("rooms_occupied")
    );
    assert!(diag
        .get("message")
        .and_then(|v| v.as_str())
        .map(|m| m.contains("occupied"))
        .unwrap_or(false));

    let kinds = remedy_kinds(diag);
    assert!(kinds.contains(&"reschedule".to_string()));
    assert!(kinds.contains(&"inspectRoomSchedule".to_string()));
    let inspect = diag
        .get("remedies")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|r| r.get("kind").and_then(|v| v.as_str()) == Some("inspectRoomSchedule"))
        })
        .expect("inspect remedy");
    assert_eq!(
        inspect.get("roomId").and_then(|v| v.as_str()),
        Some(only_room.as_str())
    );
    assert_eq!(
        inspect.get("conflictingSessionId").and_then(|v| v.as_str()),
        Some(a_session.as_str())
    );
}

#[test]
fn oversized_class_gets_capacity_shortfall_remedies() {
    let workspace = temp_dir("classroom-conflicts-capacity");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _small = create_room(&mut stdin, &mut reader, "r1", "Annex", 15);
    let middle = create_room(&mut stdin, &mut reader, "r2", "Middle Room", 20);

    let (_class_id, session_id) = create_class_with_session(
        &mut stdin,
        &mut reader,
        "x",
        "Assembly Group",
        30,
        "2026-09-09",
        "09:00",
        "10:00",
    );

    let run = request_ok(&mut stdin, &mut reader, "2", "planning.run", json!({}));
    let diagnostics = run
        .get("diagnostics")
        .and_then(|v| v.as_array())
        .expect("diagnostics array");
    assert_eq!(diagnostics.len(), 1);
    let diag = &diagnostics[0];
    assert_eq!(
        diag.get("sessionId").and_then(|v| v.as_str()),
        Some(session_id.as_str())
    );
    assert_eq!(
        diag.get("reason").and_then(|v| v.as_str()),
        Some("capacity_shortfall")
    );
    assert!(diag
        .get("message")
        .and_then(|v| v.as_str())
        .map(|m| m.contains("no room large enough"))
        .unwrap_or(false));

    let kinds = remedy_kinds(diag);
    assert!(kinds.contains(&"useUndersizedRoom".to_string()));
    assert!(kinds.contains(&"createRoom".to_string()));

    let undersized = diag
        .get("remedies")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|r| r.get("kind").and_then(|v| v.as_str()) == Some("useUndersizedRoom"))
        })
        .expect("undersized remedy");
    assert_eq!(
        undersized.get("roomId").and_then(|v| v.as_str()),
        Some(middle.as_str()),
        "largest free room is suggested"
    );
    assert_eq!(undersized.get("shortfall").and_then(|v| v.as_i64()), Some(10));

    let create = diag
        .get("remedies")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|r| r.get("kind").and_then(|v| v.as_str()) == Some("createRoom"))
        })
        .expect("create room remedy");
    assert_eq!(create.get("minCapacity").and_then(|v| v.as_i64()), Some(30));

    // Occupy the middle room over the window; the suggestion falls back to
    // the next largest room that is still free.
    let (_filler_class, filler_session) = create_class_with_session(
        &mut stdin,
        &mut reader,
        "f",
        "7C Drama",
        10,
        "2026-09-09",
        "09:00",
        "10:00",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.assign",
        json!({ "sessionId": filler_session, "roomId": middle }),
    );

    let rerun = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "planning.run",
        json!({ "sessionIds": [session_id] }),
    );
    let diag = &rerun
        .get("diagnostics")
        .and_then(|v| v.as_array())
        .expect("diagnostics array")[0];
    let undersized = diag
        .get("remedies")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|r| r.get("kind").and_then(|v| v.as_str()) == Some("useUndersizedRoom"))
        })
        .expect("undersized remedy after middle room filled");
    assert_eq!(
        undersized.get("roomName").and_then(|v| v.as_str()),
        Some("Annex")
    );
    assert_eq!(undersized.get("shortfall").and_then(|v| v.as_i64()), Some(15));
}

#[test]
fn override_to_busy_room_is_a_conflict_not_a_fallback() {
    let workspace = temp_dir("classroom-conflicts-override");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = create_room(&mut stdin, &mut reader, "r1", "First Hall", 30);
    let _second = create_room(&mut stdin, &mut reader, "r2", "Second Hall", 30);

    let (_a_class, a_session) = create_class_with_session(
        &mut stdin,
        &mut reader,
        "a",
        "8A French",
        20,
        "2026-09-09",
        "09:00",
        "10:00",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.assign",
        json!({ "sessionId": a_session, "roomId": first }),
    );

    let (_b_class, b_session) = create_class_with_session(
        &mut stdin,
        &mut reader,
        "b",
        "8B French",
        20,
        "2026-09-09",
        "09:00",
        "10:00",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "planning.setOverride",
        json!({ "sessionId": b_session, "roomId": first }),
    );

    let run = request_ok(&mut stdin, &mut reader, "4", "planning.run", json!({}));
    assert_eq!(
        run.get("accepted").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0),
        "a conflicting override does not silently fall back to another room"
    );
    let diagnostics = run
        .get("diagnostics")
        .and_then(|v| v.as_array())
        .expect("diagnostics array");
    assert_eq!(diagnostics.len(), 1);
    let diag = &diagnostics[0];
    assert_eq!(
        diag.get("reason").and_then(|v| v.as_str()),
        Some("override_conflict")
    );

    let kinds = remedy_kinds(diag);
    assert_eq!(kinds, vec!["clearOverride".to_string()]);
    let clear = &diag.get("remedies").and_then(|v| v.as_array()).expect("remedies")[0];
    assert_eq!(
        clear.get("sessionId").and_then(|v| v.as_str()),
        Some(b_session.as_str())
    );
    assert_eq!(
        clear.get("roomId").and_then(|v| v.as_str()),
        Some(first.as_str())
    );
}
