use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_date};
use crate::ipc::types::{AppState, Request};
use crate::planner::OverrideSet;
use crate::store;
use serde_json::json;
use std::path::PathBuf;

fn csv_quote(s: &str, delim: char) -> String {
    if s.contains(delim) || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// CSV shape from the export setup section, with fixed fallbacks.
fn export_config(conn: &rusqlite::Connection) -> (char, bool) {
    let section = db::settings_get_json(conn, "setup.export").ok().flatten();
    let delimiter = section
        .as_ref()
        .and_then(|v| v.get("delimiter"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.chars().next())
        .unwrap_or(',');
    let include_header = section
        .as_ref()
        .and_then(|v| v.get("includeHeader"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    (delimiter, include_header)
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }
    if let Err(e) = std::fs::create_dir_all(&workspace_path) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": workspace_path.to_string_lossy() })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            )
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            // Overrides keyed session ids from the replaced data set.
            state.overrides = OverrideSet::new();
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

fn handle_exchange_export_room_schedule_csv(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let room_id = req
        .params
        .get("roomId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if let Some(rid) = &room_id {
        match store::get_room(conn, rid) {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", "room not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut sql = String::from(
        "SELECT r.name, r.building, r.floor, b.date, b.start_time, b.end_time, c.name, s.subject,
                CASE WHEN c.expected_headcount > 0 THEN c.expected_headcount
                     ELSE (SELECT COUNT(*) FROM students st
                           WHERE st.class_id = c.id AND st.active = 1)
                END,
                b.source
         FROM bookings b
         JOIN rooms r ON r.id = b.room_id
         JOIN sessions s ON s.id = b.session_id
         JOIN classes c ON c.id = s.class_id
         WHERE b.date = ?",
    );
    if room_id.is_some() {
        sql.push_str(" AND b.room_id = ?");
    }
    sql.push_str(" ORDER BY r.name, b.start_time, b.id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, Option<String>>(1)?,
            r.get::<_, Option<i64>>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, String>(6)?,
            r.get::<_, Option<String>>(7)?,
            r.get::<_, i64>(8)?,
            r.get::<_, String>(9)?,
        ))
    };
    let date_str = store::fmt_date(date);
    let rows = match &room_id {
        Some(rid) => stmt
            .query_map((&date_str, rid), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([&date_str], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let (delim, include_header) = export_config(conn);
    let mut csv = String::new();
    if include_header {
        let header = [
            "room", "building", "floor", "date", "start", "end", "class", "subject", "headcount",
            "source",
        ];
        csv.push_str(&header.join(&delim.to_string()));
        csv.push('\n');
    }
    let rows_exported = rows.len();
    for (room, building, floor, row_date, start, end, class, subject, headcount, source) in rows {
        let fields = [
            csv_quote(&room, delim),
            csv_quote(building.as_deref().unwrap_or(""), delim),
            floor.map(|f| f.to_string()).unwrap_or_default(),
            row_date,
            start,
            end,
            csv_quote(&class, delim),
            csv_quote(subject.as_deref().unwrap_or(""), delim),
            headcount.to_string(),
            source,
        ];
        csv.push_str(&fields.join(&delim.to_string()));
        csv.push('\n');
    }

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out, csv) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    ok(
        &req.id,
        json!({ "ok": true, "rowsExported": rows_exported, "path": out_path }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        "exchange.exportRoomScheduleCsv" => {
            Some(handle_exchange_export_room_schedule_csv(state, req))
        }
        _ => None,
    }
}
