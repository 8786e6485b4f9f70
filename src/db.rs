use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("classroom.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT,
            expected_headcount INTEGER
        )",
        [],
    )?;
    // Existing workspaces may predate the headcount override column.
    ensure_classes_expected_headcount(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            building TEXT,
            floor INTEGER,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    ensure_rooms_location_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rooms_name ON rooms(name, id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject TEXT,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_class ON sessions(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_date ON sessions(date)",
        [],
    )?;

    // The session window is copied onto the booking so availability scans
    // never need a join.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bookings(
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'auto',
            created_at TEXT,
            FOREIGN KEY(room_id) REFERENCES rooms(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(session_id)
        )",
        [],
    )?;
    ensure_bookings_source(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bookings_room_date ON bookings(room_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bookings_date ON bookings(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Older workspaces wrote manual placements as source='override'; the
    // current vocabulary is auto / manual / forced.
    migrate_booking_sources(&conn)?;

    Ok(conn)
}

fn ensure_classes_expected_headcount(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "expected_headcount")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classes ADD COLUMN expected_headcount INTEGER",
        [],
    )?;
    Ok(())
}

fn ensure_rooms_location_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "rooms", "building")? {
        conn.execute("ALTER TABLE rooms ADD COLUMN building TEXT", [])?;
    }
    if !table_has_column(conn, "rooms", "floor")? {
        conn.execute("ALTER TABLE rooms ADD COLUMN floor INTEGER", [])?;
    }
    if !table_has_column(conn, "rooms", "active")? {
        conn.execute(
            "ALTER TABLE rooms ADD COLUMN active INTEGER NOT NULL DEFAULT 1",
            [],
        )?;
    }
    Ok(())
}

fn ensure_bookings_source(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "bookings", "source")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE bookings ADD COLUMN source TEXT NOT NULL DEFAULT 'auto'",
        [],
    )?;
    Ok(())
}

fn migrate_booking_sources(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET source = 'manual' WHERE source = 'override'",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    // Unreadable historical values are treated as absent rather than fatal.
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value.to_string()],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
