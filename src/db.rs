use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("notas.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            user_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT NOT NULL,
            address TEXT NOT NULL,
            photo TEXT,
            is_student INTEGER NOT NULL,
            is_teacher INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_user_name ON users(user_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_description ON groups(description)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_user ON groups(user_id)",
        [],
    )?;

    // UNIQUE(group_id, user_id) closes the check-then-insert race on
    // concurrent enrollment attempts for the same pair.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_details(
            id INTEGER PRIMARY KEY,
            group_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            UNIQUE(group_id, user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_details_group ON group_details(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_details_user ON group_details(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes(
            id INTEGER PRIMARY KEY,
            group_detail_id INTEGER NOT NULL,
            percentage REAL NOT NULL,
            qualification REAL NOT NULL,
            FOREIGN KEY(group_detail_id) REFERENCES group_details(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_group_detail ON notes(group_detail_id)",
        [],
    )?;

    Ok(())
}
