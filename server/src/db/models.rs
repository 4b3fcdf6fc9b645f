//! Row types and queries for the identity store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::auth::UserId;

/// User record in the users table
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub role: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

/// Insert a user and return its id.
pub fn insert_user(conn: &Connection, username: &str, role: Option<&str>) -> rusqlite::Result<UserId> {
    conn.execute(
        "INSERT INTO users (username, role, is_active, created_at) VALUES (?1, ?2, 1, ?3)",
        params![username, role, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_user_active(conn: &Connection, id: UserId, active: bool) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET is_active = ?1 WHERE id = ?2",
        params![active, id],
    )?;
    Ok(changed > 0)
}

pub fn find_user(conn: &Connection, id: UserId) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, role, is_active, created_at FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                role: row.get(2)?,
                is_active: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Whether `id` names an existing, active account.
pub fn is_active_user(conn: &Connection, id: UserId) -> rusqlite::Result<bool> {
    Ok(find_user(conn, id)?.map(|u| u.is_active).unwrap_or(false))
}
