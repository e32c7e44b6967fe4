//! CRUD for the `slide_assignments` table plus the orphan/unused
//! reference queries used by the cleanup passes.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::records::SlideAssignment;

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<SlideAssignment> {
    Ok(SlideAssignment {
        slide_id: row.get(0)?,
        image_id: row.get(1)?,
        image_alt: row.get(2)?,
        last_updated: row.get(3)?,
    })
}

pub fn get(conn: &Connection, slide_id: &str) -> rusqlite::Result<Option<SlideAssignment>> {
    conn.query_row(
        "SELECT slide_id, image_id, image_alt, last_updated FROM slide_assignments WHERE slide_id = ?",
        [slide_id],
        assignment_from_row,
    )
    .optional()
}

pub fn get_all(conn: &Connection) -> rusqlite::Result<Vec<SlideAssignment>> {
    let mut stmt = conn.prepare(
        "SELECT slide_id, image_id, image_alt, last_updated FROM slide_assignments ORDER BY slide_id",
    )?;
    let rows = stmt.query_map([], assignment_from_row)?;
    rows.collect()
}

pub fn put(conn: &Connection, assignment: &SlideAssignment) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO slide_assignments (slide_id, image_id, image_alt, last_updated)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(slide_id) DO UPDATE SET
            image_id = excluded.image_id,
            image_alt = excluded.image_alt,
            last_updated = excluded.last_updated
        "#,
        params![
            assignment.slide_id,
            assignment.image_id,
            assignment.image_alt,
            assignment.last_updated,
        ],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, slide_id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "DELETE FROM slide_assignments WHERE slide_id = ?",
        [slide_id],
    )?;
    Ok(changed > 0)
}

pub fn clear(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM slide_assignments", [])?;
    Ok(())
}

/// Slide ids whose `image_id` no longer resolves to a media record.
pub fn orphaned(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT a.slide_id
        FROM slide_assignments a
        LEFT JOIN media m ON a.image_id = m.id
        WHERE m.id IS NULL
        ORDER BY a.slide_id
        "#,
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Media ids not referenced by any slide assignment.
pub fn unused_media(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT m.id
        FROM media m
        LEFT JOIN slide_assignments a ON a.image_id = m.id
        WHERE a.slide_id IS NULL
        ORDER BY m.upload_date
        "#,
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}
