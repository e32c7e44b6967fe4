//! Row mapping and CRUD for the `media` table. Each helper runs on a
//! live connection inside its own implicit transaction; the retry and
//! reconnect policy lives in the store front-end.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::records::{Dimensions, ImageSource, MediaRecord};

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let width: Option<u32> = row.get(4)?;
    let height: Option<u32> = row.get(5)?;
    let dimensions = match (width, height) {
        (Some(width), Some(height)) => Some(Dimensions { width, height }),
        _ => None,
    };
    let source: String = row.get(9)?;
    Ok(MediaRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        content: row.get(2)?,
        upload_date: row.get(3)?,
        dimensions,
        byte_size: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        cloud_path: row.get(7)?,
        public_url: row.get(8)?,
        source: ImageSource::parse(&source).unwrap_or(ImageSource::Local),
    })
}

const SELECT_COLUMNS: &str =
    "id, name, content, upload_date, width, height, byte_size, cloud_path, public_url, source";

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<MediaRecord>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM media WHERE id = ?"),
        [id],
        record_from_row,
    )
    .optional()
}

pub fn get_all(conn: &Connection) -> rusqlite::Result<Vec<MediaRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM media ORDER BY upload_date DESC"
    ))?;
    let rows = stmt.query_map([], record_from_row)?;
    rows.collect()
}

/// Upsert. A cloud-sourced record never stores the payload locally, only
/// its reference; the column is forced NULL for that case.
pub fn put(conn: &Connection, record: &MediaRecord) -> rusqlite::Result<()> {
    let content = if record.source == ImageSource::Cloud {
        None
    } else {
        record.content.as_deref()
    };
    conn.execute(
        r#"
        INSERT INTO media (id, name, content, upload_date, width, height, byte_size, cloud_path, public_url, source)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            content = excluded.content,
            width = excluded.width,
            height = excluded.height,
            byte_size = excluded.byte_size,
            cloud_path = excluded.cloud_path,
            public_url = excluded.public_url,
            source = excluded.source
        "#,
        params![
            record.id,
            record.name,
            content,
            record.upload_date,
            record.dimensions.map(|d| d.width),
            record.dimensions.map(|d| d.height),
            record.byte_size.map(|v| v as i64),
            record.cloud_path,
            record.public_url,
            record.source.as_str(),
        ],
    )?;
    Ok(())
}

/// Insert only if neither the id nor a matching non-empty cloud_path is
/// already present. Returns whether a row was written.
pub fn put_if_absent(conn: &Connection, record: &MediaRecord) -> rusqlite::Result<bool> {
    if get(conn, &record.id)?.is_some() {
        return Ok(false);
    }
    if let Some(path) = record.cloud_path.as_deref() {
        if !path.is_empty() {
            let existing: Option<String> = conn
                .query_row("SELECT id FROM media WHERE cloud_path = ?", [path], |row| {
                    row.get(0)
                })
                .optional()?;
            if existing.is_some() {
                return Ok(false);
            }
        }
    }
    put(conn, record)?;
    Ok(true)
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute("DELETE FROM media WHERE id = ?", [id])?;
    Ok(changed > 0)
}

pub fn clear(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM media", [])?;
    Ok(())
}

pub fn total_bytes(conn: &Connection) -> rusqlite::Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(byte_size), 0) FROM media",
        [],
        |row| row.get(0),
    )?;
    Ok(total.max(0) as u64)
}

pub fn count(conn: &Connection) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}
