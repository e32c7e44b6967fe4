//! One-time migration from the legacy flat key-value table.
//!
//! Early builds of the dashboard kept slide assignments in a generic
//! `kv` table under `slide_image_<slideId>` keys, with the value either
//! a bare image id or a JSON object. On first successful open each such
//! entry is converted into a `slide_assignments` row and removed.
//! Partial failures are collected as strings, never thrown.

use chrono::Utc;
use rusqlite::Connection;

use crate::records::SlideAssignment;
use crate::store::assignments;

const LEGACY_KEY_PREFIX: &str = "slide_image_";

fn legacy_table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'kv'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn parse_legacy_value(value: &str) -> Option<(String, Option<String>)> {
    // JSON object shape first, then the bare-image-id fallback.
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(value) {
        if let Some(obj) = parsed.as_object() {
            let image_id = obj
                .get("imageId")
                .or_else(|| obj.get("id"))
                .and_then(|v| v.as_str())?;
            let alt = obj
                .get("alt")
                .or_else(|| obj.get("imageAlt"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            return Some((image_id.to_string(), alt));
        }
        if let Some(s) = parsed.as_str() {
            return Some((s.to_string(), None));
        }
    }
    if value.is_empty() {
        None
    } else {
        Some((value.to_string(), None))
    }
}

/// Convert and remove every legacy entry. Returns per-entry errors; an
/// empty vec means a clean migration (or nothing to migrate).
pub fn migrate_legacy_assignments(conn: &Connection) -> Vec<String> {
    let mut errors = Vec::new();

    match legacy_table_exists(conn) {
        Ok(false) => return errors,
        Ok(true) => {}
        Err(e) => {
            errors.push(format!("legacy table probe failed: {e}"));
            return errors;
        }
    }

    let entries: Vec<(String, String)> = {
        let mut stmt = match conn.prepare("SELECT key, value FROM kv WHERE key LIKE ?") {
            Ok(stmt) => stmt,
            Err(e) => {
                errors.push(format!("legacy table read failed: {e}"));
                return errors;
            }
        };
        let pattern = format!("{LEGACY_KEY_PREFIX}%");
        // Bind before the block ends so the row iterator's borrow of
        // `stmt` is released ahead of `stmt` itself.
        let collected = match stmt.query_map([pattern], |row| Ok((row.get(0)?, row.get(1)?))) {
            Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
            Err(e) => {
                errors.push(format!("legacy table scan failed: {e}"));
                return errors;
            }
        };
        collected
    };

    for (key, value) in entries {
        let slide_id = key.trim_start_matches(LEGACY_KEY_PREFIX).to_string();
        let Some((image_id, alt)) = parse_legacy_value(&value) else {
            errors.push(format!("legacy entry {key}: unrecognized value shape"));
            continue;
        };

        let assignment = SlideAssignment {
            slide_id,
            image_id,
            image_alt: alt,
            last_updated: Utc::now().to_rfc3339(),
        };
        if let Err(e) = assignments::put(conn, &assignment) {
            errors.push(format!("legacy entry {key}: write failed: {e}"));
            continue;
        }
        if let Err(e) = conn.execute("DELETE FROM kv WHERE key = ?", [&key]) {
            errors.push(format!("legacy entry {key}: cleanup failed: {e}"));
        }
    }

    errors
}
