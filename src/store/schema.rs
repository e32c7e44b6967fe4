//! Database schema and additive migrations.

/// Base schema, applied with CREATE IF NOT EXISTS on every open.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    content BLOB,
    upload_date TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    byte_size INTEGER,
    cloud_path TEXT,
    public_url TEXT,
    source TEXT NOT NULL DEFAULT 'local'
);

CREATE INDEX IF NOT EXISTS idx_media_cloud_path ON media(cloud_path);
CREATE INDEX IF NOT EXISTS idx_media_upload_date ON media(upload_date);

CREATE TABLE IF NOT EXISTS slide_assignments (
    slide_id TEXT PRIMARY KEY,
    image_id TEXT NOT NULL,
    image_alt TEXT,
    last_updated TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assignments_image_id ON slide_assignments(image_id);
"#;

/// Migrations for databases created by older versions. Additive only —
/// create missing columns/indexes, never drop. Failures are ignored
/// because rerunning an applied ALTER errors harmlessly.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE media ADD COLUMN public_url TEXT",
    "ALTER TABLE media ADD COLUMN byte_size INTEGER",
    "CREATE INDEX IF NOT EXISTS idx_media_source ON media(source)",
];
