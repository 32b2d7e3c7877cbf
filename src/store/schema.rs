//! SQLite schema for the photo index.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album TEXT NOT NULL,
    display_name TEXT NOT NULL,
    mime_type TEXT NOT NULL DEFAULT 'image/jpeg',
    path TEXT NOT NULL UNIQUE,
    pending INTEGER NOT NULL DEFAULT 1,
    date_added INTEGER NOT NULL,
    date_taken INTEGER,
    width INTEGER,
    height INTEGER
);

CREATE INDEX IF NOT EXISTS idx_photos_album ON photos(album, pending, date_added DESC);
"#;

/// Idempotent migrations for indexes created by older versions; executed
/// with errors ignored, so re-adding an existing column is harmless.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE photos ADD COLUMN width INTEGER",
    "ALTER TABLE photos ADD COLUMN height INTEGER",
];
