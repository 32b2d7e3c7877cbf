//! Filesystem-backed photo store with a SQLite index.
//!
//! Photo bytes live as plain JPEG files under `<root>/<album>/`; the index
//! keeps per-photo metadata and the pending flag. Because the album
//! directory is shared, every query reconciles the index against the
//! filesystem: rows whose file vanished are pruned and JPEG files dropped
//! in by other agents are adopted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::schema::{MIGRATIONS, SCHEMA};
use super::{MediaStore, PendingRef, PhotoRef, PhotoRow, StoreChange};
use crate::error::{Error, Result};

pub struct LocalStore {
    conn: Mutex<Connection>,
    root: PathBuf,
    changes: broadcast::Sender<StoreChange>,
}

impl LocalStore {
    /// Open a store rooted at `root` with its index at `index_path`,
    /// creating both as needed.
    pub fn open(root: impl Into<PathBuf>, index_path: &Path) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        if let Some(parent) = index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(index_path)?;
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            let _ = conn.execute(migration, []);
        }
        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            conn: Mutex::new(conn),
            root,
            changes,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("index lock poisoned".to_string()))
    }

    fn album_dir(&self, album: &str) -> PathBuf {
        self.root.join(album)
    }

    /// Pick an on-disk name that collides with nothing in the album.
    /// The counter keeps names unique even within one second.
    fn unique_path(album_dir: &Path, display_name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let candidate = album_dir.join(display_name);
        if !candidate.exists() {
            return candidate;
        }
        let stem = Path::new(display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "photo".to_string());
        let ext = Path::new(display_name)
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();
        loop {
            let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
            let candidate = album_dir.join(format!("{stem}_{seq}{ext}"));
            if !candidate.exists() {
                return candidate;
            }
        }
    }

    fn pending_path(&self, pending: &PendingRef) -> Result<PathBuf> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT path FROM photos WHERE id = ? AND pending = 1",
            [pending.0],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(path) => Ok(PathBuf::from(path)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(Error::Store(format!("no pending entry {}", pending.0)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    /// Drop index rows whose bytes vanished from the album directory.
    fn prune_missing(&self, album: &str) -> Result<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, path FROM photos WHERE album = ? AND pending = 0")?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([album], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut changed = false;
        for (id, path) in rows {
            if !Path::new(&path).exists() {
                conn.execute("DELETE FROM photos WHERE id = ?", [id])?;
                debug!(id, path, "pruned photo whose file vanished");
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Index JPEG files other agents dropped into the album directory.
    fn adopt_foreign(&self, album: &str) -> Result<bool> {
        let dir = self.album_dir(album);
        if !dir.is_dir() {
            return Ok(false);
        }

        let mut changed = false;
        for entry in WalkDir::new(&dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if ext != "jpg" && ext != "jpeg" {
                continue;
            }
            let path_str = path.to_string_lossy().to_string();

            let conn = self.conn()?;
            let known: i64 = conn.query_row(
                "SELECT COUNT(*) FROM photos WHERE path = ?",
                [&path_str],
                |row| row.get(0),
            )?;
            if known > 0 {
                continue;
            }

            let display_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_str.clone());
            let added = mtime_ms(path).unwrap_or_else(now_ms);
            let taken = exif_taken_ms(path);
            let dims = image::image_dimensions(path).ok();
            conn.execute(
                r#"
                INSERT INTO photos (album, display_name, mime_type, path, pending, date_added, date_taken, width, height)
                VALUES (?, ?, 'image/jpeg', ?, 0, ?, ?, ?, ?)
                "#,
                rusqlite::params![
                    album,
                    display_name,
                    path_str,
                    added,
                    taken,
                    dims.map(|d| d.0 as i64),
                    dims.map(|d| d.1 as i64),
                ],
            )?;
            debug!(path = path_str, "adopted photo added by another agent");
            changed = true;
        }
        Ok(changed)
    }
}

impl MediaStore for LocalStore {
    fn reserve(&self, display_name: &str, mime: &str, album: &str) -> Result<PendingRef> {
        let dir = self.album_dir(album);
        fs::create_dir_all(&dir)?;
        let path = Self::unique_path(&dir, display_name);

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO photos (album, display_name, mime_type, path, pending, date_added)
            VALUES (?, ?, ?, ?, 1, ?)
            "#,
            rusqlite::params![album, display_name, mime, path.to_string_lossy(), now_ms()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(album, display_name, id, "reserved pending entry");
        Ok(PendingRef(id))
    }

    fn write(&self, pending: &PendingRef, bytes: &[u8]) -> Result<()> {
        let path = self.pending_path(pending)?;
        fs::write(&path, bytes)?;
        Ok(())
    }

    fn finalize(&self, pending: PendingRef) -> Result<PhotoRef> {
        let path = self.pending_path(&pending)?;
        if !path.exists() {
            return Err(Error::Store(format!(
                "pending entry {} has no bytes",
                pending.0
            )));
        }

        // Metadata is best-effort; publishing the photo is not.
        let dims = image::image_dimensions(&path).ok();
        let taken = exif_taken_ms(&path);

        let conn = self.conn()?;
        conn.execute(
            "UPDATE photos SET pending = 0, width = ?, height = ?, date_taken = ? WHERE id = ?",
            rusqlite::params![
                dims.map(|d| d.0 as i64),
                dims.map(|d| d.1 as i64),
                taken,
                pending.0
            ],
        )?;
        drop(conn);

        let photo = PhotoRef(pending.0);
        debug!(%photo, path = %path.display(), "finalized photo");
        self.notify(StoreChange::Added(photo));
        Ok(photo)
    }

    fn discard(&self, pending: PendingRef) {
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!(id = pending.0, error = %e, "could not discard pending entry");
                return;
            }
        };
        let path: Option<String> = conn
            .query_row("SELECT path FROM photos WHERE id = ?", [pending.0], |row| {
                row.get(0)
            })
            .ok();
        let _ = conn.execute("DELETE FROM photos WHERE id = ?", [pending.0]);
        drop(conn);
        if let Some(path) = path {
            let _ = fs::remove_file(&path);
        }
        debug!(id = pending.0, "discarded pending entry");
    }

    fn query(&self, album: &str) -> Result<Vec<PhotoRow>> {
        let pruned = self.prune_missing(album)?;
        let adopted = self.adopt_foreign(album)?;

        let items = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, display_name, date_added, date_taken
                FROM photos
                WHERE album = ? AND pending = 0
                ORDER BY date_added DESC, id DESC
                "#,
            )?;
            let items: Vec<PhotoRow> = stmt
                .query_map([album], |row| {
                    Ok(PhotoRow {
                        ref_: PhotoRef(row.get(0)?),
                        display_name: row.get(1)?,
                        date_added_ms: row.get(2)?,
                        date_taken_ms: row.get(3)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            items
        };

        if pruned || adopted {
            self.notify(StoreChange::Rescanned);
        }
        Ok(items)
    }

    fn delete(&self, photo: PhotoRef) -> Result<()> {
        let conn = self.conn()?;
        let path = match conn.query_row(
            "SELECT path FROM photos WHERE id = ? AND pending = 0",
            [photo.0],
            |row| row.get::<_, String>(0),
        ) {
            Ok(path) => path,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(Error::Store(format!("no such photo {photo}")))
            }
            Err(e) => return Err(e.into()),
        };
        conn.execute("DELETE FROM photos WHERE id = ?", [photo.0])?;
        drop(conn);

        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                // The index row is gone either way; the file is orphaned.
                warn!(%photo, path, error = %e, "photo file removal failed");
            }
        }
        debug!(%photo, "deleted photo");
        self.notify(StoreChange::Removed(photo));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn mtime_ms(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let dt: DateTime<Utc> = modified.into();
    Some(dt.timestamp_millis())
}

/// DateTimeOriginal from the image's EXIF block, as local-time millis.
fn exif_taken_ms(path: &Path) -> Option<i64> {
    let file = fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let raw = match &field.value {
        exif::Value::Ascii(values) => String::from_utf8_lossy(values.first()?).to_string(),
        _ => return None,
    };
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
    let local = Local.from_local_datetime(&naive).single()?;
    Some(local.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::sim::sample_jpeg;
    use tempfile::TempDir;

    const ALBUM: &str = "IntruderSelfie";

    fn open_store(dir: &TempDir) -> LocalStore {
        LocalStore::open(dir.path().join("Pictures"), &dir.path().join("index.db")).unwrap()
    }

    fn save_one(store: &LocalStore, name: &str) -> PhotoRef {
        let pending = store.reserve(name, "image/jpeg", ALBUM).unwrap();
        store.write(&pending, &sample_jpeg(32, 24).unwrap()).unwrap();
        store.finalize(pending).unwrap()
    }

    #[test]
    fn reserve_write_finalize_publishes_photo() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let photo = save_one(&store, "IMG_20250101_120000.jpg");
        let rows = store.query(ALBUM).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ref_, photo);
        assert_eq!(rows[0].display_name, "IMG_20250101_120000.jpg");
        // No EXIF in synthetic frames: effective timestamp is date added.
        assert_eq!(rows[0].date_taken_ms, None);
        assert!(rows[0].date_added_ms > 0);
    }

    #[test]
    fn pending_entries_are_hidden_from_queries() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let pending = store.reserve("IMG_a.jpg", "image/jpeg", ALBUM).unwrap();
        store.write(&pending, &sample_jpeg(32, 24).unwrap()).unwrap();
        assert!(store.query(ALBUM).unwrap().is_empty());

        store.finalize(pending).unwrap();
        assert_eq!(store.query(ALBUM).unwrap().len(), 1);
    }

    #[test]
    fn finalize_without_bytes_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let pending = store.reserve("IMG_a.jpg", "image/jpeg", ALBUM).unwrap();
        assert!(store.finalize(pending).is_err());
    }

    #[test]
    fn discard_removes_row_and_bytes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let pending = store.reserve("IMG_a.jpg", "image/jpeg", ALBUM).unwrap();
        store.write(&pending, &sample_jpeg(32, 24).unwrap()).unwrap();
        store.discard(pending);

        assert!(store.query(ALBUM).unwrap().is_empty());
        let album_dir = dir.path().join("Pictures").join(ALBUM);
        assert_eq!(fs::read_dir(album_dir).unwrap().count(), 0);
    }

    #[test]
    fn duplicate_display_names_get_unique_paths() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let a = save_one(&store, "IMG_same.jpg");
        let b = save_one(&store, "IMG_same.jpg");
        assert_ne!(a, b);
        assert_eq!(store.query(ALBUM).unwrap().len(), 2);
    }

    #[test]
    fn delete_missing_photo_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.delete(PhotoRef(9999)).is_err());
    }

    #[test]
    fn delete_removes_row_and_file() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let photo = save_one(&store, "IMG_a.jpg");
        store.delete(photo).unwrap();
        assert!(store.query(ALBUM).unwrap().is_empty());
        assert!(store.delete(photo).is_err());
    }

    #[test]
    fn externally_deleted_files_are_pruned_on_query() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        save_one(&store, "IMG_a.jpg");
        let album_dir = dir.path().join("Pictures").join(ALBUM);
        for entry in fs::read_dir(&album_dir).unwrap() {
            fs::remove_file(entry.unwrap().path()).unwrap();
        }
        assert!(store.query(ALBUM).unwrap().is_empty());
    }

    #[test]
    fn foreign_files_are_adopted_on_query() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let album_dir = dir.path().join("Pictures").join(ALBUM);
        fs::create_dir_all(&album_dir).unwrap();
        fs::write(album_dir.join("outside.jpg"), sample_jpeg(16, 16).unwrap()).unwrap();
        fs::write(album_dir.join("notes.txt"), b"not a photo").unwrap();

        let rows = store.query(ALBUM).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].display_name, "outside.jpg");
        // Adoption happens once.
        assert_eq!(store.query(ALBUM).unwrap().len(), 1);
    }

    #[test]
    fn finalize_and_delete_notify_subscribers() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut changes = store.subscribe();

        let photo = save_one(&store, "IMG_a.jpg");
        assert_eq!(changes.try_recv().unwrap(), StoreChange::Added(photo));

        store.delete(photo).unwrap();
        assert_eq!(changes.try_recv().unwrap(), StoreChange::Removed(photo));
    }

    #[test]
    fn query_orders_newest_added_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let a = save_one(&store, "IMG_a.jpg");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = save_one(&store, "IMG_b.jpg");

        let rows = store.query(ALBUM).unwrap();
        assert_eq!(rows[0].ref_, b);
        assert_eq!(rows[1].ref_, a);
    }
}
