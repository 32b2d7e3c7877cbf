//! Gallery synchronizer.
//!
//! Maintains an observable, reconciled view over the capture album:
//! an ordered item list, a selection set and a preview cursor. The store
//! is externally mutable, so every read is a snapshot: `reload` re-derives
//! the whole view from a fresh query and drops selections that point at
//! vanished photos. A store-change subscription keeps the view live.
//!
//! All public operations are total: failures are logged and the previous
//! state stays in place. The presentation layer only ever sees a
//! consistent [`GalleryState`] snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{MediaStore, PhotoRef, StoreChange};

/// One photo as shown in the gallery.
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    pub ref_: PhotoRef,
    /// Milliseconds since epoch; the taken timestamp when the store
    /// recorded one, else the added timestamp.
    pub timestamp_ms: i64,
}

// Identity is the store reference alone. A re-query may return the same
// photo with refreshed timestamp metadata; both must collapse to one
// entry in any set.
impl PartialEq for CapturedPhoto {
    fn eq(&self, other: &Self) -> bool {
        self.ref_ == other.ref_
    }
}

impl Eq for CapturedPhoto {}

impl std::hash::Hash for CapturedPhoto {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ref_.hash(state);
    }
}

/// Observable gallery snapshot.
#[derive(Debug, Clone, Default)]
pub struct GalleryState {
    /// Newest first.
    pub items: Vec<CapturedPhoto>,
    /// Always a subset of `items` after a reload.
    pub selected: HashSet<PhotoRef>,
    /// Photo shown full-screen, if any.
    pub preview: Option<PhotoRef>,
}

struct Inner<S: MediaStore> {
    store: Arc<S>,
    album: String,
    state: watch::Sender<GalleryState>,
    /// Serializes reloads; the latest completion wins.
    reload_gate: Mutex<()>,
}

/// The gallery synchronizer. Owns the view state and the store-change
/// subscription; state is observed through [`Gallery::state`].
pub struct Gallery<S: MediaStore> {
    inner: Arc<Inner<S>>,
    state_rx: watch::Receiver<GalleryState>,
    watcher: Option<JoinHandle<()>>,
}

impl<S: MediaStore> Gallery<S> {
    /// Create a synchronizer subscribed to the store's change channel.
    /// Must be called inside a tokio runtime.
    pub fn new(store: Arc<S>, album: impl Into<String>) -> Self {
        let (state_tx, state_rx) = watch::channel(GalleryState::default());
        let inner = Arc::new(Inner {
            store: Arc::clone(&store),
            album: album.into(),
            state: state_tx,
            reload_gate: Mutex::new(()),
        });
        let changes = store.subscribe();
        let watcher = tokio::spawn(Self::watch_store(Arc::clone(&inner), changes));
        Self {
            inner,
            state_rx,
            watcher: Some(watcher),
        }
    }

    /// Observe the gallery state. Cheap to clone per consumer; safe to
    /// read from a presentation thread.
    pub fn state(&self) -> watch::Receiver<GalleryState> {
        self.state_rx.clone()
    }

    /// Re-derive the view from a fresh store query.
    pub async fn reload(&self) {
        if let Err(e) = Self::try_reload(&self.inner).await {
            warn!(error = %e, "gallery reload failed");
        }
    }

    async fn try_reload(inner: &Arc<Inner<S>>) -> Result<()> {
        let _gate = inner.reload_gate.lock().await;

        let store = Arc::clone(&inner.store);
        let album = inner.album.clone();
        let rows = task::spawn_blocking(move || store.query(&album))
            .await
            .map_err(|e| Error::Store(format!("reload task failed: {e}")))??;

        let mut items: Vec<CapturedPhoto> = rows
            .iter()
            .map(|row| CapturedPhoto {
                ref_: row.ref_,
                timestamp_ms: row.effective_timestamp_ms(),
            })
            .collect();
        // Newest first; the sort is stable, so the store's native order
        // breaks timestamp ties.
        items.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));

        let live: HashSet<PhotoRef> = items.iter().map(|p| p.ref_).collect();
        inner.state.send_modify(|state| {
            state.items = items;
            // Selections pointing at vanished photos are dropped silently.
            state.selected.retain(|r| live.contains(r));
        });
        Ok(())
    }

    /// Add or remove one photo from the selection.
    pub fn toggle_selection(&self, photo: PhotoRef) {
        self.inner.state.send_modify(|state| {
            if !state.selected.remove(&photo) {
                state.selected.insert(photo);
            }
        });
    }

    pub fn clear_selection(&self) {
        self.inner.state.send_modify(|state| state.selected.clear());
    }

    /// Set or clear the full-screen preview; independent of selection.
    pub fn set_preview(&self, photo: Option<PhotoRef>) {
        self.inner.state.send_modify(|state| state.preview = photo);
    }

    /// Delete every selected photo.
    ///
    /// The selection is cleared up front so the UI responds immediately;
    /// deletions are best-effort per photo, and a final reload reconciles
    /// the view with whatever the store now holds.
    pub async fn delete_selected(&self) {
        let mut selected = Vec::new();
        self.inner.state.send_modify(|state| {
            selected = state.selected.drain().collect();
        });
        if selected.is_empty() {
            return;
        }

        let store = Arc::clone(&self.inner.store);
        let deletes = task::spawn_blocking(move || {
            for photo in selected {
                if let Err(e) = store.delete(photo) {
                    // Per-photo failures do not abort the rest of the batch.
                    warn!(%photo, error = %e, "delete failed");
                }
            }
        })
        .await;
        if deletes.is_err() {
            warn!("delete batch task failed");
        }
        self.reload().await;
    }

    async fn watch_store(inner: Arc<Inner<S>>, mut changes: broadcast::Receiver<StoreChange>) {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    debug!(?change, "store changed, reloading gallery");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "change notifications lagged, reloading once");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
            if let Err(e) = Self::try_reload(&inner).await {
                warn!(error = %e, "gallery reload failed");
            }
        }
    }

    /// Stop observing store changes. Called automatically on drop.
    pub fn close(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl<S: MediaStore> Drop for Gallery<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::sim::sample_jpeg;
    use crate::store::LocalStore;
    use std::time::Duration;
    use tempfile::TempDir;

    const ALBUM: &str = "IntruderSelfie";

    fn open_store(dir: &TempDir) -> Arc<LocalStore> {
        Arc::new(
            LocalStore::open(dir.path().join("Pictures"), &dir.path().join("index.db")).unwrap(),
        )
    }

    fn save_one(store: &LocalStore, name: &str) -> PhotoRef {
        let pending = store.reserve(name, "image/jpeg", ALBUM).unwrap();
        store.write(&pending, &sample_jpeg(32, 24).unwrap()).unwrap();
        store.finalize(pending).unwrap()
    }

    async fn wait_for<F>(gallery_rx: &mut watch::Receiver<GalleryState>, mut pred: F)
    where
        F: FnMut(&GalleryState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if pred(&gallery_rx.borrow()) {
                    return;
                }
                gallery_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("gallery state did not converge");
    }

    #[test]
    fn equality_is_by_ref_alone() {
        let a = CapturedPhoto { ref_: PhotoRef(1), timestamp_ms: 100 };
        let b = CapturedPhoto { ref_: PhotoRef(1), timestamp_ms: 999 };
        let c = CapturedPhoto { ref_: PhotoRef(2), timestamp_ms: 100 };
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<CapturedPhoto> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn reload_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let first = save_one(&store, "IMG_a.jpg");
        std::thread::sleep(Duration::from_millis(5));
        let second = save_one(&store, "IMG_b.jpg");

        let gallery = Gallery::new(store, ALBUM);
        gallery.reload().await;

        let state = gallery.state().borrow().clone();
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.items[0].ref_, second);
        assert_eq!(state.items[1].ref_, first);
    }

    #[tokio::test]
    async fn reload_drops_selections_of_vanished_photos() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = save_one(&store, "IMG_a.jpg");
        let b = save_one(&store, "IMG_b.jpg");
        let c = save_one(&store, "IMG_c.jpg");

        let gallery = Gallery::new(Arc::clone(&store), ALBUM);
        gallery.reload().await;
        gallery.toggle_selection(a);
        gallery.toggle_selection(c);

        store.delete(a).unwrap();
        gallery.reload().await;

        let state = gallery.state().borrow().clone();
        assert_eq!(state.selected, HashSet::from([c]));
        assert_eq!(state.items.len(), 2);
        assert!(state.items.iter().any(|p| p.ref_ == b));
    }

    #[tokio::test]
    async fn toggle_and_clear_selection() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = save_one(&store, "IMG_a.jpg");

        let gallery = Gallery::new(store, ALBUM);
        gallery.reload().await;

        gallery.toggle_selection(a);
        assert!(gallery.state().borrow().selected.contains(&a));
        gallery.toggle_selection(a);
        assert!(gallery.state().borrow().selected.is_empty());

        gallery.toggle_selection(a);
        gallery.clear_selection();
        assert!(gallery.state().borrow().selected.is_empty());
    }

    #[tokio::test]
    async fn preview_is_independent_of_selection() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = save_one(&store, "IMG_a.jpg");

        let gallery = Gallery::new(store, ALBUM);
        gallery.reload().await;

        gallery.set_preview(Some(a));
        gallery.clear_selection();
        assert_eq!(gallery.state().borrow().preview, Some(a));
        gallery.set_preview(None);
        assert_eq!(gallery.state().borrow().preview, None);
    }

    #[tokio::test]
    async fn delete_selected_is_optimistic_and_reconciles() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = save_one(&store, "IMG_a.jpg");
        let b = save_one(&store, "IMG_b.jpg");

        let gallery = Gallery::new(Arc::clone(&store), ALBUM);
        gallery.reload().await;
        gallery.toggle_selection(a);
        gallery.delete_selected().await;

        let state = gallery.state().borrow().clone();
        assert!(state.selected.is_empty());
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].ref_, b);
        assert!(store.delete(a).is_err());
    }

    #[tokio::test]
    async fn delete_of_missing_photo_does_not_block_the_batch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = save_one(&store, "IMG_a.jpg");
        let b = save_one(&store, "IMG_b.jpg");

        let gallery = Gallery::new(Arc::clone(&store), ALBUM);
        gallery.reload().await;
        gallery.toggle_selection(a);
        gallery.toggle_selection(b);

        // One selected photo vanishes before the batch runs.
        store.delete(a).unwrap();
        gallery.delete_selected().await;

        let state = gallery.state().borrow().clone();
        assert!(state.items.is_empty());
        assert!(state.selected.is_empty());
    }

    #[tokio::test]
    async fn store_changes_trigger_reload() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let gallery = Gallery::new(Arc::clone(&store), ALBUM);
        let mut rx = gallery.state();

        let photo = save_one(&store, "IMG_a.jpg");
        wait_for(&mut rx, |state| {
            state.items.first().map(|p| p.ref_) == Some(photo)
        })
        .await;
    }
}
