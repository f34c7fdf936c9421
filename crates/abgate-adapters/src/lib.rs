//! Change notification adapters for abgate.
//!
//! Consumers subscribe to a resource key and get a callback per change. Delivery
//! is at-least-once with no ordering across keys. Keeping the underlying source
//! alive (re-arming watches, reconnecting) is the notifier's job, not the caller's.

use anyhow::Context;
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub resource_key: String,
    pub kind: ChangeKind,
}

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

pub trait ChangeNotifier: Send + Sync {
    /// Register `callback` for changes to `resource_key` until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    fn subscribe(
        &self,
        resource_key: &str,
        callback: ChangeCallback,
    ) -> anyhow::Result<Subscription>;
}

/// Handle for a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ----------------------------
// In-process broadcaster
// ----------------------------

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<String, Vec<(u64, ChangeCallback)>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // A panicking callback runs outside the lock, so poisoning only means a
    // panic mid-bookkeeping; the map is still usable.
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Broadcaster for changes produced inside this process (e.g. config saves).
#[derive(Clone, Default)]
pub struct InProcessNotifier {
    registry: Arc<Mutex<Registry>>,
}

impl InProcessNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscriber of `resource_key`.
    ///
    /// Returns how many callbacks ran. Callbacks run on the caller's thread,
    /// outside the registry lock, so they may subscribe or unsubscribe.
    pub fn publish(&self, resource_key: &str, kind: ChangeKind) -> usize {
        let callbacks: Vec<ChangeCallback> = lock(&self.registry)
            .subscribers
            .get(resource_key)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        let event = ChangeEvent {
            resource_key: resource_key.to_string(),
            kind,
        };
        for cb in &callbacks {
            cb(&event);
        }
        callbacks.len()
    }

    pub fn subscriber_count(&self, resource_key: &str) -> usize {
        lock(&self.registry)
            .subscribers
            .get(resource_key)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for InProcessNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("InProcessNotifier")
            .field("keys", &registry.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ChangeNotifier for InProcessNotifier {
    fn subscribe(
        &self,
        resource_key: &str,
        callback: ChangeCallback,
    ) -> anyhow::Result<Subscription> {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .subscribers
                .entry(resource_key.to_string())
                .or_default()
                .push((id, callback));
            id
        };

        let weak: Weak<Mutex<Registry>> = Arc::downgrade(&self.registry);
        let key = resource_key.to_string();
        Ok(Subscription::new(move || {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            let mut registry = lock(&registry);
            if let Some(subs) = registry.subscribers.get_mut(&key) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    registry.subscribers.remove(&key);
                }
            }
        }))
    }
}

// ----------------------------
// Filesystem watcher
// ----------------------------

/// Notifier whose resource keys are file paths.
///
/// The parent directory is watched rather than the file itself, so editors and
/// exporters that replace the file by rename keep producing events.
#[derive(Debug, Default, Clone)]
pub struct FileChangeNotifier;

impl ChangeNotifier for FileChangeNotifier {
    fn subscribe(
        &self,
        resource_key: &str,
        callback: ChangeCallback,
    ) -> anyhow::Result<Subscription> {
        let path = PathBuf::from(resource_key);
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("not a file path: {resource_key}"))?;
        let dir = watch_dir(&path).to_path_buf();

        let key = resource_key.to_string();
        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if !event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        return;
                    }
                    let kind = match event.kind {
                        EventKind::Access(_) => return,
                        EventKind::Create(_) => ChangeKind::Created,
                        EventKind::Modify(_) => ChangeKind::Modified,
                        EventKind::Remove(_) => ChangeKind::Removed,
                        _ => ChangeKind::Other,
                    };
                    callback(&ChangeEvent {
                        resource_key: key.clone(),
                        kind,
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, resource = %key, "file watcher error");
                }
            },
        )
        .context("create file watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", dir.display()))?;

        tracing::debug!(resource = %resource_key, dir = %dir.display(), "watching for changes");

        Ok(Subscription::new(move || drop(watcher)))
    }
}

fn watch_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, ChangeCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let cb: ChangeCallback = Arc::new(move |_event: &ChangeEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[test]
    fn publish_reaches_every_subscriber_of_key() {
        let notifier = InProcessNotifier::new();
        let (a_hits, a) = counter();
        let (b_hits, b) = counter();
        let _sa = notifier.subscribe("experiments", a).unwrap();
        let _sb = notifier.subscribe("experiments", b).unwrap();

        assert_eq!(notifier.publish("experiments", ChangeKind::Modified), 2);
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keys_are_isolated() {
        let notifier = InProcessNotifier::new();
        let (hits, cb) = counter();
        let _s = notifier.subscribe("config", cb).unwrap();

        assert_eq!(notifier.publish("experiments", ChangeKind::Modified), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn event_carries_key_and_kind() {
        let notifier = InProcessNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = notifier
            .subscribe(
                "config",
                Arc::new(move |e: &ChangeEvent| s.lock().unwrap().push(e.clone())),
            )
            .unwrap();

        notifier.publish("config", ChangeKind::Created);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeEvent {
                resource_key: "config".into(),
                kind: ChangeKind::Created
            }]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = InProcessNotifier::new();
        let (hits, cb) = counter();
        let sub = notifier.subscribe("k", cb).unwrap();
        notifier.publish("k", ChangeKind::Modified);
        sub.unsubscribe();
        notifier.publish("k", ChangeKind::Modified);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count("k"), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let notifier = InProcessNotifier::new();
        let (hits, cb) = counter();
        {
            let _sub = notifier.subscribe("k", cb).unwrap();
            assert_eq!(notifier.subscriber_count("k"), 1);
        }
        assert_eq!(notifier.publish("k", ChangeKind::Modified), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_outliving_notifier_is_harmless() {
        let (_hits, cb) = counter();
        let sub = {
            let notifier = InProcessNotifier::new();
            notifier.subscribe("k", cb).unwrap()
        };
        sub.unsubscribe();
    }

    #[test]
    fn callback_may_unsubscribe_others_during_publish() {
        let notifier = InProcessNotifier::new();
        let (hits, cb) = counter();
        let victim = Arc::new(Mutex::new(Some(notifier.subscribe("k", cb).unwrap())));

        let v = Arc::clone(&victim);
        let _killer = notifier
            .subscribe(
                "k",
                Arc::new(move |_e: &ChangeEvent| {
                    v.lock().unwrap().take();
                }),
            )
            .unwrap();

        assert_eq!(notifier.publish("k", ChangeKind::Modified), 2);
        assert_eq!(notifier.subscriber_count("k"), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_notifier_watches_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let (_hits, cb) = counter();

        let sub = FileChangeNotifier
            .subscribe(path.to_str().unwrap(), cb)
            .expect("watch temp dir");
        sub.unsubscribe();
    }

    #[test]
    fn file_notifier_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("experiment.json");
        let (_hits, cb) = counter();

        let err = FileChangeNotifier
            .subscribe(path.to_str().unwrap(), cb)
            .unwrap_err();
        assert!(format!("{err:#}").contains("watch"), "{err:#}");
    }

    fn channel_callback() -> (mpsc::Receiver<ChangeEvent>, ChangeCallback) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let cb: ChangeCallback = Arc::new(move |e: &ChangeEvent| {
            let _ = tx.lock().unwrap().send(e.clone());
        });
        (rx, cb)
    }

    fn drain(rx: &mpsc::Receiver<ChangeEvent>) {
        while rx.recv_timeout(Duration::from_millis(200)).is_ok() {}
    }

    #[test]
    fn file_notifier_reports_writes_to_watched_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        std::fs::write(&path, "{}").unwrap();
        let key = path.to_str().unwrap().to_string();
        let (rx, cb) = channel_callback();
        let _sub = FileChangeNotifier.subscribe(&key, cb).unwrap();
        drain(&rx);

        std::fs::write(&path, r#"{"id":"x"}"#).unwrap();
        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("write event");
        assert_eq!(event.resource_key, key);
    }

    #[test]
    fn file_notifier_reports_rename_onto_watched_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        std::fs::write(&path, "{}").unwrap();
        let (rx, cb) = channel_callback();
        let _sub = FileChangeNotifier
            .subscribe(path.to_str().unwrap(), cb)
            .unwrap();

        let staged = dir.path().join(".experiment.json.tmp");
        std::fs::write(&staged, r#"{"id":"y"}"#).unwrap();
        drain(&rx);

        std::fs::rename(&staged, &path).unwrap();
        rx.recv_timeout(Duration::from_secs(5))
            .expect("rename event");
    }

    #[test]
    fn file_notifier_ignores_sibling_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let (rx, cb) = channel_callback();
        let _sub = FileChangeNotifier
            .subscribe(path.to_str().unwrap(), cb)
            .unwrap();

        std::fs::write(dir.path().join("other.json"), "{}").unwrap();
        assert!(
            rx.recv_timeout(Duration::from_millis(500)).is_err(),
            "sibling write leaked through"
        );

        std::fs::write(&path, "{}").unwrap();
        rx.recv_timeout(Duration::from_secs(5))
            .expect("event for the watched file");
    }

    #[test]
    fn file_notifier_stops_after_unsubscribe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let (rx, cb) = channel_callback();
        let sub = FileChangeNotifier
            .subscribe(path.to_str().unwrap(), cb)
            .unwrap();
        sub.unsubscribe();

        std::fs::write(&path, "{}").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn watch_dir_defaults_to_current_directory() {
        assert_eq!(watch_dir(Path::new("experiment.json")), Path::new("."));
        assert_eq!(watch_dir(Path::new("data/exp.json")), Path::new("data"));
    }
}
