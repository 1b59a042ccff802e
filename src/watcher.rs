use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use anyhow::Result;
use crate::baseline;
use crate::classifier::Classifier;
use crate::config::HashWatchConfig;
use crate::error::WatchError;
use crate::events::ChangeEvent;
use crate::hasher::Hasher;
use crate::sink::EventSink;
use crate::source::{self, Forwarder, ResyncReason, SourceMessage};
use crate::store::ChangeStore;

/// A running watch over one directory tree.
///
/// Owns the OS subscription, the source thread that normalizes
/// notifications, and the classifier thread that owns the change store and
/// the sink. Dropping the session shuts it down.
pub struct WatchSession {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    control: Option<SyncSender<SourceMessage>>,
    stop: Arc<AtomicBool>,
    source: Option<JoinHandle<()>>,
    classifier: Option<JoinHandle<ChangeStore>>,
}

impl WatchSession {
    /// Resolve `root`, subscribe to it, take the baseline and start
    /// delivering change events to `sink`.
    ///
    /// Subscribing before the baseline walk means changes made during the
    /// walk are queued rather than missed; nothing is classified until the
    /// baseline exists.
    pub fn start<P, S>(root: P, config: &HashWatchConfig, sink: S) -> Result<Self, WatchError>
    where
        P: AsRef<Path>,
        S: EventSink + 'static,
    {
        let root = baseline::resolve_root(root)?;
        let hasher = Hasher::new(&config.hasher);

        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(notify_tx)?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let store = baseline::scan(&root, &hasher);
        tracing::info!("Watching {} ({} files)", root.display(), store.len());

        let (queue_tx, queue_rx) = mpsc::sync_channel(config.watcher.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));

        let source = {
            let forwarder = Forwarder::new(queue_tx.clone());
            let watcher_config = config.watcher.clone();
            let stop = stop.clone();
            thread::spawn(move || source::run_source(notify_rx, forwarder, watcher_config, stop))
        };

        let classifier = {
            let classifier = Classifier::new(root.clone(), store, hasher);
            let stop = stop.clone();
            thread::spawn(move || run_classifier(classifier, queue_rx, sink, stop))
        };

        Ok(Self {
            root,
            watcher: Some(watcher),
            control: Some(queue_tx),
            stop,
            source: Some(source),
            classifier: Some(classifier),
        })
    }

    /// The canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ask the classifier to rescan the tree and report what differs.
    pub fn request_resync(&self) {
        if let Some(control) = &self.control {
            match control.try_send(SourceMessage::Resync(ResyncReason::Requested)) {
                // A full queue already forces a resync from the source side.
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!("Resync requested after the classifier stopped");
                }
            }
        }
    }

    /// Stop watching and return the final state of the change store.
    ///
    /// Events still queued are discarded; the store is never left half
    /// updated since each event is applied as a whole.
    pub fn shutdown(mut self) -> Result<ChangeStore, WatchError> {
        self.halt();

        if let Some(source) = self.source.take() {
            source.join().map_err(|_| WatchError::WorkerPanicked("event source"))?;
        }

        let store = match self.classifier.take() {
            Some(classifier) => classifier
                .join()
                .map_err(|_| WatchError::WorkerPanicked("classifier"))?,
            None => ChangeStore::new(),
        };

        tracing::info!("Stopped watching {}", self.root.display());
        Ok(store)
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the watcher releases the OS handle and disconnects the
        // source thread; dropping the control sender lets the classifier see
        // the queue close once the source is gone.
        self.watcher.take();
        self.control.take();
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.halt();
        if let Some(source) = self.source.take() {
            let _ = source.join();
        }
        if let Some(classifier) = self.classifier.take() {
            let _ = classifier.join();
        }
    }
}

fn run_classifier<S: EventSink>(
    mut classifier: Classifier,
    queue: Receiver<SourceMessage>,
    mut sink: S,
    stop: Arc<AtomicBool>,
) -> ChangeStore {
    'messages: while let Ok(message) = queue.recv() {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let events = match message {
            SourceMessage::Event(raw) => classifier.apply(&raw),
            SourceMessage::Resync(reason) => {
                // Everything already queued predates the rescan, which will
                // observe its effect.
                let skipped = queue.try_iter().count();
                tracing::info!("Resynchronizing ({:?}, {} queued events skipped)", reason, skipped);
                classifier.resync()
            }
        };

        for event in events {
            if sink.push(event).is_err() {
                tracing::debug!("Event sink closed, stopping classifier");
                break 'messages;
            }
        }
    }

    classifier.into_store()
}

/// A [`WatchSession`] whose events are read from a channel.
pub struct FileWatcher {
    session: WatchSession,
    event_rx: Receiver<ChangeEvent>,
}

impl FileWatcher {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_config(path, &HashWatchConfig::default())
    }

    pub fn with_config<P: AsRef<Path>>(path: P, config: &HashWatchConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<ChangeEvent>();
        let session = WatchSession::start(path, config, event_tx)?;
        Ok(Self { session, event_rx })
    }

    pub fn root(&self) -> &Path {
        self.session.root()
    }

    pub fn try_recv(&self) -> Result<ChangeEvent, mpsc::TryRecvError> {
        self.event_rx.try_recv()
    }

    pub fn recv(&self) -> Result<ChangeEvent, mpsc::RecvError> {
        self.event_rx.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeEvent, mpsc::RecvTimeoutError> {
        self.event_rx.recv_timeout(timeout)
    }

    pub fn request_resync(&self) {
        self.session.request_resync();
    }

    pub fn shutdown(self) -> Result<ChangeStore> {
        Ok(self.session.shutdown()?)
    }
}
