//! Filesystem event source
//!
//! Raw `notify` events arrive on the notifier's own thread. The source thread
//! translates them into [`RawFsEvent`]s, folds bursts for the same path, and
//! feeds a bounded queue drained by the classifier. Whenever notifications
//! may have been lost (kernel queue overflow, watcher errors, or a full
//! classifier queue) it asks the classifier to resynchronize instead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use crate::config::WatcherConfig;
use crate::events::{RawEventKind, RawFsEvent};

/// Why the classifier is asked to rebuild its state from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncReason {
    /// The OS reported dropped notifications.
    Rescan,
    /// The watcher itself reported an error.
    WatchError(String),
    /// The classifier queue was full.
    Overflow,
    /// A consumer asked for it.
    Requested,
}

/// What travels from the source thread to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMessage {
    Event(RawFsEvent),
    Resync(ResyncReason),
}

/// Normalized form of one `notify` event.
#[derive(Debug, PartialEq, Eq)]
pub enum Translation {
    Events(Vec<RawFsEvent>),
    Rescan,
}

pub fn translate(event: &Event) -> Translation {
    if event.need_rescan() {
        return Translation::Rescan;
    }

    let kind = match event.kind {
        EventKind::Create(_) => RawEventKind::Created,
        EventKind::Remove(_) => RawEventKind::Removed,
        EventKind::Modify(ModifyKind::Name(mode)) => return translate_rename(mode, &event.paths),
        EventKind::Modify(_) => RawEventKind::Changed,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            return Translation::Events(Vec::new());
        }
    };

    Translation::Events(
        event
            .paths
            .iter()
            .map(|path| RawFsEvent::new(kind, path.clone()))
            .collect(),
    )
}

fn translate_rename(mode: RenameMode, paths: &[PathBuf]) -> Translation {
    let events = match (mode, paths) {
        (RenameMode::Both, [from, to, ..]) => {
            vec![RawFsEvent::removed(from.clone()), RawFsEvent::created(to.clone())]
        }
        (RenameMode::From, _) => paths.iter().cloned().map(RawFsEvent::removed).collect(),
        (RenameMode::To, _) => paths.iter().cloned().map(RawFsEvent::created).collect(),
        // Only one side is known; the filesystem tells us which.
        _ => paths
            .iter()
            .map(|path| {
                if path.symlink_metadata().is_ok() {
                    RawFsEvent::created(path.clone())
                } else {
                    RawFsEvent::removed(path.clone())
                }
            })
            .collect(),
    };
    Translation::Events(events)
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: RawEventKind,
    first_seen: Instant,
    last_seen: Instant,
}

/// Folds bursts of notifications for one path into a single event.
///
/// Created and Changed are held until the path has been quiet for the
/// debounce period (or `max_delay` has passed since the first one). Removed
/// is never held: it drops whatever is pending for the path and goes out
/// immediately, so per-path order is preserved.
pub struct Coalescer {
    pending: HashMap<PathBuf, Pending>,
    quiet: Duration,
    max_delay: Duration,
}

impl Coalescer {
    pub fn new(quiet: Duration, max_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            quiet,
            max_delay,
        }
    }

    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(config.debounce_duration(), config.max_debounce_duration())
    }

    /// Record `event`; returns whatever must be forwarded right away.
    pub fn push(&mut self, event: RawFsEvent, now: Instant) -> Vec<RawFsEvent> {
        match event.kind {
            RawEventKind::Removed => {
                self.pending.remove(&event.path);
                vec![event]
            }
            RawEventKind::Created | RawEventKind::Changed => {
                let entry = self.pending.entry(event.path).or_insert(Pending {
                    kind: event.kind,
                    first_seen: now,
                    last_seen: now,
                });
                entry.last_seen = now;
                if event.kind == RawEventKind::Created {
                    entry.kind = RawEventKind::Created;
                }
                Vec::new()
            }
        }
    }

    /// Events whose path has settled, oldest first.
    pub fn flush_due(&mut self, now: Instant) -> Vec<RawFsEvent> {
        let mut due: Vec<(PathBuf, Pending)> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                now.duration_since(p.last_seen) >= self.quiet
                    || now.duration_since(p.first_seen) >= self.max_delay
            })
            .map(|(path, p)| (path.clone(), *p))
            .collect();

        for (path, _) in &due {
            self.pending.remove(path);
        }

        due.sort_by_key(|(_, p)| p.first_seen);
        due.into_iter()
            .map(|(path, p)| RawFsEvent::new(p.kind, path))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Outcome of handing events to the classifier queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Ok,
    /// The queue was full; a resync is now owed.
    Overflowed,
    /// The classifier is gone.
    Disconnected,
}

/// Feeds the bounded classifier queue, degrading to a resync request when
/// it fills up.
pub struct Forwarder {
    queue: SyncSender<SourceMessage>,
    owed: Option<ResyncReason>,
}

impl Forwarder {
    pub fn new(queue: SyncSender<SourceMessage>) -> Self {
        Self { queue, owed: None }
    }

    pub fn resync_owed(&self) -> bool {
        self.owed.is_some()
    }

    /// Note that a resync is needed; it is sent by the next [`Forwarder::forward`].
    pub fn owe_resync(&mut self, reason: ResyncReason) {
        if self.owed.is_none() {
            self.owed = Some(reason);
        }
    }

    /// Send `events`, or the owed resync in their place.
    ///
    /// While a resync is owed the events are dropped: the rescan will see
    /// their effect on disk.
    pub fn forward(&mut self, events: Vec<RawFsEvent>) -> Forwarded {
        if let Some(reason) = self.owed.clone() {
            return match self.queue.try_send(SourceMessage::Resync(reason)) {
                Ok(()) => {
                    self.owed = None;
                    Forwarded::Ok
                }
                Err(TrySendError::Full(_)) => Forwarded::Overflowed,
                Err(TrySendError::Disconnected(_)) => Forwarded::Disconnected,
            };
        }

        for event in events {
            match self.queue.try_send(SourceMessage::Event(event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Classifier queue full, scheduling resync");
                    self.owed = Some(ResyncReason::Overflow);
                    return Forwarded::Overflowed;
                }
                Err(TrySendError::Disconnected(_)) => return Forwarded::Disconnected,
            }
        }

        Forwarded::Ok
    }
}

/// Body of the source thread. Returns when `stop` is set, the notifier
/// goes away, or the classifier stops listening.
pub fn run_source(
    notify_rx: Receiver<notify::Result<Event>>,
    mut forwarder: Forwarder,
    config: WatcherConfig,
    stop: Arc<AtomicBool>,
) {
    let mut coalescer = Coalescer::from_config(&config);
    let tick = config.tick_duration();

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let mut ready = Vec::new();
        match notify_rx.recv_timeout(tick) {
            Ok(Ok(event)) => {
                tracing::trace!("notify event: {:?}", event);
                match translate(&event) {
                    Translation::Rescan => {
                        tracing::warn!("Filesystem notifications were dropped, scheduling resync");
                        coalescer.clear();
                        forwarder.owe_resync(ResyncReason::Rescan);
                    }
                    Translation::Events(events) => {
                        let now = Instant::now();
                        for event in events {
                            ready.extend(coalescer.push(event, now));
                        }
                    }
                }
            }
            Ok(Err(err)) => {
                tracing::warn!("File watcher error: {}", err);
                coalescer.clear();
                forwarder.owe_resync(ResyncReason::WatchError(err.to_string()));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if forwarder.resync_owed() {
            coalescer.clear();
            ready.clear();
        } else {
            ready.extend(coalescer.flush_due(Instant::now()));
            if ready.is_empty() {
                continue;
            }
        }

        match forwarder.forward(ready) {
            Forwarded::Ok => {}
            Forwarded::Overflowed => coalescer.clear(),
            Forwarded::Disconnected => break,
        }
    }

    tracing::debug!("Event source stopped ({} pending events discarded)", coalescer.pending_count());
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::path::Path;
    use std::sync::mpsc;

    const QUIET: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(1000);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_translate_basic_kinds() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/r/a".into());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/r/a".into());
        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path("/r/a".into());
        let touch = Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))).add_path("/r/a".into());
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path("/r/a".into());

        assert_eq!(translate(&create), Translation::Events(vec![RawFsEvent::created("/r/a")]));
        assert_eq!(translate(&remove), Translation::Events(vec![RawFsEvent::removed("/r/a")]));
        assert_eq!(translate(&write), Translation::Events(vec![RawFsEvent::changed("/r/a")]));
        assert_eq!(translate(&touch), Translation::Events(vec![RawFsEvent::changed("/r/a")]));
        assert_eq!(translate(&access), Translation::Events(vec![]));
    }

    #[test]
    fn test_translate_renames() {
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/r/old".into())
            .add_path("/r/new".into());
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From))).add_path("/r/old".into());
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path("/r/new".into());
        let any = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path("/definitely/not/here".into());

        assert_eq!(
            translate(&both),
            Translation::Events(vec![RawFsEvent::removed("/r/old"), RawFsEvent::created("/r/new")])
        );
        assert_eq!(translate(&from), Translation::Events(vec![RawFsEvent::removed("/r/old")]));
        assert_eq!(translate(&to), Translation::Events(vec![RawFsEvent::created("/r/new")]));
        assert_eq!(
            translate(&any),
            Translation::Events(vec![RawFsEvent::removed("/definitely/not/here")])
        );
    }

    #[test]
    fn test_translate_rescan_flag() {
        let event = Event::new(EventKind::Other).set_flag(notify::event::Flag::Rescan);
        assert_eq!(translate(&event), Translation::Rescan);
    }

    #[test]
    fn test_burst_of_changes_coalesces() {
        let mut coalescer = Coalescer::new(QUIET, MAX);
        let start = Instant::now();

        for i in 0..5 {
            assert!(coalescer.push(RawFsEvent::changed("/r/a"), start + ms(i * 10)).is_empty());
        }

        assert!(coalescer.flush_due(start + ms(100)).is_empty());
        assert_eq!(coalescer.flush_due(start + ms(140)), vec![RawFsEvent::changed("/r/a")]);
        assert_eq!(coalescer.pending_count(), 0);
    }

    #[test]
    fn test_continuous_writer_flushes_at_max_delay() {
        let mut coalescer = Coalescer::new(QUIET, MAX);
        let start = Instant::now();
        let mut flushed = Vec::new();

        for i in 0..=110 {
            let now = start + ms(i * 10);
            coalescer.push(RawFsEvent::changed("/r/log"), now);
            flushed.extend(coalescer.flush_due(now));
        }

        assert_eq!(flushed, vec![RawFsEvent::changed("/r/log")]);
    }

    #[test]
    fn test_created_absorbs_following_changes() {
        let mut coalescer = Coalescer::new(QUIET, MAX);
        let start = Instant::now();

        coalescer.push(RawFsEvent::created("/r/a"), start);
        coalescer.push(RawFsEvent::changed("/r/a"), start + ms(5));
        coalescer.push(RawFsEvent::changed("/r/b"), start + ms(5));
        coalescer.push(RawFsEvent::created("/r/b"), start + ms(6));

        assert_eq!(
            coalescer.flush_due(start + ms(200)),
            vec![RawFsEvent::created("/r/a"), RawFsEvent::created("/r/b")]
        );
    }

    #[test]
    fn test_remove_passes_through_and_drops_pending() {
        let mut coalescer = Coalescer::new(QUIET, MAX);
        let start = Instant::now();

        coalescer.push(RawFsEvent::changed("/r/a"), start);
        let immediate = coalescer.push(RawFsEvent::removed("/r/a"), start + ms(1));

        assert_eq!(immediate, vec![RawFsEvent::removed("/r/a")]);
        assert!(coalescer.flush_due(start + ms(500)).is_empty());

        // A recreation after the removal is still delivered after it.
        coalescer.push(RawFsEvent::created("/r/a"), start + ms(2));
        assert_eq!(coalescer.flush_due(start + ms(500)), vec![RawFsEvent::created("/r/a")]);
    }

    #[test]
    fn test_full_queue_turns_into_resync() {
        let (tx, rx) = mpsc::sync_channel(2);
        let mut forwarder = Forwarder::new(tx);

        let events: Vec<_> = ["/r/a", "/r/b", "/r/c"].iter().map(|p| RawFsEvent::changed(*p)).collect();
        assert_eq!(forwarder.forward(events), Forwarded::Overflowed);
        assert!(forwarder.resync_owed());

        // Still full: the resync stays owed and new events are dropped.
        assert_eq!(forwarder.forward(vec![RawFsEvent::changed("/r/d")]), Forwarded::Overflowed);

        assert_eq!(rx.recv().unwrap(), SourceMessage::Event(RawFsEvent::changed("/r/a")));
        assert_eq!(forwarder.forward(vec![RawFsEvent::changed("/r/e")]), Forwarded::Ok);
        assert!(!forwarder.resync_owed());

        assert_eq!(rx.recv().unwrap(), SourceMessage::Event(RawFsEvent::changed("/r/b")));
        assert_eq!(rx.recv().unwrap(), SourceMessage::Resync(ResyncReason::Overflow));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_reports_disconnect() {
        let (tx, rx) = mpsc::sync_channel(4);
        drop(rx);
        let mut forwarder = Forwarder::new(tx);
        assert_eq!(forwarder.forward(vec![RawFsEvent::removed("/r/a")]), Forwarded::Disconnected);
    }

    #[test]
    fn test_source_thread_forwards_and_resyncs() {
        let (notify_tx, notify_rx) = mpsc::channel();
        let (queue_tx, queue_rx) = mpsc::sync_channel(16);
        let stop = Arc::new(AtomicBool::new(false));
        let config = WatcherConfig {
            debounce_ms: 20,
            max_debounce_ms: 200,
            tick_ms: 5,
            queue_capacity: 16,
        };

        let handle = {
            let stop = stop.clone();
            std::thread::spawn(move || run_source(notify_rx, Forwarder::new(queue_tx), config, stop))
        };

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)));
        for _ in 0..3 {
            notify_tx.send(Ok(write.clone().add_path("/r/a".into()))).unwrap();
        }
        let first = queue_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, SourceMessage::Event(RawFsEvent::changed(Path::new("/r/a"))));

        notify_tx
            .send(Ok(Event::new(EventKind::Other).set_flag(notify::event::Flag::Rescan)))
            .unwrap();
        let second = queue_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second, SourceMessage::Resync(ResyncReason::Rescan));

        stop.store(true, Ordering::SeqCst);
        drop(notify_tx);
        handle.join().unwrap();
        assert!(queue_rx.recv().is_err());
    }

    #[test]
    fn test_watcher_error_drops_pending_and_resyncs() {
        let (notify_tx, notify_rx) = mpsc::channel();
        let (queue_tx, queue_rx) = mpsc::sync_channel(16);
        let stop = Arc::new(AtomicBool::new(false));
        let config = WatcherConfig {
            debounce_ms: 500,
            max_debounce_ms: 5000,
            tick_ms: 5,
            queue_capacity: 16,
        };

        let handle = {
            let stop = stop.clone();
            std::thread::spawn(move || run_source(notify_rx, Forwarder::new(queue_tx), config, stop))
        };

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)));
        notify_tx.send(Ok(write.add_path("/r/a".into()))).unwrap();
        notify_tx.send(Err(notify::Error::generic("x"))).unwrap();

        let message = queue_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(message, SourceMessage::Resync(ResyncReason::WatchError(_))));

        // The held write was discarded, so nothing follows once its debounce expires.
        assert!(queue_rx.recv_timeout(Duration::from_millis(1000)).is_err());

        stop.store(true, Ordering::SeqCst);
        drop(notify_tx);
        handle.join().unwrap();
    }
}
