use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receiver of the reactor's scheduled work. Implemented by the collection.
pub trait ReactorHandler: Send + Sync {
    /// The watched file changed and the debounce window has settled.
    fn on_file_changed(&self);
    /// The periodic flush tick fired.
    fn on_tick(&self);
}

/// When the reactor should wake up.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// Watch the target file, settling bursts of events for this long.
    pub watch_debounce: Option<Duration>,
    /// Fire `on_tick` this often.
    pub tick: Option<Duration>,
}

enum ReactorEvent {
    Fs(notify::Result<Event>),
    Shutdown,
}

/// One background thread per collection. Filesystem events and the flush
/// tick are handled on it in order, so the handler never sees two of them
/// at once.
pub struct Reactor {
    _watcher: Option<RecommendedWatcher>,
    tx: mpsc::Sender<ReactorEvent>,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Start the reactor for `target`. The handler is held weakly: once the
    /// collection is gone the thread exits on its next wake-up.
    pub fn start(
        target: &Path,
        handler: Weak<dyn ReactorHandler>,
        schedule: Schedule,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel::<ReactorEvent>();

        let watcher = match schedule.watch_debounce {
            Some(_) => {
                let notify_tx = tx.clone();
                let mut watcher = RecommendedWatcher::new(
                    move |res| {
                        let _ = notify_tx.send(ReactorEvent::Fs(res));
                    },
                    Config::default(),
                )?;
                // Watch the directory so editors that replace the file are still seen
                let dir = match target.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent,
                    _ => Path::new("."),
                };
                watcher.watch(dir, RecursiveMode::NonRecursive)?;
                Some(watcher)
            }
            None => None,
        };

        let file_name = target.file_name().map(OsString::from).unwrap_or_default();
        let thread = thread::Builder::new()
            .name(format!("jsondb-{}", file_name.to_string_lossy()))
            .spawn(move || run(rx, handler, file_name, schedule))
            .map_err(notify::Error::io)?;

        Ok(Reactor {
            _watcher: watcher,
            tx,
            thread: Some(thread),
        })
    }

    /// Stop watching and wait for the thread to finish its current event.
    pub fn stop(mut self) {
        let _ = self.tx.send(ReactorEvent::Shutdown);
        self._watcher = None;
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // May run on the reactor thread itself, so never join here
        let _ = self.tx.send(ReactorEvent::Shutdown);
    }
}

fn run(
    rx: mpsc::Receiver<ReactorEvent>,
    handler: Weak<dyn ReactorHandler>,
    file_name: OsString,
    schedule: Schedule,
) {
    let mut next_tick = schedule.tick.map(|t| Instant::now() + t);
    let mut settle_at: Option<Instant> = None;

    loop {
        let deadline = [next_tick, settle_at].into_iter().flatten().min();
        let received = match deadline {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(ReactorEvent::Fs(Ok(event))) => {
                if touches(&event, &file_name) {
                    if matches!(event.kind, EventKind::Remove(_)) {
                        log::warn!("Collection file {} was removed", file_name.to_string_lossy());
                    }
                    let debounce = schedule.watch_debounce.unwrap_or_default();
                    settle_at = Some(Instant::now() + debounce);
                }
            }
            Ok(ReactorEvent::Fs(Err(e))) => {
                log::warn!("File watcher error: {e}");
            }
            Ok(ReactorEvent::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();

        if settle_at.is_some_and(|at| at <= now) {
            settle_at = None;
            match handler.upgrade() {
                Some(h) => h.on_file_changed(),
                None => break,
            }
        }

        if let (Some(at), Some(interval)) = (next_tick, schedule.tick) {
            if at <= now {
                next_tick = Some(now + interval);
                match handler.upgrade() {
                    Some(h) => h.on_tick(),
                    None => break,
                }
            }
        }
    }
}

/// Events without a path are ignored, as are reads.
fn touches(event: &Event, file_name: &OsString) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name().is_some_and(|name| name == file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        changes: AtomicUsize,
        ticks: AtomicUsize,
    }

    impl ReactorHandler for Counter {
        fn on_file_changed(&self) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_touches_filters_by_file_name() {
        let name = OsString::from("users.json");
        let modify = || EventKind::Modify(ModifyKind::Any);
        assert!(touches(&event(modify(), &["/db/users.json"]), &name));
        assert!(!touches(&event(modify(), &["/db/posts.json"]), &name));
        assert!(!touches(&event(modify(), &[]), &name));
        assert!(!touches(
            &event(EventKind::Access(AccessKind::Any), &["/db/users.json"]),
            &name
        ));
        assert!(touches(
            &event(EventKind::Create(CreateKind::File), &["/db/posts.json", "/db/users.json"]),
            &name
        ));
    }

    #[test]
    fn test_ticks_fire_and_stop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let counter = Arc::new(Counter::default());
        let handler: Arc<dyn ReactorHandler> = counter.clone();
        let reactor = Reactor::start(
            &tmp.path().join("c.json"),
            Arc::downgrade(&handler),
            Schedule {
                watch_debounce: None,
                tick: Some(Duration::from_millis(20)),
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        reactor.stop();
        let ticks = counter.ticks.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, got {ticks}");

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(counter.ticks.load(Ordering::SeqCst), ticks);
    }

    #[test]
    fn test_burst_of_writes_settles_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let target = tmp.path().join("c.json");
        std::fs::write(&target, "{}").unwrap();

        let counter = Arc::new(Counter::default());
        let handler: Arc<dyn ReactorHandler> = counter.clone();
        let reactor = Reactor::start(
            &target,
            Arc::downgrade(&handler),
            Schedule {
                watch_debounce: Some(Duration::from_millis(100)),
                tick: None,
            },
        )
        .unwrap();

        for i in 0..5 {
            std::fs::write(&target, format!("{{\"n\": {i}}}")).unwrap();
        }
        std::fs::write(tmp.path().join("other.json"), "{}").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.changes.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(300));
        reactor.stop();

        assert_eq!(counter.changes.load(Ordering::SeqCst), 1);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exits_when_handler_dropped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let counter = Arc::new(Counter::default());
        let handler: Arc<dyn ReactorHandler> = counter;
        let weak = Arc::downgrade(&handler);
        let reactor = Reactor::start(
            &tmp.path().join("c.json"),
            weak,
            Schedule {
                watch_debounce: None,
                tick: Some(Duration::from_millis(10)),
            },
        )
        .unwrap();
        drop(handler);
        std::thread::sleep(Duration::from_millis(50));
        // thread has already exited; stop must not hang
        reactor.stop();
    }
}
