//! Vision worker plumbing
//!
//! The person counter itself (camera, detector, smoothing) lives outside this
//! crate. Here it only runs on its own thread and publishes into a
//! single-slot `watch` channel, so the tick loop reads the newest value and
//! never waits on inference.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::VisionError;

/// Lines a detector may print in a row that are not counts (model banners,
/// warnings) before the stream is treated as broken
pub const MAX_CONSECUTIVE_BAD_LINES: u32 = 100;

/// One counter output: the debounced person count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisionFrame {
    pub count: u32,
}

impl VisionFrame {
    pub fn count(count: u32) -> Self {
        Self { count }
    }
}

/// Blocking source of person counts
pub trait PersonCounter: Send + 'static {
    fn next_frame(&mut self) -> Result<VisionFrame, VisionError>;
}

/// Latest worker output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisionReading {
    /// Frames published so far
    pub seq: u64,
    pub frame: Option<VisionFrame>,
    /// Set once the counter failed; the worker has stopped
    pub fault: Option<String>,
}

impl VisionReading {
    pub fn count(&self) -> Option<u32> {
        if self.fault.is_some() {
            return None;
        }
        self.frame.as_ref().map(|f| f.count)
    }
}

/// Reader side of the single-slot cell
#[derive(Debug, Clone)]
pub struct VisionFeed {
    rx: watch::Receiver<VisionReading>,
}

impl VisionFeed {
    /// A feed with no worker behind it: vision permanently absent
    pub fn absent() -> Self {
        let (_tx, rx) = watch::channel(VisionReading::default());
        Self { rx }
    }

    /// Newest count, `None` while absent, faulted or the worker is gone
    pub fn latest_count(&self) -> Option<u32> {
        if self.rx.has_changed().is_err() {
            return None;
        }
        self.rx.borrow().count()
    }

    pub fn latest(&self) -> VisionReading {
        self.rx.borrow().clone()
    }
}

/// Handle to the counter thread
#[derive(Debug)]
pub struct VisionWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VisionWorker {
    pub fn spawn<C: PersonCounter>(counter: C) -> Result<(VisionWorker, VisionFeed), VisionError> {
        let (tx, rx) = watch::channel(VisionReading::default());
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("vision".to_string())
            .spawn(move || run_counter(counter, tx, flag))
            .map_err(VisionError::Spawn)?;

        info!("vision worker started");
        Ok((
            VisionWorker {
                stop,
                handle: Some(handle),
            },
            VisionFeed { rx },
        ))
    }

    /// Signal stop and join within `timeout`. Returns false if the worker was
    /// still busy (e.g. blocked in its counter) and had to be detached.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        if !handle.is_finished() {
            warn!(timeout_ms = timeout.as_millis() as u64, "vision worker did not stop, detaching");
            return false;
        }
        if handle.join().is_err() {
            warn!("vision worker panicked");
        }
        info!("vision worker stopped");
        true
    }
}

impl Drop for VisionWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn run_counter<C: PersonCounter>(
    mut counter: C,
    tx: watch::Sender<VisionReading>,
    stop: Arc<AtomicBool>,
) {
    let mut seq = 0;
    while !stop.load(Ordering::Relaxed) {
        match counter.next_frame() {
            Ok(frame) => {
                seq += 1;
                tx.send_replace(VisionReading {
                    seq,
                    frame: Some(frame),
                    fault: None,
                });
            }
            Err(err) => {
                warn!(error = %err, "vision worker fault, vision channel absent");
                tx.send_replace(VisionReading {
                    seq,
                    frame: None,
                    fault: Some(err.to_string()),
                });
                return;
            }
        }
    }
    debug!(frames = seq, "vision worker exiting");
}

// =============================================================================
// COUNTERS
// =============================================================================

/// Runs an external detector and reads one integer count per stdout line
#[derive(Debug)]
pub struct CommandCounter {
    child: Child,
    stdout: BufReader<ChildStdout>,
    bad_lines: u32,
}

impl CommandCounter {
    /// Start `command` through the platform shell
    pub fn spawn(command: &str) -> Result<Self, VisionError> {
        let mut shell = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        let mut child = shell
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(VisionError::Spawn)?;

        let stdout = child.stdout.take().ok_or(VisionError::StreamEnded)?;
        info!(command, pid = child.id(), "person counter process started");
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            bad_lines: 0,
        })
    }
}

impl PersonCounter for CommandCounter {
    fn next_frame(&mut self) -> Result<VisionFrame, VisionError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(VisionError::StreamEnded);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.parse::<u32>() {
                Ok(count) => {
                    self.bad_lines = 0;
                    return Ok(VisionFrame::count(count));
                }
                Err(_) => {
                    self.bad_lines += 1;
                    if self.bad_lines >= MAX_CONSECUTIVE_BAD_LINES {
                        return Err(VisionError::BadCount(trimmed.to_string()));
                    }
                    warn!(line = trimmed, run = self.bad_lines, "skipping non-count line from person counter");
                }
            }
        }
    }
}

impl Drop for CommandCounter {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Replays a fixed count sequence, one value per interval, then holds the last
#[derive(Debug, Clone)]
pub struct ReplayCounter {
    counts: Vec<u32>,
    next: usize,
    interval: Duration,
}

impl ReplayCounter {
    pub fn new(counts: Vec<u32>, interval: Duration) -> Self {
        Self {
            counts,
            next: 0,
            interval,
        }
    }

    /// Parse `"0,0,2,3"`
    pub fn parse(list: &str, interval: Duration) -> Result<Self, VisionError> {
        let counts = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u32>().map_err(|_| VisionError::BadCount(s.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(counts, interval))
    }
}

impl PersonCounter for ReplayCounter {
    fn next_frame(&mut self) -> Result<VisionFrame, VisionError> {
        std::thread::sleep(self.interval);
        let count = match self.counts.get(self.next) {
            Some(&count) => {
                self.next += 1;
                count
            }
            None => *self.counts.last().ok_or(VisionError::StreamEnded)?,
        };
        Ok(VisionFrame::count(count))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingCounter;

    impl PersonCounter for FailingCounter {
        fn next_frame(&mut self) -> Result<VisionFrame, VisionError> {
            Err(VisionError::StreamEnded)
        }
    }

    struct StuckCounter {
        entered: Arc<AtomicBool>,
    }

    impl PersonCounter for StuckCounter {
        fn next_frame(&mut self) -> Result<VisionFrame, VisionError> {
            self.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_secs(5));
            Ok(VisionFrame::count(1))
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_absent_feed() {
        let feed = VisionFeed::absent();
        assert_eq!(feed.latest_count(), None);
    }

    #[test]
    fn test_worker_publishes_latest_count() {
        let counter = ReplayCounter::new(vec![1, 2, 4], Duration::from_millis(1));
        let (mut worker, feed) = VisionWorker::spawn(counter).unwrap();

        wait_for(|| feed.latest_count() == Some(4));
        assert!(feed.latest().seq >= 3);
        assert!(worker.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_fault_makes_vision_absent() {
        let (mut worker, feed) = VisionWorker::spawn(FailingCounter).unwrap();
        wait_for(|| feed.latest().fault.is_some());
        assert_eq!(feed.latest_count(), None);
        assert!(worker.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_shutdown_is_bounded() {
        let entered = Arc::new(AtomicBool::new(false));
        let counter = StuckCounter {
            entered: entered.clone(),
        };
        let (mut worker, _feed) = VisionWorker::spawn(counter).unwrap();
        wait_for(|| entered.load(Ordering::SeqCst));

        let started = Instant::now();
        assert!(!worker.shutdown(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_replay_parse() {
        let mut counter = ReplayCounter::parse("0, 2,3", Duration::ZERO).unwrap();
        let counts: Vec<u32> = (0..5).map(|_| counter.next_frame().unwrap().count).collect();
        assert_eq!(counts, vec![0, 2, 3, 3, 3]);
        assert!(ReplayCounter::parse("1,x", Duration::ZERO).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_counter_reads_counts() {
        let mut counter = CommandCounter::spawn("printf '3\\n\\n5\\nnope\\n7\\n'").unwrap();
        assert_eq!(counter.next_frame().unwrap().count, 3);
        assert_eq!(counter.next_frame().unwrap().count, 5);
        assert_eq!(counter.next_frame().unwrap().count, 7);
        assert!(matches!(counter.next_frame(), Err(VisionError::StreamEnded)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_counter_gives_up_on_garbage() {
        let mut counter = CommandCounter::spawn("yes junk | head -n 200").unwrap();
        assert!(matches!(counter.next_frame(), Err(VisionError::BadCount(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_detector_banner_does_not_kill_vision() {
        let counter = CommandCounter::spawn(
            "printf 'model loaded\\n'; while true; do echo 3; sleep 0.05; done",
        )
        .unwrap();
        let (mut worker, feed) = VisionWorker::spawn(counter).unwrap();

        wait_for(|| feed.latest_count() == Some(3));
        assert_eq!(feed.latest().fault, None);
        assert!(worker.shutdown(Duration::from_secs(1)));
    }
}
