//! Background port reader
//!
//! A [`PortReader`] owns one connection and at most one reader thread. The
//! thread frames and parses incoming bytes, hands each [`Line`] to the
//! registered callbacks, then pushes a copy onto a bounded queue for
//! [`PortReader::read_line`]. When the queue is full the oldest line is
//! evicted: the producer never blocks and consumers always see fresh data.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::Serialize;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::channel::SerialConnector;
use super::{
    ByteSource, Connector, Line, LineFramer, LineParser, StreamError, DEFAULT_DELIMITER,
    DEFAULT_QUEUE_SIZE, JOIN_TIMEOUT_MS, READ_POLL_INTERVAL_MS,
};

/// Delay before re-checking when the connection has been closed underneath the loop
const NO_CONNECTION_BACKOFF_MS: u64 = 100;

/// Size of the per-read scratch buffer
const READ_CHUNK_SIZE: usize = 4096;

type DataCallback = Arc<dyn Fn(&Line) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Best-effort text for a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Connection parameters for one port
#[derive(Debug, Clone, PartialEq)]
pub struct PortSettings {
    /// Device name, e.g. "/dev/ttyUSB0"
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Capacity of the line queue (at least 1)
    pub queue_size: usize,
    /// Column delimiter
    pub delimiter: char,
}

impl PortSettings {
    /// Settings for `port` at `baud_rate` with default queue size and delimiter
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            queue_size: DEFAULT_QUEUE_SIZE,
            delimiter: DEFAULT_DELIMITER,
        }
    }

    /// Override the queue capacity
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Override the column delimiter
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Snapshot of a reader's counters and state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortStats {
    /// Device name
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Whether a connection is open
    pub connected: bool,
    /// Whether the reader thread is running
    pub running: bool,
    /// Lines framed, including blank ones
    pub lines_received: u64,
    /// Lines that parsed into at least one column
    pub lines_parsed: u64,
    /// Time of the last parsed line
    pub last_line_time: Option<DateTime<Utc>>,
    /// Seconds since the last parsed line
    pub time_since_last_line: Option<f64>,
}

#[derive(Debug, Default)]
struct Counters {
    lines_received: u64,
    lines_parsed: u64,
    last_line_time: Option<DateTime<Utc>>,
}

/// State shared between the reader handle and its thread
struct Shared {
    settings: PortSettings,
    parser: LineParser,
    connector: Arc<dyn Connector>,
    connection: Mutex<Option<Box<dyn ByteSource>>>,
    running: AtomicBool,
    counters: Mutex<Counters>,
    data_callbacks: RwLock<Vec<DataCallback>>,
    error_callbacks: RwLock<Vec<ErrorCallback>>,
    queue_tx: Sender<Line>,
    queue_rx: Receiver<Line>,
    /// Disconnects when the current reader thread exits
    liveness: Mutex<Option<Receiver<()>>>,
}

/// Handle to a live reader thread
struct Worker {
    handle: JoinHandle<()>,
    /// Dropping this tells the loop to stop
    cancel_tx: Sender<()>,
    done_rx: Receiver<()>,
}

/// Reads one telemetry port on a background thread
pub struct PortReader {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl PortReader {
    /// Reader for a serial device with default settings
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self::with_connector(PortSettings::new(port, baud_rate), SerialConnector)
    }

    /// Reader that opens its byte source through `connector`
    pub fn with_connector(settings: PortSettings, connector: impl Connector + 'static) -> Self {
        let (queue_tx, queue_rx) = bounded(settings.queue_size.max(1));
        let parser = LineParser::new(settings.delimiter);
        Self {
            shared: Arc::new(Shared {
                settings,
                parser,
                connector: Arc::new(connector),
                connection: Mutex::new(None),
                running: AtomicBool::new(false),
                counters: Mutex::new(Counters::default()),
                data_callbacks: RwLock::new(Vec::new()),
                error_callbacks: RwLock::new(Vec::new()),
                queue_tx,
                queue_rx,
                liveness: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.shared.settings.port
    }

    /// Connection settings
    pub fn settings(&self) -> &PortSettings {
        &self.shared.settings
    }

    /// Fixed capacity of the line queue
    pub fn capacity(&self) -> usize {
        self.shared.queue_tx.capacity().unwrap_or(1)
    }

    /// Lines currently buffered for `read_line`
    pub fn queued(&self) -> usize {
        self.shared.queue_rx.len()
    }

    /// Register a callback for every parsed line.
    ///
    /// Runs on the reader thread, in registration order, before the line is
    /// queued. Keep it short. A panic inside it is caught and logged.
    pub fn add_data_callback<F>(&self, callback: F)
    where
        F: Fn(&Line) + Send + Sync + 'static,
    {
        self.shared
            .data_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Register a callback for connection failures
    pub fn add_error_callback<F>(&self, callback: F)
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.shared
            .error_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Open the byte source. No retries.
    pub fn connect(&self) -> Result<(), StreamError> {
        let settings = &self.shared.settings;
        match self.shared.connector.connect(&settings.port, settings.baud_rate) {
            Ok(source) => {
                *lock(&self.shared.connection) = Some(source);
                info!("Connected to {} at {} baud", settings.port, settings.baud_rate);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", settings.port, e);
                self.shared.notify_error(&e);
                Err(e)
            }
        }
    }

    /// Close the byte source if open
    pub fn disconnect(&self) {
        if lock(&self.shared.connection).take().is_some() {
            info!("Disconnected from {}", self.name());
        }
    }

    /// Whether a byte source is open
    pub fn is_connected(&self) -> bool {
        lock(&self.shared.connection).is_some()
    }

    /// Whether the reader thread is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Connect if needed and spawn the reader thread.
    ///
    /// Does nothing (with a warning) when already running.
    pub fn start_reading(&self) -> Result<(), StreamError> {
        let mut worker = lock(&self.worker);
        if self.is_running() {
            warn!("Reader for {} already running", self.name());
            return Ok(());
        }

        if let Some(previous) = worker.take() {
            // The loop either died on an I/O error or outlived a stop timeout.
            drop(previous.cancel_tx);
            if previous.handle.is_finished() {
                let _ = previous.handle.join();
            }
        }

        if !self.is_connected() {
            self.connect()?;
        }

        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(0);
        *lock(&self.shared.liveness) = Some(done_rx.clone());
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("reader {}", self.name()))
            .spawn(move || {
                let _done = done_tx;
                shared.read_loop(&cancel_rx);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                *lock(&self.shared.liveness) = None;
                let e = StreamError::Io(e);
                error!("Failed to spawn reader for {}: {}", self.name(), e);
                self.shared.notify_error(&e);
                return Err(e);
            }
        };

        *worker = Some(Worker {
            handle,
            cancel_tx,
            done_rx,
        });
        info!("Started reading {}", self.name());
        Ok(())
    }

    /// Stop the reader thread and close the connection.
    ///
    /// Waits up to [`JOIN_TIMEOUT_MS`] for the thread, then closes the
    /// connection regardless. Buffered lines are discarded. Idempotent.
    pub fn stop_reading(&self) {
        let worker = lock(&self.worker).take();
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);

        if let Some(worker) = worker {
            drop(worker.cancel_tx);
            if worker.handle.thread().id() == thread::current().id() {
                debug!("stop_reading called from the {} reader thread", self.name());
            } else {
                match worker
                    .done_rx
                    .recv_timeout(Duration::from_millis(JOIN_TIMEOUT_MS))
                {
                    Err(RecvTimeoutError::Timeout) => warn!(
                        "Reader for {} did not stop within {}ms, closing anyway",
                        self.name(),
                        JOIN_TIMEOUT_MS
                    ),
                    _ => {
                        if worker.handle.join().is_err() {
                            error!("Reader thread for {} panicked", self.name());
                        }
                    }
                }
            }
        }

        *lock(&self.shared.liveness) = None;
        self.disconnect();
        while self.shared.queue_rx.try_recv().is_ok() {}

        if was_running {
            info!("Stopped reading {}", self.name());
        }
    }

    /// Alias for [`stop_reading`](Self::stop_reading)
    pub fn close(&self) {
        self.stop_reading();
    }

    /// Take the next buffered line.
    ///
    /// `Some(Duration::ZERO)` polls without blocking, `Some(t)` waits up to `t`,
    /// `None` waits until a line arrives or the reader stops. Returns `None`
    /// when nothing arrived; never an error.
    pub fn read_line(&self, timeout: Option<Duration>) -> Option<Line> {
        let queue = &self.shared.queue_rx;
        if let Ok(line) = queue.try_recv() {
            return Some(line);
        }
        if timeout == Some(Duration::ZERO) {
            return None;
        }

        let liveness = lock(&self.shared.liveness).clone()?;
        match timeout {
            Some(timeout) => select! {
                recv(queue) -> line => line.ok(),
                recv(liveness) -> _ => queue.try_recv().ok(),
                default(timeout) => None,
            },
            None => select! {
                recv(queue) -> line => line.ok(),
                recv(liveness) -> _ => queue.try_recv().ok(),
            },
        }
    }

    /// Counters and state
    pub fn get_stats(&self) -> PortStats {
        let counters = lock(&self.shared.counters);
        let time_since_last_line = counters
            .last_line_time
            .map(|t| (Utc::now() - t).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6);
        PortStats {
            port: self.shared.settings.port.clone(),
            baud_rate: self.shared.settings.baud_rate,
            connected: self.is_connected(),
            running: self.is_running(),
            lines_received: counters.lines_received,
            lines_parsed: counters.lines_parsed,
            last_line_time: counters.last_line_time,
            time_since_last_line,
        }
    }
}

impl Drop for PortReader {
    fn drop(&mut self) {
        self.stop_reading();
    }
}

impl Shared {
    fn read_loop(&self, cancel_rx: &Receiver<()>) {
        let port = &self.settings.port;
        let poll = Duration::from_millis(READ_POLL_INTERVAL_MS);
        let mut framer = LineFramer::new();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        debug!("Reader thread for {} started", port);

        loop {
            if !self.running.load(Ordering::Acquire) || cancelled(cancel_rx) {
                break;
            }

            let read = {
                let mut connection = lock(&self.connection);
                connection
                    .as_mut()
                    .map(|source| read_available(source.as_mut(), &mut buf))
            };

            match read {
                None => {
                    if idle(cancel_rx, Duration::from_millis(NO_CONNECTION_BACKOFF_MS)) {
                        break;
                    }
                }
                Some(Ok(0)) => {
                    if idle(cancel_rx, poll) {
                        break;
                    }
                }
                Some(Ok(n)) => {
                    for text in framer.push(&buf[..n]) {
                        self.process_line(text);
                    }
                }
                Some(Err(e)) if is_transient(&e) => {
                    if idle(cancel_rx, poll) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Serial error on {}: {}", port, e);
                    lock(&self.connection).take();
                    self.running.store(false, Ordering::Release);
                    self.notify_error(&StreamError::ConnectionLost {
                        port: port.clone(),
                        source: e,
                    });
                    break;
                }
            }
        }

        if framer.pending() > 0 {
            trace!("Discarding {} unterminated bytes from {}", framer.pending(), port);
        }
        debug!("Reader thread for {} exited", port);
    }

    fn process_line(&self, text: String) {
        let mut counters = lock(&self.counters);
        counters.lines_received += 1;
        let sequence = counters.lines_received;

        match self.parser.parse(&text) {
            Ok(values) => {
                let now = Utc::now();
                counters.lines_parsed += 1;
                counters.last_line_time = Some(now);
                drop(counters);

                let line = Line::new(values, text, now, sequence);
                self.notify_data(&line);
                self.enqueue(line);
            }
            Err(e) => {
                drop(counters);
                trace!("Skipping line {} from {}: {}", sequence, self.settings.port, e);
            }
        }
    }

    fn enqueue(&self, line: Line) {
        match self.queue_tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(line)) => {
                // Make room by dropping the oldest line; a consumer may race us for it.
                let _ = self.queue_rx.try_recv();
                if let Err(TrySendError::Full(line)) = self.queue_tx.try_send(line) {
                    trace!(
                        "Queue for {} still full, dropping line {}",
                        self.settings.port,
                        line.sequence()
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn notify_data(&self, line: &Line) {
        let callbacks = read_lock(&self.data_callbacks).clone();
        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(line))) {
                error!(
                    "Error in data callback for {}: {}",
                    self.settings.port,
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    fn notify_error(&self, err: &StreamError) {
        let callbacks = read_lock(&self.error_callbacks).clone();
        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(err))) {
                error!(
                    "Error in error callback for {}: {}",
                    self.settings.port,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn read_available(source: &mut dyn ByteSource, buf: &mut [u8]) -> io::Result<usize> {
    let available = source.bytes_to_read()?;
    if available == 0 {
        return Ok(0);
    }
    let n = available.min(buf.len());
    source.read(&mut buf[..n])
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn cancelled(cancel_rx: &Receiver<()>) -> bool {
    matches!(cancel_rx.try_recv(), Err(TryRecvError::Disconnected))
}

/// Sleep up to `duration`, waking early on cancellation. Returns true if cancelled.
fn idle(cancel_rx: &Receiver<()>, duration: Duration) -> bool {
    matches!(
        cancel_rx.recv_timeout(duration),
        Err(RecvTimeoutError::Disconnected)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::channel::loopback;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_not_running_read_returns_none() {
        let (_writer, connector) = loopback();
        let reader = PortReader::with_connector(PortSettings::new("loop", 9600), connector);

        assert!(!reader.is_running());
        assert_eq!(reader.read_line(Some(Duration::ZERO)), None);
        assert_eq!(reader.read_line(None), None);
    }

    #[test]
    fn test_capacity_is_at_least_one() {
        let (_writer, connector) = loopback();
        let settings = PortSettings::new("loop", 9600).with_queue_size(0);
        let reader = PortReader::with_connector(settings, connector);
        assert_eq!(reader.capacity(), 1);
    }

    #[test]
    fn test_reads_lines_from_loopback() {
        let (writer, connector) = loopback();
        let reader = PortReader::with_connector(PortSettings::new("loop", 9600), connector);
        reader.start_reading().unwrap();

        writer.write(b"1,2,3\n");
        let line = reader.read_line(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(line.values(), &["1", "2", "3"]);
        assert_eq!(line.sequence(), 1);

        reader.stop_reading();
    }

    #[test]
    fn test_start_twice_keeps_one_thread() {
        let (writer, connector) = loopback();
        let reader = PortReader::with_connector(PortSettings::new("loop", 9600), connector);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        reader.add_data_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reader.start_reading().unwrap();
        reader.start_reading().unwrap();
        writer.write(b"x\n");

        assert!(wait_for(|| seen.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        reader.stop_reading();
    }

    #[test]
    fn test_blank_lines_counted_but_not_parsed() {
        let (writer, connector) = loopback();
        let reader = PortReader::with_connector(PortSettings::new("loop", 9600), connector);
        reader.start_reading().unwrap();

        writer.write(b"\n  \r\n7,8\n");
        assert!(reader.read_line(Some(Duration::from_secs(2))).is_some());

        let stats = reader.get_stats();
        assert_eq!(stats.lines_received, 3);
        assert_eq!(stats.lines_parsed, 1);
        assert!(stats.last_line_time.is_some());
        reader.stop_reading();
    }

    #[test]
    fn test_panicking_callback_does_not_stop_ingestion() {
        let (writer, connector) = loopback();
        let reader = PortReader::with_connector(PortSettings::new("loop", 9600), connector);
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        reader.add_data_callback(|_| panic!("observer bug"));
        reader.add_data_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        reader.start_reading().unwrap();

        writer.write(b"1\n2\n");
        assert!(wait_for(|| later.load(Ordering::SeqCst) == 2));
        assert!(reader.is_running());
        reader.stop_reading();
    }

    #[test]
    fn test_blocking_read_wakes_on_stop() {
        let (_writer, connector) = loopback();
        let reader = Arc::new(PortReader::with_connector(
            PortSettings::new("loop", 9600),
            connector,
        ));
        reader.start_reading().unwrap();

        let blocked = Arc::clone(&reader);
        let consumer = thread::spawn(move || blocked.read_line(None));
        thread::sleep(Duration::from_millis(50));
        reader.stop_reading();

        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
