//! Multi-Port Coordination
//!
//! [`PortCoordinator`] owns a set of [`PortReader`]s, tags their callbacks with
//! the port name and fans start/stop out to all of them. [`serve`] and [`run`]
//! are the cooperative polling loops that consumers drive from their own
//! thread.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::display::{OutputRow, OutputSink};
use crate::fields::{FieldRegistry, PortConfig};
use crate::stream::{panic_message, read_lock, Line, PortReader, PortStats, StreamError};

/// Latest line per port
pub type Snapshot = BTreeMap<String, Line>;

type PortDataCallback = Arc<dyn Fn(&str, &Line) + Send + Sync>;
type PortErrorCallback = Arc<dyn Fn(&str, &StreamError) + Send + Sync>;

/// Shared flag that ends a polling loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// A signal that has not been triggered
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to finish after the current tick
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct Callbacks {
    data: RwLock<Vec<PortDataCallback>>,
    errors: RwLock<Vec<PortErrorCallback>>,
}

impl Callbacks {
    fn dispatch_data(&self, port: &str, line: &Line) {
        let callbacks = read_lock(&self.data).clone();
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(port, line))) {
                error!(
                    "Data callback for {} panicked: {}",
                    port,
                    panic_message(&*payload)
                );
            }
        }
    }

    fn dispatch_error(&self, port: &str, err: &StreamError) {
        let callbacks = read_lock(&self.errors).clone();
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(port, err))) {
                error!(
                    "Error callback for {} panicked: {}",
                    port,
                    panic_message(&*payload)
                );
            }
        }
    }
}

/// A named set of port readers
pub struct PortCoordinator {
    readers: BTreeMap<String, PortReader>,
    callbacks: Arc<Callbacks>,
}

impl Default for PortCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortCoordinator {
    /// Coordinator with no ports
    pub fn new() -> Self {
        Self {
            readers: BTreeMap::new(),
            callbacks: Arc::new(Callbacks::default()),
        }
    }

    /// Serial readers for `(name, baud_rate)` pairs
    pub fn from_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut coordinator = Self::new();
        for (name, baud_rate) in ports {
            coordinator.add_reader(PortReader::new(name, baud_rate));
        }
        coordinator
    }

    /// Serial readers for every port in `registry`
    pub fn from_registry(registry: &FieldRegistry) -> Self {
        Self::from_ports(
            registry
                .port_configs()
                .iter()
                .map(|p| (p.name.clone(), p.baud_rate)),
        )
    }

    /// Readers built by `make` for every port in `registry`
    pub fn from_registry_with<F>(registry: &FieldRegistry, mut make: F) -> Self
    where
        F: FnMut(&PortConfig) -> PortReader,
    {
        let mut coordinator = Self::new();
        for port in registry.port_configs() {
            coordinator.add_reader(make(port));
        }
        coordinator
    }

    /// Take ownership of `reader` and forward its events to this coordinator.
    ///
    /// A reader already registered under the same name is stopped and replaced.
    pub fn add_reader(&mut self, reader: PortReader) {
        let name = reader.name().to_string();

        let callbacks = Arc::clone(&self.callbacks);
        let port = name.clone();
        reader.add_data_callback(move |line| callbacks.dispatch_data(&port, line));

        let callbacks = Arc::clone(&self.callbacks);
        let port = name.clone();
        reader.add_error_callback(move |err| callbacks.dispatch_error(&port, err));

        if let Some(previous) = self.readers.insert(name.clone(), reader) {
            warn!("Replacing reader for {}", name);
            previous.stop_reading();
        }
    }

    /// Register a callback for lines from any port
    pub fn add_data_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &Line) + Send + Sync + 'static,
    {
        self.callbacks
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Register a callback for connection failures on any port
    pub fn add_error_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &StreamError) + Send + Sync + 'static,
    {
        self.callbacks
            .errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Start every reader. Failures are logged and reported to error callbacks.
    ///
    /// Returns how many readers are running afterwards.
    pub fn start_reading(&self) -> usize {
        let mut running = 0;
        for (name, reader) in &self.readers {
            match reader.start_reading() {
                Ok(()) => running += 1,
                Err(e) => error!("Failed to start reading {}: {}", name, e),
            }
        }
        info!("{} of {} port(s) reading", running, self.readers.len());
        running
    }

    /// Stop every reader
    pub fn stop_reading(&self) {
        for reader in self.readers.values() {
            reader.stop_reading();
        }
        info!("Stopped all ports");
    }

    /// Stats for every port, keyed by name
    pub fn get_stats(&self) -> BTreeMap<String, PortStats> {
        self.readers
            .iter()
            .map(|(name, reader)| (name.clone(), reader.get_stats()))
            .collect()
    }

    /// Reader for `name`
    pub fn get_reader(&self, name: &str) -> Option<&PortReader> {
        self.readers.get(name)
    }

    /// All readers, ordered by name
    pub fn readers(&self) -> Vec<&PortReader> {
        self.readers.values().collect()
    }

    /// Port names, sorted
    pub fn port_names(&self) -> Vec<&str> {
        self.readers.keys().map(String::as_str).collect()
    }

    /// Number of ports
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    /// Whether there are no ports
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// [`serve`] over every port
    pub fn serve<H>(&self, handler: H, poll_interval: Duration, stop: &StopSignal)
    where
        H: FnMut(&str, Line) -> ControlFlow<()>,
    {
        serve(&self.readers(), handler, poll_interval, stop);
    }

    /// [`run`] over every port
    pub fn run<R, S>(&self, render: R, poll_interval: Duration, sink: &mut S)
    where
        R: FnMut(&Snapshot) -> ControlFlow<(), Vec<OutputRow>>,
        S: OutputSink + ?Sized,
    {
        run(&self.readers(), render, poll_interval, sink);
    }
}

impl Drop for PortCoordinator {
    fn drop(&mut self) {
        self.stop_reading();
    }
}

/// Stops every port when dropped, including while unwinding
struct StopOnExit<'a> {
    ports: &'a [&'a PortReader],
}

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        for port in self.ports {
            port.stop_reading();
        }
    }
}

/// Poll `ports` until stopped, handing each line to `handler`.
///
/// Ports that are not running are started first. Each tick polls every port
/// without blocking; a tick that finds nothing sleeps `poll_interval`. The loop
/// ends when `stop` is triggered or `handler` returns `Break`. A panic in
/// `handler` unwinds through. Every port is stopped on the way out.
pub fn serve<H>(ports: &[&PortReader], mut handler: H, poll_interval: Duration, stop: &StopSignal)
where
    H: FnMut(&str, Line) -> ControlFlow<()>,
{
    let _guard = StopOnExit { ports };

    for port in ports {
        if !port.is_running() {
            if let Err(e) = port.start_reading() {
                warn!("Serving without {}: {}", port.name(), e);
            }
        }
    }
    debug!("Serving {} port(s)", ports.len());

    'serve: while !stop.is_stopped() {
        let mut produced = false;
        for port in ports {
            if let Some(line) = port.read_line(Some(Duration::ZERO)) {
                produced = true;
                if handler(port.name(), line).is_break() {
                    debug!("Handler asked to stop");
                    break 'serve;
                }
            }
        }
        if !produced {
            thread::sleep(poll_interval);
        }
    }
}

/// Calls `stop` on the sink when dropped
struct SinkGuard<'a, S: OutputSink + ?Sized>(&'a mut S);

impl<S: OutputSink + ?Sized> Drop for SinkGuard<'_, S> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// [`serve`] with a latest-line-per-port snapshot and an output sink.
///
/// After every line, `render` receives the snapshot and returns rows for the
/// sink, or `Break` to finish. The sink is started before polling and stopped
/// afterwards; it may end the loop through the [`StopSignal`] it is given.
pub fn run<R, S>(ports: &[&PortReader], mut render: R, poll_interval: Duration, sink: &mut S)
where
    R: FnMut(&Snapshot) -> ControlFlow<(), Vec<OutputRow>>,
    S: OutputSink + ?Sized,
{
    let stop = StopSignal::new();
    sink.start(stop.clone());
    let sink = SinkGuard(sink);
    let mut snapshot = Snapshot::new();

    serve(
        ports,
        |name, line| {
            snapshot.insert(name.to_string(), line);
            match render(&snapshot) {
                ControlFlow::Continue(rows) => {
                    sink.0.update(&rows);
                    ControlFlow::Continue(())
                }
                ControlFlow::Break(()) => ControlFlow::Break(()),
            }
        },
        poll_interval,
        &stop,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{loopback, ByteSource, LoopbackWriter, PortSettings};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn loop_reader(name: &str) -> (LoopbackWriter, PortReader) {
        let (writer, connector) = loopback();
        let reader = PortReader::with_connector(PortSettings::new(name, 9600), connector);
        (writer, reader)
    }

    #[test]
    fn test_callbacks_are_tagged_with_port() {
        let (wa, a) = loop_reader("A");
        let (wb, b) = loop_reader("B");
        let mut coordinator = PortCoordinator::new();
        coordinator.add_reader(a);
        coordinator.add_reader(b);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        coordinator.add_data_callback(move |port, line| {
            sink.lock()
                .unwrap()
                .push(format!("{}:{}", port, line.raw()));
        });
        coordinator.add_data_callback(|_, _| panic!("bad callback"));

        assert_eq!(coordinator.start_reading(), 2);
        wa.write("1,2\n");
        wb.write("3,4\n");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        coordinator.stop_reading();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["A:1,2", "B:3,4"]);
    }

    #[test]
    fn test_start_failure_reaches_error_callback() {
        let mut coordinator = PortCoordinator::new();
        coordinator.add_reader(PortReader::with_connector(
            PortSettings::new("ghost", 9600),
            |port: &str, _baud: u32| -> Result<Box<dyn ByteSource>, StreamError> {
                Err(StreamError::PortNotFound(port.to_string()))
            },
        ));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        coordinator.add_error_callback(move |port, err| {
            sink.lock().unwrap().push(format!("{}: {}", port, err));
        });

        assert_eq!(coordinator.start_reading(), 0);
        assert_eq!(
            errors.lock().unwrap().clone(),
            vec!["ghost: Port not found: ghost".to_string()]
        );
        assert!(!coordinator.get_stats()["ghost"].running);
    }

    #[test]
    fn test_serve_stops_ports_when_handler_breaks() {
        let (writer, reader) = loop_reader("A");
        writer.write("1\n2\n3\n");

        let mut received = Vec::new();
        serve(
            &[&reader],
            |_, line| {
                received.push(line.raw().to_string());
                if received.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
            Duration::from_millis(1),
            &StopSignal::new(),
        );

        assert_eq!(received, vec!["1", "2"]);
        assert!(!reader.is_running());
        assert!(!reader.is_connected());
    }

    #[test]
    fn test_serve_exits_on_stop_signal() {
        let (_writer, reader) = loop_reader("A");
        let stop = StopSignal::new();
        let trigger = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.stop();
        });

        serve(&[&reader], |_, _| ControlFlow::Continue(()), Duration::from_millis(5), &stop);
        stopper.join().unwrap();
        assert!(!reader.is_running());
    }

    #[test]
    fn test_serve_stops_ports_on_panic() {
        let (writer, reader) = loop_reader("A");
        writer.write("boom\n");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            serve(
                &[&reader],
                |_, _| panic!("handler failed"),
                Duration::from_millis(1),
                &StopSignal::new(),
            )
        }));

        assert!(outcome.is_err());
        assert!(!reader.is_running());
    }

    struct Recorder {
        events: Vec<String>,
    }

    impl OutputSink for Recorder {
        fn start(&mut self, _stop: StopSignal) {
            self.events.push("start".to_string());
        }

        fn update(&mut self, rows: &[OutputRow]) {
            let values: Vec<&str> = rows.iter().map(|r| r.value.as_str()).collect();
            self.events.push(values.join("|"));
        }

        fn stop(&mut self) {
            self.events.push("stop".to_string());
        }
    }

    #[test]
    fn test_run_merges_latest_lines() {
        let (wa, a) = loop_reader("A");
        let (wb, b) = loop_reader("B");
        wa.write("a1\n");
        wb.write("b1\n");

        let mut recorder = Recorder { events: Vec::new() };
        let mut renders = 0;
        run(
            &[&a, &b],
            |snapshot| {
                renders += 1;
                if renders > 2 {
                    return ControlFlow::Break(());
                }
                if renders == 2 {
                    wa.write("a2\n");
                }
                ControlFlow::Continue(
                    snapshot
                        .iter()
                        .map(|(port, line)| OutputRow::new(port.clone(), line.raw()))
                        .collect(),
                )
            },
            Duration::from_millis(1),
            &mut recorder,
        );

        // Either port may be seen first; the second render always has both.
        let events = recorder.events;
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], "start");
        assert!(events[1] == "a1" || events[1] == "b1");
        assert_eq!(events[2], "a1|b1");
        assert_eq!(events[3], "stop");
        assert!(!a.is_running() && !b.is_running());
    }
}
