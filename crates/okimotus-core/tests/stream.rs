use okimotus_core::stream::{loopback, PortHandle, PortReader, PortSettings, StreamError};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_chunked_line_is_reassembled() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    reader.start_reading().unwrap();

    for chunk in ["a", ",b", ",", "c", "\n"] {
        writer.write(chunk);
        thread::sleep(Duration::from_millis(15));
    }

    let line = reader.read_line(Some(WAIT)).expect("no line");
    assert_eq!(line.values(), &["a", "b", "c"]);
    assert_eq!(line.raw(), "a,b,c");
    assert!(reader.read_line(Some(Duration::from_millis(50))).is_none());
    reader.stop_reading();
}

#[test]
fn test_crlf_and_blank_lines() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    reader.start_reading().unwrap();

    writer.write("x,y\r\n\n1\n");
    assert!(wait_until(|| reader.get_stats().lines_received == 3));

    let stats = reader.get_stats();
    assert_eq!(stats.lines_parsed, 2);
    assert!(stats.last_line_time.is_some());
    assert!(stats.time_since_last_line.is_some());

    let first = reader.read_line(Some(Duration::ZERO)).unwrap();
    assert_eq!(first.values(), &["x", "y"]);
    let second = reader.read_line(Some(Duration::ZERO)).unwrap();
    assert_eq!(second.values(), &["1"]);
    assert_eq!(second.sequence(), 3);
    reader.stop_reading();
}

#[test]
fn test_invalid_utf8_is_replaced() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    reader.start_reading().unwrap();

    writer.write(b"ok,\xff\n");
    let line = reader.read_line(Some(WAIT)).expect("no line");
    assert_eq!(line.get(0), Some("ok"));
    assert_eq!(line.get(1), Some("\u{fffd}"));
    reader.stop_reading();
}

#[test]
fn test_overflow_keeps_newest_lines() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(
        PortSettings::new("A", 115200).with_queue_size(4),
        connector,
    );
    reader.start_reading().unwrap();

    let text: String = (0..20).map(|i| format!("{}\n", i)).collect();
    writer.write(text);
    assert!(wait_until(|| reader.get_stats().lines_parsed == 20));
    assert!(reader.queued() <= reader.capacity());
    assert_eq!(reader.capacity(), 4);

    let mut last = None;
    while let Some(line) = reader.read_line(Some(Duration::ZERO)) {
        last = Some(line.raw().to_string());
    }
    assert_eq!(last.as_deref(), Some("19"));
    reader.stop_reading();
}

#[test]
fn test_stop_then_read_returns_nothing() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    reader.start_reading().unwrap();
    writer.write("1,2\n");
    assert!(wait_until(|| reader.queued() == 1));

    reader.stop_reading();
    reader.stop_reading();

    assert!(reader.read_line(Some(Duration::ZERO)).is_none());
    assert!(!reader.is_running());
    assert!(!reader.is_connected());
}

#[test]
fn test_blocking_read_wakes_on_stop() {
    let (_writer, connector) = loopback();
    let reader = Arc::new(PortReader::with_connector(
        PortSettings::new("A", 115200),
        connector,
    ));
    reader.start_reading().unwrap();

    let stopper = {
        let reader = Arc::clone(&reader);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            reader.stop_reading();
        })
    };

    let started = Instant::now();
    assert!(reader.read_line(None).is_none());
    assert!(started.elapsed() < WAIT);
    stopper.join().unwrap();
}

#[test]
fn test_lost_connection_reports_error() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    reader.add_error_callback(move |e| {
        sink.lock().unwrap().push(matches!(e, StreamError::ConnectionLost { .. }));
    });

    reader.start_reading().unwrap();
    writer.write("last\n");
    drop(writer);

    assert!(wait_until(|| !reader.is_running()));
    assert_eq!(errors.lock().unwrap().clone(), vec![true]);
    assert!(!reader.is_connected());
    assert_eq!(reader.read_line(Some(Duration::ZERO)).map(|l| l.raw().to_string()), Some("last".to_string()));
}

#[test]
fn test_callbacks_see_lines_before_queue() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    reader.add_data_callback(|_| panic!("misbehaving observer"));
    reader.add_data_callback(move |line| sink.lock().unwrap().push(line.sequence()));

    reader.start_reading().unwrap();
    writer.write("1\n2\n");
    assert!(wait_until(|| reader.queued() == 2));
    assert_eq!(seen.lock().unwrap().clone(), vec![1, 2]);
    reader.stop_reading();
}

#[test]
fn test_second_start_is_a_no_op() {
    let (_writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    reader.start_reading().unwrap();
    reader.start_reading().unwrap();
    assert!(reader.is_running());
    reader.stop_reading();
    assert!(!reader.is_running());
}

#[test]
fn test_handle_after_close() {
    let (writer, connector) = loopback();
    let reader = PortReader::with_connector(PortSettings::new("A", 115200), connector);
    let mut handle = PortHandle::start(reader).unwrap();

    writer.write("7,8\n");
    let line = handle.read_line(Some(WAIT)).unwrap().expect("no line");
    assert_eq!(line.get(1), Some("8"));

    handle.close();
    handle.close();
    assert!(handle.is_closed());
    assert!(matches!(handle.read_line(Some(Duration::ZERO)), Err(StreamError::Closed(_))));
}
