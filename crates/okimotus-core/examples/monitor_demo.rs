//! Headless monitor over simulated hardware.
//!
//! Loads the example configuration, attaches a simulated board to every port
//! and prints the rendered rows for a few seconds.
//!
//! ```text
//! RUST_LOG=okimotus_core=debug cargo run --example monitor_demo
//! ```

use anyhow::Result;
use okimotus_core::demo::SimulatedConnector;
use okimotus_core::prelude::*;
use okimotus_core::stream::PortSettings;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const RUN_FOR: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = FieldRegistry::example_config();
    let registry = FieldRegistry::from_value(&config)?;
    info!(
        "{}: {} field(s) on {:?}",
        registry.settings().title,
        registry.len(),
        registry.get_ports()
    );

    let refresh = Duration::from_millis(registry.settings().refresh_rate_ms);
    let connector = SimulatedConnector::new(refresh);
    let coordinator = PortCoordinator::from_registry_with(&registry, |port| {
        PortReader::with_connector(PortSettings::new(port.name.clone(), port.baud_rate), connector)
    });
    coordinator.add_error_callback(|port, err| error!("{}: {}", port, err));

    let engine = TransformEngine::new();
    let started = Instant::now();
    let mut sink = HeadlessSink::stdout();

    coordinator.run(
        |snapshot| {
            let elapsed = started.elapsed();
            if elapsed >= RUN_FOR {
                return ControlFlow::Break(());
            }
            let mut rows = vec![OutputRow::new("--", format!("{:.1}s", elapsed.as_secs_f64()))];
            rows.extend(render_rows(&registry, &engine, snapshot));
            ControlFlow::Continue(rows)
        },
        Duration::from_millis(5),
        &mut sink,
    );

    for (port, stats) in coordinator.get_stats() {
        info!("{}: {} line(s) parsed", port, stats.lines_parsed);
    }
    Ok(())
}
