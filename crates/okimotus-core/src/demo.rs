//! Demo Mode - Simulated MCU telemetry for running without hardware
//!
//! Emits `millis,counts,volts,state` lines from a motor with an encoder that
//! idles, spins up to a random speed, cruises and brakes again.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::stream::{ByteSource, Connector, StreamError};

/// Encoder counts per revolution of the simulated motor
pub const COUNTS_PER_REV: f64 = 1600.0;

/// Most lines produced in one poll after the consumer stalled
const MAX_CATCH_UP_LINES: u64 = 50;

const SPIN_UP_MS: u64 = 1500;
const BRAKE_MS: u64 = 1000;

/// Motor phase, reported as the `state` column
#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    SpinUp { start_ms: u64 },
    Cruise { until_ms: u64 },
    Brake { start_ms: u64 },
}

impl Phase {
    fn code(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::SpinUp { .. } => 1,
            Phase::Cruise { .. } => 2,
            Phase::Brake { .. } => 3,
        }
    }
}

/// Generates telemetry samples for one simulated board
pub struct MotorSimulator {
    rng: StdRng,
    phase: Phase,
    /// Time of the next spin-up while idle (ms)
    next_start_ms: u64,
    /// Cruise speed for the current run (rev/s)
    target_speed: f64,
    /// Current speed (rev/s)
    speed: f64,
    /// Speed at the start of braking (rev/s)
    brake_from: f64,
    /// Accumulated encoder position
    counts: f64,
    last_ms: u64,
}

impl Default for MotorSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorSimulator {
    /// Simulator seeded from the OS
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reproducible simulator
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let next_start_ms = rng.gen_range(500..2000);
        Self {
            rng,
            phase: Phase::Idle,
            next_start_ms,
            target_speed: 0.0,
            speed: 0.0,
            brake_from: 0.0,
            counts: 0.0,
            last_ms: 0,
        }
    }

    /// One line of telemetry at `elapsed_ms`, without the line terminator.
    ///
    /// Calls must use non-decreasing times.
    pub fn sample(&mut self, elapsed_ms: u64) -> String {
        let delta_s = elapsed_ms.saturating_sub(self.last_ms) as f64 / 1000.0;
        self.last_ms = elapsed_ms;

        self.update_phase(elapsed_ms);
        self.speed = self.current_speed(elapsed_ms);
        self.counts += self.speed * COUNTS_PER_REV * delta_s;

        // Supply sags with load
        let load = self.speed / 50.0;
        let volts = 12.0 - 0.8 * load + self.rng.gen_range(-0.05..0.05);

        format!(
            "{},{},{:.3},{}",
            elapsed_ms,
            self.counts.round() as i64,
            volts,
            self.phase.code()
        )
    }

    fn update_phase(&mut self, now: u64) {
        match self.phase {
            Phase::Idle => {
                if now >= self.next_start_ms {
                    self.target_speed = self.rng.gen_range(5.0..50.0);
                    self.phase = Phase::SpinUp { start_ms: now };
                }
            }
            Phase::SpinUp { start_ms } => {
                if now >= start_ms + SPIN_UP_MS {
                    let hold = self.rng.gen_range(2000..6000);
                    self.phase = Phase::Cruise {
                        until_ms: now + hold,
                    };
                }
            }
            Phase::Cruise { until_ms } => {
                if now >= until_ms {
                    self.brake_from = self.speed;
                    self.phase = Phase::Brake { start_ms: now };
                }
            }
            Phase::Brake { start_ms } => {
                if now >= start_ms + BRAKE_MS {
                    self.phase = Phase::Idle;
                    self.next_start_ms = now + self.rng.gen_range(1000..4000);
                }
            }
        }
    }

    fn current_speed(&self, now: u64) -> f64 {
        match self.phase {
            Phase::Idle => 0.0,
            Phase::SpinUp { start_ms } => {
                let progress = ((now - start_ms) as f64 / SPIN_UP_MS as f64).min(1.0);
                self.target_speed * progress
            }
            Phase::Cruise { .. } => self.target_speed,
            Phase::Brake { start_ms } => {
                let progress = ((now - start_ms) as f64 / BRAKE_MS as f64).min(1.0);
                self.brake_from * (1.0 - progress)
            }
        }
    }
}

/// Byte source that produces a simulated line every `interval`
pub struct SimulatedChannel {
    simulator: MotorSimulator,
    started: Instant,
    interval: Duration,
    emitted: u64,
    pending: Vec<u8>,
}

impl SimulatedChannel {
    /// Channel emitting one line per `interval`, starting now
    pub fn new(simulator: MotorSimulator, interval: Duration) -> Self {
        Self {
            simulator,
            started: Instant::now(),
            interval: interval.max(Duration::from_millis(1)),
            emitted: 0,
            pending: Vec::new(),
        }
    }

    fn fill(&mut self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        let interval = self.interval.as_millis() as u64;
        let due = elapsed / interval;
        if due <= self.emitted {
            return;
        }

        // Skip lines a stalled consumer would never see
        if due - self.emitted > MAX_CATCH_UP_LINES {
            self.emitted = due - MAX_CATCH_UP_LINES;
        }
        while self.emitted < due {
            self.emitted += 1;
            let line = self.simulator.sample(self.emitted * interval);
            self.pending.extend_from_slice(line.as_bytes());
            self.pending.push(b'\n');
        }
    }
}

impl Read for SimulatedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill();
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl ByteSource for SimulatedChannel {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.fill();
        Ok(self.pending.len())
    }
}

/// Connector that opens a [`SimulatedChannel`] for any port name
#[derive(Debug, Clone, Copy)]
pub struct SimulatedConnector {
    interval: Duration,
    seed: Option<u64>,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl SimulatedConnector {
    /// Connector emitting one line per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            seed: None,
        }
    }

    /// Make every opened channel reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Connector for SimulatedConnector {
    fn connect(&self, _port: &str, _baud_rate: u32) -> Result<Box<dyn ByteSource>, StreamError> {
        let simulator = match self.seed {
            Some(seed) => MotorSimulator::seeded(seed),
            None => MotorSimulator::new(),
        };
        Ok(Box::new(SimulatedChannel::new(simulator, self.interval)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{PortReader, PortSettings};
    use pretty_assertions::assert_eq;
    use std::thread;

    fn columns(line: &str) -> Vec<f64> {
        line.split(',').map(|v| v.parse().unwrap()).collect()
    }

    #[test]
    fn test_sample_shape() {
        let mut sim = MotorSimulator::seeded(7);
        let sample = columns(&sim.sample(100));
        assert_eq!(sample.len(), 4);
        assert_eq!(sample[0], 100.0);
        assert!(sample[2] > 11.0 && sample[2] < 12.1, "volts {}", sample[2]);
        assert_eq!(sample[3], 0.0);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let mut a = MotorSimulator::seeded(42);
        let mut b = MotorSimulator::seeded(42);
        for ms in (0..20_000).step_by(250) {
            assert_eq!(a.sample(ms), b.sample(ms));
        }
    }

    #[test]
    fn test_encoder_moves_forward() {
        let mut sim = MotorSimulator::seeded(3);
        let mut last = 0.0;
        let mut moved = false;
        let mut phases = Vec::new();
        for ms in (0..20_000).step_by(50) {
            let sample = columns(&sim.sample(ms));
            assert!(sample[1] >= last, "encoder went backwards at {}ms", ms);
            moved |= sample[1] > last;
            last = sample[1];
            phases.push(sample[3] as u8);
        }
        assert!(moved);
        assert!(phases.contains(&2));
    }

    #[test]
    fn test_channel_emits_lines() {
        let mut channel =
            SimulatedChannel::new(MotorSimulator::seeded(1), Duration::from_millis(2));
        thread::sleep(Duration::from_millis(20));

        let waiting = channel.bytes_to_read().unwrap();
        assert!(waiting > 0);
        let mut buf = vec![0u8; waiting];
        assert_eq!(channel.read(&mut buf).unwrap(), waiting);

        let text = String::from_utf8(buf).unwrap();
        let times: Vec<f64> = text.lines().map(|l| columns(l)[0]).collect();
        assert!(!times.is_empty());
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reader_over_simulator() {
        let reader = PortReader::with_connector(
            PortSettings::new("sim0", 115200),
            SimulatedConnector::new(Duration::from_millis(2)).with_seed(9),
        );
        reader.start_reading().unwrap();
        let line = reader.read_line(Some(Duration::from_secs(2)));
        reader.stop_reading();

        let line = line.expect("simulator produced nothing");
        assert_eq!(line.len(), 4);
    }
}
