//! Serial attitude/command link.
//!
//! The link owns three threads: a raw byte reader, a frame parser, and a
//! reconnect watchdog that cycles through the configured device paths at
//! 1 Hz whenever the port is down. Parsed IMU samples land in a bounded
//! store; the pipeline consumes them through the [`AttitudeLink`] trait.
//! Sending a command is best-effort: failures are logged and the command
//! dropped, never propagated upward.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use autoaim_config_data::{Parity, PortConfig};
use autoaim_types::{AimMode, FireCommand, ImuSample, ShootDecision, TeamColor};
use gimbal_comms::{AttitudeFrame, CommandFrame, Framer};

mod store;
use store::SampleStore;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no serial device could be opened (tried {tried:?})")]
    NoDeviceAvailable { tried: Vec<String> },
    #[error("serial error: {source}")]
    Serial {
        #[from]
        source: serialport::Error,
    },
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Maximum age difference between a frame and the IMU sample fused with it.
pub const IMU_FRESHNESS: Duration = Duration::from_millis(10);

/// Reconnect attempt period while the port is down.
const RECONNECT_PERIOD: Duration = Duration::from_secs(1);

/// Port read timeout. Bounds how long the reader thread can block.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

const SAMPLE_STORE_CAPACITY: usize = 256;
const RAW_RING_CAPACITY: usize = 64;

/// What the pipeline needs from the micro-controller link. `GimbalLink` is
/// the serial implementation; tests substitute their own.
pub trait AttitudeLink: Send + Sync {
    /// Most recent stamped IMU message, if any has arrived.
    fn imu_no_wait(&self) -> Option<ImuSample>;
    /// Newest sample within [`IMU_FRESHNESS`] of `capture_time`, waiting up
    /// to the freshness budget for one to arrive. Older samples are
    /// discarded.
    fn imu_for_frame(&self, capture_time: Instant) -> Option<ImuSample>;
    /// Best-effort send; failures are logged, never returned.
    fn send_command(&self, cmd: &FireCommand);
}

fn attitude_to_sample(frame: &AttitudeFrame, stamp: Instant) -> ImuSample {
    ImuSample {
        roll_deg: frame.roll as f64,
        pitch_deg: frame.pitch as f64,
        yaw_deg: frame.yaw as f64,
        stamp,
        ally_color: TeamColor::from_wire(frame.ally_color),
        aim_mode: AimMode(frame.aim_mode),
        shoot_decision: ShootDecision(frame.shoot_decision),
        remaining_hp: frame.remaining_hp,
    }
}

fn command_to_frame(cmd: &FireCommand) -> CommandFrame {
    CommandFrame {
        pitch: cmd.pitch_deg,
        yaw: cmd.yaw_deg,
        found: cmd.found as u8,
        fire: cmd.fire as u8,
        done_fitting: cmd.done_fitting as u8,
        patrolling: cmd.patrolling as u8,
        updated: cmd.updated,
    }
}

fn open_port(path: &str, cfg: &PortConfig) -> Result<Box<dyn serialport::SerialPort>> {
    let data_bits = match cfg.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    };
    let stop_bits = if cfg.stop_bits == 2 {
        serialport::StopBits::Two
    } else {
        serialport::StopBits::One
    };
    let parity = match cfg.parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    };
    let port = serialport::new(path, cfg.baud)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    Ok(port)
}

struct LinkShared {
    cfg: PortConfig,
    samples: Mutex<SampleStore>,
    reader_port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    writer_port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    connected: AtomicBool,
    /// Index of the next candidate device path to try.
    next_port_idx: Mutex<usize>,
}

impl LinkShared {
    fn mark_disconnected(&self, why: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("serial link down: {why}");
            *self.reader_port.lock().unwrap() = None;
            *self.writer_port.lock().unwrap() = None;
        }
    }

    /// Try the next candidate path; on success install reader and writer
    /// clones of the port.
    fn try_connect_next(&self) -> bool {
        let path = {
            let mut idx = self.next_port_idx.lock().unwrap();
            let path = self.cfg.ports[*idx].clone();
            *idx = (*idx + 1) % self.cfg.ports.len();
            path
        };
        match open_port(&path, &self.cfg) {
            Ok(port) => match port.try_clone() {
                Ok(writer) => {
                    info!("serial link up on {path}");
                    *self.reader_port.lock().unwrap() = Some(port);
                    *self.writer_port.lock().unwrap() = Some(writer);
                    self.connected.store(true, Ordering::SeqCst);
                    true
                }
                Err(e) => {
                    debug!("cannot clone {path} for writing: {e}");
                    false
                }
            },
            Err(e) => {
                debug!("cannot open {path}: {e}");
                false
            }
        }
    }
}

/// The serial implementation of [`AttitudeLink`].
pub struct GimbalLink {
    shared: Arc<LinkShared>,
    workers: Vec<(thread_control::Control, std::thread::JoinHandle<()>)>,
}

impl GimbalLink {
    /// Open the link. The initial connection must succeed on one of the
    /// configured device paths; later disconnects are handled by the
    /// reconnect watchdog.
    pub fn open(cfg: PortConfig) -> Result<GimbalLink> {
        let shared = Arc::new(LinkShared {
            samples: Mutex::new(SampleStore::new(SAMPLE_STORE_CAPACITY)),
            reader_port: Mutex::new(None),
            writer_port: Mutex::new(None),
            connected: AtomicBool::new(false),
            next_port_idx: Mutex::new(0),
            cfg,
        });

        for _ in 0..shared.cfg.ports.len() {
            if shared.try_connect_next() {
                break;
            }
        }
        if !shared.connected.load(Ordering::SeqCst) {
            return Err(Error::NoDeviceAvailable {
                tried: shared.cfg.ports.clone(),
            });
        }

        let (raw_tx, raw_rx) = ringlib::ring::<Vec<u8>>(RAW_RING_CAPACITY);
        let mut workers = Vec::new();

        {
            // raw byte reader
            let shared = shared.clone();
            let (flag, control) = thread_control::make_pair();
            let handle = std::thread::Builder::new()
                .name("gimbal-reader".to_string())
                .spawn(move || reader_loop(shared, raw_tx, flag))?;
            workers.push((control, handle));
        }
        {
            // frame parser
            let shared = shared.clone();
            let (flag, control) = thread_control::make_pair();
            let handle = std::thread::Builder::new()
                .name("gimbal-parser".to_string())
                .spawn(move || parser_loop(shared, raw_rx, flag))?;
            workers.push((control, handle));
        }
        {
            // reconnect watchdog
            let shared = shared.clone();
            let (flag, control) = thread_control::make_pair();
            let handle = std::thread::Builder::new()
                .name("gimbal-reconnect".to_string())
                .spawn(move || reconnect_loop(shared, flag))?;
            workers.push((control, handle));
        }

        Ok(GimbalLink { shared, workers })
    }

    /// Stop the worker threads and close the port. Called after the
    /// pipeline workers have been torn down.
    pub fn close(mut self) {
        for (control, _) in &self.workers {
            control.stop();
        }
        for (_, handle) in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.shared.mark_disconnected("link closed");
    }
}

impl AttitudeLink for GimbalLink {
    fn imu_no_wait(&self) -> Option<ImuSample> {
        self.shared.samples.lock().unwrap().newest()
    }

    fn imu_for_frame(&self, capture_time: Instant) -> Option<ImuSample> {
        let deadline = Instant::now() + IMU_FRESHNESS;
        loop {
            if let Some(sample) = self
                .shared
                .samples
                .lock()
                .unwrap()
                .take_for_frame(capture_time, IMU_FRESHNESS)
            {
                return Some(sample);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn send_command(&self, cmd: &FireCommand) {
        let frame = command_to_frame(cmd).encode();
        let result = {
            let mut guard = self.shared.writer_port.lock().unwrap();
            guard
                .as_mut()
                .map(|port| port.write_all(&frame).and_then(|()| port.flush()))
        };
        match result {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!("command send failed, dropping: {e}");
                self.shared.mark_disconnected("write failure");
            }
            None => debug!("serial link down, dropping command"),
        }
    }
}

fn reader_loop(shared: Arc<LinkShared>, raw_tx: ringlib::Sender<Vec<u8>>, flag: thread_control::Flag) {
    let mut buf = [0u8; 256];
    while flag.alive() {
        if !shared.connected.load(Ordering::SeqCst) {
            std::thread::sleep(READ_TIMEOUT);
            continue;
        }
        let read = {
            let mut guard = shared.reader_port.lock().unwrap();
            guard.as_mut().map(|port| port.read(&mut buf))
        };
        match read {
            None => std::thread::sleep(READ_TIMEOUT),
            Some(Ok(0)) => {}
            Some(Ok(n)) => {
                if raw_tx.push(buf[..n].to_vec()).is_some() {
                    debug!("raw serial ring overflow, oldest chunk dropped");
                }
            }
            Some(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Some(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Some(Err(e)) => shared.mark_disconnected(&format!("read failure: {e}")),
        }
    }
}

fn parser_loop(shared: Arc<LinkShared>, raw_rx: ringlib::Receiver<Vec<u8>>, flag: thread_control::Flag) {
    let mut framer = Framer::new();
    while flag.alive() {
        match raw_rx.pop() {
            Some(chunk) => {
                framer.push_bytes(&chunk);
                while let Some(frame) = framer.next_frame() {
                    let sample = attitude_to_sample(&frame, Instant::now());
                    shared.samples.lock().unwrap().push(sample);
                }
            }
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
}

fn reconnect_loop(shared: Arc<LinkShared>, flag: thread_control::Flag) {
    while flag.alive() {
        if !shared.connected.load(Ordering::SeqCst) {
            shared.try_connect_next();
        }
        // 1 Hz attempt rate, polled in small steps so stop is prompt.
        for _ in 0..10 {
            if !flag.alive() {
                return;
            }
            std::thread::sleep(RECONNECT_PERIOD / 10);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attitude_frame_maps_to_sample() {
        let frame = AttitudeFrame {
            roll: 1.0,
            pitch: -2.0,
            yaw: 90.0,
            ally_color: 0,
            aim_mode: 3,
            shoot_decision: 0b101,
            remaining_hp: 150,
        };
        let stamp = Instant::now();
        let sample = attitude_to_sample(&frame, stamp);
        assert_eq!(sample.yaw_deg, 90.0);
        assert_eq!(sample.ally_color, TeamColor::Red);
        assert_eq!(sample.aim_mode, AimMode(3));
        assert!(sample.shoot_decision.allows(autoaim_types::Labels::Hero));
        assert!(sample
            .shoot_decision
            .allows(autoaim_types::Labels::Infantry3));
        assert_eq!(sample.remaining_hp, 150);
        assert_eq!(sample.stamp, stamp);
    }

    #[test]
    fn open_fails_fast_when_no_candidate_device_exists() {
        // Startup is fatal when every configured path fails; the error
        // names the paths so the operator can fix the config.
        let cfg = PortConfig {
            ports: vec![
                "/dev/nonexistent-autoaim-0".to_string(),
                "/dev/nonexistent-autoaim-1".to_string(),
            ],
            ..PortConfig::default()
        };
        match GimbalLink::open(cfg) {
            Err(Error::NoDeviceAvailable { tried }) => {
                assert_eq!(tried.len(), 2);
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("open must not succeed"),
        }
    }

    #[test]
    fn reconnect_cycles_through_the_candidate_list() {
        let shared = LinkShared {
            cfg: PortConfig {
                ports: vec![
                    "/dev/nonexistent-autoaim-0".to_string(),
                    "/dev/nonexistent-autoaim-1".to_string(),
                    "/dev/nonexistent-autoaim-2".to_string(),
                ],
                ..PortConfig::default()
            },
            samples: Mutex::new(SampleStore::new(4)),
            reader_port: Mutex::new(None),
            writer_port: Mutex::new(None),
            connected: AtomicBool::new(false),
            next_port_idx: Mutex::new(0),
        };
        for expected_next in [1usize, 2, 0, 1] {
            assert!(!shared.try_connect_next());
            assert_eq!(*shared.next_port_idx.lock().unwrap(), expected_next);
        }
    }

    #[test]
    fn command_flags_pack_as_bytes() {
        let cmd = FireCommand {
            pitch_deg: 1.0,
            yaw_deg: 2.0,
            found: true,
            fire: false,
            patrolling: true,
            done_fitting: false,
            updated: 1,
        };
        let frame = command_to_frame(&cmd);
        assert_eq!(frame.found, 1);
        assert_eq!(frame.fire, 0);
        assert_eq!(frame.patrolling, 1);
        assert_eq!(frame.done_fitting, 0);
        assert_eq!(frame.updated, 1);
    }
}
