//! Worker threads and their wiring.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use armor_detector::{Detector, DigitClassifier};
use autoaim_config_data::AutoAimConfig;
use autoaim_pose::PoseConverter;
use autoaim_tracking::{PredictedAim, TargetTracker};
use autoaim_types::Labels;
use cam_source::FrameSource;
use gimbal_link::AttitudeLink;

use crate::fire_control::{FireController, SelectedTarget};
use crate::policy::SelectionPolicy;
use crate::{AnnotatedFrame, FrameDetections, FrameDetections3D, Result};

const FRAME_RING_CAPACITY: usize = 4;
const DETECTION_RING_CAPACITY: usize = 8;

/// Idle sleep between empty ring polls.
const POP_IDLE: Duration = Duration::from_micros(500);

struct Worker {
    name: &'static str,
    control: thread_control::Control,
    handle: std::thread::JoinHandle<()>,
}

/// Owns the four stage workers plus the tracker-status watchdog.
pub struct Pipeline {
    workers: Vec<Worker>,
    camera_failed: Arc<AtomicBool>,
}

type TrackerMap = BTreeMap<Labels, TargetTracker>;

impl Pipeline {
    /// Spawn all workers. The link stays owned by the caller (it is the
    /// resource closed last); the pipeline only borrows it through the
    /// shared handle.
    pub fn start(
        cfg: &AutoAimConfig,
        source: Box<dyn FrameSource>,
        link: Arc<dyn AttitudeLink>,
        classifier: Box<dyn DigitClassifier>,
    ) -> Result<Pipeline> {
        let (frame_tx, frame_rx) = ringlib::ring::<AnnotatedFrame>(FRAME_RING_CAPACITY);
        let (det_tx, det_rx) = ringlib::ring::<FrameDetections>(DETECTION_RING_CAPACITY);
        let (det3_tx, det3_rx) = ringlib::ring::<FrameDetections3D>(DETECTION_RING_CAPACITY);

        let camera_failed = Arc::new(AtomicBool::new(false));

        // One tracker per non-None label for the lifetime of the process.
        let trackers: Arc<Mutex<TrackerMap>> = Arc::new(Mutex::new(
            Labels::TRACKABLE
                .iter()
                .map(|label| {
                    (
                        *label,
                        TargetTracker::new(*label, &cfg.tracking, cfg.fire.fire_time_delay),
                    )
                })
                .collect(),
        ));

        let mut workers = Vec::new();
        let mut spawn = |name: &'static str,
                         f: Box<dyn FnOnce(thread_control::Flag) + Send>|
         -> Result<()> {
            let (flag, control) = thread_control::make_pair();
            let handle = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || f(flag))?;
            workers.push(Worker {
                name,
                control,
                handle,
            });
            Ok(())
        };

        {
            let link = link.clone();
            let failed = camera_failed.clone();
            spawn(
                "capture",
                Box::new(move |flag| capture_loop(source, link, frame_tx, failed, flag)),
            )?;
        }
        {
            let detector = Detector::new(
                cfg.detector.clone(),
                cfg.classifier.ignore_labels.clone(),
                classifier,
            );
            spawn(
                "detect",
                Box::new(move |flag| detect_loop(detector, frame_rx, det_tx, flag)),
            )?;
        }
        {
            let converter = PoseConverter::new(&cfg.transform, &cfg.fire);
            spawn(
                "transform",
                Box::new(move |flag| transform_loop(converter, det_rx, det3_tx, flag)),
            )?;
        }
        {
            let link = link.clone();
            let trackers = trackers.clone();
            let fire_cfg = cfg.fire.clone();
            spawn(
                "fire",
                Box::new(move |flag| fire_loop(trackers, fire_cfg, det3_rx, link, flag)),
            )?;
        }
        {
            let trackers = trackers.clone();
            let period = Duration::from_secs_f64(cfg.tracking.watchdog_period);
            spawn(
                "tracker-watchdog",
                Box::new(move |flag| watchdog_loop(trackers, period, flag)),
            )?;
        }

        info!("pipeline started with {} workers", workers.len());
        Ok(Pipeline {
            workers,
            camera_failed,
        })
    }

    /// True once the frame source has failed fatally; the caller should
    /// exit the process.
    pub fn camera_failed(&self) -> bool {
        self.camera_failed.load(Ordering::SeqCst)
    }

    /// Ordered teardown: stop and join stage by stage, upstream first, so
    /// each stage drains before its consumer goes away.
    pub fn stop(self) {
        for worker in self.workers {
            worker.control.stop();
            if worker.handle.join().is_err() {
                error!("worker {} panicked", worker.name);
            } else {
                debug!("worker {} stopped", worker.name);
            }
        }
        info!("pipeline stopped");
    }
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    link: Arc<dyn AttitudeLink>,
    frame_tx: ringlib::Sender<AnnotatedFrame>,
    camera_failed: Arc<AtomicBool>,
    flag: thread_control::Flag,
) {
    while flag.alive() {
        let raw = match source.next_frame() {
            Ok(raw) => raw,
            Err(cam_source::Error::Timeout) => {
                warn!("frame source timeout");
                continue;
            }
            Err(e) => {
                error!("frame source failed: {e}");
                camera_failed.store(true, Ordering::SeqCst);
                return;
            }
        };
        // Frames without a fresh attitude are useless for pose recovery.
        let Some(imu) = link.imu_for_frame(raw.stamp) else {
            debug!("no IMU sample within the freshness bound, dropping frame");
            continue;
        };
        let image = match raw.to_rgb() {
            Ok(image) => image,
            Err(e) => {
                warn!("undecodable frame: {e}");
                continue;
            }
        };
        if frame_tx
            .push(AnnotatedFrame {
                image,
                imu,
                capture_time: raw.stamp,
            })
            .is_some()
        {
            debug!("detect stage behind, dropped oldest frame");
        }
    }
}

fn detect_loop(
    mut detector: Detector,
    frame_rx: ringlib::Receiver<AnnotatedFrame>,
    det_tx: ringlib::Sender<FrameDetections>,
    flag: thread_control::Flag,
) {
    while flag.alive() {
        let Some(frame) = frame_rx.pop() else {
            std::thread::sleep(POP_IDLE);
            continue;
        };
        let detections = detector.detect(&frame.image, &frame.imu, frame.capture_time);
        if det_tx
            .push(FrameDetections {
                detections,
                imu: frame.imu,
                capture_time: frame.capture_time,
            })
            .is_some()
        {
            debug!("transform stage behind, dropped oldest detections");
        }
    }
}

fn transform_loop(
    converter: PoseConverter,
    det_rx: ringlib::Receiver<FrameDetections>,
    det3_tx: ringlib::Sender<FrameDetections3D>,
    flag: thread_control::Flag,
) {
    while flag.alive() {
        let Some(frame) = det_rx.pop() else {
            std::thread::sleep(POP_IDLE);
            continue;
        };
        let mut detections = Vec::with_capacity(frame.detections.len());
        for det in frame.detections {
            match converter.convert(det) {
                Ok(d3) => detections.push(d3),
                Err(e) => debug!("pose conversion failed: {e}"),
            }
        }
        if det3_tx
            .push(FrameDetections3D {
                detections,
                imu: frame.imu,
                capture_time: frame.capture_time,
            })
            .is_some()
        {
            debug!("fire stage behind, dropped oldest detections");
        }
    }
}

fn fire_loop(
    trackers: Arc<Mutex<TrackerMap>>,
    fire_cfg: autoaim_config_data::FireConfig,
    det3_rx: ringlib::Receiver<FrameDetections3D>,
    link: Arc<dyn AttitudeLink>,
    flag: thread_control::Flag,
) {
    let mut policy = SelectionPolicy::new();
    let mut controller = FireController::new(fire_cfg);
    while flag.alive() {
        let Some(frame) = det3_rx.pop() else {
            std::thread::sleep(POP_IDLE);
            continue;
        };

        let mut guard = trackers.lock().unwrap();
        let mut aims: BTreeMap<Labels, PredictedAim> = BTreeMap::new();
        for det in &frame.detections {
            let label = det.detection.label;
            let Some(tracker) = guard.get_mut(&label) else {
                continue;
            };
            match tracker.update(det) {
                Ok(aim) => {
                    aims.insert(label, aim);
                }
                Err(e) => debug!("{label} tracker skipped observation: {e}"),
            }
        }

        let selected = policy.select(&frame.detections, &guard);
        let target = selected.and_then(|label| {
            let aim = aims.get(&label)?;
            let size = frame
                .detections
                .iter()
                .find(|d| d.detection.label == label)
                .map(|d| d.detection.size)?;
            Some(SelectedTarget {
                prediction: *aim,
                status: guard.get(&label).map(|t| t.status())?,
                size,
            })
        });
        drop(guard);

        let cmd = controller.command(
            target.as_ref(),
            &frame.detections,
            Some(&frame.imu),
            Instant::now(),
        );
        link.send_command(&cmd);
    }
}

fn watchdog_loop(
    trackers: Arc<Mutex<TrackerMap>>,
    period: Duration,
    flag: thread_control::Flag,
) {
    while flag.alive() {
        {
            let now = Instant::now();
            let mut guard = trackers.lock().unwrap();
            for tracker in guard.values_mut() {
                tracker.check_status(now);
            }
        }
        std::thread::sleep(period);
    }
}
