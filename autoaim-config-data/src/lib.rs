//! Configuration file handling.
//!
//! One TOML file configures the whole process, with one section per
//! subsystem. Everything is read once at startup and immutable afterwards;
//! malformed or missing configuration is fatal. Relative paths (the
//! classifier model) are resolved against the directory containing the
//! config file and may use shell-style `~`/`$VAR` expansion.

use serde::{Deserialize, Serialize};

use autoaim_types::{Labels, PixelFormat, TeamColor};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup error on variable: {source}")]
    ShellExpandLookupVarError {
        #[from]
        source: shellexpand::LookupError<std::env::VarError>,
    },
    #[error("IO error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
    #[error("TOML deserialization error: {source}")]
    TomlDeError {
        #[from]
        source: toml::de::Error,
    },
    #[error("TOML serialization error: {source}")]
    TomlSerError {
        #[from]
        source: toml::ser::Error,
    },
}

fn default_true() -> bool {
    true
}

/// If `path` is relative, make it relative to `dirname`.
///
/// `path` must be utf-8 encoded and can start with a tilde, which is
/// expanded to the home directory.
fn fixup_relative_path(path: &mut std::path::PathBuf, dirname: &std::path::Path) -> Result<()> {
    let pathstr = path.as_os_str().to_str().unwrap();
    let expanded = shellexpand::full(&pathstr)?;
    *path = std::path::PathBuf::from(expanded.to_string());

    if path.is_relative() {
        *path = dirname.join(&path);
    }
    Ok(())
}

// ---------------------------
// camera

fn default_pixel_format() -> PixelFormat {
    PixelFormat::BayerRG8
}

fn default_exposure_time_us() -> f64 {
    4000.0
}

fn default_frame_size() -> u32 {
    1024
}

fn default_frame_width() -> u32 {
    1280
}

fn default_gamma() -> f64 {
    0.5
}

fn default_gain() -> f64 {
    15.0
}

fn default_adc_bit_depth() -> u8 {
    8
}

fn default_frame_rate() -> f64 {
    200.0
}

/// Acquisition settings pushed to the frame source at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    #[serde(default = "default_adc_bit_depth")]
    pub adc_bit_depth: u8,
    #[serde(default)]
    pub trigger_mode: bool,
    #[serde(default)]
    pub exposure_auto: bool,
    #[serde(default = "default_exposure_time_us")]
    pub exposure_time_us: f64,
    #[serde(default)]
    pub gain_auto: bool,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default = "default_true")]
    pub gamma_enable: bool,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default)]
    pub frame_rate_enable: bool,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_size")]
    pub height: u32,
    #[serde(default)]
    pub offset_x: u32,
    #[serde(default)]
    pub offset_y: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            pixel_format: default_pixel_format(),
            adc_bit_depth: default_adc_bit_depth(),
            trigger_mode: false,
            exposure_auto: false,
            exposure_time_us: default_exposure_time_us(),
            gain_auto: false,
            gain: default_gain(),
            gamma_enable: true,
            gamma: default_gamma(),
            frame_rate_enable: false,
            frame_rate: default_frame_rate(),
            width: default_frame_width(),
            height: default_frame_size(),
            offset_x: 0,
            offset_y: 0,
        }
    }
}

// ---------------------------
// detector

/// Single-lightbar acceptance gates. Areas are in pixels², angles in
/// degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LightBarConfig {
    pub min_area: f64,
    pub max_area: f64,
    pub min_solidity: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub max_angle: f64,
}

impl Default for LightBarConfig {
    fn default() -> Self {
        LightBarConfig {
            min_area: 20.0,
            max_area: 12000.0,
            min_solidity: 0.5,
            min_aspect_ratio: 1.8,
            max_aspect_ratio: 20.0,
            max_angle: 35.0,
        }
    }
}

/// Lightbar-pairing gates. Ratios are dimensionless, angles in degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArmorConfig {
    pub lightbar_area_ratio: f64,
    pub min_area: f64,
    pub max_light_bar_armor_area_ratio: f64,
    pub max_roll_angle: f64,
    pub max_height_diff_ratio: f64,
    pub max_y_diff_ratio: f64,
    pub min_x_diff_ratio: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub max_angle_diff: f64,
    pub big_armor_ratio: f64,
}

impl Default for ArmorConfig {
    fn default() -> Self {
        ArmorConfig {
            lightbar_area_ratio: 3.0,
            min_area: 200.0,
            max_light_bar_armor_area_ratio: 0.8,
            max_roll_angle: 30.0,
            max_height_diff_ratio: 0.3,
            max_y_diff_ratio: 0.5,
            min_x_diff_ratio: 0.5,
            min_aspect_ratio: 1.0,
            max_aspect_ratio: 5.0,
            max_angle_diff: 10.0,
            big_armor_ratio: 3.2,
        }
    }
}

fn default_enemy_color() -> TeamColor {
    TeamColor::Blue
}

fn default_brightness_threshold() -> u8 {
    160
}

fn default_color_threshold() -> u8 {
    40
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    #[serde(default = "default_enemy_color")]
    pub enemy_color: TeamColor,
    /// Grayscale threshold of the brightness mask.
    #[serde(default = "default_brightness_threshold")]
    pub brightness_threshold: u8,
    /// Threshold of the enemy-minus-ally channel difference mask.
    #[serde(default = "default_color_threshold")]
    pub color_threshold: u8,
    #[serde(default)]
    pub lightbar: LightBarConfig,
    #[serde(default)]
    pub armor: ArmorConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            enemy_color: default_enemy_color(),
            brightness_threshold: default_brightness_threshold(),
            color_threshold: default_color_threshold(),
            lightbar: LightBarConfig::default(),
            armor: ArmorConfig::default(),
        }
    }
}

// ---------------------------
// classifier

fn default_model_path() -> std::path::PathBuf {
    "model.onnx".into()
}

fn default_input_name() -> String {
    "input".to_string()
}

fn default_label_names() -> Vec<String> {
    [
        "hero", "engineer", "infantry3", "infantry4", "infantry5", "sentry", "outpost", "base",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_confidence_threshold() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Path to the pre-trained digit classifier, relative to this config
    /// file unless absolute.
    #[serde(default = "default_model_path")]
    pub model_path: std::path::PathBuf,
    /// Name of the model's input tensor.
    #[serde(default = "default_input_name")]
    pub input_name: String,
    /// Human-readable names of the eight classes, wire order.
    #[serde(default = "default_label_names")]
    pub labels: Vec<String>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Labels to discard even when classified confidently.
    #[serde(default)]
    pub ignore_labels: Vec<Labels>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            model_path: default_model_path(),
            input_name: default_input_name(),
            labels: default_label_names(),
            confidence_threshold: default_confidence_threshold(),
            ignore_labels: vec![],
        }
    }
}

// ---------------------------
// tracking

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingConfig {
    /// Filter time step, seconds.
    pub dt: f64,
    /// Process noise variance (Q = q·I).
    pub q: f64,
    /// Measurement noise variance (R = r·I).
    pub r: f64,
    /// Finite-difference velocity clamp, m/s.
    pub max_speed: f64,
    /// Consecutive updates required for Fitting → Tracking.
    pub fit_count: u32,
    /// Tracking → TemporaryLost after this many seconds without update.
    pub lost_timeout_short: f64,
    /// Any active status → Lost after this many seconds without update.
    pub lost_timeout_long: f64,
    /// Status watchdog poll period, seconds.
    pub watchdog_period: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            dt: 0.005,
            q: 1e-2,
            r: 1e-1,
            max_speed: 5.0,
            fit_count: 5,
            lost_timeout_short: 0.5,
            lost_timeout_long: 2.0,
            watchdog_period: 0.01,
        }
    }
}

// ---------------------------
// fire / physics

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FireConfig {
    /// Muzzle velocity, m/s.
    pub bullet_velocity: f64,
    /// Latency between the fire decision and the projectile leaving the
    /// barrel, seconds.
    pub fire_time_delay: f64,
    pub small_armor_width_mm: f64,
    pub small_armor_height_mm: f64,
    pub large_armor_width_mm: f64,
    pub large_armor_height_mm: f64,
    /// Minimum quiet time after a fire before reporting patrolling again,
    /// seconds.
    pub patrol_cooldown: f64,
}

impl Default for FireConfig {
    fn default() -> Self {
        FireConfig {
            bullet_velocity: 25.0,
            fire_time_delay: 0.05,
            small_armor_width_mm: 135.0,
            small_armor_height_mm: 56.0,
            large_armor_width_mm: 230.0,
            large_armor_height_mm: 56.0,
            patrol_cooldown: 1.0,
        }
    }
}

impl FireConfig {
    /// (width, height) of the armor plate in meters for a size class.
    pub fn armor_size_m(&self, large: bool) -> (f64, f64) {
        if large {
            (
                self.large_armor_width_mm / 1000.0,
                self.large_armor_height_mm / 1000.0,
            )
        } else {
            (
                self.small_armor_width_mm / 1000.0,
                self.small_armor_height_mm / 1000.0,
            )
        }
    }
}

// ---------------------------
// static transforms

/// Camera intrinsics and the static rigid transforms between the five
/// coordinate frames. Translations in meters, rotations in radians.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    /// Row-major 3×3 camera matrix.
    pub camera_matrix: [f64; 9],
    /// Plumb-bob distortion coefficients (k1, k2, p1, p2, k3).
    pub distortion: [f64; 5],
    pub camera_to_barrel_t: [f64; 3],
    pub camera_to_imu_t: [f64; 3],
    pub camera_to_imu_r: [f64; 3],
    pub base_to_barrel_t: [f64; 3],
    pub base_to_barrel_r: [f64; 3],
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            camera_matrix: [1600.0, 0.0, 640.0, 0.0, 1600.0, 512.0, 0.0, 0.0, 1.0],
            distortion: [0.0; 5],
            camera_to_barrel_t: [0.0, -0.05, 0.0],
            camera_to_imu_t: [0.0, 0.0, 0.0],
            // Optical (x right, y down, z forward) to gimbal FLU
            // (x forward, y left, z up).
            camera_to_imu_r: [-std::f64::consts::FRAC_PI_2, 0.0, -std::f64::consts::FRAC_PI_2],
            base_to_barrel_t: [0.0, 0.0, 0.0],
            base_to_barrel_r: [0.0, 0.0, 0.0],
        }
    }
}

// ---------------------------
// serial port

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

fn default_baud() -> u32 {
    460800
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> Parity {
    Parity::None
}

fn default_ports() -> Vec<String> {
    vec!["/dev/ttyUSB0".to_string(), "/dev/ttyACM0".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortConfig {
    /// Candidate device paths, tried round-robin on reconnect.
    #[serde(default = "default_ports")]
    pub ports: Vec<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// 1 or 2.
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: Parity,
}

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig {
            ports: default_ports(),
            baud: default_baud(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
        }
    }
}

// ---------------------------
// top level

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoAimConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub fire: FireConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub port: PortConfig,
}

impl AutoAimConfig {
    /// For all paths which are relative, make them relative to the config
    /// file location.
    fn fixup_relative_paths(&mut self, orig_path: &std::path::Path) -> Result<()> {
        let dirname = orig_path.parent().unwrap_or(std::path::Path::new("."));
        fixup_relative_path(&mut self.classifier.model_path, dirname)?;
        Ok(())
    }
}

pub fn parse_config_file<P: AsRef<std::path::Path>>(fname: P) -> Result<AutoAimConfig> {
    let contents = std::fs::read_to_string(fname.as_ref())?;
    let mut cfg: AutoAimConfig = toml::from_str(&contents)?;
    cfg.fixup_relative_paths(fname.as_ref())?;
    Ok(cfg)
}

/// The default configuration rendered as TOML (for `autoaim print-config`).
pub fn default_config_toml() -> Result<String> {
    Ok(toml::to_string(&AutoAimConfig::default())?)
}
