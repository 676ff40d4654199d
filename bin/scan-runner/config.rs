use config::{Config, ConfigError, Environment, File};
use rusty_scan::ScanConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub positions: PositionsConfig,
    pub points: PointsConfig,
    pub stream: StreamConfig,
    pub output: OutputConfig,
    pub console: ConsoleConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scan
            .to_settings()
            .validate()
            .map_err(|e| ConfigError::Message(format!("Invalid scan section: {e}")))?;
        self.positions.validate()?;
        self.points.validate()?;
        self.stream.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionMode {
    /// Evenly spaced from `start` to `end`
    #[default]
    Line,
    /// Explicit `values`
    Vector,
    /// `count` acquisitions without moving
    Static,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PositionsConfig {
    pub mode: PositionMode,
    pub start: Vec<f64>,
    pub end: Vec<f64>,
    pub steps: usize,
    /// One entry per position; each entry has one value per setpoint
    pub values: Vec<Vec<f64>>,
    pub count: usize,
}

impl Default for PositionsConfig {
    fn default() -> Self {
        Self {
            mode: PositionMode::Line,
            start: vec![-1.0],
            end: vec![1.0],
            steps: 20,
            values: Vec::new(),
            count: 10,
        }
    }
}

impl PositionsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            PositionMode::Line => {
                if self.start.is_empty() || self.start.len() != self.end.len() {
                    return Err(ConfigError::Message(format!(
                        "positions.start ({}) and positions.end ({}) must have the same non-zero length",
                        self.start.len(),
                        self.end.len()
                    )));
                }
                if self.steps == 0 {
                    return Err(ConfigError::Message(
                        "positions.steps must be greater than zero".to_string(),
                    ));
                }
            }
            PositionMode::Vector => {
                if self.values.is_empty() {
                    return Err(ConfigError::Message(
                        "positions.values must list at least one position".to_string(),
                    ));
                }
            }
            PositionMode::Static => {}
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PointsConfig {
    pub setpoints: Vec<String>,
    /// Empty to skip waiting for the move; otherwise one per setpoint
    pub readbacks: Vec<String>,
    pub tolerance: f64,
    pub move_timeout_ms: u64,
    /// Points read at every position, before any stream fields
    pub readables: Vec<String>,
    /// Write the pre-scan setpoint values back after the scan
    pub restore: bool,
    /// Center of the simulated detector peak on the first axis
    pub detector_center: f64,
    pub detector_width: f64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            setpoints: vec!["SIM:MOTOR1:SET".to_string()],
            readbacks: vec!["SIM:MOTOR1:GET".to_string()],
            tolerance: 1e-6,
            move_timeout_ms: 2000,
            readables: vec!["SIM:MOTOR1:GET".to_string()],
            restore: true,
            detector_center: 0.25,
            detector_width: 0.3,
        }
    }
}

impl PointsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.setpoints.is_empty() {
            return Err(ConfigError::Message(
                "points.setpoints must not be empty".to_string(),
            ));
        }
        if !self.readbacks.is_empty() && self.readbacks.len() != self.setpoints.len() {
            return Err(ConfigError::Message(format!(
                "points.readbacks ({}) must match points.setpoints ({})",
                self.readbacks.len(),
                self.setpoints.len()
            )));
        }
        if self.detector_width <= 0.0 {
            return Err(ConfigError::Message(format!(
                "points.detector_width must be positive, got: {}",
                self.detector_width
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Messages buffered between the socket thread and the scan
    pub buffer_capacity: usize,
    pub fields: Vec<String>,
    pub monitors: Vec<String>,
    pub append_monitors: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9999,
            buffer_capacity: 1000,
            fields: Vec::new(),
            monitors: Vec::new(),
            append_monitors: false,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.fields.is_empty() {
            return Err(ConfigError::Message(
                "stream.fields must not be empty when the stream is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub enabled: bool,
    pub path: String,
    pub buffer_size: usize,
    /// Rewrite the JSONL output as a JSON array when the scan ends
    pub final_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "./scans".to_string(),
            buffer_size: 100,
            final_json: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub verbosity: String,
    /// Readable plotted with --plot
    pub plot_readable: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
            plot_readable: 1,
        }
    }
}

/// Load configuration from file with environment overrides
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();
    let mut config_file_found = false;

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path));
        config_file_found = true;
    } else {
        for path in ["scan_config.toml", "config.toml"] {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                config_file_found = true;
                break;
            }
        }
    }

    if !config_file_found {
        builder = builder.add_source(Config::try_from(&AppConfig::default())?);
    }

    // e.g. RUSTY_SCAN__SCAN__MEASUREMENTS_PER_POSITION=3
    builder = builder.add_source(
        Environment::with_prefix("RUSTY_SCAN")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let app_config = builder.build()?.try_deserialize::<AppConfig>()?;
    app_config.validate()?;

    Ok(app_config)
}

/// Load configuration, falling back to defaults only when no file was requested
///
/// An explicitly requested file that fails to load is an error rather than a
/// silent fallback.
pub fn load_config_or_default(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            Ok(config)
        }
        Err(e) if config_path.is_some() => Err(e),
        Err(e) => {
            log::warn!("Could not load configuration ({e}), using defaults");
            Ok(AppConfig::default())
        }
    }
}
