mod config;

use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use rusty_scan::{
    plot_scan, restore_points, sequence, CompositeReader, DataProcessor, FieldSpec,
    FunctionReader, Hooks, JsonlDataProcessor, LinePositioner, MemoryPoints, PointReader,
    PointWriter, Position, PositionData, Positioner, ScanControl, ScanSettings, Scanner,
    SharedPoints, SimpleDataProcessor, StaticPositioner, StreamReadGroup, TcpMessageStream,
    Value, VectorPositioner,
};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::config::{load_config_or_default, AppConfig, PositionMode};

/// Step scan runner
#[derive(Parser, Debug)]
#[command(name = "scan-runner")]
#[command(
    about = "Run a step scan against simulated points and an optional message stream",
    long_about = None
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Plot the configured readable in the terminal when the scan ends
    #[arg(short, long)]
    plot: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config_or_default(args.config.as_deref())?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.console.verbosity.clone());
    initialize_logging(&log_level)?;
    log_startup_info(&config, args.config.as_deref());

    let settings = create_scan_settings(&config);
    let points = create_simulated_points(&config);
    let positioner = create_positioner(&config)?;
    let reader = create_reader(&config, &settings, points.clone())?;
    let writer = create_writer(&config, points.clone())?;
    let hooks = create_hooks(&config, points)?;
    let processor = RunnerProcessor::new(&config)?;

    let mut scanner = Scanner::new(positioner, reader, processor)
        .with_writer(writer)
        .with_hooks(hooks)
        .with_settings(settings);

    setup_shutdown_handler(scanner.control())?;

    let result = run_and_report(&mut scanner);
    if let Ok(output) = &result {
        if args.plot {
            plot_output(output, config.console.plot_readable);
        }
    }
    result.map(|_| ())
}

/// Everything the runner keeps from a scan
struct ScanOutput {
    positions: Vec<Position>,
    data: Vec<PositionData>,
    file: Option<PathBuf>,
}

/// Keeps the data for plotting and optionally streams it to disk
struct RunnerProcessor {
    memory: SimpleDataProcessor,
    file: Option<JsonlDataProcessor>,
}

impl RunnerProcessor {
    fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let file = if config.output.enabled {
            let path = create_output_file_path(&config.output.path)?;
            info!("Writing scan records to {}", path.display());
            Some(JsonlDataProcessor::new(
                path,
                config.output.buffer_size,
                config.output.final_json,
            ))
        } else {
            None
        };

        Ok(Self {
            memory: SimpleDataProcessor::new(),
            file,
        })
    }
}

impl DataProcessor for RunnerProcessor {
    type Output = ScanOutput;

    fn process(&mut self, position: &Position, data: &PositionData) -> rusty_scan::Result<()> {
        self.memory.process(position, data)?;
        if let Some(file) = &mut self.file {
            file.process(position, data)?;
        }
        Ok(())
    }

    fn data(&mut self) -> rusty_scan::Result<Self::Output> {
        let file = match &mut self.file {
            Some(file) => Some(file.data()?),
            None => None,
        };
        Ok(ScanOutput {
            positions: self.memory.positions().to_vec(),
            data: self.memory.data()?,
            file,
        })
    }
}

// Helper Functions

/// Log startup information
fn log_startup_info(config: &AppConfig, config_path: Option<&Path>) {
    info!("=== Rusty Scan Runner ===");
    match config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: defaults / discovered file"),
    }
    info!(
        "Positions: {:?} | Setpoints: {:?}",
        config.positions.mode, config.points.setpoints
    );
    info!(
        "Measurements per position: {} | Retry limit: {}",
        config.scan.measurements_per_position, config.scan.acquisition_retry_limit
    );
    if config.stream.enabled {
        info!(
            "Stream: {}:{} fields {:?}",
            config.stream.host, config.stream.port, config.stream.fields
        );
    }
}

/// Scan settings with progress reported through the log
fn create_scan_settings(config: &AppConfig) -> ScanSettings {
    config.scan.to_settings().with_progress(|done, total| {
        if total > 0 {
            info!(
                "Progress: {done}/{total} ({:.0}%)",
                done as f64 * 100.0 / total as f64
            );
        }
    })
}

/// In-memory points standing in for the motors, each readback following its setpoint
fn create_simulated_points(config: &AppConfig) -> SharedPoints {
    let mut points = MemoryPoints::new();
    for (index, setpoint) in config.points.setpoints.iter().enumerate() {
        points = points.with_point(setpoint.as_str(), 0.0);
        if let Some(readback) = config.points.readbacks.get(index) {
            points = points.with_link(setpoint.as_str(), readback.as_str());
        }
    }
    for readable in &config.points.readables {
        if !points.contains(readable) {
            warn!("Readable {readable} is not simulated, it will read 0");
            points = points.with_point(readable.as_str(), 0.0);
        }
    }
    points.into_shared()
}

fn create_positioner(
    config: &AppConfig,
) -> Result<Box<dyn Positioner>, Box<dyn std::error::Error>> {
    let positions = &config.positions;
    let positioner: Box<dyn Positioner> = match positions.mode {
        PositionMode::Line => Box::new(LinePositioner::new(
            positions.start.clone(),
            positions.end.clone(),
            positions.steps,
        )?),
        PositionMode::Vector => Box::new(VectorPositioner::new(positions.values.iter().map(
            |values| match values.as_slice() {
                [single] => Value::Float(*single),
                many => Value::from(many.to_vec()),
            },
        ))),
        PositionMode::Static => Box::new(StaticPositioner::new(positions.count)),
    };
    info!("Scan has {} positions", positioner.count());
    Ok(positioner)
}

/// Point readables, a simulated detector and, if enabled, stream fields
fn create_reader(
    config: &AppConfig,
    settings: &ScanSettings,
    points: SharedPoints,
) -> Result<CompositeReader, Box<dyn std::error::Error>> {
    let mut reader = CompositeReader::new();

    if !config.points.readables.is_empty() {
        reader = reader.with_reader(PointReader::new(
            points.clone(),
            config.points.readables.iter().cloned(),
        ));
    }

    let axis = config
        .points
        .readbacks
        .first()
        .or(config.points.setpoints.first())
        .cloned()
        .ok_or("No point to simulate the detector on")?;
    let center = config.points.detector_center;
    let width = config.points.detector_width;
    reader = reader.with_reader(FunctionReader::new().with_function(move || {
        let x = points.lock().get(&axis)?.as_f64()?;
        Ok(Value::Float((-((x - center) / width).powi(2)).exp()))
    }));

    if config.stream.enabled {
        let stream = TcpMessageStream::connect(&config.stream.host, config.stream.port)?
            .spawn_background_reader(config.stream.buffer_capacity)?;
        let shared = settings.stream_reader(stream).into_shared();
        let fields = config.stream.fields.iter().map(|f| FieldSpec::new(f.as_str())).collect();
        let monitors = config.stream.monitors.iter().map(|f| FieldSpec::new(f.as_str())).collect();
        let group = StreamReadGroup::new(shared, fields)
            .with_monitors(monitors, config.stream.append_monitors);
        reader = reader.with_reader(group);
    }

    info!("Reading {} sources per measurement", reader.len());
    Ok(reader)
}

fn create_writer(
    config: &AppConfig,
    points: SharedPoints,
) -> Result<PointWriter, Box<dyn std::error::Error>> {
    let writer = PointWriter::new(points, config.points.setpoints.iter().cloned());
    if config.points.readbacks.is_empty() {
        return Ok(writer);
    }
    Ok(writer
        .with_readbacks(config.points.readbacks.iter().cloned(), config.points.tolerance)?
        .with_move_timeout(
            Duration::from_millis(config.points.move_timeout_ms),
            Duration::from_millis(10),
        ))
}

fn create_hooks(
    config: &AppConfig,
    points: SharedPoints,
) -> Result<Hooks, Box<dyn std::error::Error>> {
    let mut hooks = Hooks::new().with_initialization(|control: &ScanControl| {
        info!("Scan initialized (status {})", control.status());
        Ok(())
    });

    if config.points.restore {
        let ids: Vec<&str> = config.points.setpoints.iter().map(String::as_str).collect();
        hooks.finalization = Some(sequence(vec![restore_points(points, &ids)?]));
    }

    Ok(hooks)
}

/// Setup Ctrl+C handler for graceful abort
fn setup_shutdown_handler(control: ScanControl) -> Result<(), Box<dyn std::error::Error>> {
    ctrlc::set_handler(move || {
        info!("Ctrl+C received - aborting after the current position...");
        control.abort();
    })?;
    Ok(())
}

/// Run the scan and report results
fn run_and_report<P: Positioner>(
    scanner: &mut Scanner<P, RunnerProcessor>,
) -> Result<ScanOutput, Box<dyn std::error::Error>> {
    info!("Starting scan...");

    match scanner.run() {
        Ok(output) => {
            info!(
                "✓ Scan {} with {} positions",
                scanner.status().to_string().to_lowercase(),
                output.data.len()
            );
            if let Some(file) = &output.file {
                info!("Records written to {}", file.display());
            }
            Ok(output)
        }
        Err(e) => {
            error!("✗ Scan failed: {}", e);
            Err(e.into())
        }
    }
}

fn plot_output(output: &ScanOutput, readable: usize) {
    let title = format!("Readable {readable} over {} positions", output.positions.len());
    if let Err(e) = plot_scan(&output.positions, &output.data, readable, Some(&title)) {
        warn!("Could not plot scan: {e}");
    }
}

/// Initialize logging with configurable level
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}

fn create_output_file_path(output_path: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let output_dir = PathBuf::from(output_path);
    fs::create_dir_all(&output_dir)?;

    let filename = format!("scan_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S"));
    Ok(output_dir.join(filename))
}
