use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use poscan::{
    platform_backend, ConsumerError, DeviceError, KeySource, PipelineEvent, PoscanConfig,
    ScanConsumer, ScanEvent, ScanSessionController, TerminalKeySource,
};

#[derive(Parser, Debug)]
#[command(name = "poscan")]
#[command(about = "Barcode capture for point-of-sale terminals")]
#[command(version)]
#[command(long_about = "Captures product codes from keyboard-wedge scanners or a camera, \
validates them and hands them to a product lookup. Ships a demo lookup backed by a TOML \
catalog so the pipeline can be exercised from a terminal.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "poscan.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without scanning")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// List capture devices and exit
    #[arg(long, help = "List camera devices and exit")]
    list_devices: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Input to scan from
    #[arg(long, value_enum, default_value_t = Mode::Keyboard)]
    mode: Mode,

    /// Camera id, or the evdev node of a wedge scanner in keyboard mode
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,

    /// TOML catalog of known codes; unknown codes are rejected
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Print accepted scans as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Keyboard,
    Camera,
}

#[derive(Debug, Default, Deserialize)]
struct Catalog {
    #[serde(default)]
    products: HashMap<String, String>,
}

/// Demo lookup: resolves codes found in the catalog, or every code without one
struct CatalogConsumer {
    catalog: Option<Catalog>,
    json: bool,
}

/// Terminal may be in raw mode, so end lines explicitly
fn emit(line: &str) {
    print!("{}\r\n", line);
}

#[async_trait]
impl ScanConsumer for CatalogConsumer {
    async fn on_scan(&self, event: &ScanEvent) -> std::result::Result<(), ConsumerError> {
        let product = match &self.catalog {
            Some(catalog) => match catalog.products.get(&event.code) {
                Some(name) => Some(name.as_str()),
                None => return Err(ConsumerError::new(format!("Unknown product {}", event.code))),
            },
            None => None,
        };

        if self.json {
            let line = serde_json::json!({
                "code": event.code,
                "source": event.source,
                "format": event.format,
                "product": product,
                "observed_at": event.observed_at,
            });
            emit(&line.to_string());
        } else {
            emit(&format!("{}  {}", event.code, product.unwrap_or("")));
        }
        Ok(())
    }

    fn on_error(&self, error: &DeviceError) {
        eprint!("✗ {}\r\n", error.user_message());
    }

    fn on_close(&self) {
        info!("Session closed after a successful scan");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting poscan v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match PoscanConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let catalog = match &args.catalog {
        Some(path) => Some(load_catalog(path)?),
        None => None,
    };
    let consumer = Arc::new(CatalogConsumer {
        catalog,
        json: args.json,
    });

    let backend = platform_backend(&config.camera);
    let session = ScanSessionController::new(&config, backend, consumer);

    if args.list_devices {
        for device in session.list_devices()? {
            println!(
                "{}\t{}{}",
                device.id,
                device.label,
                if device.is_preferred_back { "\t(default)" } else { "" }
            );
        }
        return Ok(());
    }

    let interrupt = CancellationToken::new();
    let mut events = session.subscribe();

    match args.mode {
        Mode::Camera => {
            let device = args.device.as_deref().or(config.camera.device.as_deref());
            let selected = session.start_camera(device)?;
            info!("Scanning with camera {} ({})", selected.label, selected.id);
        }
        Mode::Keyboard => {
            let source = key_source(args.device.as_deref(), interrupt.clone())?;
            session.start_keystrokes(source)?;
            info!("Listening for scans, Ctrl-C to quit");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = interrupt.cancelled() => break,
            event = events.recv() => match event {
                Ok(PipelineEvent::Closed { .. }) => break,
                Ok(PipelineEvent::ScanFailed { message, .. }) => eprint!("✗ {}\r\n", message),
                Ok(PipelineEvent::ValidationFailed { message, .. }) => eprint!("✗ {}\r\n", message),
                Ok(_) => {}
                Err(e) => warn!("Event stream lagged: {}", e),
            },
        }
    }

    session.cancel();
    info!("poscan stopped");
    Ok(())
}

#[cfg(all(target_os = "linux", feature = "wedge"))]
fn key_source(device: Option<&str>, interrupt: CancellationToken) -> Result<Box<dyn KeySource>> {
    let source: Box<dyn KeySource> = match device {
        Some(path) => Box::new(poscan::WedgeKeySource::new(path)),
        None => Box::new(TerminalKeySource::new(interrupt)),
    };
    Ok(source)
}

#[cfg(not(all(target_os = "linux", feature = "wedge")))]
fn key_source(device: Option<&str>, interrupt: CancellationToken) -> Result<Box<dyn KeySource>> {
    if let Some(path) = device {
        anyhow::bail!("Reading {} directly needs a build with the `wedge` feature", path);
    }
    Ok(Box::new(TerminalKeySource::new(interrupt)))
}

fn load_catalog(path: &Path) -> Result<Catalog> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    let catalog: Catalog = toml::from_str(&text)
        .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
    info!("Loaded {} catalog entries", catalog.products.len());
    Ok(catalog)
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("poscan={}", log_level)));

    // logs go to stderr so scan output on stdout stays clean
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# poscan configuration file");
    println!("# Every option with its default value");
    println!();
    println!("{}", toml::to_string_pretty(&PoscanConfig::default())?);
    Ok(())
}
