//! Heart-rate zone worker CLI
//!
//! Runs the zone classification worker, and optionally the HTTP edge,
//! against the configured broker.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use heart_rate_zones::{
    config::Config,
    core::{BiometricReading, DeviceId, Zone},
    stream::{
        Broker, CancelToken, MemoryBroker, MemoryConsumer, OutgoingMessage, StreamConsumer,
        StreamProducer,
    },
    worker::{create_shared_stats, SharedWorkerStats, Worker, ZoneHandler},
    WorkerError, VERSION,
};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "heart-zones")]
#[command(version = VERSION)]
#[command(about = "Event-driven heart-rate zone classification worker", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the zone worker (and the HTTP edge when built with `server`)
    Run {
        /// Run only the worker, without the HTTP edge
        #[arg(long)]
        no_gateway: bool,
    },

    /// Run only the HTTP edge, publishing readings to the configured broker
    #[cfg(feature = "server")]
    Gateway,

    /// Feed readings from a JSON Lines file through an in-process worker
    Replay {
        /// File with one JSON reading per line
        #[arg(long, short)]
        input: PathBuf,
    },

    /// Classify a single heart rate with the configured thresholds
    Classify {
        /// Heart rate in beats per minute
        #[arg(long)]
        heart_rate: u32,

        /// Previously recorded zone (e.g. zone2)
        #[arg(long)]
        previous: Option<String>,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heart_rate_zones=info,heart_zones=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Run { no_gateway } => cmd_run(&config, no_gateway),
        #[cfg(feature = "server")]
        Commands::Gateway => cmd_gateway(&config),
        Commands::Replay { input } => cmd_replay(&config, &input),
        Commands::Classify {
            heart_rate,
            previous,
        } => cmd_classify(&config, heart_rate, previous.as_deref()),
        Commands::Config { init } => cmd_config(&config, cli.config.as_deref(), init),
    });

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf).unwrap_or_else(Config::config_path)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    loaded.with_context(|| format!("loading configuration from {:?}", config_file(path)))
}

/// Spawn the worker loop on its own thread.
fn spawn_worker(
    config: &Config,
    broker: &Broker,
    stats: SharedWorkerStats,
    cancel: &CancelToken,
) -> anyhow::Result<JoinHandle<Result<u64, WorkerError>>> {
    let handler = ZoneHandler::new(
        config.classifier.build(),
        broker.producer()?,
        config.output_topic.clone(),
    )
    .with_stats(stats.clone());
    let mut worker =
        Worker::new(broker.consumer()?, handler, config.input_topic.clone()).with_stats(stats);

    let cancel = cancel.clone();
    thread::Builder::new()
        .name("zone-worker".to_string())
        .spawn(move || worker.run(&cancel))
        .context("spawning worker thread")
}

fn join_worker(handle: JoinHandle<Result<u64, WorkerError>>) -> anyhow::Result<u64> {
    handle
        .join()
        .map_err(|_| anyhow!("worker thread panicked"))?
        .context("zone worker faulted")
}

#[cfg(feature = "server")]
struct Gateway {
    runtime: tokio::runtime::Runtime,
    shutdown: tokio::sync::oneshot::Sender<()>,
}

#[cfg(feature = "server")]
impl Gateway {
    fn start(config: &Config, broker: &Broker) -> anyhow::Result<Self> {
        use heart_rate_zones::server::{self, ServerConfig};

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("creating async runtime")?;
        let (addr, shutdown) =
            runtime.block_on(server::run(ServerConfig::from_config(config), broker.producer()?))?;
        println!("  Client gateway: http://{addr}/ClientGateway/Biometrics");
        Ok(Self { runtime, shutdown })
    }

    fn stop(self) {
        let _ = self.shutdown.send(());
        self.runtime.shutdown_timeout(Duration::from_secs(5));
    }
}

fn print_banner(config: &Config, broker: &Broker) {
    println!("Heart-Rate Zone Worker v{VERSION}");
    println!();
    println!("  Broker: {}", broker.address());
    println!("  Input topic: {}", config.input_topic);
    println!("  Output topic: {}", config.output_topic);
}

fn cmd_run(config: &Config, no_gateway: bool) -> anyhow::Result<()> {
    let broker = Broker::from_config(config)?;
    print_banner(config, &broker);
    println!("  Consumer group: {}", config.consumer_group);
    println!("  Reach policy: {:?}", config.classifier.policy);

    let stats = create_shared_stats();
    let cancel = CancelToken::new();

    // Set up Ctrl+C handler
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel()).context("setting Ctrl+C handler")?;

    let worker = spawn_worker(config, &broker, stats.clone(), &cancel)?;

    #[cfg(feature = "server")]
    let gateway = if no_gateway {
        None
    } else {
        Some(Gateway::start(config, &broker)?)
    };

    #[cfg(not(feature = "server"))]
    if !no_gateway {
        println!("  Client gateway: disabled (built without the `server` feature)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let outcome = join_worker(worker);

    #[cfg(feature = "server")]
    if let Some(gateway) = gateway {
        gateway.stop();
    }

    println!();
    println!("{}", stats.summary());
    outcome.map(|_| ())
}

#[cfg(feature = "server")]
fn cmd_gateway(config: &Config) -> anyhow::Result<()> {
    let broker = Broker::from_config(config)?;
    if broker.is_in_process() {
        tracing::warn!(
            "Gateway alone on {} publishes to this process only; use a kafka:// address",
            broker.address()
        );
    }
    print_banner(config, &broker);

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel()).context("setting Ctrl+C handler")?;

    let gateway = Gateway::start(config, &broker)?;
    println!();
    println!("Press Ctrl+C to stop");

    while !cancel.wait_timeout(Duration::from_secs(1)) {}
    gateway.stop();
    Ok(())
}

fn cmd_replay(config: &Config, input: &Path) -> anyhow::Result<()> {
    // Replays stay local whatever broker is configured.
    let memory = MemoryBroker::default();
    let broker = Broker::memory(memory.clone(), config.poll_interval);
    let producer = memory.producer();

    let content =
        std::fs::read_to_string(input).with_context(|| format!("reading {input:?}"))?;
    let mut produced = 0u64;
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let reading: BiometricReading = serde_json::from_str(line)
            .with_context(|| format!("{input:?} line {}", index + 1))?;
        producer.produce(
            &config.input_topic,
            OutgoingMessage::json(reading.key(), &reading)?,
        )?;
        produced += 1;
    }
    tracing::info!("Queued {} readings from {:?}", produced, input);

    let mut events = memory.consumer(config.poll_interval);
    events.subscribe(&config.output_topic)?;

    let stats = create_shared_stats();
    let cancel = CancelToken::new();
    let worker = spawn_worker(config, &broker, stats.clone(), &cancel)?;

    while stats.messages_consumed() < produced && !worker.is_finished() {
        print_events(&mut events, Duration::from_millis(50))?;
    }
    cancel.cancel();
    let outcome = join_worker(worker);

    print_events(&mut events, Duration::from_millis(10))?;
    events.close()?;

    eprintln!("{}", stats.summary());
    outcome.map(|_| ())
}

/// Print queued zone events as JSON lines until `wait` passes without one.
fn print_events(events: &mut MemoryConsumer, wait: Duration) -> anyhow::Result<()> {
    while let Some(message) = events.poll(wait)? {
        println!("{}", String::from_utf8_lossy(&message.payload));
    }
    Ok(())
}

fn cmd_classify(config: &Config, heart_rate: u32, previous: Option<&str>) -> anyhow::Result<()> {
    let previous = previous
        .map(|p| Zone::parse(p).ok_or_else(|| anyhow!("unknown zone {p:?}")))
        .transpose()?;

    let classifier = config.classifier.build();
    let reading = BiometricReading::new(DeviceId::new("cli"), heart_rate, chrono::Utc::now());
    let classification = classifier.classify(&reading, previous)?;

    match classification.zone {
        Some(zone) => {
            let event = classifier.event_for(&reading, zone);
            println!(
                "{} bpm -> {} (lower bound {}, reached: {})",
                heart_rate, zone, event.threshold, classification.reached
            );
        }
        None => println!("{heart_rate} bpm is below every configured zone"),
    }
    Ok(())
}

fn cmd_config(config: &Config, path: Option<&Path>, init: bool) -> anyhow::Result<()> {
    let path = config_file(path);
    if init {
        config
            .save_to(&path)
            .with_context(|| format!("writing configuration to {path:?}"))?;
        println!("Wrote {path:?}");
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
