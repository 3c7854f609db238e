use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mqttgen::broker::{BrokerClient, InboundMessage, MemoryBroker, MqttBroker, QoS};
use mqttgen::config::{BrokerConfig, BrokerOverrides, Config, MiscConfig};
use mqttgen::replay::{self, DEFAULT_DELIMITER, ReplayOptions};
use mqttgen::{CommandRegistry, Evaluator, Scheduler, SchedulerOptions};

/// mqttgen - Synthetic telemetry generator for MQTT
#[derive(Parser)]
#[command(name = "mqttgen", version, about)]
struct Cli {
    /// Configuration file, shorthand for `mqttgen run <CONFIG>`
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv), overrides `logging_level`
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Overrides for the `mqtt` configuration section
#[derive(clap::Args)]
struct BrokerArgs {
    /// Broker host
    #[arg(long, env = "MQTTGEN_HOST", global = true)]
    host: Option<String>,

    /// Broker port
    #[arg(long, env = "MQTTGEN_PORT", global = true)]
    port: Option<u16>,

    /// Broker username
    #[arg(long, env = "MQTTGEN_USERNAME", global = true)]
    username: Option<String>,

    /// Broker password
    #[arg(long, env = "MQTTGEN_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
}

impl From<BrokerArgs> for BrokerOverrides {
    fn from(args: BrokerArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            username: args.username,
            password: args.password,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the broker and generate messages until Ctrl-C
    Run {
        /// Configuration file (.json, .yaml, .yml or .toml)
        config: PathBuf,
        /// Log publications instead of connecting to a broker
        #[arg(long)]
        dry_run: bool,
        /// Seed for the random generators
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Validate a configuration and list its topics
    Check {
        /// Configuration file
        config: PathBuf,
    },
    /// Replay a recorded message flow
    Play {
        /// Flow file, one `<timestamp> <topic> <payload>` per line
        file: PathBuf,
        /// Column separator
        #[arg(short, long, default_value = DEFAULT_DELIMITER)]
        delimiter: String,
        /// Publish back-to-back instead of reproducing recorded timing
        #[arg(long)]
        no_timing: bool,
        /// Publication QoS
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
    },
}

impl Command {
    fn config_path(&self) -> Option<&Path> {
        match self {
            Self::Run { config, .. } | Self::Check { config } => Some(config),
            Self::Play { .. } => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let command = match (cli.command, cli.config) {
        (Some(command), _) => command,
        (None, Some(config)) => Command::Run {
            config,
            dry_run: false,
            seed: None,
        },
        (None, None) => {
            let _ = Cli::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    let config = command.config_path().map(Config::load).transpose();
    let misc = config.as_ref().ok().and_then(|c| c.as_ref().map(|c| &c.misc));
    if let Err(e) = init_logging(cli.verbose, misc) {
        eprintln!("mqttgen: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = match config {
        Ok(config) => run(command, config, &cli.broker.into()).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Set up the tracing subscriber
///
/// `-v` flags win over the configured level; a configured log file receives
/// the output instead of stderr.
fn init_logging(verbose: u8, misc: Option<&MiscConfig>) -> anyhow::Result<()> {
    let filter = match verbose {
        0 => format!(
            "{},rumqttc=warn",
            misc.map_or_else(|| "info".to_string(), MiscConfig::level_directive)
        ),
        1 => "info,mqttgen=debug,rumqttc=warn".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_new(&filter).with_context(|| format!("invalid log level \"{filter}\""))?;

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if let Some(path) = misc.and_then(MiscConfig::log_file) {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        subscriber.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

async fn run(
    command: Command,
    config: Option<Config>,
    overrides: &BrokerOverrides,
) -> anyhow::Result<()> {
    match (command, config) {
        (Command::Run { dry_run, seed, .. }, Some(config)) => {
            cmd_run(config, overrides, dry_run, seed).await
        }
        (Command::Check { .. }, Some(config)) => cmd_check(&config),
        (
            Command::Play {
                file,
                delimiter,
                no_timing,
                qos,
            },
            _,
        ) => cmd_play(&file, &delimiter, !no_timing, qos, overrides).await,
        (Command::Run { .. } | Command::Check { .. }, None) => {
            anyhow::bail!("no configuration loaded")
        }
    }
}

/// Generate messages until Ctrl-C
async fn cmd_run(
    config: Config,
    overrides: &BrokerOverrides,
    dry_run: bool,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let Config {
        mut broker,
        misc,
        topics,
    } = config;
    broker.apply(overrides);

    let commands = CommandRegistry::build(&topics)?;
    let options = SchedulerOptions {
        interval: misc.interval()?,
        qos: broker.qos,
    };
    let evaluator = seed.map_or_else(Evaluator::new, Evaluator::with_seed);

    tracing::info!(topics = topics.len(), dry_run, "starting mqttgen");

    if dry_run {
        let (memory, _inject, inbound) = MemoryBroker::channel();
        let scheduler = Scheduler::new(topics, commands, memory, options).with_evaluator(evaluator);
        return serve(scheduler, inbound).await;
    }

    let (mqtt, inbound) = MqttBroker::connect(&broker).await?;
    let scheduler = Scheduler::new(topics, commands, mqtt, options).with_evaluator(evaluator);
    serve(scheduler, inbound).await
}

async fn serve<B: BrokerClient>(
    mut scheduler: Scheduler<B>,
    inbound: mpsc::Receiver<InboundMessage>,
) -> anyhow::Result<()> {
    if let Err(e) = scheduler.subscribe().await {
        if let Err(close) = scheduler.broker().disconnect().await {
            tracing::warn!(error = %close, "disconnect failed");
        }
        return Err(e.into());
    }

    scheduler.run(inbound, shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl-C, never if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c, stop the process to exit");
        std::future::pending::<()>().await;
    }
}

/// Validate configuration and print its topics
fn cmd_check(config: &Config) -> anyhow::Result<()> {
    config.misc.interval()?;
    let commands = CommandRegistry::build(&config.topics)?;

    println!("Topics ({}):", config.topics.len());
    for spec in &config.topics {
        let mut flags = Vec::new();
        if spec.once {
            flags.push("once");
        } else if !spec.sync {
            flags.push("on request");
        }
        if spec.retain {
            flags.push("retain");
        }
        println!(
            "  {:<20} {}{}",
            spec.name,
            spec.topic.as_literal_str().unwrap_or("<templated>"),
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        );
    }

    println!("Commands ({}):", commands.len());
    for (topic, binding) in commands.iter() {
        let owner = &config.topics[binding.owner.topic];
        println!(
            "  {topic:<20} {:<4} {}.{} {}",
            binding.kind.label(),
            owner.name,
            binding.owner.tree,
            binding.owner.path
        );
    }

    println!("\nConfiguration OK");
    Ok(())
}

/// Replay a flow file
async fn cmd_play(
    file: &Path,
    delimiter: &str,
    time_representative: bool,
    qos: u8,
    overrides: &BrokerOverrides,
) -> anyhow::Result<()> {
    let entries = replay::load_flow(file, delimiter)?;
    let options = ReplayOptions {
        time_representative,
        qos: QoS::try_from(qos).map_err(anyhow::Error::msg)?,
    };

    let mut broker = BrokerConfig {
        client_id: "mqttplay".to_string(),
        ..BrokerConfig::default()
    };
    broker.apply(overrides);

    let (mqtt, _inbound) = MqttBroker::connect(&broker).await?;
    let outcome = replay::replay(&entries, &mqtt, options).await;
    mqtt.disconnect().await?;

    let sent = outcome?;
    println!("{sent} messages published");
    Ok(())
}
