//! workloop CLI: run a message executor fed from stdin, or check a config.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use workloop::codec::MessageTypeRegistry;
use workloop::components::Components;
use workloop::config::{Config, ServiceConfig};
use workloop::dispatch::{HandlerRegistry, MessageHandler};
use workloop::model::Message;
use workloop::queue::Pushed;
use workloop::telemetry::{TelemetryConfig, init_telemetry};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "workloop", about = "Priority-lane message queue and worker loop")]
struct Cli {
    /// Component config (TOML). Falls back to WORKLOOP_CONFIG, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read JSON lines from stdin and dispatch them until Ctrl-C or EOF
    Run {
        /// How long a producer waits for room in a full queue (ms); waits forever if omitted
        #[arg(long)]
        max_wait_ms: Option<u64>,
    },
    /// Validate the config and print the effective settings
    Config,
}

/// One line of input: `{"kind": "ping", "priority": 1, "payload": {"seq": 7}}`.
#[derive(Debug, Deserialize)]
struct InputLine {
    kind: String,
    #[serde(default)]
    priority: usize,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Ping {
    seq: u64,
}

#[derive(Debug, Deserialize)]
struct Text {
    body: String,
}

#[derive(Debug)]
enum DemoMessage {
    Ping(Ping),
    Text(Text),
}

impl Message for DemoMessage {
    fn kind(&self) -> &str {
        match self {
            DemoMessage::Ping(_) => "ping",
            DemoMessage::Text(_) => "text",
        }
    }
}

struct LogHandler;

impl MessageHandler<DemoMessage> for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&self, message: &DemoMessage) -> workloop::Result<()> {
        match message {
            DemoMessage::Ping(ping) => info!(seq = ping.seq, "ping"),
            DemoMessage::Text(text) => info!(body = %text.body, "text"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let env = Config::from_env()?;

    let config_path = cli.config.or_else(|| env.config_path.clone());
    let service_config = match &config_path {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    match cli.command {
        Command::Config => cmd_config(&service_config),
        Command::Run { max_wait_ms } => cmd_run(env, service_config, max_wait_ms).await,
    }
}

fn cmd_config(config: &ServiceConfig) -> anyhow::Result<()> {
    config.validate()?;

    let queue = &config.queue;
    println!("[queue]          enabled={}", queue.enabled);
    println!("  name:          {}", queue.name);
    println!("  max size:      {}", queue.max_queue_size);
    println!("  priorities:    {}", queue.priorities_count);

    for (title, section) in [
        ("[executor]", &config.executor),
        ("[simple_worker]", &config.simple_worker),
    ] {
        println!("{title:<16} enabled={}", section.enabled);
        println!("  name:          {}", section.name);
        println!("  wait on stop:  {}ms", section.wait_on_stop_ms);
        println!("  wait restart:  {}ms", section.wait_on_restart_ms);
        println!("  min iteration: {}ms", section.min_time_per_iteration_ms);
        println!("  liveness:      {}ms", section.timeout_runner_life_ms);
        println!("  stats every:   {}ms", section.print_statistics_every_ms);
    }
    Ok(())
}

async fn cmd_run(
    env: Config,
    mut config: ServiceConfig,
    max_wait_ms: Option<u64>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: env.otel_endpoint.clone(),
        service_name: env.service_name.clone(),
        log_level: env.log_level.clone(),
    })?;

    // This command is pointless without an executor.
    config.executor.enabled = true;
    config.queue.enabled = true;

    let mut types = MessageTypeRegistry::<DemoMessage>::new();
    types
        .register("ping", DemoMessage::Ping)?
        .register("text", DemoMessage::Text)?;
    info!(kinds = ?types.kinds(), "message types registered");

    let handlers = HandlerRegistry::<DemoMessage>::new().with(Arc::new(LogHandler));
    let components = Components::build(&config, handlers)?;
    let queue = components
        .queue
        .clone()
        .ok_or_else(|| anyhow::anyhow!("queue is not configured"))?;
    components.start();

    let max_wait = max_wait_ms.map(Duration::from_millis);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("end of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let input: InputLine = match serde_json::from_str(&line) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "skipping malformed line");
                continue;
            }
        };
        let message = match types.decode(&input.kind, input.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "skipping undecodable message");
                continue;
            }
        };

        match queue.offer(input.priority, message, max_wait).await {
            Ok(Pushed::Accepted) => {}
            Ok(Pushed::TimedOut(message)) => {
                warn!(kind = message.kind(), "queue full, message dropped")
            }
            Err(e) => warn!(error = %e, "push rejected"),
        }
    }

    // Give the executor a chance to drain what is already queued.
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(left = queue.size(), "queue not drained before shutdown");
    }

    let shutdown = components.stop().await;
    info!(?shutdown, "executor stopped");
    Ok(())
}
