//! MQTT Chat - Main Entry Point
//!
//! Composition root for one chat session: builds the MQTT transport, hands it
//! to a session manager, sends each stdin line and prints the conversation.

use clap::Parser;
use mqtt_chat::config::{ChatConfig, ConfigError, MqttSection, SessionConfig, DEFAULT_MQTT_PORT};
use mqtt_chat::observability::{init_default_logging, init_logging, metrics, LogFormat};
use mqtt_chat::protocol::{Direction, LogEntry};
use mqtt_chat::session::{LogObserver, SessionEvent, SessionManager, SessionState};
use mqtt_chat::transport::MqttTransport;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, Level};

/// Peer-to-peer chat over an MQTT topic
#[derive(Parser, Debug)]
#[command(name = "mqtt-chat")]
#[command(about = "Exchange chat messages with a peer over an MQTT topic")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker host
    #[arg(long, env = "MQTT_CHAT_HOST")]
    host: Option<String>,

    /// Broker port
    #[arg(long, env = "MQTT_CHAT_PORT")]
    port: Option<u16>,

    /// Chat topic shared with the peer
    #[arg(short, long, env = "MQTT_CHAT_TOPIC")]
    topic: Option<String>,

    /// Broker URL, e.g. mqtt://10.0.0.5:1883 (overrides --host/--port)
    #[arg(long, value_name = "URL")]
    broker: Option<String>,

    /// Print collected metrics as JSON on exit
    #[arg(long)]
    metrics: bool,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    info!("Starting mqtt-chat v{}", env!("CARGO_PKG_VERSION"));

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("error: {e}");
            process::exit(2);
        }
    };

    let result = run_chat(config).await;

    if cli.metrics {
        match serde_json::to_string_pretty(&metrics().snapshot()) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize metrics: {}", e),
        }
    }

    if let Err(e) = result {
        error!("Chat session failed: {}", e);
        eprintln!("error: {e}");
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Merge the optional config file with command-line overrides
fn resolve_config(cli: &Cli) -> Result<ChatConfig, ConfigError> {
    let file = cli
        .config
        .as_deref()
        .map(ChatConfig::load_from_file)
        .transpose()?;

    let (base_session, mqtt) = match file {
        Some(config) => (Some(config.session), config.mqtt),
        None => (None, MqttSection::default()),
    };

    let topic = cli
        .topic
        .clone()
        .or_else(|| base_session.as_ref().map(|s| s.topic.clone()))
        .ok_or_else(|| ConfigError::InvalidConfig("a chat topic is required".to_string()))?;

    let session = match &cli.broker {
        Some(url) => SessionConfig::from_broker_url(url, topic)?,
        None => {
            let host = cli
                .host
                .clone()
                .or_else(|| base_session.as_ref().map(|s| s.host.clone()))
                .ok_or_else(|| {
                    ConfigError::InvalidConfig("a broker host or URL is required".to_string())
                })?;
            let port = cli
                .port
                .or_else(|| base_session.as_ref().map(|s| s.port))
                .unwrap_or(DEFAULT_MQTT_PORT);
            SessionConfig::new(host, port, topic)
        }
    };

    let config = ChatConfig { session, mqtt };
    config.validate()?;
    Ok(config)
}

async fn run_chat(config: ChatConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = SessionManager::new(MqttTransport::new(config.mqtt.clone()));
    let printer = tokio::spawn(print_conversation(manager.observe_log(), io::stdout()));

    manager.configure(config.session.clone()).await?;
    eprintln!(
        "connected to {}:{} on topic {}",
        config.session.host, config.session.port, config.session.topic
    );

    let result = chat_loop(&manager).await;

    info!("Application shutdown initiated");
    manager.shutdown().await;
    // Dropping the manager closes the observer channel once the printer drains it
    drop(manager);
    if let Err(e) = printer.await {
        error!("Conversation printer failed: {}", e);
    }
    result
}

/// Send stdin lines until EOF, Ctrl-C or disconnection
async fn chat_loop(
    manager: &SessionManager<MqttTransport>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = manager.watch_state();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down gracefully...");
                return Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = state.borrow_and_update().clone();
                if let SessionState::Disconnected { reason } = current {
                    return Err(format!("disconnected: {reason}").into());
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input, shutting down");
                    return Ok(());
                };
                if let Err(e) = manager.send(&line).await {
                    if !e.is_local() {
                        error!("Send failed: {}", e);
                    }
                    eprintln!("not sent: {e}");
                }
            }
        }
    }
}

/// Print each new log entry once, in log order, until the observer closes
async fn print_conversation<W: Write>(mut observer: LogObserver, mut out: W) -> W {
    let mut printed = 0;
    while let Some(event) = observer.next().await {
        match event {
            SessionEvent::Snapshot(snapshot) => {
                // A new session restarts the log
                if (snapshot.len() as u64) < printed {
                    printed = 0;
                }
                for entry in snapshot.since(printed) {
                    if let Err(e) = writeln!(out, "{}", format_entry(entry)) {
                        error!("Failed to print conversation: {}", e);
                        return out;
                    }
                }
                printed = snapshot.len() as u64;
            }
            SessionEvent::StateChanged(state) => info!(?state, "Session state changed"),
        }
    }
    out
}

fn format_entry(entry: &LogEntry) -> String {
    let marker = match entry.direction() {
        Direction::Outgoing => ">",
        Direction::Incoming => "<",
    };
    format!("[{}] {} {}", entry.seq, marker, entry.text())
}
