//! # MQ Gateway CLI
//!
//! Command-line interface for the messaging gateway.
//!
//! This module provides CLI commands for:
//! - Validating and printing the resolved configuration
//! - Running each interaction pattern end to end against an in-process
//!   transport

use clap::{Parser, Subcommand};
use mq_gateway_core::{
    ConfigurationError, Gateway, GatewayConfig, GatewayError, GatewayMessage, InMemoryTransport,
    LatestMessage, MessageEnvelope,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Largest quantity accepted by the demonstrations, in either sign
pub const MAX_DEMO_QUANTITY: i64 = 1000;

/// Poll rounds a demonstration waits for deliveries before giving up
const DEMO_WAIT_ROUNDS: usize = 50;

// ============================================================================
// CLI Structure
// ============================================================================

/// MQ Gateway CLI - point-to-point, publish/subscribe and request/response over one gateway
#[derive(Parser, Debug)]
#[command(name = "mq-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Session-oriented messaging gateway")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MQGW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, validate and print the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Run an interaction pattern end to end against an in-process transport
    Demo {
        /// Pattern to run
        #[arg(value_enum)]
        pattern: DemoPattern,

        /// Queue used by point-to-point and request/response
        #[arg(short, long, default_value = "DEV.QUEUE.1")]
        queue: String,

        /// Topic used by publish/subscribe
        #[arg(short, long, default_value = "prices")]
        topic: String,

        /// Message text
        #[arg(short, long, default_value = "hello")]
        message: String,

        /// Number of messages
        #[arg(short = 'n', long, default_value = "3", allow_hyphen_values = true)]
        quantity: i64,
    },
}

/// Configuration format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

/// Interaction patterns available as demonstrations
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemoPattern {
    /// Put messages on a queue, then get them back
    PointToPoint,
    /// Subscribe, publish and read the subscriber's stash
    PublishSubscribe,
    /// Send requests, answer them and collect the replies
    RequestResponse,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output rendering failed: {message}")]
    Render { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Gateway(GatewayError::Configuration(_)) => 1,
            Self::Gateway(_) => 2,
            Self::Render { .. } => 2,
            Self::InvalidArgument { .. } => 3,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli);

    let output = execute(cli).await?;
    println!("{}", output);
    Ok(())
}

/// Run a parsed command and return what it prints
pub async fn execute(cli: Cli) -> Result<String, CliError> {
    let config = GatewayConfig::load(cli.config.as_deref())?;
    debug!(queue_manager = %config.connection.queue_manager, "Configuration loaded");

    match cli.command {
        Commands::Config { format } => render_config(&config, &format),
        Commands::Demo {
            pattern,
            queue,
            topic,
            message,
            quantity,
        } => {
            validate_quantity(quantity)?;
            run_demo(config, pattern, &queue, &topic, &message, quantity).await
        }
    }
}

/// Initialize logging based on CLI arguments.
///
/// `RUST_LOG` takes precedence over `--log-level`.
fn initialize_logging(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "mq_gateway_core={level},mq_gateway_cli={level}",
            level = cli.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

fn validate_quantity(quantity: i64) -> Result<(), CliError> {
    if quantity.abs() > MAX_DEMO_QUANTITY {
        return Err(CliError::InvalidArgument {
            arg: "quantity".to_string(),
            message: format!("must be within +/-{}", MAX_DEMO_QUANTITY),
        });
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Render the configuration with the password redacted
pub fn render_config(config: &GatewayConfig, format: &ConfigFormat) -> Result<String, CliError> {
    let mut shown = config.clone();
    shown.connection.credentials = shown.connection.credentials.redacted();

    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&shown).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(&shown).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string_pretty(&shown).map_err(|e| e.to_string()),
    };
    rendered.map_err(|message| CliError::Render { message })
}

/// Shorten poll delays so a demonstration finishes promptly
fn demo_config(mut config: GatewayConfig) -> GatewayConfig {
    config.polling.subscriber_min_delay_ms = config.polling.subscriber_min_delay_ms.min(50);
    config.polling.subscriber_max_delay_ms = config.polling.subscriber_max_delay_ms.min(100);
    config.polling.reply_interval_ms = config.polling.reply_interval_ms.min(100);
    config
}

async fn run_demo(
    config: GatewayConfig,
    pattern: DemoPattern,
    queue: &str,
    topic: &str,
    message: &str,
    quantity: i64,
) -> Result<String, CliError> {
    let config = demo_config(config);
    let wait = Duration::from_millis(
        config
            .polling
            .subscriber_max_delay_ms
            .max(config.polling.reply_interval_ms),
    );
    let gateway = Gateway::new(Arc::new(InMemoryTransport::new()), config)?;
    info!(pattern = ?pattern, "Running demonstration");

    let result = match pattern {
        DemoPattern::PointToPoint => point_to_point(&gateway, queue, message, quantity).await,
        DemoPattern::PublishSubscribe => {
            publish_subscribe(&gateway, topic, message, quantity, wait).await
        }
        DemoPattern::RequestResponse => {
            request_response(&gateway, queue, message, quantity, wait).await
        }
    };

    gateway.shutdown().await;
    result.map(|lines| lines.join("\n"))
}

fn describe(envelope: &MessageEnvelope) -> String {
    match GatewayMessage::from_envelope(envelope) {
        Some(document) => format!("{} ({})", document.message, document.count),
        None => envelope.payload().to_text(),
    }
}

async fn point_to_point(
    gateway: &Gateway,
    queue: &str,
    message: &str,
    quantity: i64,
) -> Result<Vec<String>, CliError> {
    let ids = gateway
        .put("demo-producer", queue, message, quantity, &HashMap::new())
        .await?;
    let mut lines = vec![format!("put {} message(s) on {}", ids.len(), queue)];

    let received = gateway.get("demo-consumer", queue, quantity, None).await?;
    lines.push(format!("got {} message(s) from {}", received.len(), queue));
    lines.extend(received.iter().map(|m| format!("  {}", describe(m))));
    Ok(lines)
}

async fn publish_subscribe(
    gateway: &Gateway,
    topic: &str,
    message: &str,
    quantity: i64,
    wait: Duration,
) -> Result<Vec<String>, CliError> {
    gateway.subscribe("demo-subscriber", topic).await?;
    let report = gateway
        .publish("demo-publisher", topic, message, quantity)
        .await?;
    let mut lines = vec![format!(
        "published {} message(s) to {} ({} without subscribers)",
        report.published, topic, report.without_subscribers
    )];

    let expected = mq_gateway_core::normalize_quantity(quantity) as usize;
    let mut received = Vec::new();
    for _ in 0..DEMO_WAIT_ROUNDS {
        if received.len() >= expected {
            break;
        }
        match gateway.latest_message("demo-subscriber", topic).await? {
            LatestMessage::Message(envelope) => received.push(envelope),
            LatestMessage::Empty | LatestMessage::Subscribed => tokio::time::sleep(wait).await,
        }
    }

    lines.push(format!("subscriber received {} message(s)", received.len()));
    lines.extend(received.iter().map(|m| format!("  {}", describe(m))));
    Ok(lines)
}

async fn request_response(
    gateway: &Gateway,
    queue: &str,
    message: &str,
    quantity: i64,
    wait: Duration,
) -> Result<Vec<String>, CliError> {
    let descriptor = gateway
        .request("demo-requestor", queue, message, quantity, None)
        .await?;
    let mut lines = vec![format!(
        "sent {} request(s) to {}, replies to {}",
        descriptor.request_ids.len(),
        queue,
        descriptor.name
    )];

    for _ in 0..descriptor.request_ids.len() {
        let outcome = gateway
            .process_next_request("demo-responder", queue, None, |request| {
                Ok::<_, String>(format!("reply to {}", describe(request)))
            })
            .await?;
        debug!(outcome = ?outcome, "Request processed");
    }

    let mut replies = Vec::new();
    for _ in 0..DEMO_WAIT_ROUNDS {
        if replies.len() >= descriptor.request_ids.len() {
            break;
        }
        match gateway.reply_for("demo-requestor", &descriptor.name).await? {
            Some(reply) => replies.push(reply),
            None => tokio::time::sleep(wait).await,
        }
    }

    lines.push(format!("received {} reply(ies)", replies.len()));
    lines.extend(replies.iter().map(|m| format!("  {}", describe(m))));
    Ok(lines)
}
