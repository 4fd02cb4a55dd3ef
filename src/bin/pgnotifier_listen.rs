//! pgnotifier-listen - print notifications from PostgreSQL channels.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgnotifier::{Decoder, JsonDecoder, LiteralDecoder, Notifier, NotifierConfig, PgConfig, PgTransport, Value};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PayloadFormat {
    /// Python literal syntax.
    Literal,
    /// JSON.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "pgnotifier-listen", version, about = "Print notifications received on PostgreSQL channels")]
struct Args {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// How to decode notification payloads.
    #[arg(long, value_enum, default_value_t = PayloadFormat::Literal)]
    format: PayloadFormat,

    /// Print payloads as JSON lines instead of literal syntax.
    #[arg(long)]
    json_output: bool,

    /// Channels to listen on.
    #[arg(required = true)]
    channels: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgnotifier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let decoder: Arc<dyn Decoder> = match args.format {
        PayloadFormat::Literal => Arc::new(LiteralDecoder),
        PayloadFormat::Json => Arc::new(JsonDecoder),
    };
    let transport = Arc::new(PgTransport::new(PgConfig::new(args.database_url)));
    let notifier: Notifier = Notifier::with_config(transport, decoder, NotifierConfig::default());

    let json_output = args.json_output;
    notifier.subscribe_channels(
        "pgnotifier-listen".to_string(),
        &args.channels,
        move |_: &String, channel: &str, payload: &Value, pid: i32| {
            if json_output {
                match serde_json::to_string(payload) {
                    Ok(line) => println!("{channel}\t{pid}\t{line}"),
                    Err(e) => tracing::warn!(error = %e, "failed to encode payload"),
                }
            } else {
                println!("{channel}\t{pid}\t{payload}");
            }
        },
    )?;

    tracing::info!(channels = ?notifier.active_channels(), "listening, press Ctrl-C to stop");

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;

    tracing::info!("received shutdown signal");
    notifier.stop();
    if let Some(e) = notifier.last_dispatch_error() {
        tracing::warn!(error = %e, "dispatcher had stopped on an undecodable payload");
    }
    Ok(())
}
