mod api;
mod capture;
mod decode;
mod dump;
mod models;
mod utils;

use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use termcolor::{ColorChoice, StandardStream};

use crate::api::{routes, AppState};
use crate::capture::codec;
use crate::capture::filter::compile_optional;
use crate::capture::listener::Listener;
use crate::capture::session::CaptureSession;
use crate::decode::decoder::ProtocolDecoder;
use crate::decode::registry::RuleRegistry;
use crate::models::config::{AppConfig, ListenerConfig};
use crate::models::event::EventBus;
use crate::models::version::ProtocolVersion;
use crate::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Capturing relay proxy for game client/server traffic")]
struct Args {
    /// Port the game client connects to
    #[clap(long, default_value = "44405")]
    listen_port: u16,

    /// Host of the real game server
    #[clap(long, default_value = "127.0.0.1")]
    target_host: String,

    /// Port of the real game server
    #[clap(long, default_value = "44406")]
    target_port: u16,

    /// Protocol version as major.minor-LANG
    #[clap(long, default_value = "1.0-ENG")]
    protocol: String,

    /// Port for the REST API server
    #[clap(short, long, default_value = "3000")]
    api_port: u16,

    /// Bytes per socket read; each read becomes one packet
    #[clap(long, default_value = "8192")]
    read_buffer: usize,

    /// JSON file with decode rules
    #[clap(long)]
    rules: Option<PathBuf>,

    /// Print a capture file and exit
    #[clap(long)]
    dump: Option<PathBuf>,

    /// Filter expression for --dump, e.g. "[Type] IN 'C1' AND [Code] IN 'F3'"
    #[clap(long)]
    filter: Option<String>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_logger(logging::get_log_level(&args.log_level));

    info!("Starting mucap v{}", env!("CARGO_PKG_VERSION"));

    let protocol_version: ProtocolVersion = args.protocol.parse().map_err(|e: String| anyhow!(e))?;

    let registry = match &args.rules {
        Some(path) => RuleRegistry::load_file(path)
            .with_context(|| format!("Failed to load decode rules from {}", path.display()))?,
        None => RuleRegistry::new(),
    };
    if registry.is_empty() {
        info!("No decode rules loaded, packets will be shown as generic summaries");
    }
    let decoder = ProtocolDecoder::new(Arc::new(registry));

    if let Some(path) = &args.dump {
        let predicate = compile_optional(args.filter.as_deref())?;
        let connection = codec::load(path, protocol_version);

        let mut out = StandardStream::stdout(ColorChoice::Auto);
        let shown = dump::dump(&mut out, &connection, predicate.as_ref(), &decoder)?;
        info!("Printed {} of {} packets from {}", shown, connection.len(), path.display());
        return Ok(());
    }

    let config = AppConfig {
        listen_port: args.listen_port,
        listener: ListenerConfig {
            target_host: args.target_host,
            target_port: args.target_port,
            protocol_version,
        },
        api_port: args.api_port,
        read_buffer: args.read_buffer,
        rules: args.rules,
    };

    let session = Arc::new(CaptureSession::new(EventBus::default()));
    let listener = Arc::new(Listener::new(
        config.listener.clone(),
        session.clone(),
        config.read_buffer,
    ));

    listener
        .start(
            config.listen_port,
            &config.listener.target_host,
            config.listener.target_port,
            config.listener.protocol_version.clone(),
        )
        .await?;

    let app_state = web::Data::new(AppState {
        session,
        listener: listener.clone(),
        decoder,
        config: config.clone(),
    });

    info!("Starting mucap API server on port {}", config.api_port);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure)
    })
    .bind(format!("127.0.0.1:{}", config.api_port))?
    .run()
    .await?;

    listener.stop();
    info!("Shut down");
    Ok(())
}
