use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use wifibot::backend::{build_http_client, HttpChatBackend};
use wifibot::config::{BotConfig, CliArgs};
use wifibot::conversation::{ConversationController, ConversationEvent, IgnoreReason, SendOutcome};
use wifibot::diagnostics::DiagnosticAggregator;
use wifibot::link_info::{platform_id, LinkInfo, LinkInfoSource, StaticLinkInfo, SystemLinkInfo};
use wifibot::probe::HttpProbe;
use wifibot::settings::{default_settings_path, load_settings, save_settings, PersistentSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_tracing(args.log_file.as_deref())?;
    info!("Starting wifibot v{}", env!("CARGO_PKG_VERSION"));

    let settings_path = args
        .settings_file
        .clone()
        .unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    let config = BotConfig::from_args(args, &settings, settings_path);
    config.validate()?;
    info!("Backend: {}", config.backend_url);

    if config.save_settings {
        save_settings(&config.settings_path, &PersistentSettings::from_config(&config));
        info!("Settings saved to {:?}", config.settings_path);
    }

    let link: Arc<dyn LinkInfoSource> = match &config.link_type {
        Some(link_type) => Arc::new(StaticLinkInfo::new(LinkInfo::of_type(link_type), platform_id())),
        None => Arc::new(SystemLinkInfo::new()),
    };
    let client = build_http_client(&link.platform_id());
    let probe = Arc::new(HttpProbe::new(client.clone(), &config));
    let aggregator = DiagnosticAggregator::new(probe, link);

    if config.diagnose_only {
        let report = aggregator.run().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let backend = Arc::new(HttpChatBackend::new(client, &config));
    if !backend.health().await {
        warn!(
            "Backend at {} is not responding; replies may fail",
            config.backend_url
        );
    }

    let controller = ConversationController::new(aggregator, backend, config.backend_timeout);
    run_chat(controller).await
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wifibot=info".into());

    match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Log file path has no file name: {:?}", path))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn run_chat(controller: ConversationController) -> anyhow::Result<()> {
    println!("WiFi Helper ({})", controller.session_id());
    println!("{}", controller.greeting());
    for (i, option) in controller.initial_options().iter().enumerate() {
        println!("  {}. {}", i + 1, option);
    }
    println!("Type a message, or pick an option by number. /quit to leave.");

    let renderer = spawn_renderer(controller.subscribe());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line == "/quit" {
            break;
        }

        let text = pick_option(&controller, line).await;
        match controller.send_message(&text).await {
            SendOutcome::Completed { phase, appended } => {
                info!("Exchange finished: phase={:?}, appended={}", phase, appended);
            }
            SendOutcome::Ignored(IgnoreReason::Empty) => {}
            SendOutcome::Ignored(IgnoreReason::Busy) => {
                println!("(still working on your last message)");
            }
            SendOutcome::Ignored(IgnoreReason::Ended) => {}
        }

        if controller.is_ended().await {
            break;
        }
    }

    drop(controller);
    if let Err(e) = renderer.await {
        error!("Renderer task failed: {}", e);
    }
    Ok(())
}

/// A bare number selects one of the initial options while they are shown.
async fn pick_option(controller: &ConversationController, line: &str) -> String {
    if controller.show_initial_options().await {
        if let Ok(n) = line.parse::<usize>() {
            if let Some(option) = n.checked_sub(1).and_then(|i| controller.initial_options().get(i)) {
                return option.to_string();
            }
        }
    }
    line.to_string()
}

fn spawn_renderer(
    mut events: tokio::sync::broadcast::Receiver<ConversationEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConversationEvent::MessageAppended(message)) if !message.is_user => {
                    println!("bot> {}", message.content);
                }
                Ok(ConversationEvent::TestingChanged(true)) => {
                    println!("Testing your connection... Please wait.");
                }
                Ok(ConversationEvent::DiagnosticsCompleted(report)) => {
                    println!("{}", report.summary());
                }
                Ok(ConversationEvent::Ended) => {
                    println!("This conversation has ended. Start wifibot again if you need more help.");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Renderer skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
