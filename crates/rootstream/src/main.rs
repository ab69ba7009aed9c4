mod cli;
mod client;
mod collab;
mod host;
mod net;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rootstream_protocol::RootstreamConfig;
use tracing::{error, info, warn, Event, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use cli::Mode;
use collab::{Capture, DummyCapture};

const CONFIG_FILE: &str = "config.toml";
const FALLBACK_LABEL: &str = "rootstream-device";

/// Renders every event as `[AICODING][target] LEVEL: fields`, matching
/// the original daemon's `AI_COPILOT_MODE` output so a log aggregator
/// tuned for that format still parses this build's lines.
struct AicodingFormatter;

impl<S, N> FormatEvent<S, N> for AicodingFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(writer, "[AICODING][{}] {}: ", metadata.target(), metadata.level())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn ai_copilot_mode_enabled() -> bool {
    matches!(std::env::var("AI_COPILOT_MODE").as_deref(), Ok("1") | Ok("true"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if ai_copilot_mode_enabled() {
        eprintln!("[AICODING] copilot logging mode enabled — lines are prefixed [AICODING][module]");
        eprintln!("[AICODING] to disable: unset AI_COPILOT_MODE or set it to 0");
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .event_format(AicodingFormatter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Mirrors the original daemon's hostname-derived identity label: try
/// the environment first (the common container override), then
/// `/etc/hostname`, falling back to a fixed label rather than failing
/// startup over a cosmetic detail.
fn system_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Ok(contents) = fs::read_to_string("/etc/hostname") {
        let trimmed = contents.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    FALLBACK_LABEL.to_string()
}

fn load_config(config_dir: &Path) -> anyhow::Result<RootstreamConfig> {
    let path = config_dir.join(CONFIG_FILE);
    let config = match fs::read_to_string(&path) {
        Ok(raw) => RootstreamConfig::from_toml_str(&raw)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RootstreamConfig::default(),
        Err(e) => return Err(anyhow::anyhow!("reading {}: {e}", path.display())),
    };

    let problems = config.validate();
    let has_errors = problems.iter().any(|p| p.starts_with("ERROR"));
    for problem in &problems {
        if problem.starts_with("ERROR") {
            error!("{problem}");
        } else {
            warn!("{problem}");
        }
    }
    if has_errors {
        anyhow::bail!("configuration has {} problem(s); fix the ERROR(s) above", problems.len());
    }

    Ok(config)
}

/// `--port` wins when given; otherwise the config file's
/// `network.listen_port` supplies the default.
fn resolve_port(cli_port: Option<u16>, config: &RootstreamConfig) -> u16 {
    cli_port.unwrap_or(config.network.listen_port)
}

/// `--bitrate` wins when given; otherwise the config file's
/// `network.bitrate_kbps` supplies the default.
fn resolve_bitrate_kbps(cli_bitrate: Option<u32>, config: &RootstreamConfig) -> u32 {
    cli_bitrate.unwrap_or(config.network.bitrate_kbps)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if args.mode == Mode::ListDisplays {
        return list_displays();
    }

    let config_dir = rootstream_core::paths::resolve_config_dir();
    let config = match load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let identity = match rootstream_crypto::Identity::generate_if_missing(&config_dir, &system_hostname()) {
        Ok(identity) => Arc::new(identity),
        Err(e) => {
            error!(error = %e, "could not load or generate identity");
            std::process::exit(1);
        }
    };
    info!(peer_code = %identity.peer_code(), config_dir = %config_dir.display(), "identity ready");

    if args.mode == Mode::Qr {
        return show_qr(&identity.peer_code());
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = Arc::clone(&running);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown requested");
        running_for_signal.store(false, Ordering::Relaxed);
    });

    let port = resolve_port(args.port, &config);
    let bitrate_kbps = resolve_bitrate_kbps(args.bitrate_kbps, &config);

    let result = match args.mode {
        Mode::Host => {
            host::run(
                identity,
                host::HostConfig {
                    port,
                    display: args.display,
                    bitrate_kbps,
                    no_discovery: args.no_discovery,
                    latency_log: args.latency_log,
                    latency_interval_ms: args.latency_interval_ms,
                    initial_backoff_ms: config.session.initial_backoff_ms,
                    max_backoff_ms: config.session.max_backoff_ms,
                    max_reconnect_attempts: config.session.max_reconnect_attempts,
                    max_peers: config.network.max_peers,
                    idle_timeout_secs: config.session.idle_timeout_secs,
                    handshake_timeout_secs: config.session.handshake_timeout_secs,
                    ping_interval_secs: config.session.ping_interval_secs,
                    ping_miss_threshold: config.session.ping_miss_threshold,
                    enable_mdns: config.discovery.enable_mdns,
                    enable_broadcast: config.discovery.enable_broadcast,
                    broadcast_port: config.discovery.broadcast_port,
                    broadcast_interval_secs: config.discovery.broadcast_interval_secs,
                },
                running,
            )
            .await
        }
        Mode::Connect(peer_code) => {
            client::run(
                identity,
                client::ClientConfig {
                    peer_code,
                    port,
                    initial_backoff_ms: config.session.initial_backoff_ms,
                    max_backoff_ms: config.session.max_backoff_ms,
                    max_reconnect_attempts: config.session.max_reconnect_attempts,
                    max_peers: config.network.max_peers,
                    handshake_timeout_secs: config.session.handshake_timeout_secs,
                    ping_interval_secs: config.session.ping_interval_secs,
                    ping_miss_threshold: config.session.ping_miss_threshold,
                    enable_mdns: config.discovery.enable_mdns,
                    enable_broadcast: config.discovery.enable_broadcast,
                    broadcast_port: config.discovery.broadcast_port,
                    cache_ttl_secs: config.discovery.cache_ttl_secs,
                    cache_cap: config.discovery.cache_cap,
                },
                running,
            )
            .await
        }
        Mode::ListDisplays | Mode::Qr => unreachable!("handled above"),
    };

    if let Err(e) = &result {
        error!(error = %e, "exiting on runtime error");
        std::process::exit(2);
    }
    result
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn list_displays() -> anyhow::Result<()> {
    let mut capture = DummyCapture::new(1280, 720);
    capture.init(":0")?;
    println!(":0  1280x720  (synthetic test pattern — no real display backend in this build)");
    capture.cleanup();
    Ok(())
}

fn show_qr(peer_code: &str) -> anyhow::Result<()> {
    println!("peer code: {peer_code}");
    eprintln!("ERROR: QR rendering unavailable in this build");
    eprintln!("FIX: share the peer code above out of band instead");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_copilot_mode_recognizes_truthy_values() {
        std::env::set_var("AI_COPILOT_MODE", "1");
        assert!(ai_copilot_mode_enabled());
        std::env::set_var("AI_COPILOT_MODE", "true");
        assert!(ai_copilot_mode_enabled());
        std::env::set_var("AI_COPILOT_MODE", "0");
        assert!(!ai_copilot_mode_enabled());
        std::env::remove_var("AI_COPILOT_MODE");
        assert!(!ai_copilot_mode_enabled());
    }

    #[test]
    fn system_hostname_never_empty() {
        assert!(!system_hostname().is_empty());
    }

    #[test]
    fn load_config_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "not valid toml [[[").unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn load_config_defaults_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, RootstreamConfig::default());
    }

    #[test]
    fn load_config_rejects_a_config_with_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[network]\nlisten_port = 0\n").unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn cli_port_and_bitrate_override_the_config_file_defaults() {
        let config = RootstreamConfig::default();
        assert_eq!(resolve_port(Some(12345), &config), 12345);
        assert_eq!(resolve_port(None, &config), config.network.listen_port);
        assert_eq!(resolve_bitrate_kbps(Some(5000), &config), 5000);
        assert_eq!(resolve_bitrate_kbps(None, &config), config.network.bitrate_kbps);
    }
}
