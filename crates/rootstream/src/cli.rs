//! Hand-rolled argument parsing, matching the rest of the ambient stack's
//! preference for std over a parsing crate for this small a surface.

use anyhow::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Host,
    Connect(String),
    ListDisplays,
    Qr,
}

#[derive(Debug, Clone)]
pub struct Args {
    pub mode: Mode,
    /// `None` means the user did not pass `--port`; the caller falls
    /// back to the config file's `network.listen_port`.
    pub port: Option<u16>,
    pub display: String,
    /// `None` means the user did not pass `--bitrate`; the caller falls
    /// back to the config file's `network.bitrate_kbps`.
    pub bitrate_kbps: Option<u32>,
    pub no_discovery: bool,
    pub latency_log: bool,
    pub latency_interval_ms: u64,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            mode: Mode::Host,
            port: None,
            display: ":0".to_string(),
            bitrate_kbps: None,
            no_discovery: false,
            latency_log: false,
            latency_interval_ms: 5_000,
        }
    }
}

pub fn parse_args() -> anyhow::Result<Args> {
    parse(std::env::args().skip(1).collect())
}

fn parse(raw: Vec<String>) -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut i = 0;

    while i < raw.len() {
        match raw[i].as_str() {
            "-V" | "--version" => {
                println!("rootstream {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "host" => args.mode = Mode::Host,
            "connect" => {
                i += 1;
                let code = raw.get(i).context("connect requires a peer code")?;
                args.mode = Mode::Connect(code.clone());
            }
            "--list-displays" => args.mode = Mode::ListDisplays,
            "--qr" => args.mode = Mode::Qr,
            "--port" => {
                i += 1;
                args.port = Some(
                    raw.get(i)
                        .context("--port requires a value")?
                        .parse()
                        .context("--port must be a valid u16")?,
                );
            }
            "--display" => {
                i += 1;
                args.display = raw.get(i).context("--display requires a value")?.clone();
            }
            "--bitrate" => {
                i += 1;
                args.bitrate_kbps = Some(
                    raw.get(i)
                        .context("--bitrate requires a value")?
                        .parse()
                        .context("--bitrate must be a valid u32")?,
                );
            }
            "--no-discovery" => args.no_discovery = true,
            "--latency-log" => args.latency_log = true,
            "--latency-interval" => {
                i += 1;
                args.latency_interval_ms = raw
                    .get(i)
                    .context("--latency-interval requires a value")?
                    .parse()
                    .context("--latency-interval must be a valid u64")?;
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(args)
}

fn print_help() {
    println!(
        "rootstream [host|connect <peer_code>] [--port N] [--display N] [--bitrate KBPS] \
         [--no-discovery] [--latency-log] [--latency-interval MS] [--qr] [--list-displays]"
    );
}
