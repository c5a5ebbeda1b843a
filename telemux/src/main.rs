//! Entry point for the telemux client. Parses args, connects, prints events.

use std::env;

use telemux::render;
use telemux::types::ServerEvent;
use telemux::ws::{self, WsStream};

const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Metrics { once: bool },
    Logs(String),
    Status,
}

#[derive(Debug)]
struct ParsedArgs {
    url: String,
    mode: Mode,
    token: Option<String>,
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--metrics [--once]|--logs INSTANCE|-l INSTANCE|--status] [--token TOKEN] [ws://HOST:PORT/ws]"
    )
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "telemux".into());
    let mut url: Option<String> = None;
    let mut mode: Option<Mode> = None;
    let mut once = false;
    let mut token: Option<String> = None;

    let set_mode = |m: Mode, mode: &mut Option<Mode>| -> Result<(), String> {
        if mode.is_some() {
            return Err(format!("Only one of --metrics/--logs/--status. {}", usage(&prog)));
        }
        *mode = Some(m);
        Ok(())
    };

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--metrics" | "-m" => set_mode(Mode::Metrics { once: false }, &mut mode)?,
            "--status" | "-s" => set_mode(Mode::Status, &mut mode)?,
            "--once" => once = true,
            "--logs" | "-l" => match it.next() {
                Some(instance) => set_mode(Mode::Logs(instance), &mut mode)?,
                None => return Err(format!("--logs needs an instance. {}", usage(&prog))),
            },
            "--token" | "-t" => token = it.next(),
            _ if arg.starts_with("--logs=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        set_mode(Mode::Logs(v.to_string()), &mut mode)?;
                    }
                }
            }
            _ if arg.starts_with("--token=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        token = Some(v.to_string());
                    }
                }
            }
            _ => {
                if url.is_none() && !arg.starts_with('-') {
                    url = Some(arg);
                } else {
                    return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog)));
                }
            }
        }
    }

    let mode = match mode.unwrap_or(Mode::Metrics { once: false }) {
        Mode::Metrics { .. } => Mode::Metrics { once },
        other => other,
    };
    Ok(ParsedArgs {
        url: url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        mode,
        token,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            let help = env::args().any(|a| a == "-h" || a == "--help");
            if help {
                println!("{msg}");
                return Ok(());
            }
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let url = ws::agent_url(&parsed.url, parsed.token.as_deref())?;
    let mut socket = ws::connect(&url).await?;

    tokio::select! {
        res = run(&mut socket, &parsed.mode) => res?,
        _ = tokio::signal::ctrl_c() => {}
    }
    let _ = socket.close(None).await;
    Ok(())
}

async fn run(socket: &mut WsStream, mode: &Mode) -> anyhow::Result<()> {
    match mode {
        Mode::Metrics { once: true } => ws::request_metrics(socket).await?,
        Mode::Metrics { once: false } => ws::subscribe(socket, "metrics").await?,
        Mode::Logs(instance) => ws::subscribe_logs(socket, instance).await?,
        Mode::Status => ws::request_stream_status(socket).await?,
    }

    while let Some(event) = ws::next_event(socket).await? {
        match event {
            ServerEvent::Metrics(m) => {
                println!("{}", render::metrics(&m));
                if matches!(mode, Mode::Metrics { once: true }) {
                    break;
                }
            }
            ServerEvent::Cpu(c) => println!("{}", render::cpu(&c)),
            ServerEvent::Memory(m) => println!("{}", render::memory(&m)),
            ServerEvent::Disk(d) => println!("{}", render::disk(&d)),
            ServerEvent::Network(n) => println!("{}", render::network(&n)),
            ServerEvent::LogHistory {
                instance_name,
                handshake,
            } => {
                if !handshake.is_active {
                    eprintln!("# {instance_name}: log source not running");
                }
                for line in handshake.buffered_lines {
                    println!("{line}");
                }
            }
            ServerEvent::LogLine(l) => println!("{}", render::log_line(&l)),
            ServerEvent::LogError {
                instance_name,
                message,
            } => eprintln!("# {instance_name}: {message}"),
            ServerEvent::LogStatus {
                instance_name,
                connected,
                message,
            } => {
                let state = if connected { "connected" } else { "disconnected" };
                eprintln!("# {instance_name} {state}: {message}");
            }
            ServerEvent::LogDump { text, .. } => println!("{text}"),
            ServerEvent::StreamStatus(all) => {
                println!("{}", render::stream_status(&all));
                if *mode == Mode::Status {
                    break;
                }
            }
            ServerEvent::Error { message } => anyhow::bail!("agent error: {message}"),
        }
    }
    Ok(())
}
