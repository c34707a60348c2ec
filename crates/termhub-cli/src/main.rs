//! `termhub`: foreground server process plus thin-client subcommands that
//! drive an already-running server over the loopback control plane.

mod control_client;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use termhub_core::config;
use termhub_core::ServerConfig;
use termhub_server::control::ControlRequest;
use termhub_server::Server;

#[derive(Parser)]
#[command(name = "termhub")]
#[command(author, version, about = "Multi-session terminal server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground
    Serve {
        /// Path to a settings file (defaults to ~/.termhub/settings.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the bind host
        #[arg(long)]
        bind_host: Option<String>,

        /// Override the bind port (0 picks an ephemeral port)
        #[arg(long)]
        bind_port: Option<u16>,

        /// Override the control-plane port (0 picks an ephemeral port)
        #[arg(long)]
        control_port: Option<u16>,
    },

    /// Create a session on a running server
    #[command(name = "create-session")]
    CreateSession {
        /// Command to run inside the PTY
        command: String,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Working directory for the child process
        #[arg(long)]
        cwd: Option<String>,

        /// Environment variable in KEY=VALUE form, may be repeated
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        #[arg(long, default_value_t = 24)]
        rows: u16,

        #[arg(long, default_value_t = 80)]
        cols: u16,
    },

    /// List sessions on a running server
    List,

    /// Terminate a session on a running server
    Kill {
        /// Session id to terminate
        session_id: String,
    },

    /// Ask a running server to terminate every session and exit
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let is_serve = matches!(cli.command, Commands::Serve { .. });
    if !is_serve {
        init_stderr_logging(cli.verbose);
    }

    match cli.command {
        Commands::Serve {
            config: config_path,
            bind_host,
            bind_port,
            control_port,
        } => run_serve(config_path, bind_host, bind_port, control_port).await,
        Commands::CreateSession {
            command,
            args,
            cwd,
            env,
            rows,
            cols,
        } => run_create_session(command, args, cwd, env, rows, cols).await,
        Commands::List => run_list().await,
        Commands::Kill { session_id } => run_kill(session_id).await,
        Commands::Shutdown => run_shutdown().await,
    }
}

fn init_stderr_logging(verbose: bool) {
    let filter = if verbose {
        "termhub_cli=debug,termhub_core=debug,termhub_server=debug"
    } else {
        "termhub_cli=info,termhub_core=info,termhub_server=info"
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run_serve(
    config_path: Option<PathBuf>,
    bind_host: Option<String>,
    bind_port: Option<u16>,
    control_port: Option<u16>,
) -> Result<()> {
    let log_path = config::log_path().context("failed to resolve log path")?;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_appender = tracing_appender::rolling::never(
        log_path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("termhub.log")),
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    let mut cfg = ServerConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    if let Some(host) = bind_host {
        cfg.bind_host = host;
    }
    if let Some(port) = bind_port {
        cfg.bind_port = port;
    }
    if let Some(port) = control_port {
        cfg.control_port = port;
    }

    info!("starting termhub server");
    let server = Server::new(cfg);
    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

async fn run_create_session(
    command: String,
    args: Vec<String>,
    cwd: Option<String>,
    env: Vec<String>,
    rows: u16,
    cols: u16,
) -> Result<()> {
    let env_map = parse_env_pairs(&env)?;
    let runtime = control_client::connected_runtime().await?;
    let response = control_client::send_to(
        &runtime.bind_host,
        runtime.control_port,
        ControlRequest::CreateSession {
            command,
            args,
            cwd,
            env: env_map,
            rows,
            cols,
        },
    )
    .await?;

    match response {
        termhub_server::control::ControlResponse::SessionCreated { session_id } => {
            println!("{session_id}");
            println!(
                "{}",
                termhub_server::session_url(&runtime.bind_host, runtime.bind_port, &session_id)
            );
            Ok(())
        }
        termhub_server::control::ControlResponse::Error { message } => {
            anyhow::bail!(message)
        }
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}

async fn run_list() -> Result<()> {
    let response = control_client::send(ControlRequest::ListSessions).await?;
    match response {
        termhub_server::control::ControlResponse::Sessions { sessions } => {
            if sessions.is_empty() {
                println!("no sessions");
                return Ok(());
            }
            println!("{:<10} {:<20} {:>6} {:>6} {:<8} SUBS", "ID", "COMMAND", "ROWS", "COLS", "RUNNING");
            for s in sessions {
                println!(
                    "{:<10} {:<20} {:>6} {:>6} {:<8} {}",
                    s.session_id, s.command, s.rows, s.cols, s.running, s.subscriber_count
                );
            }
            Ok(())
        }
        termhub_server::control::ControlResponse::Error { message } => anyhow::bail!(message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}

async fn run_kill(session_id: String) -> Result<()> {
    let response = control_client::send(ControlRequest::KillSession { session_id }).await?;
    match response {
        termhub_server::control::ControlResponse::Ok => {
            println!("terminated");
            Ok(())
        }
        termhub_server::control::ControlResponse::Error { message } => anyhow::bail!(message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}

async fn run_shutdown() -> Result<()> {
    let response = control_client::send(ControlRequest::Shutdown).await?;
    match response {
        termhub_server::control::ControlResponse::Ok => {
            println!("server shut down");
            Ok(())
        }
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}

fn parse_env_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid --env value '{pair}', expected KEY=VALUE"))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_env_pairs() {
        let pairs = vec!["FOO=bar".to_string(), "BAZ=qux".to_string()];
        let map = parse_env_pairs(&pairs).unwrap();
        assert_eq!(map.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(map.get("BAZ"), Some(&"qux".to_string()));
    }

    #[test]
    fn rejects_pair_without_equals() {
        let pairs = vec!["FOObar".to_string()];
        assert!(parse_env_pairs(&pairs).is_err());
    }
}
