//! termshare Server
//!
//! Runs a command inside a PTY and shares the live session with remote
//! viewers over WebSockets.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use daemon::config::Config;
use daemon::session::{PtyProcess, SessionBroadcaster};
use daemon::{server, term};

/// termshare server - share a live terminal session with remote viewers.
#[derive(Parser, Debug)]
#[command(name = "termshare-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Address to listen on (host:port)
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Session name viewers connect to
    #[arg(short, long, value_name = "NAME")]
    pub session: Option<String>,

    /// Command to share, with its arguments (defaults to $SHELL)
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Command line takes precedence over file and environment
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(session) = cli.session {
        config.server.session_name = session;
    }
    if !cli.command.is_empty() {
        config.terminal.command = cli.command[0].clone();
        config.terminal.args = cli.command[1..].to_vec();
    }

    // Initialize tracing. Logs go to stderr: stdout mirrors the shared
    // terminal.
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Validate configuration
    config.validate()?;

    tracing::info!("termshare server starting...");

    let code = run(config).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Runs the shared session to completion and returns the exit code to
/// propagate.
async fn run(config: Config) -> anyhow::Result<i32> {
    let interactive = term::stdin_is_tty();

    // Size the PTY from the operator's terminal when there is one
    let (cols, rows) = if interactive {
        term::terminal_size().unwrap_or((config.terminal.cols, config.terminal.rows))
    } else {
        (config.terminal.cols, config.terminal.rows)
    };

    let (pty, mut output_rx, mut size_rx) = PtyProcess::spawn(
        &config.terminal.command,
        &config.terminal.args,
        Vec::new(),
        cols,
        rows,
    )?;
    let pty = Arc::new(pty);
    tracing::info!(
        command = %config.terminal.command,
        pid = pty.pid(),
        cols,
        rows,
        "Spawned shared process"
    );

    let broadcaster = Arc::new(SessionBroadcaster::new(Arc::clone(&pty), cols, rows));

    // Bind before switching the operator terminal to raw mode so a bind
    // failure prints normally.
    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        "Viewers can connect at ws://{}/s/{}/ws",
        local_addr,
        config.server.session_name
    );

    let shutdown = CancellationToken::new();
    let app = server::router(Arc::clone(&broadcaster), &config.server.session_name);
    let server_task = tokio::spawn(server::serve(listener, app, shutdown.clone()));

    // Raw mode: forward the operator's keystrokes byte for byte. The guard
    // restores the original settings when run() returns.
    let raw_guard = term::RawModeGuard::new();
    if interactive {
        raw_guard.enter_raw_mode();
    }

    pty.start_read_loop();

    // Output pump: PTY bytes go to every viewer and, when interactive, to
    // the operator's terminal.
    let output_broadcaster = Arc::clone(&broadcaster);
    let output_pump = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = output_rx.recv().await {
            if interactive {
                let _ = stdout.write_all(&chunk).await;
                let _ = stdout.flush().await;
            }
            output_broadcaster.broadcast(&chunk).await;
        }
    });

    // Size pump: every PTY resize is announced to viewers.
    let size_broadcaster = Arc::clone(&broadcaster);
    tokio::spawn(async move {
        while let Some((cols, rows)) = size_rx.recv().await {
            size_broadcaster.set_window_size(cols, rows).await;
        }
    });

    if interactive {
        // Operator keystrokes come in on a dedicated thread: stdin reads
        // block, and in raw mode they arrive unbuffered.
        let stdin_pty = Arc::clone(&pty);
        std::thread::spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buffer = [0u8; 1024];
            loop {
                match stdin.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if stdin_pty.write(&buffer[..n]).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        // Track the operator's window size
        let winch_pty = Arc::clone(&pty);
        tokio::spawn(async move {
            let mut winch = match signal(SignalKind::window_change()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to register SIGWINCH handler");
                    return;
                }
            };
            while winch.recv().await.is_some() {
                if let Some((cols, rows)) = term::terminal_size() {
                    let _ = winch_pty.resize(cols, rows).await;
                }
            }
        });
    }

    // Supervise until the child exits or a termination signal arrives
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let grace = Duration::from_millis(config.terminal.shutdown_grace_ms);

    let code = tokio::select! {
        result = pty.wait() => match result {
            Ok(code) => {
                tracing::info!(code, "Shared process exited");
                code as i32
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed waiting for shared process");
                1
            }
        },
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down");
            stop_child(&pty, grace).await
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
            stop_child(&pty, grace).await
        }
    };

    // Stop accepting viewers, then let in-flight fan-out drain
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), server_task).await;
    let _ = tokio::time::timeout(Duration::from_millis(500), output_pump).await;

    drop(raw_guard);
    Ok(code)
}

/// Graceful-then-forced child termination, returning its exit code.
async fn stop_child(pty: &Arc<PtyProcess>, grace: Duration) -> i32 {
    match pty.shutdown(grace).await {
        Ok(code) => code as i32,
        Err(e) => {
            tracing::warn!(error = %e, "Shutdown did not complete cleanly");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["termshare-server"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.verbose);
        assert!(cli.listen.is_none());
        assert!(cli.session.is_none());
        assert!(cli.command.is_empty());
    }

    #[test]
    fn test_config_flag() {
        let cli =
            Cli::try_parse_from(["termshare-server", "--config", "/etc/termshare.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/termshare.toml")));
    }

    #[test]
    fn test_short_config_flag() {
        let cli = Cli::try_parse_from(["termshare-server", "-c", "./conf.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("./conf.toml")));
    }

    #[test]
    fn test_verbose_flag() {
        let cli = Cli::try_parse_from(["termshare-server", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_listen_flag() {
        let cli = Cli::try_parse_from(["termshare-server", "--listen", "0.0.0.0:9000"]).unwrap();
        assert_eq!(cli.listen.as_deref(), Some("0.0.0.0:9000"));
    }

    #[test]
    fn test_session_flag() {
        let cli = Cli::try_parse_from(["termshare-server", "--session", "demo"]).unwrap();
        assert_eq!(cli.session.as_deref(), Some("demo"));
    }

    #[test]
    fn test_bare_command() {
        let cli = Cli::try_parse_from(["termshare-server", "htop"]).unwrap();
        assert_eq!(cli.command, vec!["htop"]);
    }

    #[test]
    fn test_command_with_args() {
        let cli = Cli::try_parse_from(["termshare-server", "tail", "-f", "/var/log/syslog"])
            .unwrap();
        assert_eq!(cli.command, vec!["tail", "-f", "/var/log/syslog"]);
    }

    #[test]
    fn test_flags_before_command() {
        let cli = Cli::try_parse_from([
            "termshare-server",
            "-l",
            "127.0.0.1:7000",
            "-s",
            "ops",
            "bash",
            "-i",
        ])
        .unwrap();
        assert_eq!(cli.listen.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(cli.session.as_deref(), Some("ops"));
        assert_eq!(cli.command, vec!["bash", "-i"]);
    }

    #[test]
    fn test_double_dash_separator() {
        let cli = Cli::try_parse_from(["termshare-server", "--", "sh", "-c", "echo hi"]).unwrap();
        assert_eq!(cli.command, vec!["sh", "-c", "echo hi"]);
    }

    #[test]
    fn test_listen_requires_value() {
        let result = Cli::try_parse_from(["termshare-server", "--listen"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_help_available() {
        let result = Cli::try_parse_from(["termshare-server", "--help"]);
        // --help causes an early exit, which is treated as an error by try_parse
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
