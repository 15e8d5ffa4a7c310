//! Little Box command-line host
//!
//! ## Commands
//!
//! - `run`: Run one script and stream its console output
//! - `serve`: Speak the JSON-lines host protocol on stdin/stdout
//! - `types`: Print the TypeScript declaration of the script API

mod render;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use littlebox_protocol::{HostCommand, HostMessage};
use littlebox_script_host::{ScriptConfig, ScriptHost, TYPESCRIPT_DEFINITIONS};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use render::TerminalDisplay;

/// Capacity of the event channel between a run and its printer
const EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "littlebox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run scripts in a sandbox with a shadow console", long_about = None)]
struct Cli {
    /// Spaces of indentation per console group
    #[arg(long, global = true, env = "LITTLEBOX_INDENT")]
    indent: Option<usize>,

    /// Abort a run after this many milliseconds
    #[arg(long, global = true, env = "LITTLEBOX_DEADLINE_MS")]
    deadline_ms: Option<u64>,

    /// Script heap limit in bytes
    #[arg(long, global = true, env = "LITTLEBOX_MEMORY_LIMIT")]
    memory_limit: Option<usize>,

    /// Reject scripts longer than this many bytes
    #[arg(long, global = true, env = "LITTLEBOX_MAX_SOURCE_LEN")]
    max_source_len: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file (or stdin)
    Run {
        /// Script to run; `-` or nothing reads stdin
        file: Option<PathBuf>,

        /// Print events as JSON lines instead of rendering them
        #[arg(long)]
        json: bool,
    },

    /// Accept run-prototype / cancel-run commands as JSON lines on stdin
    Serve,

    /// Print the TypeScript declaration of the console API
    Types,
}

impl Cli {
    fn script_config(&self) -> ScriptConfig {
        let mut config = ScriptConfig::default();
        if let Some(indent) = self.indent {
            config.indent_width = indent;
        }
        if let Some(ms) = self.deadline_ms {
            config.deadline = Some(Duration::from_millis(ms));
        }
        if let Some(limit) = self.memory_limit {
            config.memory_limit = limit;
        }
        config.max_source_len = self.max_source_len;
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries script output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("littlebox=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.script_config();

    match cli.command {
        Commands::Run { file, json } => {
            let source = read_source(file.as_deref())?;
            let success = run_once(ScriptHost::new(config), source, json).await?;
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Serve => {
            serve(ScriptHost::new(config)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Types => {
            println!("{}", TYPESCRIPT_DEFINITIONS.trim());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Read a script from `path`, or stdin for `None` and `-`
fn read_source(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display())),
        _ => std::io::read_to_string(std::io::stdin()).context("Failed to read script from stdin"),
    }
}

/// Run `source` to completion, returning whether it succeeded
async fn run_once(host: ScriptHost, source: String, json: bool) -> Result<bool> {
    let (tx, mut rx) = mpsc::channel::<HostMessage>(EVENT_BUFFER);
    let indent_width = host.config().indent_width;

    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        let color = !json && render::color_wanted(stdout.is_terminal());
        let mut display = TerminalDisplay::new(stdout, color, indent_width);
        while let Some(message) = rx.recv().await {
            if json {
                if let HostMessage::Event(event) = &message {
                    println!("{}", serde_json::to_string(event)?);
                }
            } else {
                display.show(&message)?;
            }
        }
        display.flush()?;
        anyhow::Ok(())
    });

    let result = host.execute(source, tx).await?;
    printer.await.context("Printer task failed")??;

    if let Some(value) = result.return_value.as_deref().filter(|_| !json) {
        println!("=> {value}");
    }

    Ok(result.is_success())
}

async fn serve(host: ScriptHost) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<HostMessage>(EVENT_BUFFER);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut runs = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("Serving host protocol on stdin/stdout");

    while let Some(line) = lines.next_line().await.context("Failed to read command")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HostCommand>(&line) {
            Ok(HostCommand::RunPrototype { body }) => {
                let host = host.clone();
                let tx = tx.clone();
                runs.spawn(async move {
                    match host.execute(body, tx).await {
                        Ok(result) => tracing::debug!(
                            run_id = %result.run_id,
                            success = result.is_success(),
                            "Run complete"
                        ),
                        // Busy refusals were already announced on the stream
                        Err(err) => tracing::warn!(error = %err, "Run not started"),
                    }
                });
            }
            Ok(HostCommand::CancelRun) => {
                while runs.try_join_next().is_some() {}
                // A spawned run may not have reached the host yet
                if runs.is_empty() {
                    tracing::debug!("No run to cancel");
                } else {
                    tracing::info!("Cancelling active run");
                    host.cancel();
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring malformed command");
            }
        }
    }

    while runs.join_next().await.is_some() {}
    drop(tx);
    writer.await.context("Writer task failed")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_script_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "console.log('from file');").unwrap();
        let source = read_source(Some(file.path())).unwrap();
        assert_eq!(source, "console.log('from file');");
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.js");
        let err = read_source(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("nope.js"));
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::parse_from([
            "littlebox",
            "--indent",
            "4",
            "--deadline-ms",
            "250",
            "--max-source-len",
            "1024",
            "run",
            "script.js",
            "--json",
        ]);
        let config = cli.script_config();
        assert_eq!(config.indent_width, 4);
        assert_eq!(config.deadline, Some(Duration::from_millis(250)));
        assert_eq!(config.max_source_len, Some(1024));
        assert_eq!(config.memory_limit, ScriptConfig::default().memory_limit);
        assert!(matches!(
            cli.command,
            Commands::Run { json: true, file: Some(_) }
        ));
    }

    #[test]
    fn defaults_without_flags() {
        let cli = Cli::parse_from(["littlebox", "types"]);
        assert_eq!(cli.script_config().indent_width, 2);
        assert_eq!(cli.script_config().deadline, None);
    }

    #[tokio::test]
    async fn run_reports_success() {
        let failed = run_once(ScriptHost::default(), "throw 'x';".into(), true)
            .await
            .unwrap();
        assert!(!failed);

        let passed = run_once(ScriptHost::default(), "console.log(1);".into(), true)
            .await
            .unwrap();
        assert!(passed);
    }
}
