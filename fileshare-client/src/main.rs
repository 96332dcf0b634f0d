use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{Arc, Mutex},
};

use clap::{Parser, Subcommand};
use fileshare_client::{
    ApiClient, ClientError, FileShareClient, TerminalNotifier,
    config::{SavedClientConfig, config_path, load_config_from_path, save_config_with_retry},
    shell::{ShellOptions, run_shell, write_listing, write_share_banner},
};
use fileshare_core::origin_is_local;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt::MakeWriter};

#[derive(Parser, Debug)]
#[command(name = "fileshare", version, about = "Share files with a LAN file server")]
struct ClientArgs {
    /// Origin the web client would be served from; the API lives on the same host.
    #[arg(long, global = true)]
    origin: Option<String>,
    /// Full API base URL, bypassing origin-based derivation.
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[arg(long, global = true)]
    api_port: Option<u16>,
    /// Port advertised in the share link and QR code.
    #[arg(long, global = true)]
    web_port: Option<u16>,
    /// Per-request timeout; unbounded when omitted.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Show the files on the server.
    List,
    /// Upload a local file, then show the refreshed listing.
    Upload { path: PathBuf },
    /// Download a file from the server.
    Download {
        name: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Delete a file on the server, then show the refreshed listing.
    Delete { name: String },
    /// Print the server's LAN share link.
    Address {
        #[arg(long)]
        qr: bool,
    },
    /// Interactive session (the default).
    Shell,
    /// Show or persist the effective configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Persist the effective configuration.
    Save,
}

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn init_logging(log_file: Option<&Path>) {
    let Some(path) = log_file else {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
        return;
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("cannot open log file {}: {err}", path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(FileMakeWriter {
            file: Arc::new(Mutex::new(file)),
        })
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match ClientArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(args.log_file.as_deref());

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("config resolution failed: {err}");
            eprintln!("fileshare: {err}");
            return ExitCode::from(2);
        }
    };

    let command = args.command.clone().unwrap_or(Command::Shell);
    if let Command::Config { action } = command {
        return run_config_action(action, &config);
    }

    let api = match config
        .api_base()
        .map_err(ClientError::from)
        .and_then(|base| ApiClient::new(base, config.request_timeout()))
    {
        Ok(api) => api,
        Err(err) => {
            error!("failed to set up api client: {err}");
            eprintln!("fileshare: {err}");
            return ExitCode::from(2);
        }
    };

    info!(base = %api.base(), ?command, "starting");
    let download_dir = match &command {
        Command::Download {
            output: Some(output),
            ..
        } => output.clone(),
        _ => config.download_dir(),
    };
    let mut client = FileShareClient::new(api, TerminalNotifier, download_dir);

    match run_command(&mut client, command, &config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            warn!("terminal output failed: {err}");
            ExitCode::from(1)
        }
    }
}

/// Saved config, overridden by whatever was passed on the command line.
fn resolve_config(args: &ClientArgs) -> Result<SavedClientConfig, String> {
    let path = config_path();
    let mut config = match load_config_from_path(&path) {
        Ok(Some(config)) => config,
        Ok(None) => SavedClientConfig::default(),
        Err(err) => {
            warn!(path = %path.display(), "saved config ignored: {err}");
            SavedClientConfig::default()
        }
    };

    if let Some(origin) = &args.origin {
        config.origin = origin.clone();
    }
    if let Some(server_url) = &args.server_url {
        config.server_url = Some(server_url.clone());
    }
    if let Some(api_port) = args.api_port {
        config.api_port = api_port;
    }
    if let Some(web_port) = args.web_port {
        config.web_port = web_port;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.request_timeout_secs = Some(timeout_secs);
    }

    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn run_config_action(action: ConfigAction, config: &SavedClientConfig) -> ExitCode {
    let path = config_path();
    match action {
        ConfigAction::Show => match serde_json::to_string_pretty(config) {
            Ok(json) => {
                println!("# {}", path.display());
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("fileshare: {err}");
                ExitCode::from(1)
            }
        },
        ConfigAction::Save => match save_config_with_retry(&path, config) {
            Ok(()) => {
                info!(path = %path.display(), "config saved");
                println!("saved {}", path.display());
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(path = %path.display(), "config save failed: {err}");
                eprintln!("fileshare: failed to save {}: {err}", path.display());
                ExitCode::from(1)
            }
        },
    }
}

/// `Ok(false)` when the operation failed; the user has already been told why.
async fn run_command(
    client: &mut FileShareClient<TerminalNotifier>,
    command: Command,
    config: &SavedClientConfig,
) -> io::Result<bool> {
    let mut out = io::stdout();
    match command {
        Command::List => {
            let ok = client.refresh_file_list().await.is_ok();
            if ok {
                write_listing(&mut out, client.files())?;
            }
            Ok(ok)
        }
        Command::Upload { path } => {
            if client.encode_selected_file(Some(&path)).await.is_err() {
                return Ok(false);
            }
            let ok = client.submit_upload().await.is_ok();
            write_listing(&mut out, client.files())?;
            Ok(ok)
        }
        Command::Download { name, .. } => match client.download_file(&name).await {
            Ok(dest) => {
                writeln!(out, "saved {}", dest.display())?;
                Ok(true)
            }
            Err(_) => Ok(false),
        },
        Command::Delete { name } => {
            let ok = client.delete_file(&name).await.is_ok();
            write_listing(&mut out, client.files())?;
            Ok(ok)
        }
        Command::Address { qr } => {
            let ok = client.resolve_server_address().await.is_ok();
            if ok {
                write_share_banner(&mut out, client.server_address(), config.web_port, qr)?;
            }
            Ok(ok)
        }
        Command::Shell => {
            let options = ShellOptions {
                share_banner: origin_is_local(&config.origin),
                web_port: config.web_port,
            };
            let input = BufReader::new(tokio::io::stdin());
            run_shell(client, input, &mut out, options).await?;
            Ok(true)
        }
        Command::Config { .. } => Ok(true),
    }
}
