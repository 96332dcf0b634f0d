use std::{
    io::{self, Write},
    path::PathBuf,
};

use fileshare_core::share_link;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::{notify::Notifier, qr::render_qr, session::FileShareClient};

pub const SHELL_HELP: &str = "\
commands:
  ls                 refresh and show the server's files
  select <path>      pick a local file to upload
  send               upload the picked file
  get <name|number>  download a file into the download directory
  rm <name|number>   delete a file on the server
  qr                 show the share link and its QR code
  help               show this text
  quit               leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Empty,
    List,
    Select(Option<PathBuf>),
    Send,
    Get(String),
    Remove(String),
    Qr,
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            "" => ShellCommand::Empty,
            "ls" | "list" => ShellCommand::List,
            "select" | "pick" => {
                ShellCommand::Select((!rest.is_empty()).then(|| PathBuf::from(rest)))
            }
            "send" | "upload" => ShellCommand::Send,
            "get" | "download" if rest.is_empty() => ShellCommand::Usage("get <name|number>"),
            "get" | "download" => ShellCommand::Get(rest.to_owned()),
            "rm" | "delete" if rest.is_empty() => ShellCommand::Usage("rm <name|number>"),
            "rm" | "delete" => ShellCommand::Remove(rest.to_owned()),
            "qr" | "address" => ShellCommand::Qr,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" | "q" => ShellCommand::Quit,
            other => ShellCommand::Unknown(other.to_owned()),
        }
    }
}

/// An exact filename wins; otherwise a 1-based position in the listing.
pub fn resolve_target(files: &[String], arg: &str) -> String {
    if files.iter().any(|file| file == arg) {
        return arg.to_owned();
    }
    arg.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| files.get(index))
        .cloned()
        .unwrap_or_else(|| arg.to_owned())
}

pub fn write_listing<W: Write>(out: &mut W, files: &[String]) -> io::Result<()> {
    if files.is_empty() {
        return writeln!(out, "no files available");
    }
    writeln!(out, "available files ({}):", files.len())?;
    for (index, file) in files.iter().enumerate() {
        writeln!(out, "  {:>2}. {file}", index + 1)?;
    }
    Ok(())
}

pub fn write_share_banner<W: Write>(
    out: &mut W,
    address: Option<&str>,
    web_port: u16,
    with_qr: bool,
) -> io::Result<()> {
    let link = share_link(address, web_port);
    writeln!(out, "{link}")?;
    if with_qr {
        match render_qr(&link) {
            Ok(code) => writeln!(out, "{code}")?,
            Err(err) => warn!(%link, "qr render failed: {err}"),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct ShellOptions {
    /// Print the share link and QR code once start-up finishes.
    pub share_banner: bool,
    pub web_port: u16,
}

/// Interactive session: start-up, then one command per input line until
/// `quit` or end of input.
pub async fn run_shell<N, R, W>(
    client: &mut FileShareClient<N>,
    input: R,
    out: &mut W,
    options: ShellOptions,
) -> io::Result<()>
where
    N: Notifier,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    client.startup().await;
    if options.share_banner {
        write_share_banner(out, client.server_address(), options.web_port, true)?;
    }
    write_listing(out, client.files())?;
    writeln!(out, "type `help` for commands")?;

    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = ShellCommand::parse(&line);
        debug!(?command, "shell command");

        match command {
            ShellCommand::Empty => {}
            ShellCommand::List => {
                if client.refresh_file_list().await.is_ok() {
                    write_listing(out, client.files())?;
                }
            }
            ShellCommand::Select(path) => {
                if client.encode_selected_file(path.as_deref()).await.is_ok()
                    && let Some(candidate) = client.pending_upload()
                {
                    writeln!(out, "ready to send {}", candidate.name())?;
                }
            }
            ShellCommand::Send => {
                if client.submit_upload().await.is_ok() {
                    writeln!(out, "uploaded")?;
                }
                write_listing(out, client.files())?;
            }
            ShellCommand::Get(arg) => {
                let name = resolve_target(client.files(), &arg);
                if let Ok(dest) = client.download_file(&name).await {
                    writeln!(out, "saved {}", dest.display())?;
                }
            }
            ShellCommand::Remove(arg) => {
                let name = resolve_target(client.files(), &arg);
                if client.delete_file(&name).await.is_ok() {
                    writeln!(out, "deleted {name}")?;
                }
                write_listing(out, client.files())?;
            }
            ShellCommand::Qr => {
                write_share_banner(out, client.server_address(), options.web_port, true)?;
            }
            ShellCommand::Help => writeln!(out, "{SHELL_HELP}")?,
            ShellCommand::Quit => break,
            ShellCommand::Usage(usage) => writeln!(out, "usage: {usage}")?,
            ShellCommand::Unknown(word) => {
                writeln!(out, "unknown command `{word}`; type `help`")?
            }
        }
    }

    Ok(())
}
