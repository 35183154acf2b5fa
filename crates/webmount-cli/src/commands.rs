//! Filesystem operations run against a namespace.

use clap::{Parser, Subcommand};
use std::io::Write;
use thiserror::Error;

use webmount_kernel::{FileAttr, Namespace, VfsError};

/// Bytes read by `cat` when no size is given.
pub const DEFAULT_READ_SIZE: u32 = 1 << 20;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error("authentication failed")]
    Login,

    #[error("{0}")]
    Usage(String),

    #[error("output: {0}")]
    Output(#[from] std::io::Error),
}

impl CommandError {
    /// Message with the errno a mounted filesystem would have returned.
    pub fn report(&self) -> String {
        match self {
            #[cfg(unix)]
            CommandError::Vfs(e) => format!("{e} (errno {})", e.errno()),
            other => other.to_string(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show attributes of a path
    Stat { path: String },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a file
    Cat {
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = DEFAULT_READ_SIZE)]
        size: u32,
    },

    /// Replace a file's content, like `echo DATA > PATH`
    Write {
        path: String,
        data: String,
        /// Do not append a newline
        #[arg(short = 'n')]
        no_newline: bool,
    },

    /// Cut or zero-extend a file
    Truncate { path: String, size: u64 },

    /// Log in with the current credentials
    Login,

    /// Drop the session
    Logout,

    /// Run commands read from stdin, one per line, against one session
    Batch,
}

/// One line of a batch script.
#[derive(Parser, Debug)]
#[command(name = "webmount", no_binary_name = true)]
struct BatchLine {
    #[command(subcommand)]
    command: Command,
}

/// Parse a batch line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let words = match line.strip_prefix("write") {
        Some(args) if args.starts_with(char::is_whitespace) => write_words(args),
        _ => line.split_whitespace().collect(),
    };
    let parsed = BatchLine::try_parse_from(words).map_err(|e| CommandError::Usage(e.to_string()))?;
    if parsed.command == Command::Batch {
        return Err(CommandError::Usage("batch cannot be nested".into()));
    }
    Ok(Some(parsed.command))
}

/// Split `write [-n] PATH rest of the line`, keeping the data's spaces.
///
/// The data goes after `--` so a value such as `-1` is not taken for a flag.
fn write_words(args: &str) -> Vec<&str> {
    let mut words = vec!["write"];
    let mut rest = args.trim_start();
    while let Some(after) = rest
        .strip_prefix("-n")
        .filter(|after| after.is_empty() || after.starts_with(char::is_whitespace))
    {
        words.push("-n");
        rest = after.trim_start();
    }
    words.push("--");
    match rest.split_once(char::is_whitespace) {
        Some((path, data)) => words.extend([path, data.trim_start()]),
        None if !rest.is_empty() => words.push(rest),
        None => {}
    }
    words
}

fn describe(attr: &FileAttr) -> String {
    let kind = if attr.is_dir() { 'd' } else { '-' };
    format!(
        "{kind} {:o} size={} nlink={} uid={} gid={}",
        attr.perm, attr.size, attr.nlink, attr.uid, attr.gid
    )
}

/// Run one command, writing its output to `out`.
pub async fn run(ns: &Namespace, command: &Command, out: &mut dyn Write) -> Result<(), CommandError> {
    match command {
        Command::Stat { path } => {
            let attr = ns.stat(path).await?;
            writeln!(out, "{}", describe(&attr))?;
        }
        Command::Ls { path } => {
            for name in ns.list(path).await? {
                writeln!(out, "{name}")?;
            }
        }
        Command::Cat { path, offset, size } => {
            ns.open(path, false).await?;
            let data = ns.read(path, *size, *offset).await?;
            out.write_all(&data)?;
        }
        Command::Write {
            path,
            data,
            no_newline,
        } => {
            let mut bytes = data.clone().into_bytes();
            if !no_newline {
                bytes.push(b'\n');
            }
            ns.open(path, true).await?;
            ns.truncate(path, 0).await?;
            ns.write(path, &bytes, 0).await?;
        }
        Command::Truncate { path, size } => {
            ns.truncate(path, *size).await?;
        }
        Command::Login => {
            ns.session().authenticate().await.map_err(|_| CommandError::Login)?;
            writeln!(out, "logged in as {}", ns.session().username())?;
        }
        Command::Logout => {
            ns.session().deauthenticate().await;
        }
        Command::Batch => {
            return Err(CommandError::Usage("batch cannot be nested".into()));
        }
    }
    Ok(())
}

/// Run every line of `script`. Failures are reported inline and counted.
pub async fn run_batch(ns: &Namespace, script: &str, out: &mut dyn Write) -> Result<usize, CommandError> {
    let mut failures = 0;
    for (number, line) in script.lines().enumerate() {
        let result = match parse_line(line) {
            Ok(Some(command)) => run(ns, &command, out).await,
            Ok(None) => continue,
            Err(e) => Err(e),
        };
        let e = match result {
            Ok(()) => continue,
            Err(CommandError::Output(e)) => return Err(CommandError::Output(e)),
            Err(e) => e,
        };
        failures += 1;
        tracing::warn!(line = number + 1, "{}", e);
        writeln!(out, "! line {}: {}", number + 1, e.report())?;
    }
    Ok(failures)
}
