//! xmflash CLI - XModem firmware download and scripted device tests.
//!
//! ## Features
//!
//! - Download firmware through the boot monitor (`x 160000` / `g 160000`)
//! - Run command lists against the device and grade the responses
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support
//! - Internationalization (i18n) support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use rust_i18n::t;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use xmflash::{CancelToken, ChecksumMode, DataBits, LinkConfig, Parity, StopBits};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;
mod help;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// Default baud rate of the boot monitor.
const DEFAULT_BAUD: u32 = 115_200;

/// xmflash - XModem firmware download and device test tool.
///
/// Environment variables:
///   XMFLASH_PORT              - Default serial port
///   XMFLASH_BAUD              - Default baud rate (default: 115200)
///   XMFLASH_LANG              - Language/locale (en, zh-CN)
///   XMFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "xmflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/xmflash/xmflash")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "XMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "XMFLASH_BAUD")]
    baud: Option<u32>,

    /// Data bits (5, 6, 7 or 8).
    #[arg(long, global = true, value_name = "BITS")]
    data_bits: Option<u8>,

    /// Stop bits (1 or 2).
    #[arg(long, global = true, value_name = "BITS")]
    stop_bits: Option<u8>,

    /// Parity (none, even, odd, mark, space).
    #[arg(long, global = true)]
    parity: Option<String>,

    /// Language/locale for messages (e.g., en, zh-CN).
    #[arg(long, global = true, env = "XMFLASH_LANG")]
    lang: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "XMFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Packet trailer selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ChecksumArg {
    /// CRC-16/XMODEM (133-byte packets).
    Crc,
    /// 8-bit checksum (132-byte packets).
    Checksum,
}

impl From<ChecksumArg> for ChecksumMode {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Crc => Self::Crc16,
            ChecksumArg::Checksum => Self::Checksum,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Download a firmware image over XModem and validate the boot.
    Download {
        /// Firmware image (defaults to `[download] firmware` in the config).
        firmware: Option<PathBuf>,

        /// Packet trailer.
        #[arg(long, value_enum)]
        checksum: Option<ChecksumArg>,

        /// Seconds to watch the boot output after the transfer (5-60).
        #[arg(long, value_name = "SECS")]
        post_wait: Option<u64>,

        /// Output the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a command list against the device.
    Test {
        /// Command list file (defaults to `[test] commands` in the config).
        commands: Option<PathBuf>,

        /// Response timeout per command in seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Output the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Download firmware, then run the command list.
    Run {
        /// Firmware image.
        #[arg(long)]
        firmware: Option<PathBuf>,

        /// Command list file.
        #[arg(long)]
        commands: Option<PathBuf>,

        /// Output both results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing input.
    #[error("{0}")]
    Usage(String),
    /// Invalid link or config settings.
    #[error("{0}")]
    Config(String),
    /// The device or link failed.
    #[error("{0}")]
    Device(String),
    /// The sequence ran but some commands did not pass.
    #[error("{0}")]
    TestsFailed(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Device(_) => 4,
            Self::TestsFailed(_) => 5,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map any error reaching `main` onto a process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<xmflash::Error>() {
        Some(xmflash::Error::Interrupted) => 130,
        Some(xmflash::Error::InvalidConfig(_)) => 3,
        Some(e) if e.is_link_error() => 4,
        _ => 1,
    }
}

/// Pick the locale from `--lang`, `XMFLASH_LANG` or the system.
fn early_locale(raw_args: &[String]) -> String {
    let mut early_lang: Option<String> = None;
    for (i, arg) in raw_args.iter().enumerate() {
        if let Some(val) = arg.strip_prefix("--lang=") {
            early_lang = Some(val.to_string());
        } else if arg == "--lang" && i + 1 < raw_args.len() {
            early_lang = Some(raw_args[i + 1].clone());
        }
    }
    early_lang
        .or_else(|| env::var("XMFLASH_LANG").ok())
        .unwrap_or_else(help::detect_locale)
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 130 {
                eprintln!("{} {err}", style("✗").yellow());
            } else {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            code
        },
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    // Inspect raw args early to support localized --help handling and early --lang
    let raw_args: Vec<String> = env::args().collect();
    let locale = early_locale(&raw_args);
    rust_i18n::set_locale(&locale);

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Localized help is printed before clap's own help handling
    let wants_help = raw_args.iter().any(|a| a == "-h" || a == "--help");
    let no_args = raw_args.len() <= 1;

    if wants_help || no_args {
        help::print_help_page(&raw_args);
        return Ok(());
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "xmflash v{} (verbose level: {}, locale: {locale})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        INTERRUPTED.store(true, Ordering::Relaxed);
        handler_token.cancel();
    }) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }

    match &cli.command {
        Commands::Download {
            firmware,
            checksum,
            post_wait,
            json,
        } => commands::download::cmd_download(
            &cli,
            &config,
            &commands::download::DownloadArgs {
                firmware: firmware.clone(),
                checksum: checksum.map(ChecksumMode::from),
                post_wait: *post_wait,
                json: *json,
            },
            &cancel,
        ),
        Commands::Test {
            commands: list,
            timeout,
            json,
        } => commands::test::cmd_test(&cli, &config, list.as_ref(), *timeout, *json, &cancel),
        Commands::Run {
            firmware,
            commands: list,
            json,
        } => commands::run::cmd_run(&cli, &config, firmware.as_ref(), list.as_ref(), *json, &cancel),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Get serial port from CLI args, config or interactive selection.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}

/// Combine CLI flags and config into a validated link configuration.
///
/// Flags win over the config file, which wins over the 115200 8N1 defaults.
fn build_link_config(cli: &Cli, config: &Config, port: String) -> Result<LinkConfig> {
    let config_err = |e: xmflash::Error| CliError::Config(e.to_string());

    let baud = cli.baud.or(config.link.baud).unwrap_or(DEFAULT_BAUD);
    let mut link = LinkConfig::new(port, baud);

    if let Some(bits) = cli.data_bits.or(config.link.data_bits) {
        link = link.with_data_bits(DataBits::try_from(bits).map_err(config_err)?);
    }
    if let Some(bits) = cli.stop_bits.or(config.link.stop_bits) {
        link = link.with_stop_bits(StopBits::try_from(bits).map_err(config_err)?);
    }
    if let Some(parity) = cli.parity.as_ref().or(config.link.parity.as_ref()) {
        link = link.with_parity(parity.parse::<Parity>().map_err(config_err)?);
    }

    link.validate().map_err(config_err)?;
    debug!(
        "Link: {} {} {}{}{}",
        link.port_name,
        link.baud_rate,
        u8::from(link.data_bits),
        link.parity,
        u8::from(link.stop_bits)
    );
    Ok(link)
}


#[cfg(test)]
mod locale_tests {
    use rust_i18n::t;

    #[test]
    fn test_english_and_chinese_messages_differ() {
        let en = t!("download.transfer_complete", locale = "en").to_string();
        let zh = t!("download.transfer_complete", locale = "zh-CN").to_string();
        assert_ne!(en, "download.transfer_complete");
        assert_ne!(zh, "download.transfer_complete");
        assert_ne!(en, zh);
    }

    #[test]
    fn test_unknown_locale_falls_back_to_english() {
        let fallback = t!("list_ports.header", locale = "fr").to_string();
        let en = t!("list_ports.header", locale = "en").to_string();
        assert_eq!(fallback, en);
    }
}
