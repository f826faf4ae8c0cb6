//! Download command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rust_i18n::t;
use std::path::{Path, PathBuf};
use xmflash::{
    CancelToken, ChecksumMode, DownloadOptions, LinkConfig, TransferResult, ValidatorConfig,
    load_firmware,
};

use crate::config::Config;
use crate::{Cli, CliError, build_link_config, get_port, use_fancy_output, was_interrupted};

/// Arguments of `xmflash download`.
pub(crate) struct DownloadArgs {
    pub(crate) firmware: Option<PathBuf>,
    pub(crate) checksum: Option<ChecksumMode>,
    pub(crate) post_wait: Option<u64>,
    pub(crate) json: bool,
}

/// Firmware path from the argument, falling back to the config.
pub(crate) fn resolve_firmware(arg: Option<&PathBuf>, config: &Config) -> Result<PathBuf> {
    arg.or(config.download.firmware.as_ref())
        .cloned()
        .ok_or_else(|| CliError::Usage(t!("download.no_firmware").to_string()).into())
}

/// Parse a `[download] checksum` value.
pub(crate) fn parse_checksum(name: &str) -> Result<ChecksumMode, CliError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "crc" | "crc16" => Ok(ChecksumMode::Crc16),
        "checksum" | "sum" => Ok(ChecksumMode::Checksum),
        other => Err(CliError::Config(
            t!("download.invalid_checksum", value = other).to_string(),
        )),
    }
}

/// Pipeline options from flags and config.
pub(crate) fn download_options(
    checksum: Option<ChecksumMode>,
    post_wait: Option<u64>,
    config: &Config,
) -> Result<DownloadOptions> {
    let mut options = DownloadOptions::default();

    options.transmitter.mode = match (checksum, config.download.checksum.as_deref()) {
        (Some(mode), _) => mode,
        (None, Some(name)) => parse_checksum(name)?,
        (None, None) => ChecksumMode::default(),
    };

    if let Some(secs) = post_wait.or(config.download.post_wait_secs) {
        options.validator = ValidatorConfig::default().with_window(secs);
    }

    Ok(options)
}

/// Run the download pipeline with a progress bar on stderr.
pub(crate) fn transfer(
    cli: &Cli,
    link: &LinkConfig,
    firmware: &[u8],
    options: &DownloadOptions,
    cancel: &CancelToken,
    show_progress: bool,
) -> TransferResult {
    let pb = if cli.quiet || !show_progress || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(t!("download.sending").to_string());
        pb
    };

    let result = xmflash::download_firmware(
        link,
        firmware,
        options,
        Some(cancel.clone()),
        |done, total| {
            if total > 0 {
                pb.set_position((done * 100 / total) as u64);
            }
        },
    );

    if result.success {
        pb.finish_with_message(t!("common.complete").to_string());
    } else {
        pb.abandon();
    }
    result
}

/// Print the session log to stdout and warnings to stderr.
pub(crate) fn print_transfer(cli: &Cli, result: &TransferResult) {
    for entry in &result.log {
        println!("{entry}");
    }

    for warning in &result.warnings {
        eprintln!("{} {warning}", style("⚠").yellow());
    }

    if result.success && !cli.quiet {
        eprintln!(
            "\n{} {}",
            style("✓").green().bold(),
            t!("download.transfer_complete", packets = result.packets_sent)
        );
    }
}

/// Turn a failed transfer into the matching CLI error.
pub(crate) fn check_transfer(result: &TransferResult) -> Result<()> {
    if result.success {
        return Ok(());
    }
    let reason = result
        .error
        .clone()
        .unwrap_or_else(|| result.outcome.clone());
    if result.interrupted || was_interrupted() {
        Err(CliError::Cancelled(t!("error.interrupted").to_string()).into())
    } else {
        Err(CliError::Device(t!("download.failed", reason = reason).to_string()).into())
    }
}

/// Load the image named by `path`, with a localized context message.
pub(crate) fn read_firmware(cli: &Cli, path: &Path, json: bool) -> Result<Vec<u8>> {
    if !cli.quiet && !json {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            t!("download.loading_firmware", path = path.display())
        );
    }
    let firmware = load_firmware(path)
        .with_context(|| t!("error.load_firmware", path = path.display().to_string()))?;
    if !cli.quiet && !json {
        eprintln!(
            "{} {}",
            style("ℹ").blue(),
            t!(
                "download.firmware_size",
                bytes = firmware.len(),
                packets = firmware.len().div_ceil(128)
            )
        );
    }
    Ok(firmware)
}

/// Download command implementation.
pub(crate) fn cmd_download(
    cli: &Cli,
    config: &Config,
    args: &DownloadArgs,
    cancel: &CancelToken,
) -> Result<()> {
    let path = resolve_firmware(args.firmware.as_ref(), config)?;
    let firmware = read_firmware(cli, &path, args.json)?;
    let options = download_options(args.checksum, args.post_wait, config)?;

    let port = get_port(cli, config)?;
    let link = build_link_config(cli, config, port)?;
    if !cli.quiet && !args.json {
        eprintln!(
            "{} {}",
            style("🔌").cyan(),
            t!("common.using_port", port = &link.port_name, baud = link.baud_rate)
        );
    }

    let result = transfer(cli, &link, &firmware, &options, cancel, !args.json);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_transfer(cli, &result);
    }

    check_transfer(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_checksum_names() {
        assert_eq!(parse_checksum("crc").unwrap(), ChecksumMode::Crc16);
        assert_eq!(parse_checksum("CRC16").unwrap(), ChecksumMode::Crc16);
        assert_eq!(parse_checksum(" checksum ").unwrap(), ChecksumMode::Checksum);
        assert!(matches!(parse_checksum("md5"), Err(CliError::Config(_))));
    }

    #[test]
    fn test_download_options_default() {
        let options = download_options(None, None, &Config::default()).unwrap();
        assert_eq!(options.transmitter.mode, ChecksumMode::Crc16);
        assert_eq!(options.validator.window_ticks, ValidatorConfig::default().window_ticks);
    }

    #[test]
    fn test_download_options_flag_beats_config() {
        let mut config = Config::default();
        config.download.checksum = Some("crc".into());
        config.download.post_wait_secs = Some(30);

        let options = download_options(Some(ChecksumMode::Checksum), Some(10), &config).unwrap();
        assert_eq!(options.transmitter.mode, ChecksumMode::Checksum);
        assert_eq!(options.validator.window_ticks, 10);
        assert_eq!(options.validator.tick, Duration::from_secs(1));
    }

    #[test]
    fn test_download_options_post_wait_is_clamped() {
        let options = download_options(None, Some(600), &Config::default()).unwrap();
        assert_eq!(options.validator.window_ticks, 60);
    }

    #[test]
    fn test_download_options_invalid_config_checksum() {
        let mut config = Config::default();
        config.download.checksum = Some("xor".into());
        let err = download_options(None, None, &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_firmware_prefers_argument() {
        let mut config = Config::default();
        config.download.firmware = Some(PathBuf::from("config.bin"));

        let arg = PathBuf::from("arg.bin");
        assert_eq!(resolve_firmware(Some(&arg), &config).unwrap(), arg);
        assert_eq!(
            resolve_firmware(None, &config).unwrap(),
            PathBuf::from("config.bin")
        );
    }

    #[test]
    fn test_resolve_firmware_missing_is_usage_error() {
        let err = resolve_firmware(None, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }
}
