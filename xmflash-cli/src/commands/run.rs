//! Download-then-test command.
//!
//! The command list runs on a fresh link once the image has booted; a failed
//! download skips the tests.

use anyhow::Result;
use console::style;
use rust_i18n::t;
use std::path::PathBuf;
use xmflash::CancelToken;

use super::{download, test};
use crate::config::Config;
use crate::{Cli, build_link_config, get_port};

/// Run command implementation.
pub(crate) fn cmd_run(
    cli: &Cli,
    config: &Config,
    firmware: Option<&PathBuf>,
    commands: Option<&PathBuf>,
    json: bool,
    cancel: &CancelToken,
) -> Result<()> {
    // Resolve every input before touching the link
    let firmware_path = download::resolve_firmware(firmware, config)?;
    let commands_path = test::resolve_commands(commands, config)?;
    let image = download::read_firmware(cli, &firmware_path, json)?;
    let cases = test::load_cases(&commands_path, config)?;
    let options = download::download_options(None, None, config)?;
    let seq = test::sequencer_config(None, config);

    let port = get_port(cli, config)?;
    let link = build_link_config(cli, config, port)?;
    if !cli.quiet && !json {
        eprintln!(
            "{} {}",
            style("🔌").cyan(),
            t!("common.using_port", port = &link.port_name, baud = link.baud_rate)
        );
    }

    let transfer = download::transfer(cli, &link, &image, &options, cancel, !json);
    if !transfer.success {
        if json {
            let report = serde_json::json!({ "download": transfer, "test": null });
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            download::print_transfer(cli, &transfer);
        }
        return download::check_transfer(&transfer);
    }

    if !json {
        download::print_transfer(cli, &transfer);
        eprintln!();
    }

    let result = if cases.is_empty() {
        xmflash::TestResult::empty(Vec::new())
    } else {
        test::execute(cli, &link, &cases, &seq, cancel, json)
    };

    if json {
        let report = serde_json::json!({ "download": transfer, "test": result });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if cases.is_empty() {
        eprintln!("{} {}", style("ℹ").blue(), t!("test.no_cases"));
    } else {
        test::print_result(cli, &result);
    }

    test::check_result(&result)
}
