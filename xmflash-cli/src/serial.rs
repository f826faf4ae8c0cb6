//! Interactive serial port selection.
//!
//! Resolution order:
//! - Explicit `--port` / `XMFLASH_PORT`
//! - `[link] serial` from the configuration
//! - The only detected port, when exactly one exists
//! - Interactive selection via dialoguer (usage error in non-interactive mode)

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    rust_i18n::t,
    std::{cmp::Ordering, io::IsTerminal},
    xmflash::{PortInfo, available_ports},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures are setup problems: exit code 2, not a device failure
    CliError::Usage(message.to_string()).into()
}

/// Pick from `ports` without prompting.
fn select_without_prompt(ports: Vec<PortInfo>) -> Result<PortInfo> {
    match ports.len().cmp(&1) {
        Ordering::Equal => ports
            .into_iter()
            .next()
            .ok_or_else(|| usage_err(t!("serial.no_ports_available").as_ref())),
        Ordering::Greater => Err(usage_err(t!("serial.multiple_ports").as_ref())),
        Ordering::Less => Err(usage_err(t!("serial.no_ports_found").as_ref())),
    }
}

/// Resolve the serial port name to use.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.link.serial {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = available_ports();

    if options.non_interactive || ports.len() <= 1 {
        let port = select_without_prompt(ports)?;
        info!("Auto-selected port: {}", port.name);
        return Ok(port.name);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(ports)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(t!("serial.interactive_requires_tty").to_string()).into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()
            } else {
                CliError::Usage(t!("serial.prompt_failed").to_string()).into()
            }
        },
    }
}

/// One line of the selection menu.
pub(crate) fn port_label(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();
    format!("{}{vid_pid}{product}", style(&port.name).bold())
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} {}",
        style("ℹ").blue(),
        t!("serial.detected_ports", count = ports.len())
    );

    // Keep labels on one line in narrow terminals
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.select_prompt").to_string())
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()),
    }
}
