//! List-ports command implementation.

use console::style;
use rust_i18n::t;
use xmflash::available_ports;

use crate::serial::port_label;

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) {
    let ports = available_ports();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_else(|_| "[]".to_string())
        );
        return;
    }

    eprintln!("{}", style(t!("list_ports.header")).bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style(t!("list_ports.no_ports")).dim());
        return;
    }

    for port in &ports {
        eprintln!("  {} {}", style("•").green(), port_label(port));
    }

    if let [only] = ports.as_slice() {
        eprintln!(
            "\n{} {}",
            style("→").green().bold(),
            t!(
                "list_ports.auto_selected",
                port = style(&only.name).cyan().bold().to_string()
            )
        );
    }
}
