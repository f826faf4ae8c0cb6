//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io;

use crate::Cli;

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion_script(shell: Shell) -> String {
        let mut buf = Vec::new();
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_bash_completions_name_subcommands() {
        let script = completion_script(Shell::Bash);
        assert!(script.contains("xmflash"));
        assert!(script.contains("download"));
        assert!(script.contains("list-ports"));
    }

    #[test]
    fn test_zsh_completions_generate_output() {
        assert!(completion_script(Shell::Zsh).contains("xmflash"));
    }

    #[test]
    fn test_fish_completions_generate_output() {
        assert!(completion_script(Shell::Fish).contains("xmflash"));
    }

    #[test]
    fn test_powershell_and_elvish_generate_output() {
        assert!(!completion_script(Shell::PowerShell).is_empty());
        assert!(!completion_script(Shell::Elvish).is_empty());
    }
}
