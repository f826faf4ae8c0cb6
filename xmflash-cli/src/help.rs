//! Localized `--help` pages.
//!
//! clap renders help from doc comments fixed at compile time. Before parsing,
//! xmflash relabels the command tree from the locale files instead: page
//! headings, subcommand descriptions and argument help. Anything without a
//! translation keeps its English doc-comment text.

use clap::{Arg, ArgAction, Command, CommandFactory};
use rust_i18n::t;

use crate::Cli;

/// Locales with a translation file.
pub(crate) const SUPPORTED_LOCALES: &[&str] = &["en", "zh-CN"];

/// Language subtag to locale, for tags with no exact match.
const LANGUAGE_FALLBACKS: &[(&str, &str)] = &[("zh", "zh-CN")];

const DEFAULT_LOCALE: &str = "en";

/// Map a system locale string onto a supported locale.
///
/// `zh_CN.UTF-8`, `zh-TW` and `zh` become `zh-CN`; everything else,
/// including `C` and `POSIX`, becomes `en`.
pub(crate) fn match_locale(system_locale: &str) -> String {
    let tag = system_locale
        .split('.')
        .next()
        .unwrap_or_default()
        .replace('_', "-");
    if SUPPORTED_LOCALES.contains(&tag.as_str()) {
        return tag;
    }

    let language = tag.split('-').next().unwrap_or_default().to_ascii_lowercase();
    LANGUAGE_FALLBACKS
        .iter()
        .find(|(subtag, _)| *subtag == language)
        .map_or(DEFAULT_LOCALE, |(_, locale)| locale)
        .to_string()
}

pub(crate) fn detect_locale() -> String {
    sys_locale::get_locale().map_or_else(|| DEFAULT_LOCALE.to_string(), |l| match_locale(&l))
}

/// Text for `key` in the active locale, if the locale files define it.
fn translated(key: &str) -> Option<String> {
    let text = t!(key).to_string();
    (text != key).then_some(text)
}

/// Building blocks of a help page.
#[derive(Debug, Clone, Copy)]
enum Block {
    Banner,
    Usage,
    Commands,
    Options,
    AllArgs,
    Footer,
}

/// Top-level page: subcommands first, then the global options.
const ROOT_PAGE: &[Block] = &[
    Block::Banner,
    Block::Usage,
    Block::Commands,
    Block::Options,
    Block::Footer,
];

const SUBCOMMAND_PAGE: &[Block] = &[Block::Banner, Block::Usage, Block::AllArgs];

/// Render `blocks` into a clap help template with localized headings.
fn page_template(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|block| match block {
            Block::Banner => "{bin} {version}\n\n{about}\n\n".to_string(),
            Block::Usage => format!("{}:\n  {{usage}}\n\n", t!("help.usage_heading")),
            Block::Commands => format!("{}:\n{{subcommands}}\n\n", t!("help.commands_heading")),
            Block::Options => format!("{}:\n{{options}}\n\n", t!("help.options_heading")),
            Block::AllArgs => "{all-args}\n".to_string(),
            Block::Footer => "{after-help}\n".to_string(),
        })
        .collect()
}

/// Section labels that group arguments on a page.
///
/// clap keeps borrowing heading strings for as long as the command lives, so
/// they are leaked. Help is rendered once per process.
#[derive(Debug, Clone, Copy)]
struct ArgHeadings {
    positional: &'static str,
    flags: &'static str,
}

impl ArgHeadings {
    fn current() -> Self {
        let leak = |key: &str| -> &'static str { Box::leak(t!(key).to_string().into_boxed_str()) };
        Self {
            positional: leak("help.arguments_heading"),
            flags: leak("help.options_heading"),
        }
    }

    /// Translate `arg.<id>.help` and file the arg under its section.
    fn relabel(self, arg: Arg) -> Arg {
        let key = format!("arg.{}.help", arg.get_id().as_str());
        let arg = match translated(&key) {
            Some(help) => arg.help(help),
            None => arg,
        };
        let heading = if arg.is_positional() {
            self.positional
        } else {
            self.flags
        };
        arg.help_heading(heading)
    }
}

/// `-h` and `-V`, declared here so their own descriptions translate.
fn global_flags() -> [Arg; 2] {
    [
        ("help", 'h', ArgAction::Help),
        ("version", 'V', ArgAction::Version),
    ]
    .map(|(id, short, action)| {
        Arg::new(id)
            .short(short)
            .long(id)
            .help(translated(&format!("arg.{id}_flag.help")).unwrap_or_default())
            .action(action)
            .global(true)
    })
}

/// The xmflash command tree with user-visible text from the active locale.
pub(crate) fn localized_command() -> Command {
    let headings = ArgHeadings::current();
    let subcommand_page = page_template(SUBCOMMAND_PAGE);

    let root = Cli::command()
        .help_template(page_template(ROOT_PAGE))
        .about(t!("app.about").to_string())
        .after_help(t!("app.after_help").to_string())
        .disable_help_flag(true)
        .disable_version_flag(true)
        .disable_help_subcommand(true)
        .args(global_flags());

    root.mut_args(move |arg| headings.relabel(arg))
        .mut_subcommands(move |sub| {
            let key = format!("cmd.{}.about", sub.get_name().replace('-', "_"));
            let sub = match translated(&key) {
                Some(about) => sub.about(about),
                None => sub,
            };
            sub.help_template(subcommand_page.clone())
                .mut_args(move |arg| headings.relabel(arg))
        })
}

/// Page to show for a raw command line: the first token naming a
/// subcommand selects its page, otherwise the top-level page.
pub(crate) fn help_page(raw_args: &[String]) -> Command {
    let root = localized_command();
    raw_args
        .iter()
        .skip(1)
        .find_map(|token| root.find_subcommand(token.as_str()))
        .cloned()
        .unwrap_or_else(|| root.clone())
}

/// Print the localized page for `raw_args` to stdout.
pub(crate) fn print_help_page(raw_args: &[String]) {
    let _ = help_page(raw_args).print_help();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_locale_chinese_variants() {
        assert_eq!(match_locale("zh_CN.UTF-8"), "zh-CN");
        assert_eq!(match_locale("zh-CN"), "zh-CN");
        assert_eq!(match_locale("zh_TW.UTF-8"), "zh-CN");
        assert_eq!(match_locale("ZH"), "zh-CN");
    }

    #[test]
    fn test_locale_english_and_fallbacks() {
        assert_eq!(match_locale("en_US.UTF-8"), "en");
        assert_eq!(match_locale("en"), "en");
        assert_eq!(match_locale("C"), "en");
        assert_eq!(match_locale("POSIX"), "en");
        assert_eq!(match_locale("de_DE.UTF-8"), "en");
        assert_eq!(match_locale(""), "en");
    }

    #[test]
    fn test_root_page_lists_commands_before_options() {
        let template = page_template(ROOT_PAGE);
        let commands = template.find("{subcommands}").unwrap();
        let options = template.find("{options}").unwrap();
        assert!(template.starts_with("{bin} {version}"));
        assert!(commands < options);
        assert!(template.ends_with("{after-help}\n"));
    }

    #[test]
    fn test_subcommand_page_shows_all_args() {
        let template = page_template(SUBCOMMAND_PAGE);
        assert!(template.contains("{usage}"));
        assert!(template.contains("{all-args}"));
        assert!(!template.contains("{subcommands}"));
    }

    #[test]
    fn test_relabel_groups_positional_and_flags() {
        let headings = ArgHeadings {
            positional: "Args",
            flags: "Flags",
        };
        let firmware = headings.relabel(Arg::new("firmware"));
        let json = headings.relabel(Arg::new("json").long("json"));
        assert_eq!(firmware.get_help_heading(), Some("Args"));
        assert_eq!(json.get_help_heading(), Some("Flags"));
    }

    #[test]
    fn test_localized_command_lists_subcommands() {
        let cmd = localized_command();
        let names: Vec<&str> = cmd.get_subcommands().map(Command::get_name).collect();
        for expected in ["download", "test", "run", "list-ports", "completions"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_help_page_follows_named_subcommand() {
        assert_eq!(help_page(&argv(&["xmflash", "download", "-h"])).get_name(), "download");
        assert_eq!(
            help_page(&argv(&["xmflash", "--port", "COM3", "test", "--help"])).get_name(),
            "test"
        );
        assert_eq!(help_page(&argv(&["xmflash", "--help"])).get_name(), "xmflash");
        assert_eq!(help_page(&argv(&["xmflash"])).get_name(), "xmflash");
    }
}
