//! Test command implementation.

use anyhow::{Context, Result};
use console::style;
use rust_i18n::t;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xmflash::{CancelToken, LinkConfig, SequencerConfig, TestCase, TestResult, parse_command_list};

use crate::config::Config;
use crate::{Cli, CliError, build_link_config, get_port, was_interrupted};

/// Command list path from the argument, falling back to the config.
pub(crate) fn resolve_commands(arg: Option<&PathBuf>, config: &Config) -> Result<PathBuf> {
    arg.or(config.test.commands.as_ref())
        .cloned()
        .ok_or_else(|| CliError::Usage(t!("test.no_commands").to_string()).into())
}

/// Read and parse a command list with the configured expectation rules.
pub(crate) fn load_cases(path: &Path, config: &Config) -> Result<Vec<TestCase>> {
    let text = fs::read_to_string(path)
        .with_context(|| t!("error.read_commands", path = path.display().to_string()))?;
    Ok(parse_command_list(&text, &config.expect_rules()))
}

/// Sequencer settings from the flag, falling back to the config.
pub(crate) fn sequencer_config(timeout: Option<u64>, config: &Config) -> SequencerConfig {
    let mut seq = SequencerConfig::default();
    if let Some(secs) = timeout.or(config.test.timeout_secs) {
        seq.command_timeout = Duration::from_secs(secs);
    }
    seq
}

/// Run `cases` on a freshly opened link.
pub(crate) fn execute(
    cli: &Cli,
    link: &LinkConfig,
    cases: &[TestCase],
    seq: &SequencerConfig,
    cancel: &CancelToken,
    json: bool,
) -> TestResult {
    if !cli.quiet && !json {
        eprintln!(
            "{} {}",
            style("▶").cyan(),
            t!("test.running", count = cases.len())
        );
    }
    xmflash::run_test_commands(link, cases, seq, Some(cancel.clone()))
}

/// Print the transcript to stdout and the summary to stderr.
pub(crate) fn print_result(cli: &Cli, result: &TestResult) {
    print!("{}", result.transcript);

    if let Some(error) = &result.error {
        eprintln!("{} {error}", style("✗").red());
    } else if !cli.quiet && result.total > 0 {
        let mark = if result.failed == 0 {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        eprintln!(
            "{mark} {}",
            t!(
                "test.summary",
                passed = result.passed,
                failed = result.failed,
                total = result.total
            )
        );
    }
}

/// Turn an unsuccessful run into the matching CLI error.
///
/// A run that stopped early is a device failure; a complete run with FAIL
/// verdicts exits with the test-failure code.
pub(crate) fn check_result(result: &TestResult) -> Result<()> {
    if was_interrupted() {
        return Err(CliError::Cancelled(t!("error.interrupted").to_string()).into());
    }
    if let Some(error) = &result.error {
        return Err(CliError::Device(t!("test.aborted", reason = error).to_string()).into());
    }
    if result.failed > 0 {
        return Err(CliError::TestsFailed(
            t!("test.failed", failed = result.failed, total = result.total).to_string(),
        )
        .into());
    }
    Ok(())
}

/// Test command implementation.
pub(crate) fn cmd_test(
    cli: &Cli,
    config: &Config,
    commands: Option<&PathBuf>,
    timeout: Option<u64>,
    json: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let path = resolve_commands(commands, config)?;
    let cases = load_cases(&path, config)?;
    let seq = sequencer_config(timeout, config);

    if cases.is_empty() {
        // Nothing to send, so no port is needed
        if json {
            println!("{}", serde_json::to_string_pretty(&TestResult::empty(Vec::new()))?);
        } else {
            eprintln!("{} {}", style("ℹ").blue(), t!("test.no_cases"));
        }
        return Ok(());
    }

    let port = get_port(cli, config)?;
    let link = build_link_config(cli, config, port)?;
    let result = execute(cli, &link, &cases, &seq, cancel, json);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(cli, &result);
    }

    check_result(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmflash::{TestOutcome, Verdict};

    fn result_with(passed: usize, failed: usize, error: Option<&str>) -> TestResult {
        let mut result = TestResult::empty(Vec::new());
        result.success = error.is_none();
        result.total = passed + failed;
        result.passed = passed;
        result.failed = failed;
        result.error = error.map(String::from);
        result
    }

    #[test]
    fn test_load_cases_applies_config_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TestOrders.txt");
        fs::write(&path, "# boot checks\n\nversion\ngpiob 0 0\nwifi scan\n").unwrap();

        let mut config = Config::default();
        config.test.rules.push(crate::config::RuleEntry {
            prefix: "wifi".into(),
            expect: Some("AP".into()),
            timeout_secs: Some(20),
        });

        let cases = load_cases(&path, &config).unwrap();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].expected, None);
        assert_eq!(cases[1].expected.as_deref(), Some("gpiob0 input"));
        assert_eq!(cases[2].expected.as_deref(), Some("AP"));
        assert_eq!(cases[2].timeout, Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_load_cases_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_cases(&dir.path().join("nope.txt"), &Config::default()).is_err());
    }

    #[test]
    fn test_sequencer_config_timeout_precedence() {
        let mut config = Config::default();
        assert_eq!(
            sequencer_config(None, &config).command_timeout,
            SequencerConfig::default().command_timeout
        );

        config.test.timeout_secs = Some(12);
        assert_eq!(
            sequencer_config(None, &config).command_timeout,
            Duration::from_secs(12)
        );
        assert_eq!(
            sequencer_config(Some(3), &config).command_timeout,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_check_result_exit_codes() {
        assert!(check_result(&result_with(2, 0, None)).is_ok());

        let err = check_result(&result_with(1, 1, None)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::TestsFailed(_))
        ));

        let err = check_result(&result_with(1, 0, Some("timeout"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Device(_))
        ));
    }

    #[test]
    fn test_executed_verdicts_do_not_fail_the_run() {
        let mut result = result_with(0, 0, None);
        result.total = 1;
        result.outcomes.push(TestOutcome {
            case: TestCase::new("reboot"),
            response: "ok".into(),
            verdict: Verdict::Executed,
        });
        assert!(check_result(&result).is_ok());
    }
}
