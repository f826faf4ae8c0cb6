//! Scripted command execution.
//!
//! Each [`TestCase`] is sent as one line; the first meaningful line the
//! device prints back is taken as its response and, when an expectation is
//! attached, graded PASS or FAIL.

use std::fmt::{self, Write as _};
use std::time::Duration;

use log::{debug, info, warn};

use crate::detect::TextBuffer;
use crate::error::Error;
use crate::port::Port;
use crate::session::{LogEntry, Session};

/// Response wait per command unless a case overrides it.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(8);

/// Separator for an inline expectation in a command list line. Surrounding
/// whitespace is ignored, so `led on =>` carries an empty expectation.
pub const INLINE_EXPECT: &str = "=>";

/// Device prompt marker; lines containing it are never responses.
const PROMPT_MARKER: char = '>';

/// Transcript text for an empty command list.
pub const NO_CASES: &str = "No valid test instructions found";

/// One scripted command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TestCase {
    /// Command text without line terminator.
    pub command: String,
    /// Human-readable description.
    pub description: String,
    /// Substring the response must contain, if graded.
    pub expected: Option<String>,
    /// Response wait override.
    pub timeout: Option<Duration>,
}

impl TestCase {
    /// Ungraded case with the default description.
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            description: format!("Execute command: {command}"),
            command,
            expected: None,
            timeout: None,
        }
    }

    /// Attach an expected response substring.
    #[must_use]
    pub fn expect(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Override the response wait.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Expectation applied to every command starting with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectRule {
    /// Command prefix.
    pub prefix: String,
    /// Expected response substring.
    pub expect: Option<String>,
    /// Response wait override.
    pub timeout: Option<Duration>,
}

impl ExpectRule {
    /// Rule grading commands that start with `prefix`.
    pub fn new(prefix: impl Into<String>, expect: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            expect: Some(expect.into()),
            timeout: None,
        }
    }

    /// Rules applied when no others are configured.
    pub fn builtin() -> Vec<Self> {
        vec![Self::new("gpiob 0 0", "gpiob0 input")]
    }
}

/// Parse a command list.
///
/// Blank lines and lines starting with `#` are skipped. A line may carry its
/// own expectation after `=>`; otherwise the first rule whose prefix
/// matches supplies it. Rules may also set a timeout override.
pub fn parse_command_list(text: &str, rules: &[ExpectRule]) -> Vec<TestCase> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (command, inline) = match line.split_once(INLINE_EXPECT) {
                Some((command, expect)) => (command.trim_end(), Some(expect.trim())),
                None => (line, None),
            };
            if command.is_empty() {
                return None;
            }

            let mut case = TestCase::new(command);
            let rule = rules.iter().find(|r| command.starts_with(&r.prefix));
            if let Some(rule) = rule {
                case.expected.clone_from(&rule.expect);
                case.timeout = rule.timeout;
            }
            if let Some(expect) = inline.filter(|e| !e.is_empty()) {
                case.expected = Some(expect.to_string());
            }
            Some(case)
        })
        .collect()
}

/// First complete line of `buffer` that is a response to `command`.
///
/// A response line is non-empty after trimming and contains neither the
/// command echo nor the prompt marker.
pub fn first_response(buffer: &str, command: &str) -> Option<String> {
    let complete = match buffer.rfind('\n') {
        Some(end) => &buffer[..end],
        None => return None,
    };
    complete
        .split('\n')
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.contains(command) && !line.contains(PROMPT_MARKER))
        .map(str::to_string)
}

/// Grade of one executed case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Verdict {
    /// Response contained the expectation.
    Pass,
    /// Response lacked the expectation.
    Fail,
    /// No expectation; the command simply ran.
    Executed,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Executed => write!(f, "Command Execution Completed"),
        }
    }
}

/// Result of one case.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TestOutcome {
    /// The case that ran.
    pub case: TestCase,
    /// Device response line.
    pub response: String,
    /// Grade.
    pub verdict: Verdict,
}

/// Aggregate result of a command sequence.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TestResult {
    /// The sequence ran to the end. Individual FAIL verdicts do not clear it.
    pub success: bool,
    /// Graded cases executed.
    pub total: usize,
    /// Graded cases that passed.
    pub passed: usize,
    /// Graded cases that failed.
    pub failed: usize,
    /// Per-case results, in execution order.
    pub outcomes: Vec<TestOutcome>,
    /// Human-readable transcript.
    pub transcript: String,
    /// Fatal error that stopped the sequence.
    pub error: Option<String>,
    /// Session log.
    pub log: Vec<LogEntry>,
}

impl TestResult {
    /// Result for a sequence that could not start at all.
    pub fn failure(error: impl Into<String>, log: Vec<LogEntry>) -> Self {
        Self {
            success: false,
            total: 0,
            passed: 0,
            failed: 0,
            outcomes: Vec::new(),
            transcript: String::new(),
            error: Some(error.into()),
            log,
        }
    }

    /// Result for an empty command list.
    pub fn empty(log: Vec<LogEntry>) -> Self {
        Self {
            success: true,
            total: 0,
            passed: 0,
            failed: 0,
            outcomes: Vec::new(),
            transcript: format!("{NO_CASES}\n"),
            error: None,
            log,
        }
    }

    /// Whether every graded case passed and nothing aborted.
    pub fn all_passed(&self) -> bool {
        self.success && self.failed == 0
    }
}

/// Sequencer timing.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Response wait for cases without an override.
    pub command_timeout: Duration,
    /// Pause after each command.
    pub settle: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            settle: Duration::from_millis(500),
        }
    }
}

/// Send one command and wait for its response line.
fn execute_case<P: Port>(
    session: &mut Session<P>,
    case: &TestCase,
    timeout: Duration,
) -> crate::error::Result<String> {
    // Late output from the previous command must not answer this one
    session.discard_input()?;
    session.send_line(&case.command)?;

    let mut buffer = TextBuffer::new();
    let response = session.wait_for(timeout, |chunk| {
        buffer.push(chunk);
        first_response(buffer.as_str(), &case.command)
    })?;

    response.ok_or_else(|| Error::CommandTimeout {
        command: case.command.clone(),
    })
}

/// Run `cases` in order on `session`.
///
/// A timeout or link error stops the sequence; results gathered so far are
/// kept.
pub fn run_sequence<P: Port>(
    session: &mut Session<P>,
    cases: &[TestCase],
    config: &SequencerConfig,
) -> TestResult {
    let mut transcript = String::new();
    let mut outcomes = Vec::with_capacity(cases.len());
    let mut error = None;

    if cases.is_empty() {
        session.note(NO_CASES);
        return TestResult::empty(session.journal().entries().to_vec());
    }

    info!("Running {} test commands", cases.len());
    transcript.push_str("Test Start:\n\n");

    for case in cases {
        let _ = writeln!(transcript, "[TEST] {}", case.description);
        let _ = writeln!(transcript, "  Send-> {}", case.command);

        let timeout = case.timeout.unwrap_or(config.command_timeout);
        let response = match execute_case(session, case, timeout) {
            Ok(response) => response,
            Err(e) => {
                warn!("{e}");
                session.note(e.to_string());
                let _ = writeln!(transcript, "  Error: {e}\n");
                error = Some(e.to_string());
                break;
            },
        };

        let verdict = match &case.expected {
            Some(expected) if response.contains(expected.as_str()) => Verdict::Pass,
            Some(_) => Verdict::Fail,
            None => Verdict::Executed,
        };
        debug!("{} -> {response} ({verdict})", case.command);

        let _ = writeln!(transcript, "  Device Response: {response}");
        let _ = writeln!(transcript, "  Test Result: {verdict}");
        if let (Verdict::Fail, Some(expected)) = (verdict, &case.expected) {
            let _ = writeln!(transcript, "  Expected Response: {expected}");
        }
        transcript.push('\n');

        outcomes.push(TestOutcome {
            case: case.clone(),
            response,
            verdict,
        });

        if let Err(e) = session.settle(config.settle) {
            session.note(e.to_string());
            error = Some(e.to_string());
            break;
        }
    }

    let total = outcomes
        .iter()
        .filter(|o| o.verdict != Verdict::Executed)
        .count();
    let passed = outcomes
        .iter()
        .filter(|o| o.verdict == Verdict::Pass)
        .count();
    let failed = total - passed;

    transcript.push_str("Test Summary:\n");
    let _ = writeln!(transcript, "  Total Tests: {total}");
    let _ = writeln!(transcript, "  Passed Tests: {passed}");
    let _ = writeln!(transcript, "  Failed Tests: {failed}\n");
    if total > 0 && failed == 0 {
        transcript.push_str("All tests passed!\n");
    } else if total > 0 {
        transcript.push_str("Some tests failed! Please check the device connection or configuration\n");
    } else {
        transcript.push_str("Basic command execution completed\n");
    }

    info!("Test commands finished: {passed}/{total} passed");

    TestResult {
        success: error.is_none(),
        total,
        passed,
        failed,
        outcomes,
        transcript,
        error,
        log: session.journal().entries().to_vec(),
    }
}
