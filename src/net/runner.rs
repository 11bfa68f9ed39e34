//! Runs short-lived commands that may stop and ask for a password.
//!
//! The prompt and failure markers are substrings of `sudo`'s English
//! messages. Matching them is a heuristic: other locales or tool versions
//! can word things differently, so every marker is configurable.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

pub const DEFAULT_PROMPT_MARKERS: &[&str] = &["[sudo]", "password for"];
pub const DEFAULT_NOT_AUTHORIZED_MARKERS: &[&str] = &["is not in the sudoers"];
pub const DEFAULT_REJECTED_MARKERS: &[&str] = &["Sorry, try again"];

const READ_CHUNK: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMarkers {
    pub prompt: Vec<String>,
    pub not_authorized: Vec<String>,
    pub rejected: Vec<String>,
}

fn owned(markers: &[&str]) -> Vec<String> {
    markers.iter().map(|m| m.to_string()).collect()
}

impl Default for PromptMarkers {
    fn default() -> Self {
        Self {
            prompt: owned(DEFAULT_PROMPT_MARKERS),
            not_authorized: owned(DEFAULT_NOT_AUTHORIZED_MARKERS),
            rejected: owned(DEFAULT_REJECTED_MARKERS),
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    /// How long to wait for each burst of output.
    pub output_timeout: Duration,
    /// How long to wait for the process to exit once the dialogue is over.
    pub exit_timeout: Duration,
    pub markers: PromptMarkers,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_timeout: Duration::from_secs(30),
            exit_timeout: Duration::from_secs(30),
            markers: PromptMarkers::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    AuthRejected,
    NotAuthorized,
    ProcessFailedToStart,
    NoResponse,
    /// Exited non-zero without any recognizable failure marker.
    Failed(Option<i32>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    /// Everything the process wrote to stdout and stderr, interleaved.
    pub output: String,
}

impl CommandOutcome {
    fn new(status: CommandStatus, output: &[u8]) -> Self {
        Self {
            status,
            output: String::from_utf8_lossy(output).into_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

enum Burst {
    Data(String),
    Closed,
    TimedOut,
}

async fn read_from<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

/// stdout and stderr read as one stream, with everything retained.
struct MergedOutput {
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    log: Vec<u8>,
}

impl MergedOutput {
    fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        Self {
            stdout,
            stderr,
            log: Vec::new(),
        }
    }

    async fn read_any(&mut self) -> Option<String> {
        let mut out_buf = [0u8; READ_CHUNK];
        let mut err_buf = [0u8; READ_CHUNK];

        while self.stdout.is_some() || self.stderr.is_some() {
            let (result, from_stdout) = tokio::select! {
                r = read_from(&mut self.stdout, &mut out_buf) => (r, true),
                r = read_from(&mut self.stderr, &mut err_buf) => (r, false),
            };

            match result {
                Ok(n) if n > 0 => {
                    let chunk = if from_stdout {
                        &out_buf[..n]
                    } else {
                        &err_buf[..n]
                    };
                    self.log.extend_from_slice(chunk);
                    return Some(String::from_utf8_lossy(chunk).into_owned());
                }
                _ => {
                    if from_stdout {
                        self.stdout = None;
                    } else {
                        self.stderr = None;
                    }
                }
            }
        }

        None
    }

    async fn next_burst(&mut self, wait: Duration) -> Burst {
        match tokio::time::timeout(wait, self.read_any()).await {
            Ok(Some(data)) => Burst::Data(data),
            Ok(None) => Burst::Closed,
            Err(_) => Burst::TimedOut,
        }
    }

    async fn drain(&mut self) {
        while self.read_any().await.is_some() {}
    }
}

#[derive(Clone, Debug, Default)]
pub struct PrivilegedRunner {
    config: RunnerConfig,
    elevation: Vec<String>,
}

impl PrivilegedRunner {
    /// `elevation` is prepended to every command built with [`Self::elevated`],
    /// e.g. `["sudo", "-S", "-k"]`.
    pub fn new(config: RunnerConfig, elevation: Vec<String>) -> Self {
        Self { config, elevation }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn elevation(&self) -> &[String] {
        &self.elevation
    }

    pub fn elevated<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        self.elevation
            .iter()
            .cloned()
            .chain(args.iter().map(|a| a.as_ref().to_string()))
            .collect()
    }

    /// Runs `argv`, answering a password prompt with `password` if one shows up.
    pub async fn run(&self, argv: &[String], password: &str) -> CommandOutcome {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutcome::new(CommandStatus::ProcessFailedToStart, b"empty command line");
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(program = %program, error = %e, "Process couldn't be started");
                return CommandOutcome::new(CommandStatus::ProcessFailedToStart, e.to_string().as_bytes());
            }
        };

        let mut stdin = child.stdin.take();
        let mut output = MergedOutput::new(child.stdout.take(), child.stderr.take());

        let first = match output.next_burst(self.config.output_timeout).await {
            Burst::Data(data) => data,
            Burst::Closed => {
                drop(stdin);
                let code = self.wait_exit(&mut child, &mut output).await;
                debug!(program = %program, ?code, "No answer from command and process finished");
                let status = if code == Some(0) {
                    CommandStatus::Success
                } else {
                    CommandStatus::NoResponse
                };
                return CommandOutcome::new(status, &output.log);
            }
            Burst::TimedOut => {
                let status = match child.try_wait() {
                    Ok(Some(exit)) if exit.success() => CommandStatus::Success,
                    _ => {
                        debug!(program = %program, "No answer from command");
                        let _ = child.start_kill();
                        CommandStatus::NoResponse
                    }
                };
                return CommandOutcome::new(status, &output.log);
            }
        };

        let mut detected: Option<CommandStatus> = None;
        if contains_any(first.trim(), &self.config.markers.prompt) {
            if let Some(pipe) = stdin.as_mut() {
                let line = format!("{password}\n");
                if let Err(e) = pipe.write_all(line.as_bytes()).await {
                    debug!(program = %program, error = %e, "Couldn't answer password prompt");
                }
                let _ = pipe.flush().await;
            }

            if let Burst::Data(second) = output.next_burst(self.config.output_timeout).await {
                let second = second.trim();
                if contains_any(second, &self.config.markers.not_authorized) {
                    debug!(program = %program, "User is not allowed to elevate");
                    detected = Some(CommandStatus::NotAuthorized);
                } else if contains_any(second, &self.config.markers.rejected) {
                    debug!(program = %program, "Password was rejected");
                    detected = Some(CommandStatus::AuthRejected);
                }
            }
        }

        drop(stdin);
        let code = self.wait_exit(&mut child, &mut output).await;
        debug!(program = %program, ?code, output = %String::from_utf8_lossy(&output.log), "Process finished");

        let status = match (code, detected) {
            (Some(0), _) => CommandStatus::Success,
            (_, Some(failure)) => failure,
            (None, None) => CommandStatus::NoResponse,
            (code, None) => CommandStatus::Failed(code),
        };
        CommandOutcome::new(status, &output.log)
    }

    /// Exit code, or `None` if the process had to be killed or was signalled.
    async fn wait_exit(&self, child: &mut Child, output: &mut MergedOutput) -> Option<i32> {
        let finished = tokio::time::timeout(self.config.exit_timeout, async {
            let (status, _) = tokio::join!(child.wait(), output.drain());
            status
        })
        .await;

        match finished {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                debug!(error = %e, "Waiting for process failed");
                None
            }
            Err(_) => {
                let _ = child.start_kill();
                None
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn quick_runner() -> PrivilegedRunner {
        PrivilegedRunner::new(
            RunnerConfig {
                output_timeout: Duration::from_secs(5),
                exit_timeout: Duration::from_secs(5),
                markers: PromptMarkers::default(),
            },
            Vec::new(),
        )
    }

    fn shell(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    // The sudo transcripts below are imitations; real sudo output depends
    // on locale and version.
    const FAKE_SUDO: &str = r#"printf '[sudo] password for tester: ' >&2
read pw
if [ "$pw" = "secret" ]; then echo done; exit 0; fi
echo 'Sorry, try again.' >&2
read pw
exit 1"#;

    #[test]
    fn test_elevated_prefixes_command() {
        let runner = PrivilegedRunner::new(
            RunnerConfig::default(),
            vec!["sudo".into(), "-S".into(), "-k".into()],
        );
        assert_eq!(
            runner.elevated(&["/sbin/ifup", "eth0"]),
            vec!["sudo", "-S", "-k", "/sbin/ifup", "eth0"]
        );
    }

    #[tokio::test]
    async fn test_process_failed_to_start() {
        let started = std::time::Instant::now();
        let outcome = quick_runner()
            .run(&["/nonexistent/hostnet-test-binary".to_string()], "")
            .await;
        assert_eq!(outcome.status, CommandStatus::ProcessFailedToStart);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        let outcome = quick_runner().run(&[], "").await;
        assert_eq!(outcome.status, CommandStatus::ProcessFailedToStart);
    }

    #[tokio::test]
    async fn test_password_accepted() {
        let outcome = quick_runner().run(&shell(FAKE_SUDO), "secret").await;
        assert_eq!(outcome.status, CommandStatus::Success);
        assert!(outcome.output.contains("password for tester"));
        assert!(outcome.output.contains("done"));
    }

    #[tokio::test]
    async fn test_password_rejected() {
        let outcome = quick_runner().run(&shell(FAKE_SUDO), "wrong").await;
        assert_eq!(outcome.status, CommandStatus::AuthRejected);
        assert!(outcome.output.contains("Sorry, try again"));
    }

    #[tokio::test]
    async fn test_not_in_sudoers() {
        let script = r#"printf '[sudo] password for tester: ' >&2
read pw
echo 'tester is not in the sudoers file.  This incident will be reported.' >&2
exit 1"#;
        let outcome = quick_runner().run(&shell(script), "secret").await;
        assert_eq!(outcome.status, CommandStatus::NotAuthorized);
    }

    #[tokio::test]
    async fn test_silent_command_exit_code_decides() {
        let runner = quick_runner();
        assert_eq!(runner.run(&shell("exit 0"), "").await.status, CommandStatus::Success);
        assert_eq!(runner.run(&shell("exit 3"), "").await.status, CommandStatus::NoResponse);
    }

    #[tokio::test]
    async fn test_hanging_command_is_no_response() {
        let runner = PrivilegedRunner::new(
            RunnerConfig {
                output_timeout: Duration::from_millis(100),
                exit_timeout: Duration::from_millis(100),
                markers: PromptMarkers::default(),
            },
            Vec::new(),
        );
        let started = std::time::Instant::now();
        let outcome = runner.run(&shell("sleep 5"), "").await;
        assert_eq!(outcome.status, CommandStatus::NoResponse);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_output_without_prompt_keeps_exit_code() {
        let outcome = quick_runner().run(&shell("echo hello; exit 2"), "").await;
        assert_eq!(outcome.status, CommandStatus::Failed(Some(2)));
        assert!(outcome.output.contains("hello"));

        let outcome = quick_runner().run(&shell("echo hello"), "").await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_custom_markers() {
        let runner = PrivilegedRunner::new(
            RunnerConfig {
                markers: PromptMarkers {
                    prompt: vec!["Passwort".into()],
                    not_authorized: Vec::new(),
                    rejected: vec!["Bitte nochmal".into()],
                },
                ..quick_runner().config().clone()
            },
            Vec::new(),
        );
        let script = r#"printf 'Passwort: ' >&2
read pw
echo 'Bitte nochmal' >&2
exit 1"#;
        assert_eq!(runner.run(&shell(script), "x").await.status, CommandStatus::AuthRejected);
    }
}
