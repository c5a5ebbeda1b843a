//! [`LogSource`] backed by an external command, e.g. `journalctl -f -u {instance}`.
//!
//! Follow mode streams the child's stdout as lines and its stderr as errors.
//! Templates are split on whitespace (no shell, no quoting); `{instance}` is
//! substituted into each argument.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::source::{LogHandler, LogSource, UpstreamStatus, UpstreamSubscription};
use crate::error::SourceError;

const PLACEHOLDER: &str = "{instance}";

pub struct CommandLogSource {
    follow_cmd: Vec<String>,
    dump_cmd: Vec<String>,
    runtime: Handle,
}

impl CommandLogSource {
    pub fn new(follow_cmd: &str, dump_cmd: &str, runtime: Handle) -> Self {
        Self {
            follow_cmd: follow_cmd.split_whitespace().map(str::to_string).collect(),
            dump_cmd: dump_cmd.split_whitespace().map(str::to_string).collect(),
            runtime,
        }
    }
}

/// Instance names end up in argv; keep them to a conservative charset.
pub fn validate_instance(instance: &str) -> Result<(), String> {
    if instance.is_empty() || instance.len() > 128 {
        return Err("instance name must be 1..=128 characters".into());
    }
    if instance.starts_with('-') {
        return Err("instance name must not start with '-'".into());
    }
    if !instance
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':'))
    {
        return Err(format!("instance name '{instance}' contains unsupported characters"));
    }
    Ok(())
}

fn build_command(template: &[String], instance: &str) -> Option<Command> {
    let (program, args) = template.split_first()?;
    let mut cmd = Command::new(program.replace(PLACEHOLDER, instance));
    cmd.args(args.iter().map(|a| a.replace(PLACEHOLDER, instance)))
        .stdin(Stdio::null())
        .kill_on_drop(true);
    Some(cmd)
}

struct ProcessSubscription {
    instance: String,
    _cancel: DropGuard,
}

impl UpstreamSubscription for ProcessSubscription {
    fn release(self: Box<Self>) {
        debug!(instance = %self.instance, "releasing log follower");
        // dropping the guard cancels the reader task, which kills the child
    }
}

enum Exit {
    Released,
    Ended(String),
}

#[async_trait]
impl LogSource for CommandLogSource {
    fn follow(
        &self,
        instance: &str,
        handler: Arc<dyn LogHandler>,
    ) -> Result<Box<dyn UpstreamSubscription>, SourceError> {
        let spawn_err = |reason: String| SourceError::Spawn {
            instance: instance.to_string(),
            reason,
        };
        validate_instance(instance).map_err(spawn_err)?;
        let mut cmd = build_command(&self.follow_cmd, instance)
            .ok_or_else(|| spawn_err("follow command is empty".into()))?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = {
            let _rt = self.runtime.enter();
            cmd.spawn().map_err(|e| spawn_err(e.to_string()))?
        };
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_err("stderr not captured".into()))?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let name = instance.to_string();
        self.runtime.spawn(async move {
            handler.on_status(UpstreamStatus::Connected);
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            let mut out_open = true;
            let mut err_open = true;

            let exit = loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break Exit::Released,
                    line = out.next_line(), if out_open => match line {
                        Ok(Some(l)) => handler.on_line(l),
                        Ok(None) => out_open = false,
                        Err(e) => {
                            handler.on_error(format!("failed reading log output: {e}"));
                            out_open = false;
                        }
                    },
                    line = err.next_line(), if err_open => match line {
                        Ok(Some(l)) => handler.on_error(l),
                        Ok(None) | Err(_) => err_open = false,
                    },
                    status = child.wait(), if !out_open && !err_open => {
                        break Exit::Ended(match status {
                            Ok(s) => format!("log follower exited ({s})"),
                            Err(e) => format!("log follower lost: {e}"),
                        });
                    }
                }
            };

            match exit {
                Exit::Released => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    debug!(instance = %name, "log follower stopped");
                }
                Exit::Ended(reason) => {
                    handler.on_status(UpstreamStatus::Disconnected { reason });
                }
            }
        });

        Ok(Box::new(ProcessSubscription {
            instance: instance.to_string(),
            _cancel: token.drop_guard(),
        }))
    }

    async fn dump(&self, instance: &str) -> Result<String, SourceError> {
        let query_err = |reason: String| SourceError::Query {
            instance: instance.to_string(),
            reason,
        };
        validate_instance(instance).map_err(query_err)?;
        let mut cmd = build_command(&self.dump_cmd, instance)
            .ok_or_else(|| query_err("dump command is empty".into()))?;
        let out = cmd.output().await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let reason = match stderr.trim() {
                "" => format!("exited with {}", out.status),
                msg => msg.to_string(),
            };
            return Err(query_err(reason));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}
