//! Scripted in-memory transport for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{render_command, Tool, Transport};
use crate::context::CallContext;
use crate::error::TransportError;

/// Pre-configured answer to one command
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Command succeeds with this output
    Ok(String),
    /// Command exits non-zero with this output
    Fail(String),
    /// Command times out with this partial output
    Timeout(String),
    /// Command blocks until the context is cancelled or its deadline passes
    Hang,
}

impl FakeResponse {
    pub fn ok(output: &str) -> Self {
        FakeResponse::Ok(output.to_string())
    }

    pub fn fail(output: &str) -> Self {
        FakeResponse::Fail(output.to_string())
    }
}

/// One call the fake received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub tool: Tool,
    pub serial: String,
    pub args: Vec<String>,
}

impl RecordedCall {
    /// `tool arg arg...`, without the serial
    pub fn command(&self) -> String {
        render_command(&self.tool.to_string(), &self.args)
    }
}

/// Transport answering from a script keyed by tool and argument string.
///
/// Unscripted commands fail, so a test only has to describe the calls it
/// expects to succeed.
#[derive(Debug, Default)]
pub struct FakeTransport {
    devices: Vec<String>,
    responses: HashMap<(Tool, String), FakeResponse>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Script the response for `tool` invoked with space-joined `args`
    pub fn respond(mut self, tool: Tool, args: &str, response: FakeResponse) -> Self {
        self.responses.insert((tool, args.to_string()), response);
        self
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls rendered as `tool args...`
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::command).collect()
    }

    async fn call(
        &self,
        ctx: &CallContext,
        tool: Tool,
        serial: &str,
        args: &[&str],
    ) -> Result<String, TransportError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let call = RecordedCall {
            tool,
            serial: serial.to_string(),
            args,
        };
        let command = call.command();
        let key = (tool, call.args.join(" "));
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        if ctx.is_cancelled() {
            return Err(TransportError::Cancelled { command });
        }

        match self.responses.get(&key) {
            Some(FakeResponse::Ok(out)) => Ok(out.clone()),
            Some(FakeResponse::Fail(out)) => Err(TransportError::Failed {
                command,
                status: "exit status: 1".to_string(),
                output: out.clone(),
            }),
            Some(FakeResponse::Timeout(out)) => Err(TransportError::Timeout {
                command,
                after: Duration::ZERO,
                output: out.clone(),
            }),
            Some(FakeResponse::Hang) => hang(ctx, command).await,
            None => Err(TransportError::Failed {
                command,
                status: "exit status: 1".to_string(),
                output: "no scripted response".to_string(),
            }),
        }
    }
}

async fn hang(ctx: &CallContext, command: String) -> Result<String, TransportError> {
    match ctx.deadline() {
        Some(deadline) => {
            tokio::select! {
                _ = ctx.cancelled() => Err(TransportError::Cancelled { command }),
                _ = tokio::time::sleep_until(deadline) => Err(TransportError::Timeout {
                    command,
                    after: Duration::ZERO,
                    output: String::new(),
                }),
            }
        }
        None => {
            ctx.cancelled().await;
            Err(TransportError::Cancelled { command })
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn list_devices(&self, ctx: &CallContext) -> Result<Vec<String>, TransportError> {
        if ctx.is_cancelled() {
            return Err(TransportError::Cancelled {
                command: "devices".to_string(),
            });
        }
        if self.devices.is_empty() {
            return Err(TransportError::NoDevices);
        }
        let mut devices = self.devices.clone();
        devices.sort();
        devices.dedup();
        Ok(devices)
    }

    async fn adb(
        &self,
        ctx: &CallContext,
        serial: &str,
        args: &[&str],
    ) -> Result<String, TransportError> {
        self.call(ctx, Tool::Adb, serial, args).await
    }

    async fn fastboot(
        &self,
        ctx: &CallContext,
        serial: &str,
        args: &[&str],
    ) -> Result<String, TransportError> {
        self.call(ctx, Tool::Fastboot, serial, args).await
    }
}
