//! Device actions embedded in assistant responses
//!
//! The service sends an `EXECUTE` intent naming commands for one or more
//! devices. [`DeviceRequestHandler`] picks out the commands addressed to this
//! device and runs each registered handler as its own task; the session joins
//! the returned handles at the end of the turn.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Handle to a running device action
pub type ActionHandle = JoinHandle<()>;

/// Executes device actions requested by the service
pub trait DeviceActionDispatcher: Send + Sync {
    /// Start the actions described by `request`
    ///
    /// Returns handles for every started action; may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceAction`] if the payload has an unexpected shape
    fn dispatch(&self, request: &Value) -> Result<Vec<ActionHandle>>;
}

type CommandFn = dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync;

/// Routes `action.devices.EXECUTE` commands to registered handlers
pub struct DeviceRequestHandler {
    device_id: String,
    handlers: HashMap<String, Arc<CommandFn>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRequest {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    inputs: Vec<DeviceInput>,
}

#[derive(Debug, Deserialize)]
struct DeviceInput {
    intent: String,
    #[serde(default)]
    payload: Option<ExecutePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutePayload {
    #[serde(default)]
    commands: Vec<DeviceCommand>,
}

#[derive(Debug, Deserialize)]
struct DeviceCommand {
    #[serde(default)]
    devices: Vec<DeviceRef>,
    #[serde(default)]
    execution: Vec<Execution>,
}

#[derive(Debug, Deserialize)]
struct DeviceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Execution {
    command: String,
    #[serde(default)]
    params: Value,
}

/// Intent carrying device commands
const EXECUTE_INTENT: &str = "action.devices.EXECUTE";

impl DeviceRequestHandler {
    /// Create a handler for commands addressed to `device_id`
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `command` (e.g. `action.devices.commands.OnOff`)
    ///
    /// The handler receives the command's `params` object.
    #[must_use]
    pub fn command<F, Fut>(mut self, command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Arc<CommandFn> = Arc::new(move |params| -> BoxFuture<'static, ()> {
            Box::pin(handler(params))
        });
        self.handlers.insert(command.into(), handler);
        self
    }

    /// Names of registered commands
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl DeviceActionDispatcher for DeviceRequestHandler {
    fn dispatch(&self, request: &Value) -> Result<Vec<ActionHandle>> {
        let request: DeviceRequest = serde_json::from_value(request.clone())
            .map_err(|e| Error::DeviceAction(format!("unexpected device request shape: {e}")))?;

        let mut handles = Vec::new();

        for input in request.inputs {
            if input.intent != EXECUTE_INTENT {
                tracing::debug!(intent = %input.intent, "ignoring device intent");
                continue;
            }

            for command in input.payload.unwrap_or_default().commands {
                if !command.devices.iter().any(|d| d.id == self.device_id) {
                    continue;
                }

                for execution in command.execution {
                    let Some(handler) = self.handlers.get(&execution.command) else {
                        tracing::warn!(
                            command = %execution.command,
                            "no handler registered for device command"
                        );
                        continue;
                    };

                    tracing::info!(
                        request_id = ?request.request_id,
                        command = %execution.command,
                        params = %execution.params,
                        "dispatching device command"
                    );
                    handles.push(tokio::spawn(handler(execution.params)));
                }
            }
        }

        Ok(handles)
    }
}
