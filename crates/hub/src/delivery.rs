//! Handing formatted events to the downstream consumer.

use std::{process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    hubrelay_channels::{Deliverer, Delivery, DeliveryError},
    hubrelay_config::{DeliveryConfig, expand_home},
    serde::Deserialize,
    tokio::{process::Command, sync::mpsc},
    tracing::{error, info, warn},
};

use crate::{Error, Result};

/// Characters of content shown in delivery logs.
pub const LOG_PREVIEW_CHARS: usize = 80;

/// Final result of one delivery, including its retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { retried: bool },
    Rejected { message: String },
    Failed { message: String },
}

/// Deliver once; on an unstructured failure wait `retry_delay` and try exactly
/// once more. Rejections are final.
pub async fn deliver_with_retry(
    deliverer: &dyn Deliverer,
    delivery: &Delivery,
    retry_delay: Duration,
) -> DeliveryOutcome {
    let preview = preview(&delivery.content, LOG_PREVIEW_CHARS);
    let first_error = match deliverer.deliver(delivery).await {
        Ok(()) => {
            info!(org = %delivery.label, endpoint = %delivery.endpoint, content = %preview, "delivered");
            return DeliveryOutcome::Delivered { retried: false };
        },
        Err(DeliveryError::Rejected { message }) => {
            warn!(org = %delivery.label, endpoint = %delivery.endpoint, reason = %message, "consumer rejected message");
            return DeliveryOutcome::Rejected { message };
        },
        Err(DeliveryError::Failed { message }) => message,
    };

    warn!(
        org = %delivery.label,
        endpoint = %delivery.endpoint,
        error = %first_error,
        retry_in_ms = retry_delay.as_millis() as u64,
        "delivery failed, retrying"
    );
    tokio::time::sleep(retry_delay).await;

    match deliverer.deliver(delivery).await {
        Ok(()) => {
            info!(org = %delivery.label, endpoint = %delivery.endpoint, content = %preview, "delivered (retry)");
            DeliveryOutcome::Delivered { retried: true }
        },
        Err(DeliveryError::Rejected { message }) => {
            warn!(org = %delivery.label, endpoint = %delivery.endpoint, reason = %message, "consumer rejected message on retry");
            DeliveryOutcome::Rejected { message }
        },
        Err(DeliveryError::Failed { message }) => {
            error!(org = %delivery.label, endpoint = %delivery.endpoint, error = %message, "delivery retry failed");
            DeliveryOutcome::Failed { message }
        },
    }
}

/// Extract the message of a structured rejection (`{"ok":false,"error":{"message":..}}`).
pub fn parse_rejection(output: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Response {
        ok: Option<bool>,
        error: Option<ErrorBody>,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
    }

    let response: Response = serde_json::from_str(output.trim()).ok()?;
    match response {
        Response {
            ok: Some(false),
            error: Some(ErrorBody {
                message: Some(message),
            }),
        } if !message.is_empty() => Some(message),
        _ => None,
    }
}

/// Truncate to `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Runs the consumer bridge as a subprocess per delivery:
/// `<command...> --channel <channel> --org <label> --endpoint <endpoint> --json --content <content>`.
///
/// Arguments are passed directly, never through a shell.
#[derive(Debug, Clone)]
pub struct SubprocessDeliverer {
    program: String,
    args: Vec<String>,
    channel: String,
    timeout: Duration,
}

impl SubprocessDeliverer {
    pub fn new(command: &[String], channel: impl Into<String>, timeout: Duration) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            return Err(Error::config("delivery.command must not be empty"));
        };
        Ok(Self {
            program: expand_home(program),
            args: args.iter().map(|a| expand_home(a)).collect(),
            channel: channel.into(),
            timeout,
        })
    }

    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        Self::new(
            &config.command,
            config.channel.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    fn command(&self, delivery: &Delivery) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--channel")
            .arg(&self.channel)
            .arg("--org")
            .arg(&delivery.label)
            .arg("--endpoint")
            .arg(&delivery.endpoint)
            .arg("--json")
            .arg("--content")
            .arg(&delivery.content)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Deliverer for SubprocessDeliverer {
    async fn deliver(&self, delivery: &Delivery) -> std::result::Result<(), DeliveryError> {
        let output = match tokio::time::timeout(self.timeout, self.command(delivery).output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(DeliveryError::failed(format!(
                    "failed to run {}: {e}",
                    self.program
                )));
            },
            Err(_) => {
                return Err(DeliveryError::failed(format!(
                    "consumer timed out after {}ms",
                    self.timeout.as_millis()
                )));
            },
        };

        if output.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(message) = parse_rejection(&stdout) {
            return Err(DeliveryError::Rejected { message });
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(DeliveryError::failed(format!(
            "consumer exited with {}: {}",
            output.status,
            preview(stderr.trim(), 200)
        )))
    }
}

/// Hands deliveries to an in-process consumer over a channel.
#[derive(Debug, Clone)]
pub struct ChannelDeliverer {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelDeliverer {
    pub fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self { tx }
    }

    /// A deliverer plus the receiving end for the consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Deliverer for ChannelDeliverer {
    async fn deliver(&self, delivery: &Delivery) -> std::result::Result<(), DeliveryError> {
        self.tx
            .send(delivery.clone())
            .await
            .map_err(|_| DeliveryError::failed("in-process consumer is gone"))
    }
}
