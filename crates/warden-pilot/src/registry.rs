//! Built-in human channels, looked up by name.
//!
//! - [`LogChannel`] (`log`): writes prompts and notices through `tracing`
//! - [`NullChannel`] (`null`): accepts everything and shows nothing

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use warden_types::{PromptEvent, WardenError};

use crate::ports::{HumanChannel, PortError};

type Constructor = fn() -> Arc<dyn HumanChannel>;

const CHANNELS: &[(&str, Constructor)] = &[("log", log_channel), ("null", null_channel)];

fn log_channel() -> Arc<dyn HumanChannel> {
    Arc::new(LogChannel::new())
}

fn null_channel() -> Arc<dyn HumanChannel> {
    Arc::new(NullChannel)
}

/// Construct the built-in channel called `name`.
pub fn create_channel(name: &str) -> Result<Arc<dyn HumanChannel>, WardenError> {
    CHANNELS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, ctor)| ctor())
        .ok_or_else(|| {
            WardenError::ConfigError(format!(
                "unknown channel {name:?} (available: {})",
                list_channels().join(", ")
            ))
        })
}

pub fn list_channels() -> Vec<&'static str> {
    CHANNELS.iter().map(|(n, _)| *n).collect()
}

/// Logs prompts at info level. Replies arrive out of band.
#[derive(Debug, Default)]
pub struct LogChannel {
    sent: AtomicU64,
}

impl LogChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HumanChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_prompt(&self, event: &PromptEvent) -> Result<String, PortError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            session_id = %event.session_id,
            prompt_id = %event.prompt_id,
            prompt_type = %event.prompt_type,
            choices = ?event.choices,
            ttl_seconds = event.ttl_seconds,
            "prompt awaiting reply: {}",
            event.excerpt
        );
        Ok(format!("log-{n}"))
    }

    async fn notify(&self, session_id: Uuid, text: &str) -> Result<(), PortError> {
        info!(session_id = %session_id, "notice: {text}");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NullChannel;

#[async_trait]
impl HumanChannel for NullChannel {
    fn name(&self) -> &str {
        "null"
    }

    async fn send_prompt(&self, event: &PromptEvent) -> Result<String, PortError> {
        Ok(format!("null-{}", event.prompt_id))
    }

    async fn notify(&self, _session_id: Uuid, _text: &str) -> Result<(), PortError> {
        Ok(())
    }
}
