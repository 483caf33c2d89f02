use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::debug;

use super::chain::{Middleware, Rejection};
use crate::event::{Event, EventContext};

/// Adds host and process details to event metadata
///
/// Never rejects. Missing procfs entries (the process may already be gone)
/// simply leave the field out.
pub struct EnrichmentMiddleware {
    proc_root: PathBuf,
    hostname: OnceCell<Option<String>>,
}

impl EnrichmentMiddleware {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Reads procfs from a different root
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            hostname: OnceCell::new(),
        }
    }

    async fn hostname(&self) -> Option<&str> {
        self.hostname
            .get_or_init(|| async {
                let path = self.proc_root.join("sys/kernel/hostname");
                match tokio::fs::read_to_string(&path).await {
                    Ok(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
                    _ => std::env::var("HOSTNAME").ok(),
                }
            })
            .await
            .as_deref()
    }

    async fn cmdline(&self, pid: u32) -> Option<String> {
        let path = self.proc_root.join(pid.to_string()).join("cmdline");
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
                Some(cmdline.trim().to_string())
            }
            Err(e) => {
                debug!(pid = pid, error = %e, "No cmdline for process");
                None
            }
        }
    }
}

impl Default for EnrichmentMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for EnrichmentMiddleware {
    fn name(&self) -> &'static str {
        "Enrichment"
    }

    async fn process(
        &self,
        mut ctx: EventContext,
        event: &mut Event,
    ) -> Result<EventContext, Rejection> {
        if let Some(hostname) = self.hostname().await {
            event
                .metadata
                .insert("hostname".to_string(), hostname.into());
            ctx = ctx.with("enrichment.hostname", true);
        }

        if event.pid > 0 {
            if let Some(cmdline) = self.cmdline(event.pid).await {
                event.metadata.insert("cmdline".to_string(), cmdline.into());
            }
        }

        Ok(ctx)
    }
}
