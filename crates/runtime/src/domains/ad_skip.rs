use async_trait::async_trait;
use pipsync_core::events::StatusChanged;
use pipsync_core::{AppStateWriters, Result};
use pipsync_dom::{MessageKind, MessageTransport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{not_initialized, DomainContext, DomainModule, Phase};

const STATUS_KEY: &str = "ad-skip:status";

/// Asks the extension context to skip advertisements as they start.
#[derive(Default)]
pub struct AdSkipDomain {
    ctx: Option<DomainContext>,
    task: Option<JoinHandle<()>>,
}

impl AdSkipDomain {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One skip attempt. Returns `true` when the skip was invoked.
pub(crate) async fn try_skip(transport: &dyn MessageTransport) -> bool {
    match transport.request(MessageKind::AdSkipAvailable).await {
        Ok(Some(available)) if available.as_bool() == Some(true) => {}
        Ok(Some(_)) => {
            debug!("Ad skip not available");
            return false;
        }
        Ok(None) => {
            debug!("No responder for ad skip, not applicable");
            return false;
        }
        Err(e) => {
            warn!(error = %e, "Ad skip availability check failed");
            return false;
        }
    }

    match transport.request(MessageKind::InvokeAdSkip).await {
        Ok(_) => {
            info!("Ad skip invoked");
            true
        }
        Err(e) => {
            warn!(error = %e, "Ad skip invocation failed");
            false
        }
    }
}

#[async_trait]
impl DomainModule for AdSkipDomain {
    fn name(&self) -> &'static str {
        "ad_skip"
    }

    fn phase(&self) -> Phase {
        Phase::Control
    }

    async fn init(&mut self, ctx: &DomainContext, _writers: &mut AppStateWriters) -> Result<()> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = self.ctx.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        if !ctx.config.ad_auto_skip {
            debug!("Ad auto-skip disabled");
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        ctx.events.on::<StatusChanged>(STATUS_KEY, move |change| {
            if change.current.is_advertisement() && !change.previous.is_advertisement() {
                let _ = tx.send(());
            }
        });

        let transport: Arc<dyn MessageTransport> = ctx.host.transport.clone();
        self.task = Some(tokio::spawn(async move {
            while rx.recv().await.is_some() {
                try_skip(transport.as_ref()).await;
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(ctx) = &self.ctx {
            ctx.events.off(STATUS_KEY);
        }
        Ok(())
    }
}
