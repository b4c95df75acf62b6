use async_trait::async_trait;
use pipsync_core::{AppStateWriters, Result};
use tracing::debug;

use crate::domain::{not_initialized, writer_taken, DomainContext, DomainModule, Phase};
use crate::url_watch::UrlChangeDetector;

/// Owns the page slice through the URL detector. Runs last so every other
/// module is already listening when the initial check fires.
#[derive(Default)]
pub struct PageDomain {
    detector: Option<UrlChangeDetector>,
}

impl PageDomain {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DomainModule for PageDomain {
    fn name(&self) -> &'static str {
        "page"
    }

    fn phase(&self) -> Phase {
        Phase::UrlWatch
    }

    async fn init(&mut self, ctx: &DomainContext, writers: &mut AppStateWriters) -> Result<()> {
        let page = writers
            .take_page()
            .ok_or_else(|| writer_taken(self.name(), "page"))?;
        self.detector = Some(UrlChangeDetector::new(
            ctx.host.document.clone(),
            ctx.events.clone(),
            page,
            ctx.config.url_watch.clone(),
        )?);
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| not_initialized(self.name()))?;
        detector.start();
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        match &self.detector {
            Some(detector) => detector.stop(),
            None => debug!("Page domain stopped without init"),
        }
        Ok(())
    }
}
