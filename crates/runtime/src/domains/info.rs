use async_trait::async_trait;
use pipsync_core::events::{PageUrlChanged, VideoInfoChanged};
use pipsync_core::{AppStateWriters, InfoState, Result, SliceWriter};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{not_initialized, writer_taken, DomainContext, DomainModule, Phase};

const URL_KEY: &str = "info:page-url";

#[derive(Debug, Deserialize)]
struct ThumbnailReply {
    thumbnail: Option<String>,
}

/// Title, author and thumbnail of the current watch page.
#[derive(Default)]
pub struct InfoDomain {
    loader: Option<Arc<InfoLoader>>,
    task: Option<JoinHandle<()>>,
}

impl InfoDomain {
    pub fn new() -> Self {
        Self::default()
    }
}

struct InfoLoader {
    ctx: DomainContext,
    writer: SliceWriter<InfoState>,
}

impl InfoLoader {
    async fn load(&self, change: &PageUrlChanged) {
        let ctx = &self.ctx;
        let info = if change.is_watch_page {
            match ctx.host.probe.video_info(ctx.host.document.as_ref()) {
                Some(info) => self.enrich(info, &change.url).await,
                None => {
                    debug!(url = %change.url, "No video info on page yet");
                    return;
                }
            }
        } else {
            InfoState::default()
        };

        let current = ctx.store.page.with(|p| p.generation);
        if current != change.generation {
            debug!(
                loaded_for = change.generation,
                current, "Discarding video info for a previous page"
            );
            return;
        }

        if self.writer.set(info.clone()) {
            info!(title = %info.title, author = %info.author, "Video info changed");
            ctx.events.emit(VideoInfoChanged {
                title: info.title,
                author: info.author,
                thumbnail: info.thumbnail,
            });
        }
    }

    async fn enrich(&self, mut info: InfoState, page_url: &str) -> InfoState {
        let Some(lookup) = self.ctx.host.probe.thumbnail_lookup_url(page_url) else {
            return info;
        };
        match self.ctx.http.get_json::<ThumbnailReply>(&lookup).await {
            Ok(ThumbnailReply {
                thumbnail: Some(thumbnail),
            }) => info.thumbnail = Some(thumbnail),
            Ok(_) => debug!(url = %lookup, "Thumbnail lookup returned nothing"),
            Err(e) => warn!(url = %lookup, error = %e, "Thumbnail lookup failed, keeping page thumbnail"),
        }
        info
    }
}

#[async_trait]
impl DomainModule for InfoDomain {
    fn name(&self) -> &'static str {
        "info"
    }

    fn phase(&self) -> Phase {
        Phase::Control
    }

    async fn init(&mut self, ctx: &DomainContext, writers: &mut AppStateWriters) -> Result<()> {
        let writer = writers
            .take_info()
            .ok_or_else(|| writer_taken(self.name(), "info"))?;
        self.loader = Some(Arc::new(InfoLoader {
            ctx: ctx.clone(),
            writer,
        }));
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let loader = self
            .loader
            .clone()
            .ok_or_else(|| not_initialized(self.name()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<PageUrlChanged>();
        loader.ctx.events.on::<PageUrlChanged>(URL_KEY, move |change| {
            let _ = tx.send(change.clone());
        });

        self.task = Some(tokio::spawn(async move {
            while let Some(mut change) = rx.recv().await {
                // Only the newest navigation matters.
                while let Ok(next) = rx.try_recv() {
                    change = next;
                }
                loader.load(&change).await;
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(loader) = &self.loader {
            loader.ctx.events.off(URL_KEY);
        }
        Ok(())
    }
}
