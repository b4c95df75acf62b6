use async_trait::async_trait;
use pipsync_core::events::{ElementsUpdated, StatusChanged, TimeChanged};
use pipsync_core::{
    AppStateWriters, ElementRole, NodeRef, Result, SliceWriter, StatusState, TimeState,
};
use pipsync_dom::media::MEDIA_EVENTS;
use pipsync_dom::{DomEvent, EventTarget, Listener};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{not_initialized, writer_taken, DomainContext, DomainModule, Phase};

const ELEMENTS_KEY: &str = "status:elements";

fn media_key(event: &str) -> String {
    format!("status:media:{}", event)
}

#[derive(Debug)]
enum StatusSignal {
    Rebind(Option<NodeRef>),
    Media,
}

/// Tracks playback status and time of the resolved video.
#[derive(Default)]
pub struct StatusDomain {
    sampler: Option<Arc<StatusSampler>>,
    task: Option<JoinHandle<()>>,
}

impl StatusDomain {
    pub fn new() -> Self {
        Self::default()
    }
}

struct StatusSampler {
    ctx: DomainContext,
    status: SliceWriter<StatusState>,
    time: SliceWriter<TimeState>,
}

impl StatusSampler {
    /// Point the media listeners at `video`, dropping the old bindings.
    fn bind(&self, video: Option<&NodeRef>, tx: &mpsc::UnboundedSender<StatusSignal>) {
        for event in MEDIA_EVENTS {
            let key = media_key(event);
            match video {
                Some(video) => {
                    let tx = tx.clone();
                    let listener: Listener = Arc::new(move |_: &DomEvent| {
                        let _ = tx.send(StatusSignal::Media);
                    });
                    self.ctx
                        .events
                        .listen(&key, EventTarget::Node(video.clone()), event, listener);
                }
                None => {
                    self.ctx.events.off(&key);
                }
            }
        }
        debug!(video = ?video.map(|v| v.id), "Media listeners rebound");
    }

    fn sample(&self, video: Option<&NodeRef>) {
        let ctx = &self.ctx;
        let current = ctx
            .host
            .probe
            .classify_status(ctx.host.document.as_ref(), video);
        let previous = self.status.reader().get().status;
        if self.status.set(StatusState { status: current }) {
            info!(%previous, %current, "Playback status changed");
            ctx.events.emit(StatusChanged { previous, current });
        }

        if let Some(video) = video {
            let (current, duration) = ctx.host.media.playback_time(video);
            if self.time.set(TimeState { current, duration }) {
                ctx.events.emit(TimeChanged { current, duration });
            }
        }
    }
}

#[async_trait]
impl DomainModule for StatusDomain {
    fn name(&self) -> &'static str {
        "status"
    }

    fn phase(&self) -> Phase {
        Phase::CoreDetection
    }

    async fn init(&mut self, ctx: &DomainContext, writers: &mut AppStateWriters) -> Result<()> {
        let status = writers
            .take_status()
            .ok_or_else(|| writer_taken(self.name(), "status"))?;
        let time = writers
            .take_time()
            .ok_or_else(|| writer_taken(self.name(), "time"))?;
        self.sampler = Some(Arc::new(StatusSampler {
            ctx: ctx.clone(),
            status,
            time,
        }));
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let sampler = self
            .sampler
            .clone()
            .ok_or_else(|| not_initialized(self.name()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let on_elements = tx.clone();
        sampler
            .ctx
            .events
            .on::<ElementsUpdated>(ELEMENTS_KEY, move |update| {
                if update.changed.contains(&ElementRole::Video) {
                    let video = update.snapshot.get(&ElementRole::Video).cloned();
                    let _ = on_elements.send(StatusSignal::Rebind(video));
                }
            });

        self.task = Some(tokio::spawn(async move {
            let mut bound: Option<NodeRef> = None;
            while let Some(signal) = rx.recv().await {
                if let StatusSignal::Rebind(video) = signal {
                    sampler.bind(video.as_ref(), &tx);
                    bound = video;
                }
                sampler.sample(bound.as_ref());
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(sampler) = &self.sampler {
            let events = &sampler.ctx.events;
            events.off(ELEMENTS_KEY);
            for event in MEDIA_EVENTS {
                events.off(&media_key(event));
            }
        }
        Ok(())
    }
}
