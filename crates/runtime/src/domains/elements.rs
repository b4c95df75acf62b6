use async_trait::async_trait;
use chrono::Utc;
use pipsync_core::events::{ElementsUpdated, PageUrlChanged};
use pipsync_core::{
    AppStateWriters, ElementRole, ElementsSnapshot, ElementsState, Result, SliceWriter,
};
use pipsync_dom::{MutationOptions, ObserveTarget};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::{not_initialized, writer_taken, DomainContext, DomainModule, Phase};
use crate::events::EventRegistry;
use crate::resolver::ElementResolver;

const URL_KEY: &str = "elements:page-url";
const BODY_KEY: &str = "elements:body";

/// Re-resolves every role after navigations and body mutations and publishes
/// what changed.
#[derive(Default)]
pub struct ElementsDomain {
    refresher: Option<Arc<ElementsRefresher>>,
    ctx: Option<DomainContext>,
    task: Option<JoinHandle<()>>,
}

impl ElementsDomain {
    pub fn new() -> Self {
        Self::default()
    }
}

struct ElementsRefresher {
    resolver: Arc<ElementResolver>,
    writer: SliceWriter<ElementsState>,
    events: EventRegistry,
    last: Mutex<Option<(u64, ElementsSnapshot)>>,
}

impl ElementsRefresher {
    fn refresh(&self) -> Option<ElementsUpdated> {
        let generation = self.resolver.generation();
        let snapshot = self.resolver.resolve_all();

        let changed = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            let previous = last.as_ref();
            let changed: Vec<ElementRole> = ElementRole::ALL
                .into_iter()
                .filter(|role| previous.and_then(|(_, s)| s.get(role)) != snapshot.get(role))
                .collect();
            let same_generation = previous.map(|(g, _)| *g == generation).unwrap_or(false);
            if same_generation && changed.is_empty() {
                return None;
            }
            *last = Some((generation, snapshot.clone()));
            changed
        };

        self.writer.set(ElementsState {
            last_resolved_generation: generation,
            last_resolved_at: Some(Utc::now()),
        });
        debug!(generation, changed = ?changed, resolved = snapshot.len(), "Elements updated");
        let payload = ElementsUpdated {
            generation,
            changed,
            snapshot,
        };
        self.events.emit(payload.clone());
        Some(payload)
    }
}

#[async_trait]
impl DomainModule for ElementsDomain {
    fn name(&self) -> &'static str {
        "elements"
    }

    fn phase(&self) -> Phase {
        Phase::CoreDetection
    }

    async fn init(&mut self, ctx: &DomainContext, writers: &mut AppStateWriters) -> Result<()> {
        let writer = writers
            .take_elements()
            .ok_or_else(|| writer_taken(self.name(), "elements"))?;
        self.refresher = Some(Arc::new(ElementsRefresher {
            resolver: ctx.resolver.clone(),
            writer,
            events: ctx.events.clone(),
            last: Mutex::new(None),
        }));
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (Some(ctx), Some(refresher)) = (&self.ctx, &self.refresher) else {
            return Err(not_initialized(self.name()));
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let on_url = tx.clone();
        ctx.events.on::<PageUrlChanged>(URL_KEY, move |_| {
            let _ = on_url.send(());
        });
        ctx.observers.observe(
            BODY_KEY,
            ObserveTarget::Body,
            MutationOptions::default(),
            move |_| {
                let _ = tx.send(());
            },
        );

        let refresher = refresher.clone();
        self.task = Some(tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Collapse a burst of notifications into one pass.
                while rx.try_recv().is_ok() {}
                refresher.refresh();
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(ctx) = &self.ctx {
            ctx.events.off(URL_KEY);
            ctx.observers.disconnect(BODY_KEY);
        }
        Ok(())
    }
}
