use async_trait::async_trait;
use pipsync_core::events::{ElementsUpdated, StatusChanged};
use pipsync_core::{AppStateWriters, ElementRole, ElementsSnapshot, NodeRef, Result};
use pipsync_dom::media::{ENTER_PIP_EVENT, FULLSCREEN_CHANGE_EVENT, LEAVE_PIP_EVENT};
use pipsync_dom::{DomEvent, EventTarget, Listener};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{not_initialized, writer_taken, DomainContext, DomainModule, Phase};
use crate::pip::{PipReconciler, PipSignal};
use crate::wait::{ElementWait, Probe, WaitPolicy};

const ENTER_KEY: &str = "pip:enter";
const LEAVE_KEY: &str = "pip:leave";
const FULLSCREEN_KEY: &str = "pip:fullscreen";
const STATUS_KEY: &str = "pip:status";
const ELEMENTS_KEY: &str = "pip:elements";

pub const TOGGLE_LABEL: &str = "Picture-in-picture";

#[derive(Debug)]
enum PipMessage {
    Signal(PipSignal),
    Elements(ElementsSnapshot),
}

/// Host-page UI and source wiring owned by the domain.
#[derive(Default)]
struct PipUi {
    /// (controller bar, mounted toggle)
    control: Option<(NodeRef, NodeRef)>,
    /// Video the pipeline source is being attached from.
    attach: Option<(NodeRef, JoinHandle<()>)>,
}

/// Presentation domain: feeds the reconciler and keeps the toggle control and
/// stream source in place.
#[derive(Default)]
pub struct PipDomain {
    ctx: Option<DomainContext>,
    reconciler: Option<Arc<PipReconciler>>,
    ui: Arc<Mutex<PipUi>>,
    task: Option<JoinHandle<()>>,
}

impl PipDomain {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock(ui: &Mutex<PipUi>) -> MutexGuard<'_, PipUi> {
    ui.lock().unwrap_or_else(|e| e.into_inner())
}

struct PipWorker {
    ctx: DomainContext,
    ui: Arc<Mutex<PipUi>>,
    tx: mpsc::UnboundedSender<PipMessage>,
}

impl PipWorker {
    fn sync_elements(&self, snapshot: &ElementsSnapshot) {
        self.sync_control(snapshot.get(&ElementRole::ControllerBar));
        self.sync_source(snapshot.get(&ElementRole::Video));
    }

    fn sync_control(&self, bar: Option<&NodeRef>) {
        let doc = &self.ctx.host.document;
        let mut ui = lock(&self.ui);
        if ui.control.as_ref().map(|(parent, _)| parent) == bar {
            return;
        }
        if let Some((_, control)) = ui.control.take() {
            doc.unmount(&control);
        }
        let Some(bar) = bar else {
            debug!("No controller bar, toggle omitted");
            return;
        };
        let tx = self.tx.clone();
        let on_click: Listener = Arc::new(move |_: &DomEvent| {
            let _ = tx.send(PipMessage::Signal(PipSignal::ToggleRequested));
        });
        match doc.mount_control(bar, TOGGLE_LABEL, on_click) {
            Some(control) => {
                debug!(bar = bar.id, control = control.id, "Toggle mounted");
                ui.control = Some((bar.clone(), control));
            }
            None => debug!(bar = bar.id, "Controller bar vanished before mount"),
        }
    }

    fn sync_source(&self, video: Option<&NodeRef>) {
        let mut ui = lock(&self.ui);
        if ui.attach.as_ref().map(|(v, _)| v) == video {
            return;
        }
        if let Some((_, previous)) = ui.attach.take() {
            previous.abort();
        }
        let Some(video) = video.cloned() else {
            return;
        };

        let ctx = self.ctx.clone();
        let target = video.clone();
        let handle = tokio::spawn(async move {
            let generation = ctx.resolver.generation();
            let mut wait = ElementWait::new("video-metadata", WaitPolicy::from(&ctx.config.pip));
            let ready = wait
                .until(|| {
                    if ctx.resolver.generation() != generation {
                        return Probe::Unavailable;
                    }
                    if !ctx.host.document.is_connected(&target) {
                        return Probe::Unavailable;
                    }
                    if ctx.host.media.has_metadata(&target) {
                        Probe::Ready(target.clone())
                    } else {
                        Probe::Pending
                    }
                })
                .await;
            match ready {
                Some(video) => {
                    let comments = ctx.resolver.resolve(ElementRole::CommentCanvas);
                    ctx.host.pipeline.attach_source(Some(&video), comments.as_ref());
                    info!(video = video.id, comments = ?comments.map(|c| c.id), "Stream source attached");
                }
                None => debug!(state = ?wait.state(), "Video never became ready, source left detached"),
            }
        });
        ui.attach = Some((video, handle));
    }
}

fn signal_listener(
    tx: &mpsc::UnboundedSender<PipMessage>,
    to_signal: fn(&DomEvent) -> Option<PipSignal>,
) -> Listener {
    let tx = tx.clone();
    Arc::new(move |event: &DomEvent| {
        if let Some(signal) = to_signal(event) {
            let _ = tx.send(PipMessage::Signal(signal));
        }
    })
}

#[async_trait]
impl DomainModule for PipDomain {
    fn name(&self) -> &'static str {
        "pip"
    }

    fn phase(&self) -> Phase {
        Phase::Presentation
    }

    async fn init(&mut self, ctx: &DomainContext, writers: &mut AppStateWriters) -> Result<()> {
        let writer = writers
            .take_pip()
            .ok_or_else(|| writer_taken(self.name(), "pip"))?;
        self.reconciler = Some(Arc::new(PipReconciler::new(
            ctx.host.media.clone(),
            ctx.host.pipeline.clone(),
            writer,
            ctx.events.clone(),
            Duration::from_millis(ctx.config.pip.ad_restart_debounce_ms),
        )));
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (Some(ctx), Some(reconciler)) = (self.ctx.clone(), self.reconciler.clone()) else {
            return Err(not_initialized(self.name()));
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<PipMessage>();
        let events = &ctx.events;
        events.listen(
            ENTER_KEY,
            EventTarget::Document,
            ENTER_PIP_EVENT,
            signal_listener(&tx, |e| {
                e.related
                    .clone()
                    .map(|target| PipSignal::Entered { target })
            }),
        );
        events.listen(
            LEAVE_KEY,
            EventTarget::Document,
            LEAVE_PIP_EVENT,
            signal_listener(&tx, |e| {
                Some(PipSignal::Left {
                    target: e.related.clone(),
                })
            }),
        );
        events.listen(
            FULLSCREEN_KEY,
            EventTarget::Document,
            FULLSCREEN_CHANGE_EVENT,
            signal_listener(&tx, |e| e.related.as_ref().map(|_| PipSignal::FullscreenEntered)),
        );
        let on_status = tx.clone();
        events.on::<StatusChanged>(STATUS_KEY, move |change| {
            let _ = on_status.send(PipMessage::Signal(PipSignal::StatusChanged(change.clone())));
        });
        let on_elements = tx.clone();
        events.on::<ElementsUpdated>(ELEMENTS_KEY, move |update| {
            let _ = on_elements.send(PipMessage::Elements(update.snapshot.clone()));
        });

        let worker = PipWorker {
            ctx: ctx.clone(),
            ui: self.ui.clone(),
            tx,
        };
        self.task = Some(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    PipMessage::Signal(signal) => reconciler.handle(signal).await,
                    PipMessage::Elements(snapshot) => worker.sync_elements(&snapshot),
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(reconciler) = &self.reconciler {
            reconciler.shutdown();
        }
        let (control, attach) = {
            let mut ui = lock(&self.ui);
            (ui.control.take(), ui.attach.take())
        };
        if let Some((_, handle)) = attach {
            handle.abort();
        }
        if let Some(ctx) = &self.ctx {
            if let Some((_, control)) = control {
                ctx.host.document.unmount(&control);
            }
            for key in [ENTER_KEY, LEAVE_KEY, FULLSCREEN_KEY, STATUS_KEY, ELEMENTS_KEY] {
                ctx.events.off(key);
            }
        }
        Ok(())
    }
}
