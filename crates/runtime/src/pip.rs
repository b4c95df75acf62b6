//! Picture-in-picture reconciliation.
//!
//! Keeps the managed surface, the stream pipeline and the published
//! [`PipState`] agreed with what the platform actually reports. Signals come
//! in from native presentation events and internal status changes; the
//! reconciler answers each with the smallest corrective action. Platform
//! rejections are logged and swallowed.

use pipsync_core::events::{PipStatusChanged, StatusChanged};
use pipsync_core::{NodeRef, PipReason, PipState, SliceReader, SliceWriter};
use pipsync_dom::{MediaPlatform, StreamPipeline};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::EventRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipMode {
    Disabled,
    /// The managed surface is the active picture-in-picture target.
    Enabled,
    /// Something else, typically the host page's own player, holds it.
    OtherElementEnabled,
}

impl std::fmt::Display for PipMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipMode::Disabled => write!(f, "disabled"),
            PipMode::Enabled => write!(f, "enabled"),
            PipMode::OtherElementEnabled => write!(f, "other_element_enabled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipSignal {
    /// Native "entered" with the element that entered.
    Entered { target: NodeRef },
    /// Native "left"; `None` when the platform did not say which element.
    Left { target: Option<NodeRef> },
    FullscreenEntered,
    StatusChanged(StatusChanged),
    /// The user pressed the mounted toggle control.
    ToggleRequested,
}

struct ReconcileState {
    mode: PipMode,
    /// Reason to publish with the next transition we caused ourselves.
    pending_reason: Option<PipReason>,
    restart_timer: Option<JoinHandle<()>>,
}

pub struct PipReconciler {
    media: Arc<dyn MediaPlatform>,
    pipeline: Arc<dyn StreamPipeline>,
    writer: SliceWriter<PipState>,
    events: EventRegistry,
    debounce: Duration,
    state: Arc<Mutex<ReconcileState>>,
}

impl PipReconciler {
    pub fn new(
        media: Arc<dyn MediaPlatform>,
        pipeline: Arc<dyn StreamPipeline>,
        writer: SliceWriter<PipState>,
        events: EventRegistry,
        debounce: Duration,
    ) -> Self {
        Self {
            media,
            pipeline,
            writer,
            events,
            debounce,
            state: Arc::new(Mutex::new(ReconcileState {
                mode: PipMode::Disabled,
                pending_reason: None,
                restart_timer: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReconcileState> {
        lock(&self.state)
    }

    pub fn mode(&self) -> PipMode {
        self.state().mode
    }

    pub fn published(&self) -> SliceReader<PipState> {
        self.writer.reader()
    }

    pub async fn handle(&self, signal: PipSignal) {
        debug!(?signal, mode = %self.mode(), "Reconciling picture-in-picture");
        match signal {
            PipSignal::Entered { target } => self.on_entered(target).await,
            PipSignal::Left { target } => self.on_left(target).await,
            PipSignal::FullscreenEntered => self.on_fullscreen().await,
            PipSignal::StatusChanged(change) => self.on_status(change),
            PipSignal::ToggleRequested => self.on_toggle().await,
        }
    }

    async fn on_entered(&self, target: NodeRef) {
        let surface = self.media.managed_surface();
        if target != surface {
            info!(
                target = target.id,
                surface = surface.id,
                "Competing picture-in-picture activation, reclaiming"
            );
            self.state().pending_reason = Some(PipReason::System);
            self.request_enter(&surface).await;
            return;
        }

        if self.media.fullscreen_element().is_some() {
            if let Err(e) = self.media.exit_fullscreen().await {
                debug!(error = %e, "Fullscreen exit rejected");
            }
        }
        self.pipeline.resume();
        self.recompute_and_publish();
    }

    async fn on_left(&self, target: Option<NodeRef>) {
        let surface = self.media.managed_surface();
        if matches!(&target, Some(t) if *t != surface) {
            debug!("Another element left picture-in-picture");
            self.state().mode = self.observed_mode();
            return;
        }

        self.pipeline.pause();
        self.recompute_and_publish();

        // Safety net. Never kick out an element that is not ours.
        let holder = self.media.picture_in_picture_element();
        if holder.is_none() || holder.as_ref() == Some(&surface) {
            if let Err(e) = self.media.exit_picture_in_picture().await {
                debug!(error = %e, "Exit after leave rejected, already out");
            }
        }
    }

    async fn on_fullscreen(&self) {
        if self.mode() != PipMode::Enabled {
            return;
        }
        info!("Fullscreen entered, leaving picture-in-picture");
        self.state().pending_reason = Some(PipReason::System);
        self.request_exit().await;
    }

    fn on_status(&self, change: StatusChanged) {
        if !change.crosses_advertisement() {
            return;
        }
        debug!(
            previous = %change.previous,
            current = %change.current,
            "Advertisement boundary crossed, scheduling pipeline restart"
        );
        self.schedule_restart();
    }

    async fn on_toggle(&self) {
        let surface = self.media.managed_surface();
        self.state().pending_reason = Some(PipReason::User);
        if self.mode() == PipMode::Enabled {
            self.request_exit().await;
        } else {
            self.request_enter(&surface).await;
        }
    }

    async fn request_enter(&self, surface: &NodeRef) {
        if let Err(e) = self.media.request_picture_in_picture(surface).await {
            warn!(error = %e, "Picture-in-picture request rejected");
            self.state().pending_reason = None;
        }
    }

    async fn request_exit(&self) {
        if let Err(e) = self.media.exit_picture_in_picture().await {
            debug!(error = %e, "Picture-in-picture exit rejected");
            self.state().pending_reason = None;
        }
    }

    fn observed_mode(&self) -> PipMode {
        match self.media.picture_in_picture_element() {
            None => PipMode::Disabled,
            Some(node) if node == self.media.managed_surface() => PipMode::Enabled,
            Some(_) => PipMode::OtherElementEnabled,
        }
    }

    fn recompute_and_publish(&self) {
        let mode = self.observed_mode();
        let reason = {
            let mut state = self.state();
            state.mode = mode;
            state.pending_reason.take().unwrap_or_default()
        };
        let next = PipState {
            enabled: mode == PipMode::Enabled,
            reason,
        };
        if self.writer.set(next) {
            info!(enabled = next.enabled, reason = ?next.reason, %mode, "Picture-in-picture state changed");
            self.events.emit(PipStatusChanged {
                enabled: next.enabled,
                reason: next.reason,
            });
        }
    }

    /// Restart the pipeline once the status has been quiet for the debounce
    /// window. Each call pushes the deadline out.
    fn schedule_restart(&self) {
        let state = self.state.clone();
        let pipeline = self.pipeline.clone();
        let debounce = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let enabled = lock(&state).mode == PipMode::Enabled;
            if enabled {
                info!("Restarting stream pipeline after advertisement change");
                pipeline.restart();
            } else {
                debug!("Picture-in-picture inactive, restart skipped");
            }
        });
        if let Some(previous) = self.state().restart_timer.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel any pending restart.
    pub fn shutdown(&self) {
        if let Some(timer) = self.state().restart_timer.take() {
            timer.abort();
        }
    }
}

fn lock(state: &Mutex<ReconcileState>) -> MutexGuard<'_, ReconcileState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl Drop for PipReconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipsync_core::{AppStateStore, PlaybackStatus};
    use pipsync_dom::memory::{MemoryDocument, MemoryMedia, MemoryPipeline, Region};
    use pipsync_dom::PlatformError;

    struct Fixture {
        doc: Arc<MemoryDocument>,
        media: Arc<MemoryMedia>,
        pipeline: Arc<MemoryPipeline>,
        reconciler: PipReconciler,
    }

    fn fixture() -> Fixture {
        let doc = MemoryDocument::new("https://www.nicovideo.jp/watch/sm9");
        let media = MemoryMedia::new(doc.clone());
        let pipeline = MemoryPipeline::new();
        let events = EventRegistry::new(doc.clone());
        let (_, mut writers) = AppStateStore::new();
        let reconciler = PipReconciler::new(
            media.clone(),
            pipeline.clone(),
            writers.take_pip().unwrap(),
            events,
            Duration::from_millis(500),
        );
        Fixture {
            doc,
            media,
            pipeline,
            reconciler,
        }
    }

    async fn enter_managed(f: &Fixture) {
        let surface = f.media.managed_surface();
        f.media.request_picture_in_picture(&surface).await.unwrap();
        f.reconciler.handle(PipSignal::Entered { target: surface }).await;
    }

    fn ad(previous: PlaybackStatus, current: PlaybackStatus) -> PipSignal {
        PipSignal::StatusChanged(StatusChanged { previous, current })
    }

    #[tokio::test]
    async fn test_entering_managed_surface_publishes_enabled() {
        let f = fixture();
        enter_managed(&f).await;
        assert_eq!(f.reconciler.mode(), PipMode::Enabled);
        assert_eq!(f.pipeline.resumes(), 1);
        assert!(f.reconciler.published().get().enabled);
    }

    #[tokio::test]
    async fn test_competing_activation_self_heals_once() {
        let f = fixture();
        let host_video = f.doc.insert("video", &["#host"], Region::Body);
        f.media.host_enter_pip(&host_video);
        let before = f.reconciler.published().get();

        f.reconciler
            .handle(PipSignal::Entered {
                target: host_video.clone(),
            })
            .await;

        assert_eq!(f.media.requests(), vec![f.media.managed_surface()]);
        assert_eq!(f.reconciler.published().get(), before);
        assert_eq!(f.pipeline.resumes(), 0);

        // The transition caused by the request lands with the system reason.
        f.reconciler
            .handle(PipSignal::Entered {
                target: f.media.managed_surface(),
            })
            .await;
        assert_eq!(
            f.reconciler.published().get(),
            PipState {
                enabled: true,
                reason: PipReason::System
            }
        );
    }

    #[tokio::test]
    async fn test_self_heal_rejection_is_swallowed() {
        let f = fixture();
        let host_video = f.doc.insert("video", &["#host"], Region::Body);
        f.media.reject_requests(Some(PlatformError::NotAllowed("no gesture".into())));

        f.reconciler
            .handle(PipSignal::Entered { target: host_video })
            .await;
        assert_eq!(f.media.requests().len(), 1);
        assert!(!f.reconciler.published().get().enabled);
    }

    #[tokio::test]
    async fn test_left_pauses_publishes_then_exits() {
        let f = fixture();
        enter_managed(&f).await;

        // Platform already dropped us; the safety-net exit is rejected quietly.
        f.media.exit_picture_in_picture().await.unwrap();
        let exits_before = f.media.exit_calls();
        f.reconciler
            .handle(PipSignal::Left {
                target: Some(f.media.managed_surface()),
            })
            .await;

        assert_eq!(f.pipeline.pauses(), 1);
        assert_eq!(f.reconciler.mode(), PipMode::Disabled);
        assert!(!f.reconciler.published().get().enabled);
        assert_eq!(f.media.exit_calls(), exits_before + 1);
    }

    #[tokio::test]
    async fn test_left_by_other_element_changes_nothing() {
        let f = fixture();
        let host_video = f.doc.insert("video", &["#host"], Region::Body);
        f.reconciler
            .handle(PipSignal::Left {
                target: Some(host_video),
            })
            .await;
        assert_eq!(f.pipeline.pauses(), 0);
        assert_eq!(f.media.exit_calls(), 0);
    }

    #[tokio::test]
    async fn test_safety_net_spares_foreign_holder() {
        let f = fixture();
        enter_managed(&f).await;
        let host_video = f.doc.insert("video", &["#host"], Region::Body);
        f.media.host_enter_pip(&host_video);

        f.reconciler.handle(PipSignal::Left { target: None }).await;
        assert_eq!(f.reconciler.mode(), PipMode::OtherElementEnabled);
        assert_eq!(f.media.exit_calls(), 0);
        assert_eq!(f.media.picture_in_picture_element(), Some(host_video));
    }

    #[tokio::test]
    async fn test_fullscreen_forces_exit_only_when_enabled() {
        let f = fixture();
        f.reconciler.handle(PipSignal::FullscreenEntered).await;
        assert_eq!(f.media.exit_calls(), 0);

        enter_managed(&f).await;
        f.reconciler.handle(PipSignal::FullscreenEntered).await;
        assert_eq!(f.media.exit_calls(), 1);
        assert_eq!(f.media.picture_in_picture_element(), None);
    }

    #[tokio::test]
    async fn test_entering_exits_fullscreen_first() {
        let f = fixture();
        let host_video = f.doc.insert("video", &["#host"], Region::Body);
        f.media.enter_fullscreen(&host_video);
        enter_managed(&f).await;
        assert_eq!(f.media.fullscreen_exit_calls(), 1);
        assert_eq!(f.media.fullscreen_element(), None);
    }

    #[tokio::test]
    async fn test_toggle_publishes_user_reason() {
        let f = fixture();
        f.reconciler.handle(PipSignal::ToggleRequested).await;
        f.reconciler
            .handle(PipSignal::Entered {
                target: f.media.managed_surface(),
            })
            .await;
        assert_eq!(
            f.reconciler.published().get(),
            PipState {
                enabled: true,
                reason: PipReason::User
            }
        );

        f.reconciler.handle(PipSignal::ToggleRequested).await;
        f.reconciler.handle(PipSignal::Left { target: None }).await;
        assert_eq!(
            f.reconciler.published().get(),
            PipState {
                enabled: false,
                reason: PipReason::User
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ad_flicker_restarts_once_after_quiet_window() {
        let f = fixture();
        enter_managed(&f).await;

        f.reconciler
            .handle(ad(PlaybackStatus::Playing, PlaybackStatus::Advertisement))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.reconciler
            .handle(ad(PlaybackStatus::Advertisement, PlaybackStatus::Playing))
            .await;
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(f.pipeline.restarts(), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(f.pipeline.restarts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ad_restart_skipped_when_not_enabled() {
        let f = fixture();
        f.reconciler
            .handle(ad(PlaybackStatus::Playing, PlaybackStatus::Advertisement))
            .await;
        f.reconciler
            .handle(ad(PlaybackStatus::Playing, PlaybackStatus::Paused))
            .await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(f.pipeline.restarts(), 0);
    }
}
