//! `pipsync simulate`: boot the full runtime against an in-memory page and
//! drive it from a JSON script.

use pipsync_core::{AppEvent, Config, InfoState, NodeRef, PageState, PipState, StatusState};
use pipsync_dom::memory::{
    MemoryDocument, MemoryMedia, MemoryPipeline, MemoryProbe, MemoryTransport, Region,
};
use pipsync_dom::{Document, DomEvent, EventTarget, MediaPlatform};
use pipsync_runtime::domains::TOGGLE_LABEL;
use pipsync_runtime::{Bootstrap, DomainContext, HostBindings, SelectorCatalog};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const VIDEO_SELECTOR: &str = "#MainVideoPlayer video";
const CANVAS_SELECTOR: &str = "#MainVideoPlayer canvas";
const CONTROLLER_SELECTOR: &str = "div[data-name=\"controller\"]";

/// Time given to background tasks after every step.
const STEP_SETTLE: Duration = Duration::from_millis(20);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default = "default_start_url")]
    pub start_url: String,
    /// Page metadata the site probe reports.
    #[serde(default)]
    pub info: Option<InfoState>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_start_url() -> String {
    "https://www.nicovideo.jp/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
    /// Client-side navigation through `pushState`.
    Navigate { url: String },
    /// Back/forward navigation.
    Back { url: String },
    /// Render the player markup of a watch page.
    RenderPlayer {
        #[serde(default = "default_status")]
        status: String,
    },
    /// Swap the video element for a fresh one, as the site does between videos.
    ReplaceVideo,
    RemovePlayer,
    /// Click the mounted picture-in-picture control.
    Toggle,
    /// The page puts one of its own elements into picture-in-picture.
    EnterPip,
    LeavePip,
    Fullscreen,
    Status { value: String },
    Time { current: f64, duration: f64 },
    Wait { ms: u64 },
}

fn default_status() -> String {
    "playing".to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub page: PageState,
    pub status: StatusState,
    pub pip: PipState,
    pub info: InfoState,
    pub events: usize,
    pub failures: Vec<String>,
}

struct Player {
    bar: NodeRef,
    video: NodeRef,
    canvas: NodeRef,
}

struct Simulation {
    doc: Arc<MemoryDocument>,
    media: Arc<MemoryMedia>,
    player: Option<Player>,
    host_preview: Option<NodeRef>,
}

impl Simulation {
    fn render_player(&mut self, status: &str) {
        if self.player.is_some() {
            warn!("Player already rendered");
            return;
        }
        let bar = self.doc.insert("div", &[CONTROLLER_SELECTOR], Region::Body);
        let video = self.doc.insert("video", &[VIDEO_SELECTOR], Region::Body);
        let canvas = self.doc.insert("canvas", &[CANVAS_SELECTOR], Region::Body);
        self.doc.set_attribute(&video, "data-status", status);
        self.media.set_metadata_loaded(&video, true);
        self.player = Some(Player { bar, video, canvas });
    }

    fn video(&self) -> Option<NodeRef> {
        self.player.as_ref().map(|p| p.video.clone())
    }

    async fn apply(&mut self, step: &Step) {
        match step {
            Step::Navigate { url } => self.doc.push_state(url),
            Step::Back { url } => self.doc.pop_state(url),
            Step::RenderPlayer { status } => self.render_player(status),
            Step::ReplaceVideo => {
                let Some(player) = self.player.as_mut() else {
                    warn!("No player to replace the video in");
                    return;
                };
                let status = self
                    .doc
                    .attribute(&player.video, "data-status")
                    .unwrap_or_else(default_status);
                match self.doc.replace(&player.video, "video", &[VIDEO_SELECTOR]) {
                    Some(video) => {
                        self.doc.set_attribute(&video, "data-status", &status);
                        self.media.set_metadata_loaded(&video, true);
                        player.video = video;
                    }
                    None => warn!("Video element was already detached"),
                }
            }
            Step::RemovePlayer => {
                if let Some(player) = self.player.take() {
                    for node in [&player.bar, &player.video, &player.canvas] {
                        self.doc.remove(node);
                    }
                }
            }
            Step::Toggle => match self.doc.find_by_attribute("aria-label", TOGGLE_LABEL) {
                Some(control) => self
                    .doc
                    .dispatch_event(DomEvent::new("click", EventTarget::Node(control))),
                None => warn!("Toggle control is not mounted"),
            },
            Step::EnterPip => {
                let doc = &self.doc;
                let preview = self
                    .host_preview
                    .get_or_insert_with(|| doc.insert("video", &["#host-preview"], Region::Body))
                    .clone();
                self.media.host_enter_pip(&preview);
            }
            Step::LeavePip => {
                if let Err(e) = self.media.exit_picture_in_picture().await {
                    warn!(error = %e, "Exit picture-in-picture failed");
                }
            }
            Step::Fullscreen => match self.video() {
                Some(video) => self.media.enter_fullscreen(&video),
                None => warn!("No player to put in fullscreen"),
            },
            Step::Status { value } => match self.video() {
                Some(video) => {
                    self.doc.set_attribute(&video, "data-status", value);
                    self.doc
                        .dispatch_event(DomEvent::new("timeupdate", EventTarget::Node(video)));
                }
                None => warn!("No player to set status on"),
            },
            Step::Time { current, duration } => match self.video() {
                Some(video) => self.media.set_time(&video, *current, *duration),
                None => warn!("No player to advance"),
            },
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }
        tokio::time::sleep(STEP_SETTLE).await;
    }
}

/// Run `script` to completion and stop the runtime.
pub async fn execute(config: Config, script: &Script, print_events: bool) -> anyhow::Result<Summary> {
    let doc = MemoryDocument::new(&script.start_url);
    let media = MemoryMedia::new(doc.clone());
    let probe = MemoryProbe::new();
    probe.set_info(script.info.clone());
    let host = HostBindings {
        document: doc.clone(),
        media: media.clone(),
        pipeline: MemoryPipeline::new(),
        transport: MemoryTransport::new(),
        probe,
    };

    let (ctx, writers) = DomainContext::new(config, host, SelectorCatalog::watch_page());
    let published = Arc::new(AtomicUsize::new(0));
    let counter = published.clone();
    ctx.events.on_any("simulate:print", move |event: AppEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        if print_events {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Could not serialize event"),
            }
        }
    });

    let app = Bootstrap::new(ctx, writers)
        .with_default_modules()
        .run()
        .await;
    tokio::time::sleep(STEP_SETTLE).await;

    let mut sim = Simulation {
        doc,
        media,
        player: None,
        host_preview: None,
    };
    for (index, step) in script.steps.iter().enumerate() {
        info!(index, step = ?step, "Applying step");
        sim.apply(step).await;
    }

    let store = app.context().store.clone();
    let mut failures: Vec<String> = app.failures().iter().map(|f| f.to_string()).collect();
    failures.extend(app.stop().await.iter().map(|f| f.to_string()));

    Ok(Summary {
        page: store.page.get(),
        status: store.status.get(),
        pip: store.pip.get(),
        info: store.info.get(),
        events: published.load(Ordering::SeqCst),
        failures,
    })
}

pub async fn run(config: Config, path: &Path, print_events: bool) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let script: Script = serde_json::from_str(&content)?;

    let summary = execute(config, &script, print_events).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.failures.is_empty() {
        anyhow::bail!("{} lifecycle call(s) failed", summary.failures.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipsync_core::{PipReason, PlaybackStatus};

    fn script(json: &str) -> Script {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_page_session() {
        let s = script(
            r#"{
                "info": { "title": "Bad Apple!!", "author": "someone", "thumbnail": null },
                "steps": [
                    { "action": "renderPlayer" },
                    { "action": "navigate", "url": "https://www.nicovideo.jp/watch/sm9" },
                    { "action": "toggle" }
                ]
            }"#,
        );
        let summary = execute(Config::default(), &s, false).await.unwrap();

        assert!(summary.failures.is_empty());
        assert_eq!(summary.page.generation, 2);
        assert!(summary.page.is_watch_page);
        assert_eq!(summary.status.status, PlaybackStatus::Playing);
        assert_eq!(summary.info.title, "Bad Apple!!");
        assert!(summary.pip.enabled);
        assert_eq!(summary.pip.reason, PipReason::User);
        assert!(summary.events > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_pip_is_reclaimed() {
        let s = script(
            r#"{
                "startUrl": "https://www.nicovideo.jp/watch/sm9",
                "steps": [
                    { "action": "renderPlayer" },
                    { "action": "wait", "ms": 50 },
                    { "action": "enterPip" }
                ]
            }"#,
        );
        let summary = execute(Config::default(), &s, false).await.unwrap();
        assert!(summary.pip.enabled);
        assert_eq!(summary.pip.reason, PipReason::System);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_runtime_publishes_nothing() {
        let s = script(r#"{ "steps": [ { "action": "navigate", "url": "https://www.nicovideo.jp/watch/sm9" } ] }"#);
        let config = Config {
            enabled: false,
            ..Config::default()
        };
        let summary = execute(config, &s, false).await.unwrap();
        assert_eq!(summary.events, 0);
        assert_eq!(summary.page.generation, 0);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result: Result<Script, _> =
            serde_json::from_str(r#"{ "steps": [ { "action": "teleport" } ] }"#);
        assert!(result.is_err());
    }
}
