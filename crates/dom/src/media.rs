use async_trait::async_trait;
use pipsync_core::NodeRef;

use crate::error::PlatformError;

/// Native event names the platform dispatches on the document target.
pub const ENTER_PIP_EVENT: &str = "enterpictureinpicture";
pub const LEAVE_PIP_EVENT: &str = "leavepictureinpicture";
pub const FULLSCREEN_CHANGE_EVENT: &str = "fullscreenchange";

/// Media events dispatched on a video node.
pub const MEDIA_EVENTS: &[&str] = &["play", "pause", "ended", "timeupdate", "loadedmetadata"];

/// Presentation-mode calls of the hosting platform.
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// The floating video element this system owns.
    fn managed_surface(&self) -> NodeRef;

    fn picture_in_picture_element(&self) -> Option<NodeRef>;

    fn fullscreen_element(&self) -> Option<NodeRef>;

    /// Whether `video` reached the loaded-metadata state.
    fn has_metadata(&self, video: &NodeRef) -> bool;

    /// Playback position of `video` as `(current, duration)` seconds.
    fn playback_time(&self, video: &NodeRef) -> (f64, f64);

    async fn request_picture_in_picture(&self, node: &NodeRef) -> Result<(), PlatformError>;

    async fn exit_picture_in_picture(&self) -> Result<(), PlatformError>;

    async fn exit_fullscreen(&self) -> Result<(), PlatformError>;
}

/// The draw/stream pipeline feeding the managed surface from the primary
/// player and its comment canvas.
pub trait StreamPipeline: Send + Sync {
    fn attach_source(&self, video: Option<&NodeRef>, comments: Option<&NodeRef>);
    fn resume(&self);
    fn pause(&self);
    fn restart(&self);
    fn is_running(&self) -> bool;
}
