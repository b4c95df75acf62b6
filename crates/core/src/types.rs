use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque handle to a live host node.
///
/// `id` is stable for the lifetime of the node inside one host document; the
/// tag is captured at lookup time and is what structural guards check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: u64,
    pub tag: String,
}

impl NodeRef {
    pub fn new(id: u64, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into().to_ascii_lowercase(),
        }
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// Logical, site-independent element names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementRole {
    Video,
    CommentCanvas,
    ControllerBar,
    MenuContainer,
    TooltipTrigger,
}

impl ElementRole {
    pub const ALL: [ElementRole; 5] = [
        ElementRole::Video,
        ElementRole::CommentCanvas,
        ElementRole::ControllerBar,
        ElementRole::MenuContainer,
        ElementRole::TooltipTrigger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementRole::Video => "video",
            ElementRole::CommentCanvas => "commentCanvas",
            ElementRole::ControllerBar => "controllerBar",
            ElementRole::MenuContainer => "menuContainer",
            ElementRole::TooltipTrigger => "tooltipTrigger",
        }
    }
}

impl std::fmt::Display for ElementRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved nodes of one full resolution pass, keyed by role. Missing roles
/// are simply absent.
pub type ElementsSnapshot = BTreeMap<ElementRole, NodeRef>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    pub is_watch_page: bool,
    /// Bumped exactly once per detected navigation.
    pub generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementsState {
    pub last_resolved_generation: u64,
    pub last_resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Advertisement,
    Ended,
    Error,
}

impl PlaybackStatus {
    pub fn is_advertisement(&self) -> bool {
        matches!(self, PlaybackStatus::Advertisement)
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Idle => write!(f, "idle"),
            PlaybackStatus::Loading => write!(f, "loading"),
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Paused => write!(f, "paused"),
            PlaybackStatus::Advertisement => write!(f, "advertisement"),
            PlaybackStatus::Ended => write!(f, "ended"),
            PlaybackStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusState {
    pub status: PlaybackStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeState {
    pub current: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoState {
    pub title: String,
    pub author: String,
    pub thumbnail: Option<String>,
}

/// Who caused the current picture-in-picture activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipReason {
    User,
    System,
    #[default]
    Unknown,
}

/// Mirrors the platform's actual picture-in-picture target, not intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipState {
    pub enabled: bool,
    pub reason: PipReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ref_tag_is_case_insensitive() {
        let node = NodeRef::new(7, "VIDEO");
        assert_eq!(node.tag, "video");
        assert!(node.is_tag("Video"));
        assert!(!node.is_tag("canvas"));
    }

    #[test]
    fn test_snapshot_serializes_roles_as_keys() {
        let mut snapshot = ElementsSnapshot::new();
        snapshot.insert(ElementRole::Video, NodeRef::new(1, "video"));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["video"]["id"], 1);
        let back: ElementsSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_only_advertisement_is_ad_category() {
        assert!(PlaybackStatus::Advertisement.is_advertisement());
        assert!(!PlaybackStatus::Playing.is_advertisement());
        assert!(!PlaybackStatus::default().is_advertisement());
    }
}
