//! Closed catalogue of internal events.
//!
//! Each key has exactly one payload type. [`EventPayload::KEY`] ties the two
//! together so a typed subscription can never observe another key's shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{ElementRole, ElementsSnapshot, PipReason, PlaybackStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKey {
    PageUrlChanged,
    ElementsUpdated,
    StatusChanged,
    VideoInfoChanged,
    TimeChanged,
    PipStatusChanged,
}

impl EventKey {
    pub const ALL: [EventKey; 6] = [
        EventKey::PageUrlChanged,
        EventKey::ElementsUpdated,
        EventKey::StatusChanged,
        EventKey::VideoInfoChanged,
        EventKey::TimeChanged,
        EventKey::PipStatusChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKey::PageUrlChanged => "page-url-changed",
            EventKey::ElementsUpdated => "elements-updated",
            EventKey::StatusChanged => "status-changed",
            EventKey::VideoInfoChanged => "video-info-changed",
            EventKey::TimeChanged => "time-changed",
            EventKey::PipStatusChanged => "pip-status-changed",
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload bound to exactly one [`EventKey`].
pub trait EventPayload: Serialize + DeserializeOwned + Clone + Send + 'static {
    const KEY: EventKey;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUrlChanged {
    pub url: String,
    pub generation: u64,
    pub is_watch_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementsUpdated {
    pub generation: u64,
    pub changed: Vec<ElementRole>,
    pub snapshot: ElementsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub previous: PlaybackStatus,
    pub current: PlaybackStatus,
}

impl StatusChanged {
    /// True when the change enters or leaves the advertisement category.
    pub fn crosses_advertisement(&self) -> bool {
        self.previous.is_advertisement() != self.current.is_advertisement()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfoChanged {
    pub title: String,
    pub author: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeChanged {
    pub current: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipStatusChanged {
    pub enabled: bool,
    pub reason: PipReason,
}

macro_rules! bind_payload {
    ($($ty:ident),* $(,)?) => {
        $(
            impl EventPayload for $ty {
                const KEY: EventKey = EventKey::$ty;
            }

            impl From<$ty> for AppEvent {
                fn from(payload: $ty) -> Self {
                    AppEvent::$ty(payload)
                }
            }
        )*
    };
}

/// Tagged union over the whole catalogue, one variant per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum AppEvent {
    PageUrlChanged(PageUrlChanged),
    ElementsUpdated(ElementsUpdated),
    StatusChanged(StatusChanged),
    VideoInfoChanged(VideoInfoChanged),
    TimeChanged(TimeChanged),
    PipStatusChanged(PipStatusChanged),
}

bind_payload!(
    PageUrlChanged,
    ElementsUpdated,
    StatusChanged,
    VideoInfoChanged,
    TimeChanged,
    PipStatusChanged,
);

impl AppEvent {
    pub fn key(&self) -> EventKey {
        match self {
            AppEvent::PageUrlChanged(_) => EventKey::PageUrlChanged,
            AppEvent::ElementsUpdated(_) => EventKey::ElementsUpdated,
            AppEvent::StatusChanged(_) => EventKey::StatusChanged,
            AppEvent::VideoInfoChanged(_) => EventKey::VideoInfoChanged,
            AppEvent::TimeChanged(_) => EventKey::TimeChanged,
            AppEvent::PipStatusChanged(_) => EventKey::PipStatusChanged,
        }
    }

    /// Payload as the JSON detail carried on the host bus.
    pub fn detail(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            AppEvent::PageUrlChanged(p) => serde_json::to_value(p),
            AppEvent::ElementsUpdated(p) => serde_json::to_value(p),
            AppEvent::StatusChanged(p) => serde_json::to_value(p),
            AppEvent::VideoInfoChanged(p) => serde_json::to_value(p),
            AppEvent::TimeChanged(p) => serde_json::to_value(p),
            AppEvent::PipStatusChanged(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild an event from a key and its bus detail.
    pub fn from_detail(key: EventKey, detail: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match key {
            EventKey::PageUrlChanged => AppEvent::PageUrlChanged(serde_json::from_value(detail)?),
            EventKey::ElementsUpdated => AppEvent::ElementsUpdated(serde_json::from_value(detail)?),
            EventKey::StatusChanged => AppEvent::StatusChanged(serde_json::from_value(detail)?),
            EventKey::VideoInfoChanged => {
                AppEvent::VideoInfoChanged(serde_json::from_value(detail)?)
            }
            EventKey::TimeChanged => AppEvent::TimeChanged(serde_json::from_value(detail)?),
            EventKey::PipStatusChanged => {
                AppEvent::PipStatusChanged(serde_json::from_value(detail)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_key_matches_variant() {
        let event: AppEvent = PipStatusChanged {
            enabled: true,
            reason: PipReason::User,
        }
        .into();
        assert_eq!(event.key(), PipStatusChanged::KEY);
    }

    #[test]
    fn test_detail_rebuilds_event() {
        let event = AppEvent::from(PageUrlChanged {
            url: "https://www.nicovideo.jp/watch/sm9".into(),
            generation: 3,
            is_watch_page: true,
        });
        let detail = event.detail().unwrap();
        assert_eq!(detail["isWatchPage"], true);
        let rebuilt = AppEvent::from_detail(EventKey::PageUrlChanged, detail).unwrap();
        assert_eq!(rebuilt, event);
    }

    #[test]
    fn test_detail_rejects_wrong_shape() {
        let detail = serde_json::json!({ "current": 1.0, "duration": 2.0 });
        assert!(AppEvent::from_detail(EventKey::PageUrlChanged, detail).is_err());
    }

    #[test]
    fn test_status_crossing() {
        let into_ad = StatusChanged {
            previous: PlaybackStatus::Playing,
            current: PlaybackStatus::Advertisement,
        };
        let plain = StatusChanged {
            previous: PlaybackStatus::Playing,
            current: PlaybackStatus::Paused,
        };
        assert!(into_ad.crosses_advertisement());
        assert!(!plain.crosses_advertisement());
    }
}
