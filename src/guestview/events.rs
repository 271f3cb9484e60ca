//! Guest event types.
//!
//! This module defines the structured events a guest reports to its embedder, together
//! with the small value types that end up in event payloads.
//!
//! # Main Types
//!
//! - [`EventName`]: The catalogue of events (load-start, load-commit, exit, ...).
//! - [`EventValue`]: A plain payload value (text, integer, double or boolean).
//! - [`EventArgs`]: Ordered key → value payload of an event.
//! - [`GuestEvent`]: An event as delivered to an embedder.
//! - [`WindowOpenDisposition`], [`TerminationStatus`]: Enums rendered as payload text.

use crate::guestview::guest::GuestInstanceId;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Payload keys used by the event catalogue
pub mod keys {
    pub const URL: &str = "url";
    pub const IS_TOP_LEVEL: &str = "isTopLevel";
    pub const REASON: &str = "reason";
    pub const OLD_URL: &str = "oldUrl";
    pub const NEW_URL: &str = "newUrl";
    pub const PROGRESS: &str = "progress";
    pub const BASE_URL_FOR_DATA_URL: &str = "baseUrlForDataUrl";
    pub const CURRENT_ENTRY_INDEX: &str = "currentEntryIndex";
    pub const ENTRY_COUNT: &str = "entryCount";
    pub const PROCESS_ID: &str = "processId";
    pub const LEVEL: &str = "level";
    pub const MESSAGE: &str = "message";
    pub const LINE: &str = "line";
    pub const SOURCE_ID: &str = "sourceId";
    pub const OLD_WIDTH: &str = "oldWidth";
    pub const OLD_HEIGHT: &str = "oldHeight";
    pub const NEW_WIDTH: &str = "newWidth";
    pub const NEW_HEIGHT: &str = "newHeight";
    pub const OLD_ZOOM_FACTOR: &str = "oldZoomFactor";
    pub const NEW_ZOOM_FACTOR: &str = "newZoomFactor";
    pub const NAME: &str = "name";
    pub const REQUEST_ID: &str = "requestId";
    pub const PERMISSION: &str = "permission";
    pub const INITIAL_WIDTH: &str = "initialWidth";
    pub const INITIAL_HEIGHT: &str = "initialHeight";
    pub const TARGET_URL: &str = "targetUrl";
    pub const WINDOW_ID: &str = "windowId";
    pub const STORAGE_PARTITION_ID: &str = "storagePartitionId";
    pub const WINDOW_OPEN_DISPOSITION: &str = "windowOpenDisposition";
    pub const USER_GESTURE: &str = "userGesture";
    pub const LAST_UNLOCKED_BY_SELF: &str = "lastUnlockedBySelf";
    pub const REQUEST_METHOD: &str = "requestMethod";
    pub const SINCE: &str = "since";
}

/// Events that a guest reports to its embedder
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    /// A (provisional) load has started
    LoadStart,
    /// A load has been committed
    LoadCommit,
    /// Loading has stopped
    LoadStop,
    /// A load was aborted
    LoadAbort,
    /// A load was redirected
    LoadRedirect,
    /// Load progress has changed
    LoadProgress,
    /// The main frame has finished loading its document
    ContentLoad,
    /// The guest logged a console message
    ConsoleMessage,
    /// The guest has auto-resized
    SizeChanged,
    /// The zoom factor changed
    ZoomChange,
    /// The guest process has gone away
    Exit,
    /// The guest asked to be closed
    Close,
    /// The top level frame name changed
    FrameNameChanged,
    /// The guest process became responsive again
    Responsive,
    /// The guest process stopped responding
    Unresponsive,
    /// A privileged action needs a decision from the embedder
    PermissionRequest,
    /// The guest wants to open a new window; needs a decision from the embedder
    NewWindow,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::LoadStart => "loadstart",
            EventName::LoadCommit => "loadcommit",
            EventName::LoadStop => "loadstop",
            EventName::LoadAbort => "loadabort",
            EventName::LoadRedirect => "loadredirect",
            EventName::LoadProgress => "loadprogress",
            EventName::ContentLoad => "contentload",
            EventName::ConsoleMessage => "consolemessage",
            EventName::SizeChanged => "sizechanged",
            EventName::ZoomChange => "zoomchange",
            EventName::Exit => "exit",
            EventName::Close => "close",
            EventName::FrameNameChanged => "framenamechanged",
            EventName::Responsive => "responsive",
            EventName::Unresponsive => "unresponsive",
            EventName::PermissionRequest => "permissionrequest",
            EventName::NewWindow => "newwindow",
        }
    }
}

impl Display for EventName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A plain event payload value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventValue {
    Text(String),
    Integer(i64),
    Double(f64),
    Bool(bool),
}

impl EventValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EventValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EventValue::Double(d) => Some(*d),
            EventValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for EventValue {
    fn from(s: &str) -> Self {
        EventValue::Text(s.to_string())
    }
}

impl From<String> for EventValue {
    fn from(s: String) -> Self {
        EventValue::Text(s)
    }
}

impl From<&url::Url> for EventValue {
    fn from(u: &url::Url) -> Self {
        EventValue::Text(u.to_string())
    }
}

impl From<i64> for EventValue {
    fn from(i: i64) -> Self {
        EventValue::Integer(i)
    }
}

impl From<i32> for EventValue {
    fn from(i: i32) -> Self {
        EventValue::Integer(i as i64)
    }
}

impl From<u32> for EventValue {
    fn from(i: u32) -> Self {
        EventValue::Integer(i as i64)
    }
}

impl From<f64> for EventValue {
    fn from(d: f64) -> Self {
        EventValue::Double(d)
    }
}

impl From<bool> for EventValue {
    fn from(b: bool) -> Self {
        EventValue::Bool(b)
    }
}

/// Ordered key → value payload. Keys keep their insertion order, which is also the
/// order they are serialized in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs(Vec<(String, EventValue)>);

impl EventArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style set. Setting an existing key replaces its value in place.
    pub fn with(mut self, key: &str, value: impl Into<EventValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<EventValue>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&EventValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(EventValue::as_str)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for EventArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// An event as delivered to an embedder
#[derive(Debug, Clone, PartialEq)]
pub struct GuestEvent {
    /// Guest that raised the event
    pub guest: GuestInstanceId,
    /// Name of the event
    pub name: EventName,
    /// Event payload
    pub args: EventArgs,
}

impl GuestEvent {
    pub fn new(guest: GuestInstanceId, name: EventName, args: EventArgs) -> Self {
        Self { guest, name, args }
    }

    /// Renders the event as `{"type": ..., "guest": ..., "args": {...}}`, keeping the
    /// order of the payload keys.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(rename = "type")]
            name: &'static str,
            guest: u32,
            args: &'a EventArgs,
        }

        serde_json::to_string(&Wire {
            name: self.name.as_str(),
            guest: self.guest.0,
            args: &self.args,
        })
    }
}

/// How a guest wants a new window to be opened
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum WindowOpenDisposition {
    #[default]
    Ignore,
    SaveToDisk,
    CurrentTab,
    NewBackgroundTab,
    NewForegroundTab,
    NewWindow,
    NewPopup,
}

impl WindowOpenDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowOpenDisposition::Ignore => "ignore",
            WindowOpenDisposition::SaveToDisk => "save_to_disk",
            WindowOpenDisposition::CurrentTab => "current_tab",
            WindowOpenDisposition::NewBackgroundTab => "new_background_tab",
            WindowOpenDisposition::NewForegroundTab => "new_foreground_tab",
            WindowOpenDisposition::NewWindow => "new_window",
            WindowOpenDisposition::NewPopup => "new_popup",
        }
    }
}

/// How a guest process ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TerminationStatus {
    Normal,
    Abnormal,
    StillRunning,
    Killed,
    Crashed,
}

impl TerminationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationStatus::Normal => "normal",
            TerminationStatus::Abnormal | TerminationStatus::StillRunning => "abnormal",
            TerminationStatus::Killed => "killed",
            TerminationStatus::Crashed => "crashed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_keep_insertion_order_and_replace_in_place() {
        let mut args = EventArgs::new()
            .with(keys::URL, "https://example.test/")
            .with(keys::IS_TOP_LEVEL, true)
            .with(keys::PROCESS_ID, 12u32);

        args.set(keys::IS_TOP_LEVEL, false);

        assert_eq!(args.keys(), vec!["url", "isTopLevel", "processId"]);
        assert_eq!(args.get(keys::IS_TOP_LEVEL).and_then(EventValue::as_bool), Some(false));
        assert_eq!(args.get(keys::PROCESS_ID).and_then(EventValue::as_i64), Some(12));
        assert_eq!(args.get_str(keys::URL), Some("https://example.test/"));
        assert!(args.get("missing").is_none());
    }

    #[test]
    fn event_renders_as_ordered_json() {
        let ev = GuestEvent::new(
            GuestInstanceId(4),
            EventName::LoadCommit,
            EventArgs::new()
                .with(keys::URL, "https://example.test/a")
                .with(keys::IS_TOP_LEVEL, true)
                .with(keys::ENTRY_COUNT, 1i64)
                .with(keys::PROGRESS, 0.5),
        );

        assert_eq!(
            ev.to_json_string().unwrap(),
            r#"{"type":"loadcommit","guest":4,"args":{"url":"https://example.test/a","isTopLevel":true,"entryCount":1,"progress":0.5}}"#
        );
    }

    #[test]
    fn disposition_and_termination_text() {
        assert_eq!(WindowOpenDisposition::NewForegroundTab.as_str(), "new_foreground_tab");
        assert_eq!(WindowOpenDisposition::default().as_str(), "ignore");
        assert_eq!(TerminationStatus::StillRunning.as_str(), "abnormal");
        assert_eq!(TerminationStatus::Crashed.as_str(), "crashed");
    }

    #[test]
    fn event_name_display() {
        assert_eq!(EventName::FrameNameChanged.to_string(), "framenamechanged");
        assert_eq!(format!("{}", EventName::Exit), "exit");
    }
}
