use crate::guestview::errors::GuestViewError;
use crate::guestview::events::{keys, EventArgs, EventName, TerminationStatus};
use crate::guestview::guest::GuestInstanceId;
use crate::guestview::manager::GuestViewManager;
use url::Url;

/// Things the hosted content reports about a guest
#[derive(Debug, Clone, PartialEq)]
pub enum GuestNotification {
    /// A load started that was not initiated through the manager (e.g. a link click)
    LoadStarted { url: Url, is_top_level: bool },
    LoadCommitted { url: Url, is_top_level: bool },
    LoadFailed { url: Url, is_top_level: bool, error: String },
    LoadRedirected { old_url: Url, new_url: Url, is_top_level: bool },
    /// Overall load progress in `0.0..=1.0`
    LoadProgressed { progress: f64 },
    StoppedLoading,
    /// The main frame document has been parsed
    ContentLoaded,
    ConsoleMessage { level: i32, message: String, line: i32, source_id: String },
    SizeChanged { old_width: u32, old_height: u32, new_width: u32, new_height: u32 },
    ProcessGone { status: TerminationStatus },
    CloseRequested,
    /// The top level frame changed its name (`window.name = ...`)
    FrameNameChanged { name: String },
    Unresponsive,
    Responsive,
}

impl GuestViewManager {
    /// Turns a content notification into guest state changes and events.
    pub fn handle_notification(
        &mut self,
        guest_id: GuestInstanceId,
        notification: GuestNotification,
    ) -> Result<(), GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        let process_id = guest.routing_id.process_id;

        let (name, args) = match notification {
            GuestNotification::LoadStarted { url, is_top_level } => {
                if is_top_level {
                    guest.loading = true;
                }
                (
                    EventName::LoadStart,
                    EventArgs::new().with(keys::URL, &url).with(keys::IS_TOP_LEVEL, is_top_level),
                )
            }
            GuestNotification::LoadCommitted { url, is_top_level } => {
                let mut base_url = String::new();
                if is_top_level {
                    if url.scheme() == "data" {
                        if let Some(base) = &guest.base_url_for_data_url {
                            base_url = base.to_string();
                        }
                    } else {
                        guest.base_url_for_data_url = None;
                    }
                    guest.src = Some(url.clone());
                    guest.history.commit(url.clone());
                }
                (
                    EventName::LoadCommit,
                    EventArgs::new()
                        .with(keys::URL, &url)
                        .with(keys::IS_TOP_LEVEL, is_top_level)
                        .with(keys::BASE_URL_FOR_DATA_URL, base_url)
                        .with(keys::CURRENT_ENTRY_INDEX, guest.history.current_index())
                        .with(keys::ENTRY_COUNT, guest.history.len() as i64)
                        .with(keys::PROCESS_ID, process_id),
                )
            }
            GuestNotification::LoadFailed { url, is_top_level, error } => {
                if is_top_level {
                    guest.loading = false;
                }
                (
                    EventName::LoadAbort,
                    EventArgs::new()
                        .with(keys::URL, &url)
                        .with(keys::IS_TOP_LEVEL, is_top_level)
                        .with(keys::REASON, error),
                )
            }
            GuestNotification::LoadRedirected { old_url, new_url, is_top_level } => (
                EventName::LoadRedirect,
                EventArgs::new()
                    .with(keys::IS_TOP_LEVEL, is_top_level)
                    .with(keys::NEW_URL, &new_url)
                    .with(keys::OLD_URL, &old_url),
            ),
            GuestNotification::LoadProgressed { progress } => {
                let url = guest.src.as_ref().map(|u| u.to_string()).unwrap_or_default();
                (
                    EventName::LoadProgress,
                    EventArgs::new()
                        .with(keys::URL, url)
                        .with(keys::PROGRESS, progress.clamp(0.0, 1.0)),
                )
            }
            GuestNotification::StoppedLoading => {
                guest.loading = false;
                (EventName::LoadStop, EventArgs::new())
            }
            GuestNotification::ContentLoaded => (EventName::ContentLoad, EventArgs::new()),
            GuestNotification::ConsoleMessage { level, message, line, source_id } => (
                EventName::ConsoleMessage,
                EventArgs::new()
                    .with(keys::LEVEL, level)
                    .with(keys::MESSAGE, message)
                    .with(keys::LINE, line)
                    .with(keys::SOURCE_ID, source_id),
            ),
            GuestNotification::SizeChanged { old_width, old_height, new_width, new_height } => (
                EventName::SizeChanged,
                EventArgs::new()
                    .with(keys::OLD_WIDTH, old_width)
                    .with(keys::OLD_HEIGHT, old_height)
                    .with(keys::NEW_WIDTH, new_width)
                    .with(keys::NEW_HEIGHT, new_height),
            ),
            GuestNotification::ProcessGone { status } => {
                guest.loading = false;
                log::warn!("Guest[{}]: process {} gone ({})", guest_id, process_id, status.as_str());
                (
                    EventName::Exit,
                    EventArgs::new()
                        .with(keys::PROCESS_ID, process_id)
                        .with(keys::REASON, status.as_str()),
                )
            }
            GuestNotification::CloseRequested => (EventName::Close, EventArgs::new()),
            GuestNotification::FrameNameChanged { name } => {
                if guest.name == name {
                    return Ok(());
                }
                guest.name = name.clone();
                (EventName::FrameNameChanged, EventArgs::new().with(keys::NAME, name))
            }
            GuestNotification::Unresponsive => (
                EventName::Unresponsive,
                EventArgs::new().with(keys::PROCESS_ID, process_id),
            ),
            GuestNotification::Responsive => (
                EventName::Responsive,
                EventArgs::new().with(keys::PROCESS_ID, process_id),
            ),
        };

        self.emit(guest_id, name, args);
        Ok(())
    }
}
