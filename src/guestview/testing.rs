//! Test helpers.

use crate::guestview::delegate::{ContentHost, RemovalMask};
use crate::guestview::guest::GuestInstanceId;
use crate::guestview::replica::RoutingTable;
use std::sync::Mutex;
use std::time::SystemTime;
use url::Url;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HostCall {
    LoadUrl { guest: GuestInstanceId, url: Url, override_user_agent: bool },
    UserAgent { guest: GuestInstanceId, user_agent: String },
    FrameName { guest: GuestInstanceId, name: String },
    Transparent { guest: GuestInstanceId, transparent: bool },
    Zoom { guest: GuestInstanceId, factor: f64 },
    GoToOffset { guest: GuestInstanceId, offset: i32 },
    Reload { guest: GuestInstanceId },
    Stop { guest: GuestInstanceId },
    TerminateGuest { guest: GuestInstanceId, process_id: u32 },
    ClearData { guest: GuestInstanceId, mask: RemovalMask },
    KillEmbedder { process_id: u32 },
}

/// Content host that records every call
#[derive(Debug, Default)]
pub(crate) struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    fail_clear_data: bool,
    /// Table read on every load, the way request interception would
    routing: Mutex<Option<RoutingTable>>,
    routed_at_load: Mutex<Vec<(GuestInstanceId, usize)>>,
}

impl RecordingHost {
    pub(crate) fn failing_clear_data() -> Self {
        Self {
            fail_clear_data: true,
            ..Default::default()
        }
    }

    /// Reads `table` on every `load_url` from now on.
    pub(crate) fn watch_routing(&self, table: RoutingTable) {
        *self.routing.lock().unwrap() = Some(table);
    }

    /// Number of routing entries the table held at each watched load.
    pub(crate) fn routing_at_load(&self) -> Vec<(GuestInstanceId, usize)> {
        self.routed_at_load.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn loaded_urls(&self, guest: GuestInstanceId) -> Vec<Url> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::LoadUrl { guest: g, url, .. } if g == guest => Some(url),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContentHost for RecordingHost {
    fn load_url(&self, guest: GuestInstanceId, url: &Url, override_user_agent: bool) {
        if let Some(table) = self.routing.lock().unwrap().as_ref() {
            self.routed_at_load.lock().unwrap().push((guest, table.guest_count()));
        }
        self.record(HostCall::LoadUrl { guest, url: url.clone(), override_user_agent });
    }

    fn set_user_agent_override(&self, guest: GuestInstanceId, user_agent: &str) {
        self.record(HostCall::UserAgent { guest, user_agent: user_agent.to_string() });
    }

    fn set_frame_name(&self, guest: GuestInstanceId, name: &str) {
        self.record(HostCall::FrameName { guest, name: name.to_string() });
    }

    fn set_background_transparent(&self, guest: GuestInstanceId, transparent: bool) {
        self.record(HostCall::Transparent { guest, transparent });
    }

    fn set_zoom_factor(&self, guest: GuestInstanceId, factor: f64) {
        self.record(HostCall::Zoom { guest, factor });
    }

    fn go_to_offset(&self, guest: GuestInstanceId, offset: i32) {
        self.record(HostCall::GoToOffset { guest, offset });
    }

    fn reload(&self, guest: GuestInstanceId) {
        self.record(HostCall::Reload { guest });
    }

    fn stop(&self, guest: GuestInstanceId) {
        self.record(HostCall::Stop { guest });
    }

    fn terminate_guest_process(&self, guest: GuestInstanceId, process_id: u32) {
        self.record(HostCall::TerminateGuest { guest, process_id });
    }

    fn clear_data(&self, guest: GuestInstanceId, _since: SystemTime, mask: RemovalMask) -> anyhow::Result<()> {
        self.record(HostCall::ClearData { guest, mask });
        if self.fail_clear_data {
            anyhow::bail!("storage backend unavailable");
        }
        Ok(())
    }

    fn kill_embedder_process(&self, process_id: u32) {
        self.record(HostCall::KillEmbedder { process_id });
    }
}
