//! Async front end of the manager.
//!
//! [`GuestViewManager::start`] moves the manager onto a tokio task that owns it from
//! then on. Other tasks talk to it through a cloneable [`GuestViewHandle`]: every call
//! sends a [`ManagerCommand`] carrying a oneshot reply channel and waits for the
//! answer. Next to commands, the control loop ticks at the configured interval to
//! expire unanswered permission requests and picks up the routing replica's
//! acknowledgements, which release the first load of freshly attached guests.

use crate::guestview::delegate::RemovalMask;
use crate::guestview::dispatch::EventStream;
use crate::guestview::embedder::EmbedderId;
use crate::guestview::errors::GuestViewError;
use crate::guestview::events::{EventArgs, WindowOpenDisposition};
use crate::guestview::guest::{GuestInstanceId, GuestSnapshot};
use crate::guestview::manager::{GuestNotification, GuestViewManager, NewWindowRequest};
use crate::guestview::params::ParamBag;
use crate::guestview::permission::{PermissionKind, PermissionResponse, PermissionTicket, RequestId};
use crate::guestview::replica::{RoutingId, RoutingTable};
use anyhow::Result;
use std::ops::ControlFlow;
use std::time::{Instant, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

type Reply<T> = oneshot::Sender<Result<T, GuestViewError>>;

/// Commands understood by the control loop
pub enum ManagerCommand {
    RegisterEmbedder { process_id: u32, owner_id: String, url: Url, reply: oneshot::Sender<(EmbedderId, EventStream)> },
    SetEmbedderUrl { embedder: EmbedderId, url: Url, reply: Reply<()> },
    AddInterceptListener { embedder: EmbedderId, view_instance_id: u32, event: String, sub_event_name: String, reply: Reply<()> },
    DestroyEmbedder { embedder: EmbedderId, reply: Reply<()> },
    CreateGuest { owner: EmbedderId, params: ParamBag, reply: Reply<GuestInstanceId> },
    Attach { guest: GuestInstanceId, embedder: EmbedderId, params: ParamBag, reply: Reply<()> },
    Navigate { guest: GuestInstanceId, target: String, force_reload: bool, reply: Reply<bool> },
    DestroyGuest { guest: GuestInstanceId, reply: Reply<()> },
    NewWindow { opener: GuestInstanceId, request: NewWindowRequest, reply: Reply<(GuestInstanceId, PermissionTicket)> },
    OpenUrl { guest: GuestInstanceId, url: Url, disposition: WindowOpenDisposition, reply: Reply<Option<GuestInstanceId>> },
    Notify { guest: GuestInstanceId, notification: GuestNotification, reply: Reply<()> },
    RequestPermission { guest: GuestInstanceId, kind: PermissionKind, params: EventArgs, default_allowed: bool, reply: Reply<PermissionTicket> },
    RequestClearData { guest: GuestInstanceId, since: SystemTime, mask: RemovalMask, reply: Reply<PermissionTicket> },
    RespondToPermission { id: RequestId, response: PermissionResponse, reply: Reply<()> },
    SetName { guest: GuestInstanceId, name: String, reply: Reply<()> },
    SetZoom { guest: GuestInstanceId, factor: f64, reply: Reply<bool> },
    SetAllowTransparency { guest: GuestInstanceId, allow: bool, reply: Reply<()> },
    SetUserAgentOverride { guest: GuestInstanceId, user_agent: String, reply: Reply<()> },
    Go { guest: GuestInstanceId, offset: i32, reply: Reply<bool> },
    Reload { guest: GuestInstanceId, reply: Reply<()> },
    Stop { guest: GuestInstanceId, reply: Reply<()> },
    Terminate { guest: GuestInstanceId, reply: Reply<()> },
    LoadDataWithBaseUrl { guest: GuestInstanceId, data_url: String, base_url: String, virtual_url: String, reply: Reply<()> },
    Guest { guest: GuestInstanceId, reply: oneshot::Sender<Option<GuestSnapshot>> },
    RoutingTable { reply: oneshot::Sender<RoutingTable> },
    Shutdown { reply: oneshot::Sender<()> },
}

impl GuestViewManager {
    /// Moves the manager onto a tokio task. Must be called from within a tokio runtime.
    pub fn start(self) -> (GuestViewHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config().command_channel_capacity);
        let cancel = CancellationToken::new();

        let handle = GuestViewHandle {
            cmd_tx,
            cancel: cancel.clone(),
        };
        let join_handle = tokio::spawn(self.run(cmd_rx, cancel));

        (handle, join_handle)
    }

    /// Control loop. Ends on [`ManagerCommand::Shutdown`], on cancellation, or when
    /// every handle has been dropped; the manager is shut down in all three cases.
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<ManagerCommand>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut installed = self.replica_acks();

        log::debug!("Guest view manager started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).is_break() {
                            return;
                        }
                    }
                    None => break,
                },
                Some(routing_id) = next_installed(&mut installed) => {
                    self.routing_installed(routing_id);
                },
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
            }
        }

        self.shutdown();
    }

    /// Runs one command. Breaks once the manager has been shut down.
    fn handle_command(&mut self, cmd: ManagerCommand) -> ControlFlow<()> {
        // Callers that gave up waiting have dropped their receiver; their answers are discarded.
        match cmd {
            ManagerCommand::RegisterEmbedder { process_id, owner_id, url, reply } => {
                let _ = reply.send(self.register_embedder(process_id, owner_id, url));
            }
            ManagerCommand::SetEmbedderUrl { embedder, url, reply } => {
                let _ = reply.send(self.set_embedder_url(embedder, url));
            }
            ManagerCommand::AddInterceptListener { embedder, view_instance_id, event, sub_event_name, reply } => {
                let _ = reply.send(self.add_intercept_listener(embedder, view_instance_id, event, sub_event_name));
            }
            ManagerCommand::DestroyEmbedder { embedder, reply } => {
                let _ = reply.send(self.destroy_embedder(embedder));
            }
            ManagerCommand::CreateGuest { owner, params, reply } => {
                let _ = reply.send(self.create_guest(owner, &params));
            }
            ManagerCommand::Attach { guest, embedder, params, reply } => {
                let _ = reply.send(self.attach(guest, embedder, &params));
            }
            ManagerCommand::Navigate { guest, target, force_reload, reply } => {
                let _ = reply.send(self.navigate(guest, &target, force_reload));
            }
            ManagerCommand::DestroyGuest { guest, reply } => {
                let _ = reply.send(self.destroy_guest(guest));
            }
            ManagerCommand::NewWindow { opener, request, reply } => {
                let _ = reply.send(self.new_window(opener, request));
            }
            ManagerCommand::OpenUrl { guest, url, disposition, reply } => {
                let _ = reply.send(self.open_url_from_guest(guest, url, disposition));
            }
            ManagerCommand::Notify { guest, notification, reply } => {
                let _ = reply.send(self.handle_notification(guest, notification));
            }
            ManagerCommand::RequestPermission { guest, kind, params, default_allowed, reply } => {
                let _ = reply.send(self.request_permission(guest, kind, params, default_allowed));
            }
            ManagerCommand::RequestClearData { guest, since, mask, reply } => {
                let _ = reply.send(self.request_clear_data(guest, since, mask));
            }
            ManagerCommand::RespondToPermission { id, response, reply } => {
                let _ = reply.send(self.respond_to_permission(id, response));
            }
            ManagerCommand::SetName { guest, name, reply } => {
                let _ = reply.send(self.set_name(guest, &name));
            }
            ManagerCommand::SetZoom { guest, factor, reply } => {
                let _ = reply.send(self.set_zoom(guest, factor));
            }
            ManagerCommand::SetAllowTransparency { guest, allow, reply } => {
                let _ = reply.send(self.set_allow_transparency(guest, allow));
            }
            ManagerCommand::SetUserAgentOverride { guest, user_agent, reply } => {
                let _ = reply.send(self.set_user_agent_override(guest, &user_agent));
            }
            ManagerCommand::Go { guest, offset, reply } => {
                let _ = reply.send(self.go(guest, offset));
            }
            ManagerCommand::Reload { guest, reply } => {
                let _ = reply.send(self.reload(guest));
            }
            ManagerCommand::Stop { guest, reply } => {
                let _ = reply.send(self.stop(guest));
            }
            ManagerCommand::Terminate { guest, reply } => {
                let _ = reply.send(self.terminate(guest));
            }
            ManagerCommand::LoadDataWithBaseUrl { guest, data_url, base_url, virtual_url, reply } => {
                let _ = reply.send(self.load_data_with_base_url(guest, &data_url, &base_url, &virtual_url));
            }
            ManagerCommand::Guest { guest, reply } => {
                let _ = reply.send(self.guest(guest).map(|g| g.snapshot()));
            }
            ManagerCommand::RoutingTable { reply } => {
                let _ = reply.send(self.routing_table());
            }
            ManagerCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

async fn next_installed(rx: &mut Option<mpsc::UnboundedReceiver<RoutingId>>) -> Option<RoutingId> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running [`GuestViewManager`]
#[derive(Clone)]
pub struct GuestViewHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
    cancel: CancellationToken,
}

impl GuestViewHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T, GuestViewError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).await.map_err(|_| GuestViewError::ChannelClosed)?;
        rx.await.map_err(|_| GuestViewError::ChannelClosed)
    }

    pub async fn register_embedder(
        &self,
        process_id: u32,
        owner_id: impl Into<String>,
        url: Url,
    ) -> Result<(EmbedderId, EventStream)> {
        let owner_id = owner_id.into();
        Ok(self
            .call(|reply| ManagerCommand::RegisterEmbedder { process_id, owner_id, url, reply })
            .await?)
    }

    pub async fn set_embedder_url(&self, embedder: EmbedderId, url: Url) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::SetEmbedderUrl { embedder, url, reply }).await??)
    }

    pub async fn add_intercept_listener(
        &self,
        embedder: EmbedderId,
        view_instance_id: u32,
        event: impl Into<String>,
        sub_event_name: impl Into<String>,
    ) -> Result<()> {
        let (event, sub_event_name) = (event.into(), sub_event_name.into());
        Ok(self
            .call(|reply| ManagerCommand::AddInterceptListener { embedder, view_instance_id, event, sub_event_name, reply })
            .await??)
    }

    pub async fn destroy_embedder(&self, embedder: EmbedderId) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::DestroyEmbedder { embedder, reply }).await??)
    }

    pub async fn create_guest(&self, owner: EmbedderId, params: ParamBag) -> Result<GuestInstanceId> {
        Ok(self.call(|reply| ManagerCommand::CreateGuest { owner, params, reply }).await??)
    }

    pub async fn attach(&self, guest: GuestInstanceId, embedder: EmbedderId, params: ParamBag) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::Attach { guest, embedder, params, reply }).await??)
    }

    pub async fn navigate(&self, guest: GuestInstanceId, target: impl Into<String>, force_reload: bool) -> Result<bool> {
        let target = target.into();
        Ok(self
            .call(|reply| ManagerCommand::Navigate { guest, target, force_reload, reply })
            .await??)
    }

    pub async fn destroy_guest(&self, guest: GuestInstanceId) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::DestroyGuest { guest, reply }).await??)
    }

    pub async fn new_window(
        &self,
        opener: GuestInstanceId,
        request: NewWindowRequest,
    ) -> Result<(GuestInstanceId, PermissionTicket)> {
        Ok(self.call(|reply| ManagerCommand::NewWindow { opener, request, reply }).await??)
    }

    pub async fn open_url_from_guest(
        &self,
        guest: GuestInstanceId,
        url: Url,
        disposition: WindowOpenDisposition,
    ) -> Result<Option<GuestInstanceId>> {
        Ok(self
            .call(|reply| ManagerCommand::OpenUrl { guest, url, disposition, reply })
            .await??)
    }

    pub async fn notify(&self, guest: GuestInstanceId, notification: GuestNotification) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::Notify { guest, notification, reply }).await??)
    }

    pub async fn request_permission(
        &self,
        guest: GuestInstanceId,
        kind: PermissionKind,
        params: EventArgs,
        default_allowed: bool,
    ) -> Result<PermissionTicket> {
        Ok(self
            .call(|reply| ManagerCommand::RequestPermission { guest, kind, params, default_allowed, reply })
            .await??)
    }

    pub async fn request_clear_data(
        &self,
        guest: GuestInstanceId,
        since: SystemTime,
        mask: RemovalMask,
    ) -> Result<PermissionTicket> {
        Ok(self
            .call(|reply| ManagerCommand::RequestClearData { guest, since, mask, reply })
            .await??)
    }

    pub async fn respond_to_permission(&self, id: RequestId, response: PermissionResponse) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::RespondToPermission { id, response, reply }).await??)
    }

    pub async fn set_name(&self, guest: GuestInstanceId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        Ok(self.call(|reply| ManagerCommand::SetName { guest, name, reply }).await??)
    }

    pub async fn set_zoom(&self, guest: GuestInstanceId, factor: f64) -> Result<bool> {
        Ok(self.call(|reply| ManagerCommand::SetZoom { guest, factor, reply }).await??)
    }

    pub async fn set_allow_transparency(&self, guest: GuestInstanceId, allow: bool) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::SetAllowTransparency { guest, allow, reply }).await??)
    }

    pub async fn set_user_agent_override(&self, guest: GuestInstanceId, user_agent: impl Into<String>) -> Result<()> {
        let user_agent = user_agent.into();
        Ok(self
            .call(|reply| ManagerCommand::SetUserAgentOverride { guest, user_agent, reply })
            .await??)
    }

    pub async fn go(&self, guest: GuestInstanceId, offset: i32) -> Result<bool> {
        Ok(self.call(|reply| ManagerCommand::Go { guest, offset, reply }).await??)
    }

    pub async fn reload(&self, guest: GuestInstanceId) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::Reload { guest, reply }).await??)
    }

    pub async fn stop(&self, guest: GuestInstanceId) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::Stop { guest, reply }).await??)
    }

    pub async fn terminate(&self, guest: GuestInstanceId) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::Terminate { guest, reply }).await??)
    }

    pub async fn load_data_with_base_url(
        &self,
        guest: GuestInstanceId,
        data_url: impl Into<String>,
        base_url: impl Into<String>,
        virtual_url: impl Into<String>,
    ) -> Result<()> {
        let (data_url, base_url, virtual_url) = (data_url.into(), base_url.into(), virtual_url.into());
        Ok(self
            .call(|reply| ManagerCommand::LoadDataWithBaseUrl { guest, data_url, base_url, virtual_url, reply })
            .await??)
    }

    pub async fn guest(&self, guest: GuestInstanceId) -> Result<Option<GuestSnapshot>> {
        Ok(self.call(|reply| ManagerCommand::Guest { guest, reply }).await?)
    }

    pub async fn routing_table(&self) -> Result<RoutingTable> {
        Ok(self.call(|reply| ManagerCommand::RoutingTable { reply }).await?)
    }

    /// Shuts the manager down and waits until it has done so.
    pub async fn shutdown(&self) -> Result<()> {
        Ok(self.call(|reply| ManagerCommand::Shutdown { reply }).await?)
    }

    /// Stops the control loop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guestview::events::{EventName, keys};
    use crate::guestview::guest::GuestState;
    use crate::guestview::params::{PARAM_PARTITION_ID, PARAM_SRC};
    use crate::guestview::permission::DecisionSource;
    use crate::guestview::testing::{init_logger, RecordingHost};
    use crate::guestview::GuestViewConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn start_manager(config: GuestViewConfig) -> (GuestViewHandle, JoinHandle<()>, Arc<RecordingHost>) {
        init_logger();
        let host = Arc::new(RecordingHost::default());
        let manager = GuestViewManager::builder()
            .config(config)
            .content_host(host.clone())
            .build()
            .unwrap();
        let (handle, join) = manager.start();
        (handle, join, host)
    }

    #[tokio::test]
    async fn attach_through_handle() {
        let (handle, join, host) = start_manager(GuestViewConfig::default());

        let (embedder, mut events) = handle
            .register_embedder(10, "app", url("https://app.example/index.html"))
            .await
            .unwrap();
        let guest = handle
            .create_guest(embedder, ParamBag::new().with(PARAM_PARTITION_ID, "persist:work"))
            .await
            .unwrap();
        host.watch_routing(handle.routing_table().await.unwrap());
        handle
            .attach(guest, embedder, ParamBag::new().with(PARAM_SRC, "https://example.test/a"))
            .await
            .unwrap();

        let snapshot = handle.guest(guest).await.unwrap().unwrap();
        assert_eq!(snapshot.state, GuestState::Attached);
        assert_eq!(snapshot.partition.name, "work");
        assert!(snapshot.partition.persistent);
        assert_eq!(snapshot.src, Some(url("https://example.test/a")));

        assert_eq!(events.recv().await.unwrap().name, EventName::FrameNameChanged);
        let load_start = events.recv().await.unwrap();
        assert_eq!(load_start.name, EventName::LoadStart);
        assert_eq!(load_start.args.get_str(keys::URL), Some("https://example.test/a"));

        // the load is issued by the control loop once the routing entry is applied
        tokio::time::timeout(Duration::from_secs(5), async {
            while host.loaded_urls(guest).is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(host.loaded_urls(guest), vec![url("https://example.test/a")]);
        assert_eq!(host.routing_at_load(), vec![(guest, 1)]);

        handle.shutdown().await.unwrap();
        join.await.unwrap();
        assert!(handle.create_guest(embedder, ParamBag::new()).await.is_err());
    }

    #[test]
    fn shutdown_command_breaks_the_loop() {
        init_logger();
        let mut manager = GuestViewManager::builder().build().unwrap();

        let (reply, _table) = oneshot::channel();
        assert!(manager.handle_command(ManagerCommand::RoutingTable { reply }).is_continue());

        let (reply, done) = oneshot::channel();
        assert!(manager.handle_command(ManagerCommand::Shutdown { reply }).is_break());
        assert!(done.blocking_recv().is_ok());
    }

    #[tokio::test]
    async fn errors_travel_back_to_caller() {
        let (handle, join, _host) = start_manager(GuestViewConfig::default());

        let err = handle.navigate(GuestInstanceId(99), "https://example.test/", false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GuestViewError>(),
            Some(GuestViewError::GuestNotFound(GuestInstanceId(99)))
        ));

        handle.cancel();
        join.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn ticker_expires_permission_requests() {
        let config = GuestViewConfig::builder()
            .permission_timeout(Duration::from_millis(20))
            .tick_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        let (handle, join, _host) = start_manager(config);

        let (embedder, _events) = handle
            .register_embedder(10, "app", url("https://app.example/"))
            .await
            .unwrap();
        let guest = handle.create_guest(embedder, ParamBag::new()).await.unwrap();
        handle.attach(guest, embedder, ParamBag::new()).await.unwrap();

        let ticket = handle
            .request_permission(guest, PermissionKind::Media, EventArgs::new(), true)
            .await
            .unwrap();
        let decision = tokio::time::timeout(Duration::from_secs(5), ticket.decision())
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::TimedOut);

        handle.shutdown().await.unwrap();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn routing_table_follows_attachment() {
        let (handle, join, _host) = start_manager(GuestViewConfig::default());

        let (embedder, _events) = handle
            .register_embedder(10, "app", url("https://app.example/"))
            .await
            .unwrap();
        let guest = handle.create_guest(embedder, ParamBag::new()).await.unwrap();
        let routing_id = handle.guest(guest).await.unwrap().unwrap().routing_id;
        let table = handle.routing_table().await.unwrap();

        handle.attach(guest, embedder, ParamBag::new()).await.unwrap();
        handle.destroy_guest(guest).await.unwrap();

        // shutting down drains the replica thread
        handle.shutdown().await.unwrap();
        join.await.unwrap();
        assert!(table.lookup(routing_id).is_none());
    }
}
