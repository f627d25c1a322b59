use futures::StreamExt;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex},
    task::{AbortHandle, JoinHandle},
    time::{interval, sleep, timeout, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    ble::BleConnector,
    error::{GreenhouseError, Result},
    link::{Connector, Link, LinkSerializer, NotificationStream},
    protocol::{Request, Response},
    reconcile::reconcile,
    types::{ConnectionState, Information, SessionConfig, Settings, Values},
};

/// Controller for one greenhouse monitor
///
/// `GreenhouseSession` owns the link to the device and everything retained from
/// it. It drives the connection lifecycle, primes telemetry on connect, polls
/// sensor values while connected, and routes inbound notifications to the
/// retained settings, values and information. All writes go through a
/// [`LinkSerializer`] so the device never sees overlapping or back-to-back writes.
///
/// Lifecycle calls are non-blocking: [`connect`](Self::connect) and
/// [`disconnect`](Self::disconnect) return a [`JoinHandle`] and report progress
/// through [`connection_state`](Self::connection_state).
///
/// # Retained data
///
/// Settings, values and information survive a disconnect so they can still be
/// displayed. Set [`SessionConfig::clear_on_disconnect`] or call
/// [`clear_retained`](Self::clear_retained) to reset them.
///
/// # Examples
///
/// ```no_run
/// use invernadero::GreenhouseSession;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = GreenhouseSession::ble().await?;
///     let mut state = session.connection_state();
///
///     session.connect("98:D3:31:F5:2A:10");
///     state.wait_for(|s| s.is_connected()).await?;
///
///     let mut values = session.current_values();
///     values.changed().await?;
///     println!("Temperature: {:.1} C", values.borrow().temperature);
///
///     session.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct GreenhouseSession {
    shared: Arc<Shared>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    state: watch::Sender<ConnectionState>,
    values: watch::Sender<Values>,
    settings: watch::Sender<Settings>,
    information: watch::Sender<Information>,
    device: Mutex<Option<DeviceHandle>>,
    tasks: StdMutex<SessionTasks>,
    epoch: AtomicU64,
    reconnect_armed: AtomicBool,
}

/// The connected device; replaced on every successful connect
struct DeviceHandle {
    address: String,
    epoch: u64,
    serializer: Arc<LinkSerializer>,
}

#[derive(Default)]
struct SessionTasks {
    connect: Option<AbortHandle>,
    notifications: Option<AbortHandle>,
    poll: Option<AbortHandle>,
    reconnect: Option<AbortHandle>,
}

impl GreenhouseSession {
    /// Create a session on `connector` with the default configuration
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, SessionConfig::default())
    }

    /// Create a session on `connector` with a custom configuration
    #[must_use]
    pub fn with_config(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                state: watch::Sender::new(ConnectionState::Disconnected),
                values: watch::Sender::new(Values::default()),
                settings: watch::Sender::new(Settings::default()),
                information: watch::Sender::new(Information::default()),
                device: Mutex::new(None),
                tasks: StdMutex::new(SessionTasks::default()),
                epoch: AtomicU64::new(0),
                reconnect_armed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a session on the platform Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`GreenhouseError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn ble() -> Result<Self> {
        let connector = BleConnector::new().await?;
        Ok(Self::new(Arc::new(connector)))
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Start connecting to the device at `address`
    ///
    /// Only acts from [`ConnectionState::Disconnected`]; otherwise the call is
    /// logged and ignored. A pending automatic reconnect is cancelled. Failures
    /// never surface here: the session falls back to `Disconnected`.
    ///
    /// The returned handle completes once the attempt has settled.
    pub fn connect(&self, address: impl Into<String>) -> JoinHandle<()> {
        self.shared.cancel_reconnect();
        self.shared.reconnect_armed.store(true, Ordering::SeqCst);
        Arc::clone(&self.shared).start_connect(address.into(), 0)
    }

    /// Start disconnecting
    ///
    /// Always ends in [`ConnectionState::Disconnected`], even if the link is
    /// already gone or the platform disconnect fails. Cancels polling and any
    /// pending automatic reconnect.
    pub fn disconnect(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let began = shared.begin_disconnect();

        tokio::spawn(async move {
            if let Some(epoch) = began {
                shared.finish_disconnect(epoch).await;
            }
        })
    }

    /// Send new settings to the device
    ///
    /// Returns once the write has gone out. The device confirms asynchronously and
    /// [`current_settings`](Self::current_settings) changes when it does.
    ///
    /// # Errors
    ///
    /// Returns [`GreenhouseError::InvalidParameters`] if the settings fail
    /// validation, [`GreenhouseError::NotConnected`] without an active link, or
    /// the link's error if the write fails.
    pub async fn set_settings(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        self.shared.send_request(&Request::SetSettings(settings)).await
    }

    /// Ask the device for a fresh sensor sample
    ///
    /// # Errors
    ///
    /// Returns [`GreenhouseError::NotConnected`] without an active link, or the
    /// link's error if the write fails.
    pub async fn request_values_refresh(&self) -> Result<()> {
        self.shared.send_request(&Request::ReadValues).await
    }

    /// Ask the device for its current settings
    ///
    /// # Errors
    ///
    /// Returns [`GreenhouseError::NotConnected`] without an active link, or the
    /// link's error if the write fails.
    pub async fn request_settings_refresh(&self) -> Result<()> {
        self.shared.send_request(&Request::ReadSettings).await
    }

    /// Ask the device for its error counters
    ///
    /// # Errors
    ///
    /// Returns [`GreenhouseError::NotConnected`] without an active link, or the
    /// link's error if the write fails.
    pub async fn request_information_refresh(&self) -> Result<()> {
        self.shared.send_request(&Request::ReadInformation).await
    }

    /// Subscribe to connection state changes
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to the reconciled sensor values
    #[must_use]
    pub fn current_values(&self) -> watch::Receiver<Values> {
        self.shared.values.subscribe()
    }

    /// Subscribe to the last known device settings
    #[must_use]
    pub fn current_settings(&self) -> watch::Receiver<Settings> {
        self.shared.settings.subscribe()
    }

    /// Subscribe to the last known error counters
    #[must_use]
    pub fn current_information(&self) -> watch::Receiver<Information> {
        self.shared.information.subscribe()
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Address of the connected device
    pub async fn address(&self) -> Option<String> {
        self.shared
            .device
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.address.clone())
    }

    /// Reset retained settings, values and information to their defaults
    pub fn clear_retained(&self) {
        self.shared.clear_retained();
    }
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, SessionTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.tasks().reconnect.take() {
            task.abort();
        }
    }

    fn abort_link_tasks(&self) {
        let mut tasks = self.tasks();
        for task in [tasks.notifications.take(), tasks.poll.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }

    fn clear_retained(&self) {
        self.values.send_replace(Values::default());
        self.settings.send_replace(Settings::default());
        self.information.send_replace(Information::default());
    }

    /// Move the state from `from` to `to`; `false` if it has already moved on
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn start_connect(self: Arc<Self>, address: String, retry: u32) -> JoinHandle<()> {
        if !self.transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
            info!(
                "Ignoring connect to {}: session is {}",
                address,
                *self.state.borrow()
            );
            return tokio::spawn(async {});
        }

        info!("Connecting to {}...", address);
        let task = tokio::spawn(Arc::clone(&self).run_connect(address, retry));
        self.tasks().connect = Some(task.abort_handle());
        task
    }

    async fn run_connect(self: Arc<Self>, address: String, retry: u32) {
        let (serializer, epoch) = match self.establish(&address).await {
            Ok(Some(established)) => established,
            Ok(None) => return,
            Err(error) => {
                warn!("Connection to {} failed: {}", address, error);
                if self.transition(ConnectionState::Connecting, ConnectionState::Disconnected) {
                    self.schedule_reconnect(address, retry + 1);
                }
                return;
            }
        };

        for request in [Request::ReadInformation, Request::ReadSettings] {
            if let Err(error) = self.write_request(&serializer, epoch, &request).await {
                warn!("Priming {} failed: {}", request.operation_type(), error);
                return;
            }
        }

        let device = self.device.lock().await;
        if device.as_ref().map(|handle| handle.epoch) == Some(epoch) {
            let poll = tokio::spawn(Arc::clone(&self).poll_values(serializer, epoch));
            self.tasks().poll = Some(poll.abort_handle());
        }
    }

    /// Open the link and publish it as the session's device
    ///
    /// `Ok(None)` means a disconnect overtook the attempt; the new link has
    /// already been released. Until it is published the link sits in a
    /// [`PendingLink`], so an aborted attempt still releases it.
    async fn establish(
        self: &Arc<Self>,
        address: &str,
    ) -> Result<Option<(Arc<LinkSerializer>, u64)>> {
        let timeout_ms = self.config.connect_timeout_ms;
        let link = timeout(
            Duration::from_millis(timeout_ms),
            self.connector.connect(address),
        )
        .await
        .map_err(|_| GreenhouseError::Timeout { timeout_ms })??;
        let pending = PendingLink::new(link, address, self.config.disconnect_timeout_ms);

        let stream = match pending.link().notifications().await {
            Ok(stream) => stream,
            Err(error) => {
                pending.release().await;
                return Err(error);
            }
        };

        let mut device = self.device.lock().await;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
            drop(device);
            info!("Connect to {} was cancelled", address);
            pending.release().await;
            return Ok(None);
        }

        let serializer = Arc::new(LinkSerializer::new(
            pending.publish(),
            self.config.settle_delay(),
        ));
        *device = Some(DeviceHandle {
            address: address.to_string(),
            epoch,
            serializer: Arc::clone(&serializer),
        });
        let consumer = tokio::spawn(Arc::clone(self).consume_notifications(stream, epoch));
        self.tasks().notifications = Some(consumer.abort_handle());
        drop(device);

        info!("Connected to {}", address);
        Ok(Some((serializer, epoch)))
    }

    async fn send_request(self: &Arc<Self>, request: &Request) -> Result<()> {
        if !self.state.borrow().is_connected() {
            return Err(GreenhouseError::NotConnected);
        }

        let (serializer, epoch) = {
            let device = self.device.lock().await;
            let handle = device.as_ref().ok_or(GreenhouseError::NotConnected)?;
            (Arc::clone(&handle.serializer), handle.epoch)
        };

        self.write_request(&serializer, epoch, request).await
    }

    /// Write a request; a connection failure also tears the link down
    async fn write_request(
        self: &Arc<Self>,
        serializer: &LinkSerializer,
        epoch: u64,
        request: &Request,
    ) -> Result<()> {
        let result = serializer.send(&request.to_bytes()).await;

        if let Err(error) = &result {
            if error.is_connection_error() {
                warn!("Write of {} failed: {}", request.operation_type(), error);
                tokio::spawn(Arc::clone(self).link_lost(epoch));
            }
        }

        result
    }

    async fn poll_values(self: Arc<Self>, serializer: Arc<LinkSerializer>, epoch: u64) {
        let mut state = self.state.subscribe();
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = state.wait_for(|s| !s.is_connected()) => break,
            }

            if !serializer.link().is_connected().await {
                warn!("Platform reports the link down");
                tokio::spawn(Arc::clone(&self).link_lost(epoch));
                break;
            }

            let request = Request::ReadValues;
            if let Err(error) = self.write_request(&serializer, epoch, &request).await {
                if error.is_connection_error() {
                    break;
                }
                warn!("Periodic values request failed: {}", error);
            }
        }

        debug!("Stopped polling values");
    }

    async fn consume_notifications(self: Arc<Self>, mut stream: NotificationStream, epoch: u64) {
        while let Some(payload) = stream.next().await {
            self.handle_notification(&payload);
        }

        info!("Notification stream ended");
        tokio::spawn(Arc::clone(&self).link_lost(epoch));
    }

    fn handle_notification(&self, payload: &[u8]) {
        match Response::from_bytes(payload) {
            Ok(Response::Values(sample)) => {
                let held = sample.faulty_channels();
                if !held.is_empty() {
                    debug!("Holding previous readings for {:?}", held);
                }
                self.values
                    .send_modify(|current| *current = reconcile(sample, *current));
            }
            Ok(Response::Settings(settings)) => {
                debug!("Received settings: {:?}", settings);
                self.settings.send_replace(settings);
            }
            Ok(Response::Information(information)) => {
                if information.has_errors() {
                    info!(
                        "Device reports {} sensor errors",
                        information.total_errors()
                    );
                }
                self.information.send_replace(information);
            }
            Ok(Response::SettingsAcknowledged) => debug!("Device acknowledged settings"),
            Ok(Response::Invalid) => debug!("Dropping unrecognized frame: {:02X?}", payload),
            Err(error) => warn!("Dropping undecodable frame ({}): {:02X?}", error, payload),
        }
    }

    /// Tear down the link with the given epoch after it failed
    async fn link_lost(self: Arc<Self>, epoch: u64) {
        let handle = {
            let mut device = self.device.lock().await;
            if device.as_ref().map(|handle| handle.epoch) != Some(epoch) {
                return;
            }
            self.abort_link_tasks();
            self.transition(ConnectionState::Connected, ConnectionState::Disconnecting);
            device.take()
        };
        let Some(handle) = handle else {
            return;
        };

        warn!("Lost link to {}", handle.address);
        self.release_link(handle.serializer.link().as_ref(), &handle.address)
            .await;

        if !self.settle_disconnected() {
            return;
        }
        info!("Disconnected from {}", handle.address);

        self.schedule_reconnect(handle.address, 1);
    }

    /// Start a user disconnect, returning the epoch of the link it targets
    fn begin_disconnect(&self) -> Option<u64> {
        self.reconnect_armed.store(false, Ordering::SeqCst);
        self.cancel_reconnect();

        let began = self.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                *state = ConnectionState::Disconnecting;
                true
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => false,
        });
        if !began {
            return None;
        }

        if let Some(task) = self.tasks().connect.take() {
            task.abort();
        }
        Some(self.epoch.load(Ordering::SeqCst))
    }

    /// Release the link with `epoch` and settle in `Disconnected`
    ///
    /// A newer link, or a state that has moved on since the disconnect began,
    /// is left alone.
    async fn finish_disconnect(&self, epoch: u64) {
        let handle = {
            let mut device = self.device.lock().await;
            if device.as_ref().map(|handle| handle.epoch) == Some(epoch) {
                self.abort_link_tasks();
                device.take()
            } else {
                None
            }
        };

        if let Some(handle) = handle {
            info!("Disconnecting from {}...", handle.address);
            self.release_link(handle.serializer.link().as_ref(), &handle.address)
                .await;
        }

        if self.settle_disconnected() {
            info!("Disconnected");
        } else {
            debug!("Disconnect overtaken by a newer connection");
        }
    }

    /// `Disconnecting` to `Disconnected`, clearing retained data if configured
    fn settle_disconnected(&self) -> bool {
        if self.config.clear_on_disconnect
            && *self.state.borrow() == ConnectionState::Disconnecting
        {
            self.clear_retained();
        }
        self.transition(ConnectionState::Disconnecting, ConnectionState::Disconnected)
    }

    async fn release_link(&self, link: &dyn Link, address: &str) {
        release_link(link, address, self.config.disconnect_timeout_ms).await;
    }

    fn schedule_reconnect(self: &Arc<Self>, address: String, retry: u32) {
        if !self.config.auto_reconnect || !self.reconnect_armed.load(Ordering::SeqCst) {
            return;
        }
        if retry > self.config.max_reconnect_attempts {
            warn!(
                "Giving up on {} after {} reconnect attempts",
                address, self.config.max_reconnect_attempts
            );
            return;
        }

        let delay = self.config.reconnect_delay(retry);
        info!(
            "Reconnecting to {} in {}ms (attempt {}/{})",
            address,
            delay.as_millis(),
            retry,
            self.config.max_reconnect_attempts
        );

        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            sleep(delay).await;
            drop(shared.start_connect(address, retry));
        });

        if let Some(previous) = self.tasks().reconnect.replace(task.abort_handle()) {
            previous.abort();
        }
    }
}

/// Platform disconnect, bounded and with errors swallowed
async fn release_link(link: &dyn Link, address: &str, timeout_ms: u64) {
    match timeout(Duration::from_millis(timeout_ms), link.disconnect()).await {
        Ok(Ok(())) => debug!("Released link to {}", address),
        Ok(Err(error)) => warn!("Ignoring disconnect error from {}: {}", address, error),
        Err(_) => warn!(
            "Disconnect from {} timed out after {}ms",
            address, timeout_ms
        ),
    }
}

/// A freshly opened link that is not yet the session's device
///
/// Dropping it without [`publish`](Self::publish) releases the link on a
/// background task, which covers a connect attempt aborted mid-setup.
struct PendingLink {
    link: Arc<dyn Link>,
    address: String,
    timeout_ms: u64,
    armed: bool,
}

impl PendingLink {
    fn new(link: Arc<dyn Link>, address: &str, timeout_ms: u64) -> Self {
        Self {
            link,
            address: address.to_string(),
            timeout_ms,
            armed: true,
        }
    }

    fn link(&self) -> &dyn Link {
        self.link.as_ref()
    }

    /// Hand the link over to the session
    fn publish(mut self) -> Arc<dyn Link> {
        self.armed = false;
        Arc::clone(&self.link)
    }

    async fn release(mut self) {
        release_link(self.link.as_ref(), &self.address, self.timeout_ms).await;
        self.armed = false;
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        info!("Releasing link to {} after an aborted connect", self.address);
        let link = Arc::clone(&self.link);
        let address = std::mem::take(&mut self.address);
        let timeout_ms = self.timeout_ms;
        runtime.spawn(async move {
            release_link(link.as_ref(), &address, timeout_ms).await;
        });
    }
}

impl Drop for GreenhouseSession {
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            drop(self.disconnect());
        }
    }
}
