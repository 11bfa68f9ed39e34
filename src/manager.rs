//! Runs every host-facing operation on one dedicated worker thread.
//!
//! Public methods enqueue a request and return immediately. Outcomes come
//! back as [`Event`]s on the receiver handed out when the manager starts.
//! Requests are handled strictly one after another, so no two privileged
//! commands or file rewrites ever overlap. The VPN poll shares the same
//! loop and is dropped as soon as a new VPN request or a cancel arrives.

use crate::config::{AppConfig, ProxySettingsRecord, load_config_from, save_config_to};
use crate::error::{ErrorEvent, ManagerError, Result};
use crate::net::backend::interfaces::copy_into_place;
use crate::net::backend::{NetworkBackend, platform_backend};
use crate::net::interfaces_file;
use crate::net::network::{
    InterfaceQuery, SystemInterfaces, address_map, find_index, has_point_to_point,
};
use crate::net::runner::PrivilegedRunner;
use crate::net::types::NetworkConfiguration;
use crate::net::validation::validate_configuration;
use crate::net::verify::{RetryPolicy, verify_with_retry};
use crate::proxy::{ProxyContext, ProxySettings};
use crate::vpn::{VpnControl, VpnDirection, VpnMachine, VpnOutcome, VpnState};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const WORKER_THREAD_NAME: &str = "hostnet-worker";

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    InterfacesFetched(Vec<String>),
    ConfigurationFetched(NetworkConfiguration),
    ConfigurationWritten,
    PasswordChecked(bool),
    ProxyFetched(ProxySettings, Vec<String>),
    ProxyWritten,
    VpnConfigurationFetched(String),
    VpnConfigurationWritten,
    VpnTurnedOn,
    VpnTurnedOff,
    Error(ErrorEvent),
}

enum Request {
    CheckPassword {
        password: String,
    },
    FetchInterfaces,
    FetchConfiguration {
        adapter: String,
    },
    WriteConfiguration {
        desired: NetworkConfiguration,
        password: String,
    },
    FetchProxy,
    WriteProxy {
        settings: ProxySettings,
        excludes: Vec<String>,
    },
    FetchVpnConfiguration,
    WriteVpnConfiguration {
        contents: String,
        password: String,
    },
    Vpn {
        direction: VpnDirection,
        password: String,
    },
    CancelVpn,
    ProbeVpn {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Collaborators the worker is built from.
pub struct ManagerParts {
    pub backend: Box<dyn NetworkBackend>,
    pub query: Arc<dyn InterfaceQuery>,
    pub runner: PrivilegedRunner,
    pub copy_command: String,
    pub vpn: VpnControl,
    pub retry: RetryPolicy,
    pub settings_path: PathBuf,
    pub proxy: Arc<ProxyContext>,
}

impl ManagerParts {
    pub fn from_config(config: &AppConfig, settings_path: PathBuf) -> Self {
        let runner = PrivilegedRunner::new(
            config.network.runner_config(),
            config.network.elevation.clone(),
        );
        let backend = platform_backend(&config.network, runner.clone());
        let retry = config.network.retry_policy(backend.default_retry_policy());
        let (proxy_settings, excludes) = config.proxy.to_settings();

        Self {
            backend,
            query: Arc::new(SystemInterfaces),
            runner,
            copy_command: config.network.copy_command.clone(),
            vpn: config.vpn.control(),
            retry,
            settings_path,
            proxy: Arc::new(ProxyContext::new(proxy_settings, excludes)),
        }
    }
}

pub struct NetworkConfigurationManager {
    requests: mpsc::UnboundedSender<Request>,
    worker: Option<thread::JoinHandle<()>>,
    query: Arc<dyn InterfaceQuery>,
    proxy: Arc<ProxyContext>,
    supported: bool,
    password_supported: bool,
}

impl NetworkConfigurationManager {
    /// Starts the worker for the host platform. `settings_path` is where
    /// proxy changes are persisted.
    pub fn start(
        config: &AppConfig,
        settings_path: PathBuf,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>)> {
        Self::with_parts(ManagerParts::from_config(config, settings_path))
    }

    pub fn with_parts(parts: ManagerParts) -> Result<(Self, mpsc::UnboundedReceiver<Event>)> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let supported = parts.backend.supported();
        let password_supported = parts.backend.password_supported();
        let query = Arc::clone(&parts.query);
        let proxy = Arc::clone(&parts.proxy);

        let worker = Worker::new(parts, event_tx);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run(request_rx))
            .map_err(|e| ManagerError::WorkerUnavailable(e.to_string()))?;

        Ok((
            Self {
                requests: request_tx,
                worker: Some(handle),
                query,
                proxy,
                supported,
                password_supported,
            },
            event_rx,
        ))
    }

    fn submit(&self, request: Request) {
        if self.requests.send(request).is_err() {
            warn!("Network worker is not running, request dropped");
        }
    }

    pub fn supported(&self) -> bool {
        self.supported
    }

    pub fn password_supported(&self) -> bool {
        self.password_supported
    }

    pub fn proxy_context(&self) -> Arc<ProxyContext> {
        Arc::clone(&self.proxy)
    }

    pub fn check_password(&self, password: impl Into<String>) {
        self.submit(Request::CheckPassword {
            password: password.into(),
        });
    }

    pub fn fetch_network_interfaces(&self) {
        self.submit(Request::FetchInterfaces);
    }

    pub fn fetch_network_configuration(&self, adapter: impl Into<String>) {
        self.submit(Request::FetchConfiguration {
            adapter: adapter.into(),
        });
    }

    pub fn write_network_configuration(
        &self,
        desired: NetworkConfiguration,
        password: impl Into<String>,
    ) {
        self.submit(Request::WriteConfiguration {
            desired,
            password: password.into(),
        });
    }

    pub fn fetch_proxy(&self) {
        self.submit(Request::FetchProxy);
    }

    pub fn write_proxy(&self, settings: ProxySettings, excludes: Vec<String>) {
        self.submit(Request::WriteProxy { settings, excludes });
    }

    pub fn fetch_vpn_configuration(&self) {
        self.submit(Request::FetchVpnConfiguration);
    }

    pub fn write_vpn_configuration(&self, contents: impl Into<String>, password: impl Into<String>) {
        self.submit(Request::WriteVpnConfiguration {
            contents: contents.into(),
            password: password.into(),
        });
    }

    pub fn turn_vpn_on(&self, password: impl Into<String>) {
        self.submit(Request::Vpn {
            direction: VpnDirection::Start,
            password: password.into(),
        });
    }

    pub fn turn_vpn_off(&self, password: impl Into<String>) {
        self.submit(Request::Vpn {
            direction: VpnDirection::Stop,
            password: password.into(),
        });
    }

    pub fn cancel_vpn(&self) {
        self.submit(Request::CancelVpn);
    }

    /// Blocks until the worker answers whether the VPN service can be driven.
    ///
    /// Must not be called from inside an async runtime.
    pub fn vpn_control_supported(&self) -> bool {
        let (reply, answer) = oneshot::channel();
        self.submit(Request::ProbeVpn { reply });
        answer.blocking_recv().unwrap_or(false)
    }

    /// Interface name to its non-loopback addresses. Read-only, so it is
    /// answered on the calling thread.
    pub fn addresses(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(address_map(&self.query.interfaces()?))
    }

    /// Stops the worker after the requests already queued and waits for it.
    pub fn shutdown(mut self) {
        self.submit(Request::Shutdown);
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            error!("Network worker panicked");
        }
    }
}

impl Drop for NetworkConfigurationManager {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
    }
}

struct Worker {
    backend: Box<dyn NetworkBackend>,
    query: Arc<dyn InterfaceQuery>,
    runner: PrivilegedRunner,
    copy_command: String,
    vpn: VpnControl,
    machine: VpnMachine,
    poll: Option<Interval>,
    retry: RetryPolicy,
    settings_path: PathBuf,
    proxy: Arc<ProxyContext>,
    events: mpsc::UnboundedSender<Event>,
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Worker {
    fn new(parts: ManagerParts, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            backend: parts.backend,
            query: parts.query,
            runner: parts.runner,
            copy_command: parts.copy_command,
            machine: VpnMachine::new(parts.vpn.timeout),
            vpn: parts.vpn,
            poll: None,
            retry: parts.retry,
            settings_path: parts.settings_path,
            proxy: parts.proxy,
            events,
        }
    }

    fn run(mut self, requests: mpsc::UnboundedReceiver<Request>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.emit(Err(ManagerError::WorkerUnavailable(e.to_string())));
                return;
            }
        };
        runtime.block_on(self.serve(requests));
        debug!("Network worker stopped");
    }

    async fn serve(&mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    None | Some(Request::Shutdown) => break,
                    Some(request) => self.handle(request).await,
                },
                _ = next_tick(&mut self.poll) => self.poll_vpn(),
            }
        }
    }

    fn send(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn emit(&self, result: Result<Event>) {
        match result {
            Ok(event) => self.send(event),
            Err(e) => {
                match &e {
                    ManagerError::CommandFailed { output, .. } => {
                        error!(code = e.error_code(), output = %output, "{}", e)
                    }
                    ManagerError::VerificationMismatch(fields) => {
                        error!(code = e.error_code(), mismatches = fields.len(), "{}", e)
                    }
                    _ => error!(code = e.error_code(), "{}", e),
                }
                self.send(Event::Error(e.to_event()));
            }
        }
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::CheckPassword { password } => {
                let result = self.backend.check_password(&password).await;
                self.emit(result.map(Event::PasswordChecked));
            }
            Request::FetchInterfaces => {
                let result = self.fetch_interfaces().await;
                self.emit(result.map(Event::InterfacesFetched));
            }
            Request::FetchConfiguration { adapter } => {
                let result = self.read_configuration(&adapter).await;
                self.emit(result.map(Event::ConfigurationFetched));
            }
            Request::WriteConfiguration { desired, password } => {
                let result = self.write_configuration(&desired, &password).await;
                self.emit(result.map(|_| Event::ConfigurationWritten));
            }
            Request::FetchProxy => {
                let policy = self.proxy.policy();
                self.send(Event::ProxyFetched(
                    policy.settings().clone(),
                    policy.excludes().to_vec(),
                ));
            }
            Request::WriteProxy { settings, excludes } => {
                let result = self.write_proxy(settings, excludes);
                self.emit(result.map(|_| Event::ProxyWritten));
            }
            Request::FetchVpnConfiguration => {
                let result = interfaces_file::read_file(&self.vpn.config_path).await;
                self.emit(
                    result
                        .map(Event::VpnConfigurationFetched)
                        .map_err(ManagerError::from),
                );
            }
            Request::WriteVpnConfiguration { contents, password } => {
                let result = copy_into_place(
                    &self.runner,
                    &self.copy_command,
                    &self.vpn.staging_path,
                    &self.vpn.config_path,
                    &contents,
                    &password,
                )
                .await;
                self.emit(result.map(|_| Event::VpnConfigurationWritten));
            }
            Request::Vpn {
                direction,
                password,
            } => {
                if let Err(e) = self.request_vpn(direction, &password).await {
                    self.emit(Err(e));
                }
            }
            Request::CancelVpn => {
                if self.cancel_vpn() {
                    info!("VPN poll cancelled");
                }
            }
            Request::ProbeVpn { reply } => {
                let present = self.vpn.tooling_present(self.runner.elevation());
                debug!(present, "VPN tooling probe");
                let _ = reply.send(present);
            }
            Request::Shutdown => {}
        }
    }

    async fn fetch_interfaces(&self) -> Result<Vec<String>> {
        let live = self.query.interfaces()?;
        self.backend.list_adapters(&live).await
    }

    async fn read_configuration(&self, adapter: &str) -> Result<NetworkConfiguration> {
        let index = find_index(&self.query.interfaces()?, adapter);
        let mut config = self.backend.read_configuration(adapter, index).await?;
        config.index = index;
        Ok(config)
    }

    async fn write_configuration(
        &self,
        desired: &NetworkConfiguration,
        password: &str,
    ) -> Result<()> {
        validate_configuration(desired).map_err(ManagerError::InvalidRequest)?;
        let desired = &desired.clone().normalized();

        let index = find_index(&self.query.interfaces()?, &desired.description);
        info!(
            adapter = %desired.description,
            mode = desired.mode().as_str(),
            "Writing network configuration"
        );
        self.backend.apply(desired, index, password).await?;

        verify_with_retry(self.retry, desired, index, || {
            self.read_configuration(&desired.description)
        })
        .await?;
        info!(adapter = %desired.description, "Network configuration applied");
        Ok(())
    }

    fn write_proxy(&self, settings: ProxySettings, excludes: Vec<String>) -> Result<()> {
        let settings = settings.normalized();
        let mut config = load_config_from(&self.settings_path)?;
        config.proxy = ProxySettingsRecord::from_settings(&settings, &excludes);
        save_config_to(&self.settings_path, &config)?;

        self.proxy.install(settings, excludes);
        info!("Proxy settings updated");
        Ok(())
    }

    fn cancel_vpn(&mut self) -> bool {
        self.poll = None;
        self.machine.cancel()
    }

    async fn request_vpn(&mut self, direction: VpnDirection, password: &str) -> Result<()> {
        if self.cancel_vpn() {
            debug!(%direction, "Previous VPN poll replaced");
        }

        let command = self.vpn.command(direction);
        if command.is_empty() {
            return Err(ManagerError::Unsupported(format!(
                "no VPN {} command configured",
                direction
            )));
        }

        info!(%direction, "Sending VPN service command");
        let outcome = self.runner.run(&self.runner.elevated(command), password).await;
        ManagerError::check_outcome(&format!("VPN {}", direction), outcome)?;

        self.machine.begin(direction, Instant::now().into_std());
        let period = self.vpn.poll_interval;
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(interval);
        Ok(())
    }

    fn poll_vpn(&mut self) {
        let tunnel_present = match self.query.interfaces() {
            Ok(interfaces) => has_point_to_point(&interfaces),
            Err(e) => {
                warn!(error = %e, "Interfaces can't be listed during VPN poll");
                // An unreadable table never counts as the awaited change.
                self.machine.state() == VpnState::Stopping
            }
        };

        let outcome = self.machine.tick(tunnel_present, Instant::now().into_std());
        if !self.machine.is_polling() {
            self.poll = None;
        }

        match outcome {
            Some(VpnOutcome::TurnedOn) => {
                info!("VPN turned on");
                self.send(Event::VpnTurnedOn);
            }
            Some(VpnOutcome::TurnedOff) => {
                info!("VPN turned off");
                self.send(Event::VpnTurnedOff);
            }
            Some(VpnOutcome::TimedOut(direction)) => {
                self.emit(Err(ManagerError::VpnTimeout(direction)));
            }
            None => {}
        }
    }
}
