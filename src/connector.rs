//! Connector context: lifecycle, transport state and callback dispatch.
//!
//! [`Connector`] is a cheap handle; several may coexist, each bound to its
//! own engine. The engine thread enters through [`Connector::dispatch`],
//! application threads through the action methods defined next to each
//! service.
//!
//! ```text
//!            ┌────────────────────── Connector ───────────────────────┐
//!  Request ─▶│ dispatch ─┬─ Status       → flags, StatusListener      │
//!            │           ├─ DataService  → send / receive             │
//!            │           ├─ DataPoint    → data point transaction     │
//!            │           ├─ Firmware     → FirmwareService            │
//!            │           ├─ ShortMessage → CLI / ping                 │
//!            │           └─ RemoteConfig → RciService                 │
//!            │ workers: rx · cli · fw · rci (one per enabled service) │
//!            └────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, error, info, warn};

use crate::cli::{self, CliService};
use crate::config::{ConnectorConfig, FirmwareVersion};
use crate::datapoints;
use crate::engine::{
    Action, CallbackStatus, DataPointEvent, DataService, Engine, EngineStatus, Request,
    ShortMessage, StatusEvent, StopBehavior, Transport,
};
use crate::error::{StartError, StopError, TransportError};
use crate::firmware::FirmwareService;
use crate::ping;
use crate::ports::{CliHandler, DeviceControl, FirmwareHandler, KeepaliveStatus, StatusListener};
use crate::rci::{RciCallbacks, RciService};
use crate::receive::{self, ReceiveOptions, ReceiveService};
use crate::send;
use crate::sync::{self, Semaphore, Worker};

/// Optional services enabled at start. A service left `None` answers its
/// engine callbacks with the matching "not supported" error.
#[derive(Clone, Default)]
pub struct Services {
    pub receive: Option<ReceiveOptions>,
    pub cli: Option<Arc<dyn CliHandler>>,
    pub firmware: Option<Arc<dyn FirmwareHandler>>,
    pub rci: Option<RciCallbacks>,
    pub status: Option<Arc<dyn StatusListener>>,
    pub device: Option<Arc<dyn DeviceControl>>,
}

pub(crate) struct Inner {
    config: ConnectorConfig,
    engine: Arc<dyn Engine>,
    running: AtomicBool,
    tcp_started: AtomicBool,
    udp_started: AtomicBool,
    sms_started: AtomicBool,
    /// Serialises submissions so busy retries of one action are not
    /// interleaved with another.
    initiate_lock: Mutex<()>,
    pub(crate) receive: Option<Arc<ReceiveService>>,
    cli: Option<Arc<CliService>>,
    firmware: Option<Arc<FirmwareService>>,
    rci: Option<Arc<RciService>>,
    listener: Option<Arc<dyn StatusListener>>,
    workers: Mutex<Vec<Worker>>,
}

impl Inner {
    fn flag(&self, transport: Transport) -> &AtomicBool {
        match transport {
            Transport::Tcp => &self.tcp_started,
            Transport::Udp => &self.udp_started,
            Transport::Sms => &self.sms_started,
        }
    }

    pub(crate) fn transport_started(&self, transport: Transport) -> bool {
        self.flag(transport).load(Ordering::Acquire)
    }

    fn clear_transports(&self) {
        for t in [Transport::Tcp, Transport::Udp, Transport::Sms] {
            self.flag(t).store(false, Ordering::Release);
        }
    }

    /// Submit an action, resubmitting with backoff while the engine reports
    /// itself busy.
    pub(crate) fn initiate(&self, action: &Action) -> EngineStatus {
        let _guard = sync::lock(&self.initiate_lock);
        let policy = self.config.retry;
        let mut backoff = policy.initial_backoff();
        let mut attempt = 1;

        loop {
            match self.engine.initiate_action(action) {
                EngineStatus::Success => {
                    self.engine.wake();
                    return EngineStatus::Success;
                }
                EngineStatus::ServiceBusy if attempt < policy.max_attempts => {
                    thread::sleep(backoff);
                    backoff = policy.next_backoff(backoff);
                    attempt += 1;
                }
                status => {
                    debug!("{} not accepted after {} attempt(s): {:?}", action.kind(), attempt, status);
                    return status;
                }
            }
        }
    }
}

fn spawn_worker<F>(name: &'static str, wake: Arc<Semaphore>, body: F) -> Result<Worker, StartError>
where
    F: FnMut() + Send + 'static,
{
    Worker::spawn(name, wake, body).map_err(|e| {
        error!("{}: spawn failed: {}", name, e);
        StartError::ThreadFailed
    })
}

/// Handle to one running connector instance.
#[derive(Clone)]
pub struct Connector {
    pub(crate) inner: Arc<Inner>,
}

impl Connector {
    // ── Lifecycle ─────────────────────────────────────────────

    /// Validate `config`, create the enabled services and spawn one worker
    /// per service.
    pub fn start(
        config: ConnectorConfig,
        engine: Arc<dyn Engine>,
        services: Services,
    ) -> Result<Self, StartError> {
        config.validate()?;
        if services.firmware.is_some() && config.firmware_targets.is_empty() {
            return Err(StartError::InvalidFirmwareInfo);
        }

        let receive = services
            .receive
            .map(|options| Arc::new(ReceiveService::new(options, Arc::clone(&engine))));
        let cli = services
            .cli
            .map(|handler| Arc::new(CliService::new(handler, Arc::clone(&engine))));
        let firmware = services.firmware.map(|handler| {
            Arc::new(FirmwareService::new(
                config.firmware_targets.clone(),
                config.chunk_pool_size,
                handler,
                services.device.clone(),
                Arc::clone(&engine),
            ))
        });
        let rci = services
            .rci
            .map(|callbacks| Arc::new(RciService::new(callbacks, Arc::clone(&engine))));

        let mut workers = Vec::new();
        if let Some(service) = &receive {
            let s = Arc::clone(service);
            workers.push(spawn_worker("cloudlink-rx", service.wake_handle(), move || s.run_worker())?);
        }
        if let Some(service) = &cli {
            let s = Arc::clone(service);
            workers.push(spawn_worker("cloudlink-cli", service.wake_handle(), move || s.run_worker())?);
        }
        if let Some(service) = &firmware {
            let s = Arc::clone(service);
            workers.push(spawn_worker("cloudlink-fw", service.wake_handle(), move || s.run_worker())?);
        }
        if let Some(service) = &rci {
            let s = Arc::clone(service);
            workers.push(spawn_worker("cloudlink-rci", service.wake_handle(), move || s.run_worker())?);
        }

        info!(
            "connector started: vendor {:#010x}, {} worker(s)",
            config.vendor_id,
            workers.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                engine,
                running: AtomicBool::new(true),
                tcp_started: AtomicBool::new(false),
                udp_started: AtomicBool::new(false),
                sms_started: AtomicBool::new(false),
                initiate_lock: Mutex::new(()),
                receive,
                cli,
                firmware,
                rci,
                listener: services.status,
                workers: Mutex::new(workers),
            }),
        })
    }

    /// Stop every started transport with `behavior`, terminate the engine
    /// and join the workers.
    pub fn stop(&self, behavior: StopBehavior) -> Result<(), StopError> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Err(StopError::NotStarted);
        }

        for transport in [Transport::Tcp, Transport::Udp, Transport::Sms] {
            if self.inner.transport_started(transport) {
                let status = self.inner.initiate(&Action::StopTransport {
                    transport,
                    behavior,
                });
                if status != EngineStatus::Success {
                    warn!("stop {:?}: engine answered {:?}", transport, status);
                }
            }
        }
        let status = self.inner.initiate(&Action::Terminate);
        if status != EngineStatus::Success {
            warn!("terminate: engine answered {:?}", status);
        }

        let workers = std::mem::take(&mut *sync::lock(&self.inner.workers));
        for mut worker in workers {
            debug!("{}: shutting down", worker.name());
            worker.shutdown();
        }
        if let Some(receive) = &self.inner.receive {
            receive.clear();
        }
        if let Some(cli) = &self.inner.cli {
            cli.clear();
        }
        self.inner.clear_transports();
        info!("connector stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn transport_started(&self, transport: Transport) -> bool {
        self.inner.transport_started(transport)
    }

    /// Version the cloud sees for firmware `target`.
    pub fn firmware_version(&self, target: u8) -> Option<FirmwareVersion> {
        self.inner.firmware.as_ref()?.target_version(target)
    }

    // ── Transports ────────────────────────────────────────────

    /// Ask the engine to bring up `transport`. UDP and SMS count as
    /// started once the engine accepts; TCP once it reports communication.
    pub fn start_transport(&self, transport: Transport) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        if self.inner.transport_started(transport) {
            return Err(TransportError::AlreadyStarted);
        }
        match self.inner.initiate(&Action::StartTransport(transport)) {
            EngineStatus::Success => {}
            status => {
                warn!("start {:?}: engine answered {:?}", transport, status);
                return Err(TransportError::InitiateActionFailed);
            }
        }
        if transport != Transport::Tcp {
            self.inner.flag(transport).store(true, Ordering::Release);
        }
        info!("{:?} transport start requested", transport);
        Ok(())
    }

    pub fn stop_transport(
        &self,
        transport: Transport,
        behavior: StopBehavior,
    ) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        if !self.inner.transport_started(transport) {
            return Err(TransportError::NotStarted);
        }
        match self.inner.initiate(&Action::StopTransport {
            transport,
            behavior,
        }) {
            EngineStatus::Success => {
                self.inner.flag(transport).store(false, Ordering::Release);
                info!("{:?} transport stopping ({:?})", transport, behavior);
                Ok(())
            }
            status => {
                warn!("stop {:?}: engine answered {:?}", transport, status);
                Err(TransportError::InitiateActionFailed)
            }
        }
    }

    // ── Engine entry point ────────────────────────────────────

    /// Single entry point for every engine callback. Never blocks.
    pub fn dispatch(&self, request: Request<'_>) -> CallbackStatus {
        match request {
            Request::Status(event) => self.on_status_event(event),
            Request::DataService(request) => self.on_data_service(request),
            Request::DataPoint(event) => match event {
                DataPointEvent::Response {
                    context,
                    response,
                    hint,
                } => datapoints::on_response(context, response, hint),
                DataPointEvent::Status { context, status } => datapoints::on_status(context, status),
            },
            Request::Firmware(request) => match &self.inner.firmware {
                Some(service) => service.handle(request),
                None => {
                    warn!("FW: request received but no firmware handler is configured");
                    CallbackStatus::Unrecognized
                }
            },
            Request::ShortMessage(message) => self.on_short_message(message),
            Request::RemoteConfig { step, data } => match &self.inner.rci {
                Some(service) => service.handle(step, data),
                None => {
                    warn!("RCI: {:?} received but no callbacks are configured", step);
                    CallbackStatus::Unrecognized
                }
            },
        }
    }

    fn on_status_event(&self, event: StatusEvent) -> CallbackStatus {
        let listener = self.inner.listener.as_deref();
        match event {
            StatusEvent::TcpCommunicationStarted => {
                self.inner.tcp_started.store(true, Ordering::Release);
                info!("TCP communication started");
                if let Some(l) = listener {
                    l.tcp_connected();
                }
            }
            StatusEvent::KeepaliveMissed | StatusEvent::KeepaliveRestored => {
                let status = if event == StatusEvent::KeepaliveMissed {
                    KeepaliveStatus::Missed
                } else {
                    KeepaliveStatus::Restored
                };
                debug!("keepalive {:?}", status);
                if let Some(l) = listener {
                    l.keepalive(status);
                }
            }
            StatusEvent::StopCompleted(transport) => {
                let stopped: Vec<Transport> = match transport {
                    Some(t) => vec![t],
                    None => vec![Transport::Tcp, Transport::Udp, Transport::Sms],
                };
                for t in stopped {
                    self.inner.flag(t).store(false, Ordering::Release);
                    info!("{:?} transport stopped", t);
                    if let Some(l) = listener {
                        l.transport_stopped(t);
                    }
                }
            }
            StatusEvent::Aborted => {
                self.inner.running.store(false, Ordering::Release);
                self.inner.clear_transports();
                error!("engine aborted");
                if let Some(l) = listener {
                    l.aborted();
                }
            }
        }
        CallbackStatus::Continue
    }

    fn on_data_service(&self, request: DataService<'_>) -> CallbackStatus {
        let receive = self.inner.receive.as_deref();
        match request {
            DataService::SendData {
                context,
                buffer,
                bytes_used,
                more_data,
            } => send::on_data(context, buffer, bytes_used, more_data),
            DataService::SendResponse {
                context,
                response,
                hint,
            } => send::on_response(context, response, hint),
            DataService::SendStatus { context, status } => send::on_status(context, status),
            DataService::SendLength {
                context,
                total_bytes,
            } => send::on_length(context, total_bytes),
            DataService::ReceiveTarget {
                target,
                transport,
                response_required,
                context,
            } => receive::on_target(receive, target, transport, response_required, context),
            DataService::ReceiveData {
                context,
                data,
                more_data,
            } => receive::on_data(receive, context, data, more_data),
            DataService::ReceiveReply {
                context,
                buffer,
                bytes_used,
                more_data,
            } => receive::on_reply(context, buffer, bytes_used, more_data),
            DataService::ReceiveStatus { context, status } => receive::on_status(context, status),
            DataService::ReceiveReplyLength {
                context,
                total_bytes,
            } => receive::on_reply_length(context, total_bytes),
        }
    }

    fn on_short_message(&self, message: ShortMessage<'_>) -> CallbackStatus {
        let service = self.inner.cli.as_deref();
        match message {
            ShortMessage::CliRequest {
                transport,
                response_required,
                data,
                more_data,
                context,
            } => cli::on_request(service, transport, response_required, data, more_data, context),
            ShortMessage::CliResponse {
                context,
                buffer,
                bytes_used,
                more_data,
            } => cli::on_response(context, buffer, bytes_used, more_data),
            ShortMessage::CliResponseLength {
                context,
                total_bytes,
            } => cli::on_response_length(context, total_bytes),
            ShortMessage::CliStatus { context, status } => cli::on_status(service, context, status),
            ShortMessage::PingResponse { context, status } => ping::on_response(context, status),
        }
    }
}
