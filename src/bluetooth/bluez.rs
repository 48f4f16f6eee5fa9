//! BlueZ binding of the transport and advertising capabilities.
//!
//! BlueZ keeps the Client Characteristic Configuration descriptor of
//! notifying characteristics to itself and never reveals which device
//! subscribed. Every notify session it opens is therefore handled as a
//! peer of its own, which subscribes when the session starts and
//! disconnects once a notification finds the session stopped.

use super::{
    clock::ClockWatcher,
    server::TimeServer,
    services::{CharacteristicDescription, ServiceDescription},
    subscriptions::ENABLE_NOTIFICATION_VALUE,
    transport::{Advertiser, GattEvent, PeerId, Status, Transport},
    uuids,
};
use crate::config::Config;
use anyhow::{anyhow, ensure, Result};
use bluer::{
    adv::{Advertisement, AdvertisementHandle},
    gatt::local::{
        Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
        CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest, ReqError, ReqResult,
        Service,
    },
    Adapter, AdapterEvent, AdapterProperty, Session,
};
use futures::{FutureExt, StreamExt};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

type Responder = oneshot::Sender<ReqResult<Vec<u8>>>;
type NotifySession = (Uuid, Arc<AsyncMutex<CharacteristicNotifier>>);

struct Shared {
    events: mpsc::UnboundedSender<GattEvent>,
    pending: Mutex<HashMap<u32, Responder>>,
    sessions: Mutex<HashMap<PeerId, NotifySession>>,
    next_request: AtomicU32,
    next_session: AtomicU32,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u32, Responder>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<PeerId, NotifySession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward a read to the event loop and wait for its response
    async fn read(&self, characteristic: Uuid, req: CharacteristicReadRequest) -> ReqResult<Vec<u8>> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (responder, response) = oneshot::channel();
        self.pending().insert(request_id, responder);

        let event = GattEvent::CharacteristicRead {
            peer: PeerId::Device(req.device_address),
            request_id,
            offset: req.offset,
            characteristic,
        };
        if self.events.send(event).is_err() {
            self.pending().remove(&request_id);
            return Err(ReqError::Failed);
        }
        response.await.unwrap_or(Err(ReqError::Failed))
    }

    fn start_session(&self, characteristic: Uuid, notifier: CharacteristicNotifier) {
        let peer = PeerId::Session(self.next_session.fetch_add(1, Ordering::Relaxed));
        self.sessions().insert(peer, (characteristic, Arc::new(AsyncMutex::new(notifier))));
        _ = self.events.send(GattEvent::Connected(peer));
        _ = self.events.send(GattEvent::DescriptorWrite {
            peer,
            request_id: 0,
            descriptor: uuids::DSC_CLIENT_CONFIG,
            response_needed: false,
            offset: 0,
            value: ENABLE_NOTIFICATION_VALUE.to_vec(),
        });
    }

    fn end_session(&self, peer: PeerId) {
        if self.sessions().remove(&peer).is_some() {
            _ = self.events.send(GattEvent::Disconnected(peer));
        }
    }
}

pub struct BluezServer {
    services: Vec<ServiceDescription>,
    handle: Option<ApplicationHandle>,
}

pub struct BluezTransport {
    adapter: Adapter,
    shared: Arc<Shared>,
}

impl BluezTransport {
    pub fn new(adapter: Adapter, events: mpsc::UnboundedSender<GattEvent>) -> Self {
        let shared = Arc::new(Shared {
            events,
            pending: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_request: AtomicU32::new(1),
            next_session: AtomicU32::new(1),
        });
        Self { adapter, shared }
    }

    fn service(&self, description: &ServiceDescription) -> Service {
        Service {
            uuid: description.uuid,
            primary: description.primary,
            characteristics: description
                .characteristics
                .iter()
                .map(|c| self.characteristic(c))
                .collect(),
            ..Default::default()
        }
    }

    // Descriptors are left out, BlueZ adds the configuration
    // descriptor to notifying characteristics by itself
    fn characteristic(&self, description: &CharacteristicDescription) -> Characteristic {
        let uuid = description.uuid;

        let read = description.properties.read.then(|| {
            let shared = self.shared.clone();
            CharacteristicRead {
                read: true,
                fun: Box::new(move |req| {
                    let shared = shared.clone();
                    async move {
                        log::debug!("{:?}", &req);
                        shared.read(uuid, req).await
                    }
                    .boxed()
                }),
                ..Default::default()
            }
        });

        let notify = description.properties.notify.then(|| {
            let shared = self.shared.clone();
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let shared = shared.clone();
                    async move { shared.start_session(uuid, notifier) }.boxed()
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid,
            read,
            notify,
            ..Default::default()
        }
    }
}

impl Transport for BluezTransport {
    type Server = BluezServer;

    async fn open_server(&self) -> Result<BluezServer> {
        ensure!(
            self.adapter.is_powered().await?,
            "Bluetooth adapter {} is powered off",
            self.adapter.name()
        );
        Ok(BluezServer { services: Vec::new(), handle: None })
    }

    async fn add_service(&self, server: &mut BluezServer, service: &ServiceDescription) -> Result<()> {
        // BlueZ registers a whole application at once, so the
        // previous registration is replaced by an extended one
        server.services.push(service.clone());
        server.handle = None;
        let app = Application {
            services: server.services.iter().map(|s| self.service(s)).collect(),
            ..Default::default()
        };
        server.handle = Some(self.adapter.serve_gatt_application(app).await?);
        Ok(())
    }

    async fn close_server(&self, server: BluezServer) {
        drop(server);
        self.shared.sessions().clear();
        self.shared.pending().clear();
    }

    fn send_response(&self, peer: PeerId, request_id: u32, status: Status, _offset: u16, value: Option<Vec<u8>>) {
        let Some(responder) = self.shared.pending().remove(&request_id) else {
            log::debug!("No pending request #{request_id} from {peer}");
            return;
        };
        let response = match status {
            Status::Success => Ok(value.unwrap_or_default()),
            Status::Failure => Err(ReqError::Failed),
        };
        _ = responder.send(response);
    }

    fn send_notification(&self, peer: PeerId, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let notifier = match self.shared.sessions().get(&peer) {
            Some((uuid, notifier)) if *uuid == characteristic => notifier.clone(),
            Some(_) => return Err(anyhow!("{peer} is not subscribed to {characteristic}")),
            None => return Err(anyhow!("No notification session for {peer}")),
        };

        let shared = self.shared.clone();
        let value = value.to_vec();
        tokio::spawn(async move {
            let mut notifier = notifier.lock().await;
            let delivered = !notifier.is_stopped() && notifier.notify(value).await.is_ok();
            drop(notifier);
            if !delivered {
                shared.end_session(peer);
            }
        });
        Ok(())
    }
}

pub struct BluezAdvertiser {
    adapter: Adapter,
    local_name: Option<String>,
    handle: AsyncMutex<Option<AdvertisementHandle>>,
}

impl BluezAdvertiser {
    pub fn new(adapter: Adapter, local_name: Option<String>) -> Self {
        Self { adapter, local_name, handle: AsyncMutex::new(None) }
    }
}

impl Advertiser for BluezAdvertiser {
    async fn start_advertising(&self, service: Uuid) -> Result<()> {
        ensure!(
            self.adapter.supported_advertising_instances().await? > 0,
            "Bluetooth adapter {} can't advertise",
            self.adapter.name()
        );
        let advertisement = Advertisement {
            service_uuids: [service].into_iter().collect(),
            discoverable: Some(true),
            local_name: self.local_name.clone(),
            ..Default::default()
        };
        let handle = self.adapter.advertise(advertisement).await?;
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        if self.handle.lock().await.take().is_none() {
            log::debug!("Advertising was not running");
        }
        Ok(())
    }
}

pub async fn init_adapter(config: &Config) -> Result<Adapter> {
    let session = Session::new().await?;
    let adapter = match &config.adapter {
        Some(name) => session.adapter(name)?,
        None => session.default_adapter().await?,
    };
    Ok(adapter)
}

/// Run the Current Time Service on a BlueZ adapter until Ctrl-C
pub async fn serve(config: &Config) -> Result<()> {
    let adapter = init_adapter(config).await?;
    log::info!("Using Bluetooth adapter {}", adapter.name());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(BluezTransport::new(adapter.clone(), events_tx));
    let advertiser = BluezAdvertiser::new(adapter.clone(), config.local_name.clone());
    let server = TimeServer::new(transport, Some(advertiser));

    let power = adapter.events().await?.filter_map(|event| async move {
        match event {
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => Some(powered),
            _ => None,
        }
    });

    if adapter.is_powered().await? {
        log::debug!("Bluetooth enabled...starting services");
        server.on_adapter_on().await;
    } else if config.power_on {
        log::debug!("Bluetooth is currently disabled...enabling");
        adapter.set_powered(true).await?;
    } else {
        log::warn!("Bluetooth adapter {} is powered off", adapter.name());
    }

    let clock = ClockWatcher::new(config.clock_tolerance());
    server
        .run(power, events_rx, clock, config.tick_interval(), tokio::signal::ctrl_c())
        .await;
    Ok(())
}
