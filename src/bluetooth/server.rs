use super::{
    clock::{ClockEvent, ClockWatcher},
    profile::{AdjustReason, ZoneOffsets},
    services::{self, Attribute},
    subscriptions::Subscriptions,
    transport::{Advertiser, GattEvent, PeerId, Status, Transport},
    uuids,
};
use anyhow::Result;
use chrono::{DateTime, Local, TimeZone};
use futures::{pin_mut, Stream, StreamExt};
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, Mutex},
    time::MissedTickBehavior,
};

/// Current Time Service peripheral.
///
/// Entry points are meant to be called one at a time by the host's
/// event loop. The subscriber set lives as long as the GATT server.
pub struct TimeServer<T: Transport, A: Advertiser> {
    transport: Arc<T>,
    advertiser: Option<A>,
    server: Mutex<Option<T::Server>>,
    subscriptions: Subscriptions,
}

impl<T: Transport, A: Advertiser> TimeServer<T, A> {
    pub fn new(transport: Arc<T>, advertiser: Option<A>) -> Self {
        Self {
            transport,
            advertiser,
            server: Mutex::new(None),
            subscriptions: Subscriptions::new(),
        }
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub async fn is_serving(&self) -> bool {
        self.server.lock().await.is_some()
    }

    /// Event loop: adapter power changes, GATT requests and periodic clock
    /// samples until `shutdown` resolves, then the server is torn down
    pub async fn run<P, F>(
        &self,
        power: P,
        mut gatt_events: mpsc::UnboundedReceiver<GattEvent>,
        mut clock: ClockWatcher,
        tick_interval: Duration,
        shutdown: F,
    ) where
        P: Stream<Item = bool>,
        F: Future,
    {
        pin_mut!(power, shutdown);
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(powered) = power.next() => {
                    if powered {
                        self.on_adapter_on().await;
                    } else {
                        self.on_adapter_off().await;
                    }
                }
                Some(event) = gatt_events.recv() => self.handle_gatt_event(event),
                _ = ticker.tick() => {
                    let now = Local::now();
                    let event = clock.observe(now.into(), ZoneOffsets::of(&now), Instant::now());
                    log::debug!("Clock event: {event:?}");
                    self.notify_registered_devices(&now, event.adjust_reason());
                }
                _ = &mut shutdown => {
                    log::info!("Shutting down");
                    break;
                }
            }
        }

        self.on_adapter_off().await;
    }

    // -- Adapter events --

    pub async fn on_adapter_on(&self) {
        self.start_advertising().await;
        self.start_server().await;
    }

    pub async fn on_adapter_off(&self) {
        self.stop_server().await;
        self.stop_advertising().await;
    }

    async fn start_advertising(&self) {
        let Some(advertiser) = &self.advertiser else {
            log::warn!("Failed to create advertiser");
            return;
        };
        match advertiser.start_advertising(uuids::SRV_CURRENT_TIME).await {
            Ok(()) => log::info!("LE Advertise Started."),
            Err(error) => log::warn!("LE Advertise Failed: {error}"),
        }
    }

    async fn stop_advertising(&self) {
        let Some(advertiser) = &self.advertiser else {
            log::warn!("Failed to create advertiser");
            return;
        };
        if let Err(error) = advertiser.stop_advertising().await {
            log::warn!("Failed to stop advertising: {error}");
        }
    }

    async fn start_server(&self) {
        let mut server = self.server.lock().await;
        if let Some(previous) = server.take() {
            self.transport.close_server(previous).await;
        }
        self.drop_subscriptions();

        match self.open_server().await {
            Ok(opened) => {
                log::info!("GATT server started");
                *server = Some(opened);
            }
            Err(error) => log::warn!("Unable to create GATT server: {error}"),
        }
    }

    async fn open_server(&self) -> Result<T::Server> {
        let mut server = self.transport.open_server().await?;
        self.transport.add_service(&mut server, &services::time_service()).await?;
        Ok(server)
    }

    async fn stop_server(&self) {
        if let Some(server) = self.server.lock().await.take() {
            self.transport.close_server(server).await;
            log::info!("GATT server stopped");
        }
        self.drop_subscriptions();
    }

    fn drop_subscriptions(&self) {
        if !self.subscriptions.is_empty() {
            log::debug!("Dropping {} subscriptions", self.subscriptions.len());
            self.subscriptions.clear();
        }
    }

    // -- Clock events --

    pub fn on_clock_tick(&self) -> usize {
        self.on_clock_event(ClockEvent::Tick)
    }

    pub fn on_clock_changed(&self) -> usize {
        self.on_clock_event(ClockEvent::Changed)
    }

    pub fn on_timezone_changed(&self) -> usize {
        self.on_clock_event(ClockEvent::TimezoneChanged)
    }

    pub fn on_dst_changed(&self) -> usize {
        self.on_clock_event(ClockEvent::DstChanged)
    }

    pub fn on_clock_event(&self, event: ClockEvent) -> usize {
        self.notify_registered_devices(&Local::now(), event.adjust_reason())
    }

    pub fn notify_registered_devices<Tz: TimeZone>(&self, time: &DateTime<Tz>, reason: AdjustReason) -> usize {
        self.subscriptions.notify_all(self.transport.as_ref(), time, reason)
    }

    // -- GATT requests --

    pub fn handle_gatt_event(&self, event: GattEvent) {
        self.handle_gatt_event_at(event, &Local::now())
    }

    pub fn handle_gatt_event_at<Tz: TimeZone>(&self, event: GattEvent, now: &DateTime<Tz>) {
        match event {
            GattEvent::Connected(peer) => {
                log::info!("BluetoothDevice CONNECTED: {peer}");
            }
            GattEvent::Disconnected(peer) => {
                log::info!("BluetoothDevice DISCONNECTED: {peer}");
                self.subscriptions.on_peer_disconnected(&peer);
            }
            GattEvent::CharacteristicRead { peer, request_id, characteristic, .. } => {
                match self.subscriptions.on_characteristic_read(&peer, characteristic.into(), now) {
                    Ok(value) => self.respond(peer, request_id, Status::Success, Some(value)),
                    Err(error) => {
                        log::warn!("{error}");
                        self.respond(peer, request_id, Status::Failure, None);
                    }
                }
            }
            GattEvent::DescriptorRead { peer, request_id, descriptor, .. } => match Attribute::from(descriptor) {
                Attribute::ClientConfig => {
                    log::debug!("Config descriptor read");
                    let value = self.subscriptions.on_descriptor_read(&peer);
                    self.respond(peer, request_id, Status::Success, Some(value.to_vec()));
                }
                _ => {
                    log::warn!("Unknown descriptor read request: {descriptor}");
                    self.respond(peer, request_id, Status::Failure, None);
                }
            },
            GattEvent::DescriptorWrite { peer, request_id, descriptor, response_needed, value, .. } => {
                let status = match Attribute::from(descriptor) {
                    Attribute::ClientConfig => match self.subscriptions.on_descriptor_write(peer, &value) {
                        Ok(()) => Status::Success,
                        Err(error) => {
                            log::warn!("{error}");
                            Status::Failure
                        }
                    },
                    _ => {
                        log::warn!("Unknown descriptor write request: {descriptor}");
                        Status::Failure
                    }
                };
                if response_needed {
                    self.respond(peer, request_id, status, None);
                }
            }
        }
    }

    fn respond(&self, peer: PeerId, request_id: u32, status: Status, value: Option<Vec<u8>>) {
        self.transport.send_response(peer, request_id, status, 0, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::subscriptions::{
        tests::{peer, RecordingTransport},
        DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
    };
    use anyhow::anyhow;
    use chrono::{FixedOffset, NaiveDate};
    use futures::stream;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    struct RecordingAdvertiser {
        transport: Arc<RecordingTransport>,
        fail: bool,
    }

    impl Advertiser for RecordingAdvertiser {
        async fn start_advertising(&self, service: Uuid) -> Result<()> {
            self.transport.log.lock().unwrap().push(format!("start_advertising {service}"));
            if self.fail {
                Err(anyhow!("Advertising not supported"))
            } else {
                Ok(())
            }
        }

        async fn stop_advertising(&self) -> Result<()> {
            self.transport.log.lock().unwrap().push("stop_advertising".into());
            Ok(())
        }
    }

    /// Fires a shutdown request while the adapter is being brought up
    struct InterruptingAdvertiser {
        transport: Arc<RecordingTransport>,
        shutdown: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    }

    impl Advertiser for InterruptingAdvertiser {
        async fn start_advertising(&self, service: Uuid) -> Result<()> {
            self.transport.log.lock().unwrap().push(format!("start_advertising {service}"));
            if let Some(shutdown) = self.shutdown.lock().unwrap().take() {
                shutdown.send(()).unwrap();
            }
            Ok(())
        }

        async fn stop_advertising(&self) -> Result<()> {
            self.transport.log.lock().unwrap().push("stop_advertising".into());
            Ok(())
        }
    }

    fn time_server(fail_advertising: bool) -> (Arc<RecordingTransport>, TimeServer<RecordingTransport, RecordingAdvertiser>) {
        let transport = Arc::new(RecordingTransport::default());
        let advertiser = RecordingAdvertiser { transport: transport.clone(), fail: fail_advertising };
        (transport.clone(), TimeServer::new(transport, Some(advertiser)))
    }

    fn log(transport: &RecordingTransport) -> Vec<String> {
        transport.log.lock().unwrap().clone()
    }

    fn sample_time() -> DateTime<FixedOffset> {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_milli_opt(14, 30, 45, 500)
            .unwrap();
        FixedOffset::east_opt(0).unwrap().from_local_datetime(&naive).unwrap()
    }

    fn subscribe(server: &TimeServer<RecordingTransport, RecordingAdvertiser>, peer: PeerId) {
        server.handle_gatt_event(GattEvent::DescriptorWrite {
            peer,
            request_id: 0,
            descriptor: uuids::DSC_CLIENT_CONFIG,
            response_needed: false,
            offset: 0,
            value: ENABLE_NOTIFICATION_VALUE.to_vec(),
        });
    }

    #[tokio::test]
    async fn adapter_on_advertises_then_serves() {
        let (transport, server) = time_server(false);
        server.on_adapter_on().await;

        assert!(server.is_serving().await);
        assert_eq!(
            log(&transport),
            vec![
                format!("start_advertising {}", uuids::SRV_CURRENT_TIME),
                "open_server".to_string(),
                format!("add_service {}", uuids::SRV_CURRENT_TIME),
            ]
        );
    }

    #[tokio::test]
    async fn adapter_off_stops_server_before_advertising() {
        let (transport, server) = time_server(false);
        server.on_adapter_on().await;
        subscribe(&server, peer(1));
        transport.log.lock().unwrap().clear();

        server.on_adapter_off().await;

        assert!(!server.is_serving().await);
        assert!(server.subscriptions().is_empty());
        assert_eq!(log(&transport), vec!["close_server".to_string(), "stop_advertising".to_string()]);
    }

    #[tokio::test]
    async fn advertising_failure_keeps_server_running() {
        let (_transport, server) = time_server(true);
        server.on_adapter_on().await;
        assert!(server.is_serving().await);
    }

    #[tokio::test]
    async fn missing_advertiser_is_skipped() {
        let transport = Arc::new(RecordingTransport::default());
        let server: TimeServer<_, RecordingAdvertiser> = TimeServer::new(transport.clone(), None);
        server.on_adapter_on().await;
        assert!(server.is_serving().await);
        server.on_adapter_off().await;
        assert_eq!(log(&transport).last().map(String::as_str), Some("close_server"));
    }

    #[tokio::test]
    async fn restarting_server_drops_subscriptions() {
        let (_transport, server) = time_server(false);
        server.on_adapter_on().await;
        subscribe(&server, peer(1));
        server.on_adapter_on().await;
        assert!(server.subscriptions().is_empty());
    }

    #[test]
    fn characteristic_reads_are_answered() {
        let (transport, server) = time_server(false);
        let now = sample_time();
        for (request_id, characteristic) in [uuids::CHR_CURRENT_TIME, uuids::CHR_LOCAL_TIME_INFO, uuids::SRV_CURRENT_TIME]
            .into_iter()
            .enumerate()
        {
            let event = GattEvent::CharacteristicRead {
                peer: peer(1),
                request_id: request_id as u32,
                offset: 0,
                characteristic,
            };
            server.handle_gatt_event_at(event, &now);
        }

        assert_eq!(
            transport.responses(),
            vec![
                (peer(1), 0, Status::Success, Some(vec![0xE8, 0x07, 0x03, 0x0F, 0x0E, 0x1E, 0x2D, 0x05, 0x01, 0x00])),
                (peer(1), 1, Status::Success, Some(vec![0x00, 0x00])),
                (peer(1), 2, Status::Failure, None),
            ]
        );
    }

    #[test]
    fn config_descriptor_round_trip() {
        let (transport, server) = time_server(false);
        let read = |request_id| GattEvent::DescriptorRead {
            peer: peer(1),
            request_id,
            offset: 0,
            descriptor: uuids::DSC_CLIENT_CONFIG,
        };
        let write = |request_id, value: [u8; 2]| GattEvent::DescriptorWrite {
            peer: peer(1),
            request_id,
            descriptor: uuids::DSC_CLIENT_CONFIG,
            response_needed: true,
            offset: 0,
            value: value.to_vec(),
        };

        server.handle_gatt_event(write(1, ENABLE_NOTIFICATION_VALUE));
        server.handle_gatt_event(read(2));
        server.handle_gatt_event(write(3, DISABLE_NOTIFICATION_VALUE));
        server.handle_gatt_event(read(4));

        assert_eq!(
            transport.responses(),
            vec![
                (peer(1), 1, Status::Success, None),
                (peer(1), 2, Status::Success, Some(vec![0x01, 0x00])),
                (peer(1), 3, Status::Success, None),
                (peer(1), 4, Status::Success, Some(vec![0x00, 0x00])),
            ]
        );
    }

    #[test]
    fn invalid_descriptor_requests_fail() {
        let (transport, server) = time_server(false);
        let unknown = uuid::uuid!("00002901-0000-1000-8000-00805f9b34fb");

        server.handle_gatt_event(GattEvent::DescriptorWrite {
            peer: peer(1),
            request_id: 1,
            descriptor: uuids::DSC_CLIENT_CONFIG,
            response_needed: true,
            offset: 0,
            value: vec![0x02, 0x00],
        });
        server.handle_gatt_event(GattEvent::DescriptorWrite {
            peer: peer(1),
            request_id: 2,
            descriptor: unknown,
            response_needed: true,
            offset: 0,
            value: ENABLE_NOTIFICATION_VALUE.to_vec(),
        });
        server.handle_gatt_event(GattEvent::DescriptorWrite {
            peer: peer(1),
            request_id: 3,
            descriptor: unknown,
            response_needed: false,
            offset: 0,
            value: ENABLE_NOTIFICATION_VALUE.to_vec(),
        });
        server.handle_gatt_event(GattEvent::DescriptorRead {
            peer: peer(1),
            request_id: 4,
            offset: 0,
            descriptor: unknown,
        });

        assert!(server.subscriptions().is_empty());
        assert_eq!(
            transport.responses(),
            vec![
                (peer(1), 1, Status::Failure, None),
                (peer(1), 2, Status::Failure, None),
                (peer(1), 4, Status::Failure, None),
            ]
        );
    }

    #[test]
    fn clock_events_notify_subscribers() {
        let (transport, server) = time_server(false);
        subscribe(&server, peer(1));
        subscribe(&server, peer(2));

        assert_eq!(server.on_timezone_changed(), 2);
        let notifications = transport.notifications();
        assert_eq!(notifications.len(), 2);
        assert!(notifications.iter().all(|(_, chr, value)| {
            *chr == uuids::CHR_CURRENT_TIME && value.len() == 10 && value[9] == AdjustReason::TIMEZONE.bits()
        }));

        server.handle_gatt_event(GattEvent::Disconnected(peer(1)));
        assert_eq!(server.on_clock_changed(), 1);
        let notifications = transport.notifications();
        assert_eq!(notifications[2].0, peer(2));
        assert_eq!(notifications[2].2[9], AdjustReason::MANUAL.bits());
    }

    #[test]
    fn ticks_without_subscribers_send_nothing() {
        let (transport, server) = time_server(false);
        assert_eq!(server.on_clock_tick(), 0);
        assert_eq!(server.on_dst_changed(), 0);
        assert!(transport.notifications().is_empty());
    }

    #[tokio::test]
    async fn shutdown_during_adapter_on_stops_the_loop() {
        let transport = Arc::new(RecordingTransport::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let advertiser = InterruptingAdvertiser {
            transport: transport.clone(),
            shutdown: std::sync::Mutex::new(Some(shutdown_tx)),
        };
        let server = TimeServer::new(transport.clone(), Some(advertiser));
        let (_events_tx, events_rx) = mpsc::unbounded_channel();

        let run = server.run(
            stream::iter([true]),
            events_rx,
            ClockWatcher::new(Duration::from_secs(2)),
            Duration::from_secs(60),
            shutdown_rx,
        );
        tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();

        assert!(!server.is_serving().await);
        assert_eq!(
            log(&transport),
            vec![
                format!("start_advertising {}", uuids::SRV_CURRENT_TIME),
                "open_server".to_string(),
                format!("add_service {}", uuids::SRV_CURRENT_TIME),
                "close_server".to_string(),
                "stop_advertising".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn run_serves_gatt_requests_until_shutdown() {
        let (transport, server) = time_server(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        events_tx
            .send(GattEvent::DescriptorWrite {
                peer: peer(1),
                request_id: 7,
                descriptor: uuids::DSC_CLIENT_CONFIG,
                response_needed: true,
                offset: 0,
                value: ENABLE_NOTIFICATION_VALUE.to_vec(),
            })
            .unwrap();

        let run = server.run(
            stream::pending(),
            events_rx,
            ClockWatcher::new(Duration::from_secs(2)),
            Duration::from_secs(60),
            shutdown_rx,
        );
        let stop = async {
            while transport.responses().is_empty() {
                tokio::task::yield_now().await;
            }
            shutdown_tx.send(()).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(run, stop) })
            .await
            .unwrap();

        assert_eq!(transport.responses(), vec![(peer(1), 7, Status::Success, None)]);
        assert!(server.subscriptions().is_empty());
    }
}
