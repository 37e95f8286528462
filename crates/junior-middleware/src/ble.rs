//! BLE transport backed by btleplug.
//!
//! `connect` scans for the configured address, discovers the firmware's
//! characteristics and (in notify mode) subscribes to every telemetry
//! characteristic.  Two background tasks then feed the event queue:
//!
//! * the notification pump decodes each value notification into a
//!   [`TelemetryReading`] event;
//! * the disconnect watcher listens for the adapter's
//!   `DeviceDisconnected` event, flips the shared connected flag and posts
//!   [`EventPayload::Disconnected`].
//!
//! Neither task touches [`VehicleState`][junior_types::VehicleState]; the
//! session loop is its only writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::{Stream, StreamExt};
use junior_types::{
    EventPayload, JuniorError, MotorCommand, TelemetryField, TelemetryMode, TelemetryReading,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::codec;
use crate::config::BleConfig;
use crate::event_queue::EventSender;
use crate::transport::TransportSession;

const TRANSPORT: &str = "ble";
const SOURCE: &str = "junior-middleware::ble";
const SCAN_POLL: Duration = Duration::from_millis(250);

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    pub address: String,
}

struct Link {
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    subscribed: Vec<Characteristic>,
}

pub struct BleSession {
    config: BleConfig,
    events: EventSender,
    connected: Arc<AtomicBool>,
    link: Option<Link>,
    tasks: Vec<JoinHandle<()>>,
}

impl BleSession {
    pub fn new(config: BleConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            link: None,
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &BleConfig {
        &self.config
    }

    /// List every peripheral the first adapter sees within `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`JuniorError::Connect`] when no adapter is available or the
    /// scan cannot start.
    pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredDevice>, JuniorError> {
        let adapter = first_adapter().await?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(connect_err)?;
        tokio::time::sleep(duration).await;

        let peripherals = adapter.peripherals().await.map_err(connect_err)?;
        let mut devices = Vec::with_capacity(peripherals.len());
        for p in peripherals {
            let props = p.properties().await.ok().flatten();
            devices.push(DiscoveredDevice {
                name: props.as_ref().and_then(|pr| pr.local_name.clone()),
                address: props
                    .map(|pr| pr.address.to_string())
                    .unwrap_or_else(|| format!("{:?}", p.id())),
            });
        }
        if let Err(e) = adapter.stop_scan().await {
            debug!(error = %e, "stop_scan failed");
        }
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(devices)
    }

    async fn find_device(&self, adapter: &Adapter) -> Result<Peripheral, JuniorError> {
        let wanted = self.config.device_addr.trim();
        if wanted.is_empty() {
            return Err(JuniorError::Config("ble.device_addr is not set".to_string()));
        }

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(connect_err)?;
        info!(address = wanted, secs = self.config.scan_secs, "scanning for vehicle");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.scan_secs);
        let found = loop {
            if let Ok(peripherals) = adapter.peripherals().await {
                let mut hit = None;
                for p in peripherals {
                    let address = match p.properties().await {
                        Ok(Some(props)) => props.address.to_string(),
                        _ => String::new(),
                    };
                    if address_matches(&address, &format!("{:?}", p.id()), wanted) {
                        hit = Some(p);
                        break;
                    }
                }
                if let Some(p) = hit {
                    break Some(p);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL).await;
        };

        if let Err(e) = adapter.stop_scan().await {
            debug!(error = %e, "stop_scan failed");
        }
        found.ok_or_else(|| JuniorError::Discovery {
            address: wanted.to_string(),
        })
    }

    fn spawn_notification_pump(&mut self, mut stream: NotificationStream) {
        let chars = self.config.characteristics.clone();
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(n) = stream.next().await {
                let Some(field) = chars.field_for(n.uuid) else {
                    trace!(uuid = %n.uuid, "notification for unknown characteristic");
                    continue;
                };
                match codec::decode(field, &n.value) {
                    Ok(reading) => {
                        if let Err(e) = events.post(SOURCE, EventPayload::Telemetry(reading)) {
                            debug!(error = %e, "telemetry event dropped");
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable notification"),
                }
            }
            debug!("notification stream ended");
        }));
    }

    /// Discover characteristics, subscribe, start the background tasks and
    /// raise the connected flag.  Every characteristic subscribed so far is
    /// pushed onto `subscribed` so a failure can be unwound by the caller.
    async fn handshake(
        &mut self,
        adapter: &Adapter,
        peripheral: &Peripheral,
        subscribed: &mut Vec<Characteristic>,
    ) -> Result<HashMap<Uuid, Characteristic>, JuniorError> {
        peripheral.discover_services().await.map_err(connect_err)?;
        let characteristics: HashMap<Uuid, Characteristic> = peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid, c))
            .collect();

        for role in [
            codec::CommandRole::MotorLeft,
            codec::CommandRole::MotorRight,
            codec::CommandRole::ModeLeft,
            codec::CommandRole::ModeRight,
        ] {
            let uuid = self.config.characteristics.command(role);
            if !characteristics.contains_key(&uuid) {
                return Err(JuniorError::Connect {
                    transport: TRANSPORT.to_string(),
                    details: format!("{} characteristic {uuid} not found", role.as_str()),
                });
            }
        }

        if self.config.telemetry == TelemetryMode::Notify {
            for field in TelemetryField::ALL {
                let uuid = self.config.characteristics.telemetry(field);
                let Some(c) = characteristics.get(&uuid) else {
                    debug!(%field, "telemetry characteristic absent");
                    continue;
                };
                if !c.properties.contains(CharPropFlags::NOTIFY) {
                    continue;
                }
                match peripheral.subscribe(c).await {
                    Ok(()) => subscribed.push(c.clone()),
                    Err(e) => warn!(%field, error = %e, "subscribe failed"),
                }
            }
            let stream = peripheral.notifications().await.map_err(connect_err)?;
            self.spawn_notification_pump(stream);
        }

        let central = adapter.events().await.map_err(connect_err)?;
        // Set before the watcher can clear it.
        self.connected.store(true, Ordering::SeqCst);
        self.spawn_disconnect_watcher(central, peripheral);
        Ok(characteristics)
    }

    fn spawn_disconnect_watcher(&mut self, central: CentralStream, peripheral: &Peripheral) {
        let id = peripheral.id();
        let is_ours = move |event: &CentralEvent| {
            matches!(event, CentralEvent::DeviceDisconnected(gone) if *gone == id)
        };
        self.tasks.push(tokio::spawn(watch_disconnects(
            central,
            is_ours,
            Arc::clone(&self.connected),
            self.events.clone(),
        )));
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    async fn read_field(
        &self,
        link: &Link,
        field: TelemetryField,
    ) -> Result<Option<TelemetryReading>, JuniorError> {
        let uuid = self.config.characteristics.telemetry(field);
        let Some(characteristic) = link.characteristics.get(&uuid) else {
            return Ok(None);
        };
        if !characteristic.properties.contains(CharPropFlags::READ) {
            return Ok(None);
        }
        let timeout = Duration::from_millis(self.config.read_timeout_ms);
        let bytes = tokio::time::timeout(timeout, link.peripheral.read(characteristic))
            .await
            .map_err(|_| JuniorError::Timeout {
                transport: TRANSPORT.to_string(),
                after_ms: self.config.read_timeout_ms,
            })?
            .map_err(transport_err)?;
        codec::decode(field, &bytes).map(Some)
    }
}

type NotificationStream =
    std::pin::Pin<Box<dyn futures_util::Stream<Item = btleplug::api::ValueNotification> + Send>>;
type CentralStream = std::pin::Pin<Box<dyn futures_util::Stream<Item = CentralEvent> + Send>>;

#[async_trait]
impl TransportSession for BleSession {
    fn name(&self) -> &str {
        TRANSPORT
    }

    fn telemetry_mode(&self) -> TelemetryMode {
        self.config.telemetry
    }

    async fn connect(&mut self) -> Result<(), JuniorError> {
        if self.link.is_some() && self.is_connected() {
            return Ok(());
        }
        self.stop_tasks();

        let adapter = first_adapter().await?;
        let peripheral = self.find_device(&adapter).await?;
        peripheral.connect().await.map_err(connect_err)?;

        // From here on a failure must release the radio link.
        let mut subscribed = Vec::new();
        let characteristics = match self.handshake(&adapter, &peripheral, &mut subscribed).await {
            Ok(characteristics) => characteristics,
            Err(e) => {
                self.stop_tasks();
                self.connected.store(false, Ordering::SeqCst);
                if let Err(te) = release(&peripheral, &subscribed).await {
                    debug!(error = %te, "teardown after failed handshake");
                }
                return Err(e);
            }
        };

        let device = self.config.device_addr.clone();
        info!(device = %device, subscribed = subscribed.len(), "vehicle connected");
        self.link = Some(Link {
            peripheral,
            characteristics,
            subscribed,
        });
        if let Err(e) = self.events.post(SOURCE, EventPayload::Connected { device }) {
            debug!(error = %e, "connect event dropped");
        }
        Ok(())
    }

    async fn send_command(&mut self, command: &MotorCommand) -> Result<(), JuniorError> {
        let link = match &self.link {
            Some(link) if self.connected.load(Ordering::SeqCst) => link,
            _ => return Err(JuniorError::NotConnected(TRANSPORT.to_string())),
        };

        let mut first_error = None;
        for write in codec::encode_command(command) {
            let uuid = self.config.characteristics.command(write.role);
            let result = match link.characteristics.get(&uuid) {
                Some(c) => link
                    .peripheral
                    .write(c, &write.bytes, WriteType::WithResponse)
                    .await
                    .map_err(transport_err),
                None => Err(JuniorError::Transport {
                    transport: TRANSPORT.to_string(),
                    details: format!("{} characteristic missing", write.role.as_str()),
                }),
            };
            if let Err(e) = result {
                debug!(role = write.role.as_str(), error = %e, "command write failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn poll_telemetry(&mut self) -> Result<Vec<TelemetryReading>, JuniorError> {
        if self.config.telemetry == TelemetryMode::Notify {
            return Ok(Vec::new());
        }
        let Some(link) = &self.link else {
            return Err(JuniorError::NotConnected(TRANSPORT.to_string()));
        };

        let mut batch = Vec::new();
        for field in TelemetryField::ALL {
            // The magnetometer only reports through notifications.
            if matches!(
                field,
                TelemetryField::MagX | TelemetryField::MagY | TelemetryField::MagZ
            ) {
                continue;
            }
            match self.read_field(link, field).await {
                Ok(Some(reading)) => batch.push(reading),
                Ok(None) => {}
                Err(e) => warn!(%field, error = %e, "telemetry read skipped"),
            }
        }
        Ok(batch)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) -> Result<(), JuniorError> {
        self.stop_tasks();
        self.connected.store(false, Ordering::SeqCst);
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        release(&link.peripheral, &link.subscribed)
            .await
            .map_err(transport_err)?;
        info!("vehicle disconnected");
        Ok(())
    }
}

impl Drop for BleSession {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// Clear `connected` and post [`EventPayload::Disconnected`] on the first
/// event matching `is_ours`.
async fn watch_disconnects<S, F>(
    mut stream: S,
    is_ours: F,
    connected: Arc<AtomicBool>,
    events: EventSender,
) where
    S: Stream + Unpin,
    F: Fn(&S::Item) -> bool,
{
    while let Some(event) = stream.next().await {
        if is_ours(&event) {
            connected.store(false, Ordering::SeqCst);
            warn!("vehicle disconnected");
            let reason = "peripheral reported disconnect".to_string();
            if let Err(e) = events.post(SOURCE, EventPayload::Disconnected { reason }) {
                debug!(error = %e, "disconnect event dropped");
            }
            break;
        }
    }
}

/// The two peripheral calls needed to give a link back.
#[async_trait]
trait Teardown {
    async fn unsubscribe_from(&self, characteristic: &Characteristic) -> Result<(), btleplug::Error>;
    async fn drop_link(&self) -> Result<(), btleplug::Error>;
}

#[async_trait]
impl Teardown for Peripheral {
    async fn unsubscribe_from(
        &self,
        characteristic: &Characteristic,
    ) -> Result<(), btleplug::Error> {
        self.unsubscribe(characteristic).await
    }

    async fn drop_link(&self) -> Result<(), btleplug::Error> {
        self.disconnect().await
    }
}

/// Unsubscribe everything (best effort) then disconnect.
async fn release<P: Teardown + Sync>(
    peripheral: &P,
    subscribed: &[Characteristic],
) -> Result<(), btleplug::Error> {
    for c in subscribed {
        if let Err(e) = peripheral.unsubscribe_from(c).await {
            debug!(uuid = %c.uuid, error = %e, "unsubscribe failed");
        }
    }
    peripheral.drop_link().await
}

async fn first_adapter() -> Result<Adapter, JuniorError> {
    let manager = Manager::new().await.map_err(connect_err)?;
    manager
        .adapters()
        .await
        .map_err(connect_err)?
        .into_iter()
        .next()
        .ok_or_else(|| JuniorError::Connect {
            transport: TRANSPORT.to_string(),
            details: "no Bluetooth adapter found".to_string(),
        })
}

/// Case-insensitive match against the MAC address or, where the platform
/// hides it (macOS), the peripheral id.
pub fn address_matches(address: &str, platform_id: &str, wanted: &str) -> bool {
    let wanted = wanted.trim();
    !wanted.is_empty()
        && (address.eq_ignore_ascii_case(wanted) || platform_id.eq_ignore_ascii_case(wanted))
}

fn connect_err(e: btleplug::Error) -> JuniorError {
    JuniorError::Connect {
        transport: TRANSPORT.to_string(),
        details: e.to_string(),
    }
}

fn transport_err(e: btleplug::Error) -> JuniorError {
    JuniorError::Transport {
        transport: TRANSPORT.to_string(),
        details: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::event_queue;

    #[test]
    fn address_match_ignores_case() {
        assert!(address_matches("AA:BB:CC:DD:EE:FF", "", "aa:bb:cc:dd:ee:ff"));
        assert!(address_matches("00:00:00:00:00:00", "PeripheralId(1234)", "peripheralid(1234)"));
        assert!(!address_matches("AA:BB:CC:DD:EE:FF", "", "AA:BB:CC:DD:EE:00"));
        assert!(!address_matches("", "", "  "));
    }

    #[tokio::test]
    async fn commands_before_connect_are_rejected() {
        let (tx, _rx) = event_queue(8);
        let mut session = BleSession::new(BleConfig::default(), tx);
        assert!(!session.is_connected());
        let err = session
            .send_command(&MotorCommand::stop())
            .await
            .unwrap_err();
        assert_eq!(err, JuniorError::NotConnected("ble".to_string()));
    }

    #[tokio::test]
    async fn notify_mode_poll_is_empty_and_disconnect_is_idempotent() {
        let (tx, _rx) = event_queue(8);
        let mut session = BleSession::new(BleConfig::default(), tx);
        assert_eq!(session.telemetry_mode(), TelemetryMode::Notify);
        assert!(session.poll_telemetry().await.unwrap().is_empty());
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn poll_mode_without_link_reports_not_connected() {
        let (tx, _rx) = event_queue(8);
        let config = BleConfig {
            telemetry: TelemetryMode::Poll,
            ..BleConfig::default()
        };
        let mut session = BleSession::new(config, tx);
        assert!(matches!(
            session.poll_telemetry().await,
            Err(JuniorError::NotConnected(_))
        ));
    }

    struct FakePeripheral {
        calls: std::sync::Mutex<Vec<String>>,
        fail_unsubscribe: bool,
    }

    impl FakePeripheral {
        fn new(fail_unsubscribe: bool) -> Self {
            Self {
                calls: std::sync::Mutex::new(Vec::new()),
                fail_unsubscribe,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Teardown for FakePeripheral {
        async fn unsubscribe_from(&self, c: &Characteristic) -> Result<(), btleplug::Error> {
            self.calls.lock().unwrap().push(format!("unsubscribe {}", c.uuid));
            if self.fail_unsubscribe {
                return Err(btleplug::Error::NotConnected);
            }
            Ok(())
        }

        async fn drop_link(&self) -> Result<(), btleplug::Error> {
            self.calls.lock().unwrap().push("disconnect".to_string());
            Ok(())
        }
    }

    fn notify_characteristic(slot: u128) -> Characteristic {
        Characteristic {
            uuid: Uuid::from_u128(slot),
            service_uuid: Uuid::nil(),
            properties: CharPropFlags::NOTIFY,
            descriptors: std::collections::BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn release_unsubscribes_then_disconnects() {
        let fake = FakePeripheral::new(false);
        let subscribed = [notify_characteristic(4), notify_characteristic(16)];
        release(&fake, &subscribed).await.unwrap();
        assert_eq!(
            fake.calls(),
            vec![
                format!("unsubscribe {}", Uuid::from_u128(4)),
                format!("unsubscribe {}", Uuid::from_u128(16)),
                "disconnect".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn release_disconnects_even_if_unsubscribe_fails() {
        let fake = FakePeripheral::new(true);
        release(&fake, &[notify_characteristic(7)]).await.unwrap();
        assert_eq!(fake.calls().last().map(String::as_str), Some("disconnect"));
    }

    #[tokio::test]
    async fn release_with_nothing_subscribed_still_disconnects() {
        let fake = FakePeripheral::new(false);
        release(&fake, &[]).await.unwrap();
        assert_eq!(fake.calls(), vec!["disconnect".to_string()]);
    }

    #[tokio::test]
    async fn immediate_disconnect_clears_flag_raised_before_watching() {
        let (tx, mut rx) = event_queue(8);
        let connected = Arc::new(AtomicBool::new(true));
        let stream = futures_util::stream::iter([1u8, 2, 3]);
        watch_disconnects(stream, |n: &u8| *n == 1, Arc::clone(&connected), tx).await;

        assert!(!connected.load(Ordering::SeqCst));
        let events = rx.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].payload, EventPayload::Disconnected { .. }));
    }

    #[tokio::test]
    async fn unrelated_events_leave_link_up() {
        let (tx, mut rx) = event_queue(8);
        let connected = Arc::new(AtomicBool::new(true));
        let stream = futures_util::stream::iter([5u8, 6]);
        watch_disconnects(stream, |n: &u8| *n == 1, Arc::clone(&connected), tx).await;

        assert!(connected.load(Ordering::SeqCst));
        assert!(rx.drain().is_empty());
    }
}
