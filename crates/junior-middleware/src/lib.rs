//! `junior-middleware` – everything that talks to the vehicle.
//!
//! # Modules
//!
//! - [`codec`] – byte-level encoding of motor commands and decoding of
//!   telemetry characteristics.
//! - [`event_queue`] – bounded queue carrying [`Event`][junior_types::Event]s
//!   from background transport tasks to the session loop.
//! - [`transport`] – the [`TransportSession`] trait.
//! - [`ble`] – [`BleSession`], the btleplug-backed transport, plus device scan.
//! - [`http`] – [`HttpSession`], the Wi-Fi firmware's query-string transport.
//! - [`sim_transport`] – [`SimTransport`], an in-process vehicle for tests and
//!   dry runs.
//! - [`camera_client`] – [`HttpCamera`], JPEG stills and MJPEG frames.
//! - [`config`] – serde-backed settings for the BLE and HTTP transports.

pub mod ble;
pub mod camera_client;
pub mod codec;
pub mod config;
pub mod event_queue;
pub mod http;
pub mod sim_transport;
pub mod transport;

pub use ble::{BleSession, DiscoveredDevice};
pub use camera_client::HttpCamera;
pub use config::{BleCharacteristics, BleConfig, HttpConfig, HttpRoutes};
pub use event_queue::{DEFAULT_QUEUE_CAPACITY, EventReceiver, EventSender, event_queue};
pub use http::{Direction, HttpCommand, HttpSession};
pub use sim_transport::{SimHandle, SimTransport};
pub use transport::TransportSession;
