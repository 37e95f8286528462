//! `junior-runtime` – the tick loop that drives the vehicle.
//!
//! # Modules
//!
//! - [`session_loop`] – [`SessionLoop`][session_loop::SessionLoop]: samples
//!   the operator's input, forwards commands through a
//!   [`TransportSession`][junior_middleware::TransportSession] and folds
//!   telemetry into the [`VehicleState`][junior_types::VehicleState] it owns.
//! - [`link_guard`] – [`LinkGuard`][link_guard::LinkGuard]: counts
//!   consecutive disconnected ticks and says when to give up.
//! - [`obstacle_guard`] – [`ObstacleGuard`][obstacle_guard::ObstacleGuard]:
//!   optional ultrasonic stop for forward motion.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional file output and OTLP export.

pub mod link_guard;
pub mod obstacle_guard;
pub mod session_loop;
pub mod telemetry;

pub use link_guard::LinkGuard;
pub use obstacle_guard::ObstacleGuard;
pub use session_loop::{LoopPhase, SessionConfig, SessionLoop, StopReason};
pub use telemetry::{TracerProviderGuard, init_tracing};
