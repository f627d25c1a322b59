#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Invernadero 🌱
//!
//! A Rust library for monitoring and configuring an Arduino greenhouse controller
//! over Bluetooth Low Energy.
//!
//! The controller exposes a single GATT characteristic. The host writes one-byte
//! tagged request frames to it without response and the controller answers with
//! notifications on the same characteristic.
//!
//! ## Protocol
//!
//! - **Frames**: `[tag][payload]` with the ASCII tags `'V'` (values), `'S'` (settings),
//!   `'I'` (information) and `'W'` (set settings)
//! - **Settings**: 34 bytes, an `i16` light duration in minutes followed by eight `f32`
//!   min/max bounds for light, humidity, soil humidity and temperature
//! - **Values**: 16 bytes, four `f32` readings; a non-finite reading means the
//!   sensor had nothing valid to report
//! - **Information**: 8 bytes, four `i16` per-channel error counters
//! - All numbers are little-endian
//!
//! The firmware needs time between writes, so every write goes through a
//! [`LinkSerializer`] that keeps at most one write in flight and waits a settle
//! delay (200 ms by default) after each one.
//!
//! ## Quick Start
//!
//! ```no_run
//! use invernadero::{GreenhouseSession, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = GreenhouseSession::ble().await?;
//!     let mut state = session.connection_state();
//!
//!     // Connect and wait until the link is up
//!     session.connect("98:D3:31:F5:2A:10");
//!     state.wait_for(|s| s.is_connected()).await?;
//!
//!     // Two hours of light, keep the temperature between 15 and 35 C
//!     session
//!         .set_settings(Settings {
//!             expected_light_minutes: 120,
//!             min_temperature: 15.0,
//!             max_temperature: 35.0,
//!             ..Settings::default()
//!         })
//!         .await?;
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy platform adapter
pub mod ble;
/// Fixed-layout wire encoding
pub mod codec;
/// Error types and handling
pub mod error;
/// Transport traits and write serialization
pub mod link;
/// Operation framing
pub mod protocol;
/// Per-channel reconciliation of sensor samples
pub mod reconcile;
/// Device session state machine
pub mod session;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{BleConnector, BleLink};
pub use codec::WireFormat;
pub use error::{DecodeError, GreenhouseError, Result};
pub use link::{Connector, Link, LinkSerializer, NotificationStream};
pub use protocol::{Frame, Operation, OperationType, Request, Response};
pub use reconcile::reconcile;
pub use session::GreenhouseSession;
pub use types::{
    ConnectionState, Information, SensorChannel, SessionConfig, Settings, Values,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Greenhouse BLE service UUID
///
/// The HM-10 style serial service advertised by the controller's Bluetooth module.
pub const GREENHOUSE_SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/// Greenhouse data characteristic UUID
///
/// Used in both directions: requests are written without response and responses
/// arrive as notifications.
pub const GREENHOUSE_DATA_CHAR_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";
