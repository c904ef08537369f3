// SPDX-License-Identifier: MPL-2.0

//! Camera Scanner - barcode and QR scanning from a live camera feed
//!
//! The core is a scan session controller that owns a capture device, runs a
//! decode loop against it and survives concurrent open, close and camera
//! switch requests without leaking devices or delivering stale results.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: Session state machine, controller task and resources
//! - [`backends`]: Camera providers (V4L2, still-image virtual camera)
//! - [`frame_processor`]: Decoders turning frames into codes
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let (host, mut events) = tokio::sync::mpsc::unbounded_channel();
//! let controller = ScanSessionController::spawn(
//!     provider,
//!     Box::new(QrDecoder::default()),
//!     FrameSink::new(),
//!     Arc::new(host),
//!     ControllerConfig::default(),
//! );
//! controller.open(None);
//! if let Some(HostEvent::Result(result)) = events.recv().await {
//!     println!("{}", result.text);
//! }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame_processor;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use errors::{AppError, AppResult, ScanError};
pub use frame_processor::{Symbology, SymbologyFilter};
pub use session::{HostEvent, ScanResult, ScanSessionController, SessionHost, SessionState};
