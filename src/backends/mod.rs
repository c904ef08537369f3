// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! # Modules
//!
//! - [`camera`]: Device enumeration, capture streams and the V4L2 and
//!   virtual (still image) providers

pub mod camera;
