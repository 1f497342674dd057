// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk Scan — scanner discovery, exclusive session orchestration, and
// strip-wise page reassembly.  This crate bridges between the core domain
// types defined in `scanwerk-core` and the underlying device-access layer
// (vendor/OS scanner driver), which it consumes through the event-driven
// traits in [`backend`].

pub mod backend;
pub mod band;
pub mod discovery;
pub mod negotiate;
pub mod session;

pub use backend::{DeviceBackend, DeviceEvent, DeviceSession, DiscoveryEvent, UnitCapabilities};
pub use band::{BandAssembler, IntoDynamicImage};
pub use discovery::ScannerDiscovery;
pub use negotiate::{NegotiatedSettings, ScanArea, negotiate};
pub use session::{PageStream, ScanManager, SessionState};
