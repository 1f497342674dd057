// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner discovery over the device layer's add/remove event feed.
//
// The feed also reports cameras and other imaging hardware; only
// scanner-class devices are surfaced.  Once started, the feed is kept warm
// for the life of the process — stopping it invalidates in-flight device
// handles on some drivers, and later sessions rely on handles staying
// valid between a `discover` call and the capture that follows.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{DeviceClass, DeviceHandle, DeviceId};

use crate::backend::{DeviceBackend, DiscoveryEvent};

/// Scanner discovery engine.
///
/// Owns the receiver over the backend's discovery feed and a live map of
/// the scanners currently present, keyed by device identity so duplicate
/// add events are deduplicated automatically.  Removal events prune the
/// map, so a handle is never returned past its removal.
#[derive(Default)]
pub struct ScannerDiscovery {
    /// Warm feed receiver, populated on first use and kept for the life of
    /// the process.
    feed: Option<mpsc::UnboundedReceiver<DiscoveryEvent>>,
    /// Scanners currently present.
    devices: HashMap<DeviceId, DeviceHandle>,
}

impl ScannerDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect discovery events until `timeout` expires, then return the
    /// scanners present at expiry.
    ///
    /// The returned set is live, not a snapshot frozen at start: devices
    /// added or removed during the window are reflected.  The feed keeps
    /// running in the background after this call returns, and a later call
    /// replaces the previously returned set.
    pub async fn discover(
        &mut self,
        backend: &mut dyn DeviceBackend,
        timeout: std::time::Duration,
    ) -> Result<Vec<DeviceHandle>> {
        if self.feed.is_none() {
            info!("starting scanner discovery feed");
            self.feed = Some(backend.start_discovery());
        }

        let deadline = Instant::now() + timeout;
        let feed = self
            .feed
            .as_mut()
            .ok_or_else(|| ScanwerkError::Session("discovery feed unavailable".into()))?;

        loop {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                event = feed.recv() => event,
            };
            match event {
                Some(DiscoveryEvent::DeviceAdded { handle, class }) => {
                    if class == DeviceClass::Scanner {
                        info!(
                            id = %handle.id,
                            name = %handle.name,
                            connection = %handle.connection,
                            "scanner discovered"
                        );
                        let mut handle = handle;
                        handle.last_seen = Utc::now();
                        self.devices.insert(handle.id, handle);
                    } else {
                        debug!(id = %handle.id, ?class, "ignoring non-scanner device");
                    }
                }
                Some(DiscoveryEvent::DeviceRemoved { id }) => {
                    if self.devices.remove(&id).is_some() {
                        info!(%id, "scanner removed");
                    }
                }
                None => {
                    // Feed ended — the backend shut down underneath us.
                    break;
                }
            }
        }

        Ok(self.devices.values().cloned().collect())
    }

    /// Snapshot of the scanners currently present.
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.devices.values().cloned().collect()
    }

    /// The first scanner currently present, if any.
    pub fn first_device(&self) -> Result<DeviceHandle> {
        self.devices
            .values()
            .next()
            .cloned()
            .ok_or(ScanwerkError::NoDeviceFound)
    }

    /// Look up a scanner by display name (case-insensitive).
    pub fn device_named(&self, name: &str) -> Result<DeviceHandle> {
        if self.devices.is_empty() {
            return Err(ScanwerkError::NoDeviceFound);
        }
        self.devices
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ScanwerkError::DeviceNotFound(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use scanwerk_core::ConnectionMask;
    use std::time::Duration;

    fn handle(name: &str) -> DeviceHandle {
        DeviceHandle {
            id: DeviceId::new(),
            name: name.into(),
            connection: ConnectionMask::USB,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn discover_surfaces_only_scanners() {
        let mut backend = ScriptedBackend::new();
        backend.announce(
            Duration::ZERO,
            DiscoveryEvent::DeviceAdded {
                handle: handle("Epson WF-3520"),
                class: DeviceClass::Scanner,
            },
        );
        backend.announce(
            Duration::ZERO,
            DiscoveryEvent::DeviceAdded {
                handle: handle("Webcam"),
                class: DeviceClass::Camera,
            },
        );

        let mut discovery = ScannerDiscovery::new();
        let found = discovery
            .discover(&mut backend, Duration::from_secs(1))
            .await
            .expect("discover");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Epson WF-3520");
    }

    #[tokio::test(start_paused = true)]
    async fn removal_during_the_window_prunes_the_set() {
        let removed = handle("Fujitsu ScanSnap");
        let removed_id = removed.id;

        let mut backend = ScriptedBackend::new();
        backend.announce(
            Duration::ZERO,
            DiscoveryEvent::DeviceAdded {
                handle: removed,
                class: DeviceClass::Scanner,
            },
        );
        backend.announce(
            Duration::from_millis(100),
            DiscoveryEvent::DeviceRemoved { id: removed_id },
        );
        backend.announce(
            Duration::from_millis(200),
            DiscoveryEvent::DeviceAdded {
                handle: handle("Canon LiDE 400"),
                class: DeviceClass::Scanner,
            },
        );

        let mut discovery = ScannerDiscovery::new();
        let found = discovery
            .discover(&mut backend, Duration::from_secs(1))
            .await
            .expect("discover");

        // Present at expiry, not a snapshot frozen at start.
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Canon LiDE 400");
    }

    #[tokio::test(start_paused = true)]
    async fn feed_stays_warm_between_calls() {
        let mut backend = ScriptedBackend::new();
        backend.announce(
            Duration::ZERO,
            DiscoveryEvent::DeviceAdded {
                handle: handle("Brother ADS-1700W"),
                class: DeviceClass::Scanner,
            },
        );

        let mut discovery = ScannerDiscovery::new();
        let first = discovery
            .discover(&mut backend, Duration::from_millis(50))
            .await
            .expect("first discover");
        assert_eq!(first.len(), 1);

        // Second call reuses the warm feed; the device stays present.
        let second = discovery
            .discover(&mut backend, Duration::from_millis(50))
            .await
            .expect("second discover");
        assert_eq!(second.len(), 1);
        assert!(backend.discovery_running());
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_by_name_is_case_insensitive() {
        let mut backend = ScriptedBackend::new();
        backend.announce(
            Duration::ZERO,
            DiscoveryEvent::DeviceAdded {
                handle: handle("Epson WF-3520"),
                class: DeviceClass::Scanner,
            },
        );

        let mut discovery = ScannerDiscovery::new();
        discovery
            .discover(&mut backend, Duration::from_millis(50))
            .await
            .expect("discover");

        assert!(discovery.device_named("epson wf-3520").is_ok());
        assert!(matches!(
            discovery.device_named("HP OfficeJet"),
            Err(ScanwerkError::DeviceNotFound(name)) if name == "HP OfficeJet"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_set_is_no_device_found() {
        let discovery = ScannerDiscovery::new();
        assert!(matches!(
            discovery.first_device(),
            Err(ScanwerkError::NoDeviceFound)
        ));
        assert!(matches!(
            discovery.device_named("anything"),
            Err(ScanwerkError::NoDeviceFound)
        ));
    }
}
