// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device-access layer interface.
//
// The underlying vendor/OS scanner driver speaks a strictly ordered,
// callback-driven protocol: requests are fired asynchronously and their
// outcomes arrive later as events on a single serialized delivery context.
// This module models that protocol as two traits — `DeviceBackend` for
// discovery and connection, `DeviceSession` for per-device control — plus
// the event enums they deliver.  The session state machine in
// [`crate::session`] is written entirely against these traits, so tests
// (and other backends) can stand in for real hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{DeviceClass, DeviceHandle, DeviceId, Strip, UnitKind};

use crate::negotiate::NegotiatedSettings;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events delivered by the discovery feed.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A device appeared.  The handle is valid until the matching
    /// `DeviceRemoved` arrives.
    DeviceAdded {
        handle: DeviceHandle,
        class: DeviceClass,
    },
    /// A device disappeared; its handle must not be used again.
    DeviceRemoved { id: DeviceId },
}

/// Why a session-open request did not succeed.
#[derive(Debug, Clone)]
pub enum OpenFailure {
    /// Another process holds the device.  Not fatal: the device layer will
    /// deliver `BecameAvailable` when the other session ends.
    Busy,
    /// The device layer rejected the open outright.
    Fatal(String),
}

/// Events delivered on a device session's event channel.
///
/// The device layer delivers these on one serialized context; ordering
/// between events is preserved by the channel.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Outcome of a `request_open_session`.
    SessionOpened(std::result::Result<(), OpenFailure>),
    /// The device finished warming up.  Capture units are enumerable only
    /// after this event.
    DeviceReady,
    /// A previously busy device was released by its other holder.
    BecameAvailable,
    /// Outcome of a `request_select_unit`, carrying the selected unit's
    /// reported capabilities on success.
    UnitSelected(std::result::Result<UnitCapabilities, String>),
    /// One strip of page data.
    Strip(Strip),
    /// Capture finished.  `error` is `None` for normal completion.
    CaptureDone { error: Option<String> },
    /// Outcome of a `request_close_session`.
    SessionClosed,
}

/// Capabilities reported by a selected capture unit.
///
/// The feeder-specific flags (`duplex_*`, `paper_loaded`) are meaningful
/// only when `kind` is [`UnitKind::DocumentFeeder`].
#[derive(Debug, Clone)]
pub struct UnitCapabilities {
    pub kind: UnitKind,
    /// Resolutions the unit accepts, in dpi.
    pub supported_resolutions: Vec<u32>,
    /// Resolutions the unit performs best at; a subset of supported.
    pub preferred_resolutions: Vec<u32>,
    pub bit_depths: Vec<u32>,
    pub pixel_encodings: Vec<scanwerk_core::PixelEncoding>,
    /// Document-type tokens the unit understands (empty when the unit has
    /// no document-type concept).
    pub document_type_tokens: Vec<String>,
    /// Physical scan-surface size in inches (width, height).
    pub physical_size_inches: (f64, f64),
    pub duplex_supported: bool,
    pub duplex_enabled: bool,
    pub paper_loaded: bool,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Entry point into the device-access layer.
pub trait DeviceBackend: Send {
    /// Start the discovery feed if it is not already running and return a
    /// receiver over its events.
    ///
    /// The feed stays warm after the receiver is dropped: stopping it has
    /// been observed to invalidate in-flight device handles on some
    /// drivers, so it is only torn down via [`stop_discovery`] at process
    /// exit.
    ///
    /// [`stop_discovery`]: DeviceBackend::stop_discovery
    fn start_discovery(&mut self) -> mpsc::UnboundedReceiver<DiscoveryEvent>;

    /// Tear down the discovery feed.  Must not be called while capture
    /// sessions may still occur.
    fn stop_discovery(&mut self);

    /// Connect to a discovered device, yielding a session control object.
    /// Connecting does not open a session; call
    /// [`DeviceSession::request_open_session`] for that.
    fn connect(&mut self, device: &DeviceHandle) -> Result<Box<dyn DeviceSession>>;
}

/// Asynchronous control surface for one device.
///
/// The `request_*` methods fire the underlying protocol request and return
/// immediately; outcomes arrive as [`DeviceEvent`]s on the channel obtained
/// from [`take_events`](DeviceSession::take_events).
pub trait DeviceSession: Send {
    /// Take the event receiver.  Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>>;

    fn request_open_session(&self);
    fn request_close_session(&self);
    /// Valid only after `DeviceReady` has been delivered; selecting a unit
    /// earlier is undefined on the device layer.
    fn request_select_unit(&self, kind: UnitKind);
    fn apply_settings(&self, settings: &NegotiatedSettings);
    /// Switch the transfer mode to memory-based strip delivery.
    fn set_memory_transfer(&self);
    fn request_start_capture(&self);
    fn request_cancel_capture(&self);
}

// ---------------------------------------------------------------------------
// Scripted test double
// ---------------------------------------------------------------------------

/// A request observed by a [`ScriptedSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    OpenSession,
    CloseSession,
    SelectUnit(UnitKind),
    ApplySettings(NegotiatedSettings),
    SetMemoryTransfer,
    StartCapture,
    CancelCapture,
}

impl SessionRequest {
    fn kind(&self) -> RequestKind {
        match self {
            Self::OpenSession => RequestKind::OpenSession,
            Self::CloseSession => RequestKind::CloseSession,
            Self::SelectUnit(_) => RequestKind::SelectUnit,
            Self::ApplySettings(_) => RequestKind::ApplySettings,
            Self::SetMemoryTransfer => RequestKind::SetMemoryTransfer,
            Self::StartCapture => RequestKind::StartCapture,
            Self::CancelCapture => RequestKind::CancelCapture,
        }
    }
}

/// Request discriminant used to key scripted reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    OpenSession,
    CloseSession,
    SelectUnit,
    ApplySettings,
    SetMemoryTransfer,
    StartCapture,
    CancelCapture,
}

/// One scripted event, delivered immediately or after a delay.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Now(DeviceEvent),
    After(Duration, DeviceEvent),
}

/// In-memory [`DeviceSession`] that plays back scripted reactions.
///
/// Each time a request of kind `K` is observed, the next scripted reaction
/// registered for `K` is popped and its events are delivered on the event
/// channel.  All observed requests are recorded for later assertion.
/// Serves the same role for session tests that `JobQueue::open_in_memory`
/// serves for persistence tests.
pub struct ScriptedSession {
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<DeviceEvent>>,
    reactions: Mutex<HashMap<RequestKind, VecDeque<Vec<ScriptedReply>>>>,
    requests: Arc<Mutex<Vec<SessionRequest>>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Some(events_rx),
            reactions: Mutex::new(HashMap::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register the next reaction for a request kind.  Reactions for the
    /// same kind are consumed in registration order.
    pub fn on(&self, kind: RequestKind, replies: Vec<ScriptedReply>) {
        self.reactions
            .lock()
            .expect("reaction map lock poisoned")
            .entry(kind)
            .or_default()
            .push_back(replies);
    }

    /// Deliver an unsolicited event immediately.
    pub fn push_event(&self, event: DeviceEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Shared handle to the recorded request log.  Clone it before handing
    /// the session to a backend so assertions survive the move.
    pub fn request_log(&self) -> Arc<Mutex<Vec<SessionRequest>>> {
        Arc::clone(&self.requests)
    }

    fn record(&self, request: SessionRequest) {
        let kind = request.kind();
        self.requests
            .lock()
            .expect("request log lock poisoned")
            .push(request);

        let replies = self
            .reactions
            .lock()
            .expect("reaction map lock poisoned")
            .get_mut(&kind)
            .and_then(|queue| queue.pop_front());

        let Some(replies) = replies else { return };
        for reply in replies {
            match reply {
                ScriptedReply::Now(event) => {
                    let _ = self.events_tx.send(event);
                }
                ScriptedReply::After(delay, event) => {
                    let tx = self.events_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(event);
                    });
                }
            }
        }
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSession for ScriptedSession {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.events_rx.take()
    }

    fn request_open_session(&self) {
        self.record(SessionRequest::OpenSession);
    }

    fn request_close_session(&self) {
        self.record(SessionRequest::CloseSession);
    }

    fn request_select_unit(&self, kind: UnitKind) {
        self.record(SessionRequest::SelectUnit(kind));
    }

    fn apply_settings(&self, settings: &NegotiatedSettings) {
        self.record(SessionRequest::ApplySettings(settings.clone()));
    }

    fn set_memory_transfer(&self) {
        self.record(SessionRequest::SetMemoryTransfer);
    }

    fn request_start_capture(&self) {
        self.record(SessionRequest::StartCapture);
    }

    fn request_cancel_capture(&self) {
        self.record(SessionRequest::CancelCapture);
    }
}

/// In-memory [`DeviceBackend`] with a scripted discovery feed and a queue
/// of sessions handed out by `connect`.
pub struct ScriptedBackend {
    /// Discovery events with their delivery delays, replayed per
    /// `start_discovery` call.
    discovery_script: Vec<(Duration, DiscoveryEvent)>,
    sessions: VecDeque<ScriptedSession>,
    discovery_running: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            discovery_script: Vec::new(),
            sessions: VecDeque::new(),
            discovery_running: false,
        }
    }

    /// Script a discovery event delivered `delay` after the feed starts.
    pub fn announce(&mut self, delay: Duration, event: DiscoveryEvent) {
        self.discovery_script.push((delay, event));
    }

    /// Queue a session to be handed out by the next `connect` call.
    pub fn queue_session(&mut self, session: ScriptedSession) {
        self.sessions.push_back(session);
    }

    pub fn discovery_running(&self) -> bool {
        self.discovery_running
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for ScriptedBackend {
    fn start_discovery(&mut self) -> mpsc::UnboundedReceiver<DiscoveryEvent> {
        self.discovery_running = true;
        let (tx, rx) = mpsc::unbounded_channel();
        for (delay, event) in self.discovery_script.clone() {
            if delay.is_zero() {
                let _ = tx.send(event);
            } else {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(event);
                });
            }
        }
        rx
    }

    fn stop_discovery(&mut self) {
        self.discovery_running = false;
    }

    fn connect(&mut self, device: &DeviceHandle) -> Result<Box<dyn DeviceSession>> {
        debug!(device = %device.id, name = %device.name, "scripted connect");
        self.sessions
            .pop_front()
            .map(|session| Box::new(session) as Box<dyn DeviceSession>)
            .ok_or_else(|| {
                ScanwerkError::Session(format!("no scripted session for device {}", device.id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_session_replays_reactions_in_order() {
        let mut session = ScriptedSession::new();
        session.on(
            RequestKind::OpenSession,
            vec![ScriptedReply::Now(DeviceEvent::SessionOpened(Err(
                OpenFailure::Busy,
            )))],
        );
        session.on(
            RequestKind::OpenSession,
            vec![ScriptedReply::Now(DeviceEvent::SessionOpened(Ok(())))],
        );

        let mut events = session.take_events().expect("events taken once");
        session.request_open_session();
        session.request_open_session();

        assert!(matches!(
            events.recv().await,
            Some(DeviceEvent::SessionOpened(Err(OpenFailure::Busy)))
        ));
        assert!(matches!(
            events.recv().await,
            Some(DeviceEvent::SessionOpened(Ok(())))
        ));
    }

    #[tokio::test]
    async fn take_events_yields_once() {
        let mut session = ScriptedSession::new();
        assert!(session.take_events().is_some());
        assert!(session.take_events().is_none());
    }

    #[tokio::test]
    async fn request_log_records_payloads() {
        let mut session = ScriptedSession::new();
        let log = session.request_log();

        session.request_select_unit(UnitKind::DocumentFeeder);
        session.request_start_capture();
        // Dropping the control object must not lose the log.
        let _ = session.take_events();
        drop(session);

        let recorded = log.lock().expect("log lock");
        assert_eq!(recorded[0], SessionRequest::SelectUnit(UnitKind::DocumentFeeder));
        assert_eq!(recorded[1], SessionRequest::StartCapture);
    }

    #[tokio::test]
    async fn backend_connect_exhausts_queued_sessions() {
        let mut backend = ScriptedBackend::new();
        backend.queue_session(ScriptedSession::new());

        let device = DeviceHandle {
            id: DeviceId::new(),
            name: "Test Scanner".into(),
            connection: scanwerk_core::ConnectionMask::USB,
            last_seen: chrono::Utc::now(),
        };

        assert!(backend.connect(&device).is_ok());
        assert!(matches!(
            backend.connect(&device),
            Err(ScanwerkError::Session(_))
        ));
    }
}
