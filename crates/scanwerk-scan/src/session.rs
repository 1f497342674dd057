// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner session state machine.
//
// One capture session walks Idle → SessionPending → DeviceNotReady →
// Ready → UnitSelectionPending → Capturing → Closing, reacting to the
// closed set of events the device layer delivers.  A busy device is not an
// error: the session loops in SessionPending until the holder releases it
// or the overall deadline fires.  The single deadline covers the entire
// open → ready → capture lifecycle, not each phase individually.
//
// Pages are pulled, not pushed: `PageStream::next_page` drives the event
// loop inline on the caller's task, so a slow consumer naturally stalls
// strip delivery rather than buffering unboundedly.  Exactly one session
// is in flight per manager — `open_and_capture` borrows the manager
// mutably for as long as the stream lives, so the borrow checker enforces
// the invariant rather than a runtime convention.

use std::marker::PhantomData;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{AssembledImage, DeviceHandle, ScanConfig, UnitKind};

use crate::backend::{DeviceBackend, DeviceEvent, DeviceSession, OpenFailure};
use crate::band::BandAssembler;
use crate::discovery::ScannerDiscovery;
use crate::negotiate::negotiate;

/// Lifecycle states of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session in flight.
    Idle,
    /// Session-open requested; a busy device loops here until it becomes
    /// available or the deadline fires.
    SessionPending,
    /// Session open, device still warming up.  Capture units must not be
    /// touched before `DeviceReady`.
    DeviceNotReady,
    /// Device ready; capture units are enumerable.
    Ready,
    /// Unit selection requested, waiting for its capabilities.
    UnitSelectionPending,
    /// Strips are flowing.
    Capturing,
    /// Session close requested.
    Closing,
    /// Absorbing error state; reached from any state on fatal failure.
    Failed,
}

/// Orchestrates discovery and capture sessions over one device backend.
pub struct ScanManager {
    backend: Box<dyn DeviceBackend>,
    discovery: ScannerDiscovery,
}

impl ScanManager {
    pub fn new(backend: Box<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            discovery: ScannerDiscovery::new(),
        }
    }

    /// Collect discovery events for `timeout` and return the scanners
    /// present at expiry.  See [`ScannerDiscovery::discover`].
    pub async fn discover(&mut self, timeout: Duration) -> Result<Vec<DeviceHandle>> {
        self.discovery.discover(self.backend.as_mut(), timeout).await
    }

    /// Snapshot of the scanners currently present.
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.discovery.devices()
    }

    /// The first discovered scanner, or `NoDeviceFound`.
    pub fn first_device(&self) -> Result<DeviceHandle> {
        self.discovery.first_device()
    }

    /// Look up a discovered scanner by display name.
    pub fn device_named(&self, name: &str) -> Result<DeviceHandle> {
        self.discovery.device_named(name)
    }

    /// Open a session on `device` and capture pages until the device
    /// reports completion.
    ///
    /// The session-open request is issued before this returns; the state
    /// machine then advances as [`PageStream::next_page`] is polled.
    /// Dropping the stream early tears the session down, issuing a
    /// hardware cancel only if capture had not already completed.
    #[instrument(skip_all, fields(device = %device.id, name = %device.name))]
    pub fn open_and_capture<'a>(
        &'a mut self,
        device: &DeviceHandle,
        config: &ScanConfig,
        timeout: Duration,
    ) -> Result<PageStream<'a>> {
        let mut control = self.backend.connect(device)?;
        let events = control.take_events().ok_or_else(|| {
            ScanwerkError::Session("device event channel already taken".into())
        })?;

        info!(timeout_ms = timeout.as_millis() as u64, "opening scanner session");
        control.request_open_session();

        Ok(PageStream {
            session: ScanSession {
                control,
                events,
                config: config.clone(),
                state: SessionState::SessionPending,
                deadline: Instant::now() + timeout,
                assembler: BandAssembler::new(),
                capture_completed: false,
                close_requested: false,
                done: false,
            },
            finished: false,
            _manager: PhantomData,
        })
    }

    /// Capture exactly one page.
    ///
    /// Resolves as soon as the first complete page is assembled; the rest
    /// of the transfer is abandoned (hardware cancel, then a normal
    /// session close).
    #[instrument(skip_all, fields(device = %device.id))]
    pub async fn capture_single_page(
        &mut self,
        device: &DeviceHandle,
        config: &ScanConfig,
        timeout: Duration,
    ) -> Result<AssembledImage> {
        let mut stream = self.open_and_capture(device, config, timeout)?;
        match stream.next_page().await {
            Some(Ok(image)) => Ok(image),
            Some(Err(err)) => Err(err),
            None => Err(ScanwerkError::ImageAssembly(
                "capture finished without delivering a page".into(),
            )),
        }
    }
}

/// Cancellable pull-based sequence of assembled pages.
///
/// Holds the manager's mutable borrow for its lifetime, so a second
/// capture cannot start until this stream is dropped.
pub struct PageStream<'a> {
    session: ScanSession,
    finished: bool,
    _manager: PhantomData<&'a mut ScanManager>,
}

impl PageStream<'_> {
    /// Drive the session until the next page completes.
    ///
    /// Returns `None` once the device reported completion and the final
    /// page was delivered; returns `Some(Err(_))` exactly once on fatal
    /// failure or timeout, after which the stream is finished.
    pub async fn next_page(&mut self) -> Option<Result<AssembledImage>> {
        if self.finished {
            return None;
        }
        match self.session.run_until_page().await {
            Ok(Some(image)) => Some(Ok(image)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }

    /// Current state of the underlying session.
    pub fn state(&self) -> SessionState {
        self.session.state
    }
}

impl Drop for PageStream<'_> {
    fn drop(&mut self) {
        // Consumer walked away (or the stream finished): abandon is
        // idempotent and only cancels capture that is still running.
        self.session.abandon();
    }
}

/// Internal per-session state driven by device events.
struct ScanSession {
    control: Box<dyn DeviceSession>,
    events: mpsc::UnboundedReceiver<DeviceEvent>,
    config: ScanConfig,
    state: SessionState,
    /// Single overall deadline for open → ready → capture.
    deadline: Instant,
    assembler: BandAssembler,
    /// The device reported capture completion (with or without error);
    /// a hardware cancel must not race a finished transfer.
    capture_completed: bool,
    close_requested: bool,
    /// Terminal: completion handled, nothing more to pull.
    done: bool,
}

impl ScanSession {
    /// Pump device events until a page completes, the session finishes, or
    /// a fatal error / timeout occurs.
    async fn run_until_page(&mut self) -> Result<Option<AssembledImage>> {
        loop {
            if self.done {
                return Ok(None);
            }

            let event = tokio::select! {
                _ = tokio::time::sleep_until(self.deadline) => {
                    warn!(state = ?self.state, "session deadline elapsed");
                    self.teardown();
                    return Err(ScanwerkError::Timeout);
                }
                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                self.teardown();
                return Err(ScanwerkError::Session(
                    "device event channel closed unexpectedly".into(),
                ));
            };

            match self.handle_event(event) {
                Ok(Some(page)) => return Ok(Some(page)),
                Ok(None) => {}
                Err(err) => {
                    self.teardown();
                    return Err(err);
                }
            }
        }
    }

    /// Apply one device event to the state machine.  Returns a page when
    /// one completed.
    fn handle_event(&mut self, event: DeviceEvent) -> Result<Option<AssembledImage>> {
        match event {
            DeviceEvent::SessionOpened(Ok(())) => {
                if self.state == SessionState::SessionPending {
                    self.transition(SessionState::DeviceNotReady);
                } else {
                    warn!(state = ?self.state, "unexpected session-opened event");
                }
                Ok(None)
            }
            DeviceEvent::SessionOpened(Err(OpenFailure::Busy)) => {
                // Recoverable: stay pending, wait for BecameAvailable.
                debug!("device busy, waiting for it to become available");
                Ok(None)
            }
            DeviceEvent::SessionOpened(Err(OpenFailure::Fatal(msg))) => {
                Err(ScanwerkError::Session(format!("session open failed: {msg}")))
            }
            DeviceEvent::BecameAvailable => {
                if self.state == SessionState::SessionPending {
                    debug!("device became available, retrying session open");
                    self.control.request_open_session();
                }
                Ok(None)
            }
            DeviceEvent::DeviceReady => {
                if self.state == SessionState::DeviceNotReady {
                    self.transition(SessionState::Ready);
                    // Units are enumerable only from this point on.
                    self.control.request_select_unit(self.config.unit);
                    self.transition(SessionState::UnitSelectionPending);
                } else {
                    warn!(state = ?self.state, "unexpected device-ready event");
                }
                Ok(None)
            }
            DeviceEvent::UnitSelected(Ok(caps)) => {
                if self.state != SessionState::UnitSelectionPending {
                    warn!(state = ?self.state, "unexpected unit-selected event");
                    return Ok(None);
                }
                if self.config.unit == UnitKind::DocumentFeeder && !caps.paper_loaded {
                    return Err(ScanwerkError::NoPagesInFeeder);
                }

                let settings = negotiate(&self.config, &caps)?;
                self.control.apply_settings(&settings);
                self.control.set_memory_transfer();
                self.control.request_start_capture();
                self.transition(SessionState::Capturing);
                Ok(None)
            }
            DeviceEvent::UnitSelected(Err(msg)) => {
                Err(ScanwerkError::Session(format!("unit selection failed: {msg}")))
            }
            DeviceEvent::Strip(strip) => {
                if self.state != SessionState::Capturing {
                    warn!(state = ?self.state, "strip outside capture, dropping");
                    return Ok(None);
                }
                if self.assembler.starts_new_page(&strip) {
                    // Row regression: the previous page is complete.
                    let page = self.assembler.assemble_image();
                    self.assembler.receive_strip(&strip);
                    debug!("page boundary inferred from row regression");
                    return Ok(page);
                }
                self.assembler.receive_strip(&strip);
                Ok(None)
            }
            DeviceEvent::CaptureDone { error: None } => {
                self.capture_completed = true;
                let page = self.assembler.assemble_image();
                self.close();
                self.done = true;
                match page {
                    Some(page) => {
                        info!("capture completed");
                        Ok(Some(page))
                    }
                    // Completion without a single strip is a device-layer
                    // logic fault, not a user error.
                    None => Err(ScanwerkError::ImageAssembly(
                        "capture reported success without delivering any strips".into(),
                    )),
                }
            }
            DeviceEvent::CaptureDone { error: Some(msg) } => {
                // The transfer is over even though it failed; teardown
                // must not issue a hardware cancel on top of it.
                self.capture_completed = true;
                Err(ScanwerkError::Capture(msg))
            }
            DeviceEvent::SessionClosed => {
                if self.state == SessionState::Closing {
                    self.transition(SessionState::Idle);
                }
                Ok(None)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Request session close once.
    fn close(&mut self) {
        if !self.close_requested {
            self.close_requested = true;
            self.control.request_close_session();
        }
        if self.state != SessionState::Failed {
            self.transition(SessionState::Closing);
        }
    }

    /// Fatal-path teardown: cancel in-flight capture, close the session,
    /// absorb into `Failed`.
    fn teardown(&mut self) {
        if self.state == SessionState::Capturing && !self.capture_completed {
            self.control.request_cancel_capture();
        }
        self.close();
        self.transition(SessionState::Failed);
        self.done = true;
    }

    /// Consumer-side abandonment (stream dropped).  Idempotent; issues a
    /// hardware cancel only when capture is still running.
    fn abandon(&mut self) {
        if self.done && self.close_requested {
            return;
        }
        if self.state == SessionState::Capturing && !self.capture_completed {
            info!("page stream dropped mid-capture, cancelling");
            self.control.request_cancel_capture();
        }
        self.close();
        self.done = true;
    }
}
