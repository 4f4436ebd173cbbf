//! High-level RTSP client orchestrator.
//!
//! Owns the lifecycle state machine and is the only component issuing
//! RTSP methods. All mutating operations serialize through one session
//! lock; status and frame callbacks are always delivered with no lock
//! held, so sinks may re-register themselves or call
//! [`disconnect`](RtspClient::disconnect) freely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::{ErrorKind, ParseErrorKind, Result, RtspError};
use crate::media::{RtpFrame, TrackKind};
use crate::protocol::sdp::{self, resolve_control};
use crate::protocol::url::RtspUrl;
use crate::session::track::{Track, TrackInfo};
use crate::session::transport::ServerPorts;
use crate::session::{FrameSink, ReconnectParams, SessionState, SinkRegistry, StatusSink};
use crate::transport::ControlChannel;
use crate::transport::udp;

/// Poll interval for cancellable sleeps in the reconnect schedule.
const RECONNECT_QUANTUM: Duration = Duration::from_millis(10);

/// An RTSP client session.
///
/// Cloning yields another handle onto the same session, which is how a
/// frame sink gets a handle it can call `disconnect()` on. The session
/// tears itself down when the last handle is dropped.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use rtsp_client::{RtspClient, TrackKind};
///
/// let client = RtspClient::new();
/// client.set_frame_sink(TrackKind::Video, |frame| {
///     println!("video frame: {} bytes @ {}", frame.len(), frame.timestamp);
/// });
/// if client.connect("rtsp://camera.local/stream", None, None, Duration::from_secs(5)) {
///     client.play();
/// }
/// ```
#[derive(Clone)]
pub struct RtspClient {
    shared: Arc<Shared>,
}

impl Default for RtspClient {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    /// Current lifecycle state; written only alongside the session lock or
    /// from the receiver/reconnect threads on failure transitions.
    state: RwLock<SessionState>,
    session: Mutex<SessionCore>,
    sinks: Arc<SinkRegistry>,
    reconnect: RwLock<ReconnectParams>,
    /// Bumped by disconnect (and drop); outstanding receiver/reconnect
    /// threads belonging to an older epoch stand down silently.
    epoch: AtomicU64,
}

/// Everything guarded by the session lock.
struct SessionCore {
    channel: Option<ControlChannel>,
    tracks: Arc<Vec<Arc<Track>>>,
    target: Option<ConnectTarget>,
    /// Methods advertised by the server's OPTIONS `Public` header.
    supported_methods: Vec<String>,
    receiver: Option<ReceiverHandle>,
}

/// Where to (re)connect: URL with resolved credentials, plus the timeout.
#[derive(Clone)]
struct ConnectTarget {
    url: RtspUrl,
    timeout: Duration,
}

struct ReceiverHandle {
    stop: Arc<std::sync::atomic::AtomicBool>,
    thread: thread::JoinHandle<()>,
}

impl ReceiverHandle {
    fn signal(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Join unless invoked on the receiver thread itself (a sink calling
    /// back into the client), in which case the thread exits on its own
    /// once the stop flag is observed.
    fn join(self) {
        self.signal();
        if thread::current().id() == self.thread.thread().id() {
            return;
        }
        let _ = self.thread.join();
    }
}

/// A queued status notification, delivered after the session lock is
/// released.
type Event = (SessionState, String, Option<ErrorKind>);

impl RtspClient {
    pub fn new() -> Self {
        RtspClient {
            shared: Arc::new(Shared {
                state: RwLock::new(SessionState::Disconnected),
                session: Mutex::new(SessionCore {
                    channel: None,
                    tracks: Arc::new(Vec::new()),
                    target: None,
                    supported_methods: Vec::new(),
                    receiver: None,
                }),
                sinks: Arc::new(SinkRegistry::new()),
                reconnect: RwLock::new(ReconnectParams::default()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Register the frame sink for one track kind. Last write wins and is
    /// observed by the next dispatched frame.
    pub fn set_frame_sink<F>(&self, kind: TrackKind, sink: F)
    where
        F: Fn(RtpFrame) + Send + Sync + 'static,
    {
        let sink: Arc<FrameSink> = Arc::new(sink);
        self.shared.sinks.set_frame_sink(kind, Some(sink));
    }

    pub fn clear_frame_sink(&self, kind: TrackKind) {
        self.shared.sinks.set_frame_sink(kind, None);
    }

    /// Register the status sink receiving lifecycle transitions in order.
    pub fn set_status_sink<F>(&self, sink: F)
    where
        F: Fn(&crate::session::StatusUpdate) + Send + Sync + 'static,
    {
        let sink: Arc<StatusSink> = Arc::new(sink);
        self.shared.sinks.set_status_sink(Some(sink));
    }

    pub fn clear_status_sink(&self) {
        self.shared.sinks.set_status_sink(None);
    }

    /// Configure automatic reconnection. Takes effect on the next failure.
    pub fn set_reconnect_params(&self, params: ReconnectParams) -> Result<()> {
        params.validate()?;
        *self.shared.reconnect.write() = params;
        Ok(())
    }

    /// Establish the control session: parse the URL, open TCP, then
    /// OPTIONS → DESCRIBE → SETUP per track. Returns false (with a status
    /// callback carrying the error kind) on any failure.
    ///
    /// Credentials embedded in the URL override `username`/`password`.
    pub fn connect(
        &self,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        timeout: Duration,
    ) -> bool {
        let mut events: Vec<Event> = Vec::new();
        let result = {
            let mut core = self.shared.session.lock();

            let state = *self.shared.state.read();
            if state != SessionState::Disconnected {
                drop(core);
                self.shared.sinks.emit_status(
                    state,
                    "connect() requires a disconnected session",
                    Some(ErrorKind::State),
                );
                return false;
            }

            match Self::resolve_target(url, username, password, timeout) {
                Ok(target) => {
                    core.target = Some(target);
                    self.push_state(&mut events, SessionState::Connecting, "connecting", None);
                    self.establish(&mut core, &mut events)
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                self.emit_events(events);
                true
            }
            Err(e) => {
                self.push_state(
                    &mut events,
                    SessionState::Error,
                    &format!("connect failed: {e}"),
                    Some(e.kind()),
                );
                self.emit_events(events);
                self.shared.clone().resolve_error(false);
                false
            }
        }
    }

    /// Start (or resume) media delivery.
    pub fn play(&self) -> bool {
        let mut events: Vec<Event> = Vec::new();
        let result = {
            let mut core = self.shared.session.lock();
            let state = *self.shared.state.read();
            match state {
                SessionState::Playing => return true,
                SessionState::Connected | SessionState::Paused => {
                    self.start_playing(&mut core, &mut events)
                }
                other => Err(RtspError::State(other)),
            }
        };
        self.finish_bool_op("play", result, events)
    }

    /// Suspend media delivery, keeping the session alive.
    pub fn pause(&self) -> bool {
        let mut events: Vec<Event> = Vec::new();
        let (result, receiver) = {
            let mut core = self.shared.session.lock();
            let state = *self.shared.state.read();
            match state {
                SessionState::Paused => return true,
                SessionState::Playing => {
                    let result = self.quiesce(&mut core, SessionState::Paused, &mut events);
                    (result, core.receiver.take())
                }
                other => (Err(RtspError::State(other)), None),
            }
        };
        if let Some(receiver) = receiver {
            receiver.join();
        }
        self.finish_bool_op("pause", result, events)
    }

    /// Stop delivery and return to the Connected state.
    pub fn stop(&self) -> bool {
        let mut events: Vec<Event> = Vec::new();
        let (result, receiver) = {
            let mut core = self.shared.session.lock();
            let state = *self.shared.state.read();
            match state {
                SessionState::Connected => return true,
                SessionState::Playing => {
                    let result = self.quiesce(&mut core, SessionState::Connected, &mut events);
                    (result, core.receiver.take())
                }
                SessionState::Paused => {
                    self.push_state(&mut events, SessionState::Connected, "stopped", None);
                    (Ok(()), None)
                }
                other => (Err(RtspError::State(other)), None),
            }
        };
        if let Some(receiver) = receiver {
            receiver.join();
        }
        self.finish_bool_op("stop", result, events)
    }

    /// Tear the session down. Idempotent; safe to call from a frame sink
    /// (the receiver thread is then left to exit on its own rather than
    /// joined). Exactly one TEARDOWN is sent however many callers race.
    pub fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        let mut events: Vec<Event> = Vec::new();
        let (channel, receiver, teardown_path) = {
            let mut core = self.shared.session.lock();
            let state = *self.shared.state.read();
            if state == SessionState::Disconnected && core.channel.is_none() {
                return;
            }

            if let Some(receiver) = &core.receiver {
                receiver.signal();
            }
            let channel = core.channel.take();
            let receiver = core.receiver.take();
            let teardown_path = core.target.as_ref().map(|t| t.url.path.clone());
            core.tracks = Arc::new(Vec::new());
            core.supported_methods.clear();

            self.push_state(&mut events, SessionState::Disconnected, "disconnected", None);
            (channel, receiver, teardown_path)
        };

        if let Some(mut channel) = channel {
            if let Some(path) = teardown_path {
                let session_header = channel.session_id().map(|id| id.to_string());
                let mut headers: Vec<(&str, &str)> = Vec::new();
                if let Some(id) = session_header.as_deref() {
                    headers.push(("Session", id));
                }
                // Best effort: the server may already be gone.
                if let Err(e) = channel.request("TEARDOWN", &path, &headers, None) {
                    tracing::debug!(error = %e, "TEARDOWN failed during disconnect");
                }
            }
            channel.shutdown();
        }

        if let Some(receiver) = receiver {
            receiver.join();
        }

        self.emit_events(events);
    }

    /// Number of negotiated tracks.
    pub fn track_count(&self) -> usize {
        self.shared.session.lock().tracks.len()
    }

    /// Kind of the track at `index`, in SDP order.
    pub fn track_kind(&self, index: usize) -> Option<TrackKind> {
        self.shared
            .session
            .lock()
            .tracks
            .get(index)
            .map(|t| t.kind)
    }

    /// Codec identity and declared geometry of the track at `index`.
    pub fn track_info(&self, index: usize) -> Option<TrackInfo> {
        self.shared.session.lock().tracks.get(index).map(|t| TrackInfo {
            width: t.width,
            height: t.height,
            fps: t.fps,
            codec: t.codec.clone(),
        })
    }

    /// Last observed SSRC of the track at `index` (0 until traffic
    /// arrives).
    pub fn track_ssrc(&self, index: usize) -> Option<u32> {
        self.shared
            .session
            .lock()
            .tracks
            .get(index)
            .map(|t| t.ssrc())
    }

    /// Methods the server advertised in its OPTIONS `Public` header.
    pub fn server_methods(&self) -> Vec<String> {
        self.shared.session.lock().supported_methods.clone()
    }

    // ---- internals -------------------------------------------------------

    fn resolve_target(
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<ConnectTarget> {
        let mut parsed = RtspUrl::parse(url)?;
        if parsed.username.is_none() {
            parsed.username = username.map(str::to_string);
            parsed.password = password.map(str::to_string);
        }
        Ok(ConnectTarget {
            url: parsed,
            timeout,
        })
    }

    /// The CONNECT sequence, with the session lock held. Any failure
    /// leaves the core cleaned up and aborts the whole operation.
    fn establish(&self, core: &mut SessionCore, events: &mut Vec<Event>) -> Result<()> {
        // Drop remnants of a failed or interrupted previous session.
        if let Some(receiver) = core.receiver.take() {
            receiver.signal();
            drop(receiver.thread);
        }
        core.channel = None;
        core.tracks = Arc::new(Vec::new());

        let target = core
            .target
            .clone()
            .ok_or_else(|| RtspError::Config("no connect target".into()))?;
        let url = &target.url;

        let result = (|| -> Result<()> {
            let mut channel = ControlChannel::open(&url.host, url.port, target.timeout)?;
            if let (Some(user), Some(pass)) = (&url.username, &url.password) {
                channel.set_credentials(user, pass);
            }

            let options = channel.request("OPTIONS", &url.path, &[], None)?;
            if !options.is_success() {
                return Err(RtspError::Status {
                    method: "OPTIONS".into(),
                    code: options.status_code,
                });
            }
            core.supported_methods = options
                .get_header("Public")
                .map(|v| v.split(',').map(|m| m.trim().to_string()).collect())
                .unwrap_or_default();

            let describe = channel.request(
                "DESCRIBE",
                &url.path,
                &[("Accept", "application/sdp")],
                None,
            )?;
            if !describe.is_success() {
                return Err(RtspError::Status {
                    method: "DESCRIBE".into(),
                    code: describe.status_code,
                });
            }
            if describe.body.is_empty()
                || describe
                    .get_header("Content-Type")
                    .is_some_and(|ct| !ct.starts_with("application/sdp"))
            {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::NotSdp,
                });
            }

            let drafts = sdp::parse_sdp(&describe.body)?;
            tracing::info!(tracks = drafts.len(), "parsed session description");

            let mut tracks = Vec::with_capacity(drafts.len());
            for draft in &drafts {
                let control = resolve_control(draft.control.as_deref(), &url.path);
                let mut track = Track::bind(draft, control)?;

                let transport_value = track.transport_request_value();
                let session_header = channel.session_id().map(|id| id.to_string());
                let mut headers: Vec<(&str, &str)> =
                    vec![("Transport", transport_value.as_str())];
                if let Some(id) = session_header.as_deref() {
                    headers.push(("Session", id));
                }

                let setup = channel.request("SETUP", &track.control, &headers, None)?;
                if !setup.is_success() {
                    // Track sockets close on drop; the whole connect aborts.
                    return Err(RtspError::Status {
                        method: "SETUP".into(),
                        code: setup.status_code,
                    });
                }

                match (setup.session_id(), channel.session_id()) {
                    (Some(id), None) => channel.set_session_id(id),
                    (Some(id), Some(existing)) if id != existing => {
                        return Err(RtspError::Parse {
                            kind: ParseErrorKind::SessionMismatch,
                        });
                    }
                    _ => {}
                }

                let ports = setup
                    .get_header("Transport")
                    .and_then(ServerPorts::parse)
                    .ok_or(RtspError::Parse {
                        kind: ParseErrorKind::InvalidTransport,
                    })?;
                track.set_server_ports(ports);

                tracing::debug!(
                    kind = track.kind.as_str(),
                    codec = %track.codec,
                    transport = %track.transport(),
                    "track set up"
                );
                tracks.push(Arc::new(track));
            }

            if channel.session_id().is_none() {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::MissingHeader("Session"),
                });
            }

            core.channel = Some(channel);
            core.tracks = Arc::new(tracks);
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.push_state(events, SessionState::Connected, "connected", None);
                Ok(())
            }
            Err(e) => {
                core.channel = None;
                core.tracks = Arc::new(Vec::new());
                Err(e)
            }
        }
    }

    /// Send PLAY and start the receiver. Caller holds the session lock.
    fn start_playing(&self, core: &mut SessionCore, events: &mut Vec<Event>) -> Result<()> {
        let path = core
            .target
            .as_ref()
            .map(|t| t.url.path.clone())
            .ok_or_else(|| RtspError::State(SessionState::Disconnected))?;
        let channel = core
            .channel
            .as_mut()
            .ok_or_else(|| RtspError::State(SessionState::Disconnected))?;
        let session_id = channel
            .session_id()
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::MissingHeader("Session"),
            })?
            .to_string();

        let response = channel.request(
            "PLAY",
            &path,
            &[("Session", &session_id), ("Range", "npt=0.000-")],
            None,
        )?;
        if !response.is_success() {
            return Err(RtspError::Status {
                method: "PLAY".into(),
                code: response.status_code,
            });
        }

        self.spawn_receiver(core);
        self.push_state(events, SessionState::Playing, "playing", None);
        Ok(())
    }

    /// Send PAUSE and signal the receiver. Caller holds the session lock
    /// and joins the receiver after releasing it.
    fn quiesce(
        &self,
        core: &mut SessionCore,
        next: SessionState,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let path = core
            .target
            .as_ref()
            .map(|t| t.url.path.clone())
            .ok_or_else(|| RtspError::State(SessionState::Disconnected))?;
        let channel = core
            .channel
            .as_mut()
            .ok_or_else(|| RtspError::State(SessionState::Disconnected))?;
        let session_id = channel
            .session_id()
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::MissingHeader("Session"),
            })?
            .to_string();

        let response = channel.request("PAUSE", &path, &[("Session", &session_id)], None)?;
        if !response.is_success() {
            return Err(RtspError::Status {
                method: "PAUSE".into(),
                code: response.status_code,
            });
        }

        if let Some(receiver) = &core.receiver {
            receiver.signal();
        }
        let message = if next == SessionState::Paused {
            "paused"
        } else {
            "stopped"
        };
        self.push_state(events, next, message, None);
        Ok(())
    }

    fn spawn_receiver(&self, core: &mut SessionCore) {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let tracks = core.tracks.clone();
        let sinks = self.shared.sinks.clone();
        let weak = Arc::downgrade(&self.shared);
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        let stop_thread = stop.clone();

        let handle = thread::spawn(move || {
            if let Err(e) = udp::run(tracks, sinks, stop_thread) {
                if let Some(shared) = weak.upgrade() {
                    shared.receiver_failed(epoch, e);
                }
            }
        });

        core.receiver = Some(ReceiverHandle {
            stop,
            thread: handle,
        });
    }

    fn push_state(
        &self,
        events: &mut Vec<Event>,
        state: SessionState,
        message: &str,
        error: Option<ErrorKind>,
    ) {
        *self.shared.state.write() = state;
        events.push((state, message.to_string(), error));
    }

    fn emit_events(&self, events: Vec<Event>) {
        for (state, message, error) in events {
            self.shared.sinks.emit_status(state, &message, error);
        }
    }

    /// Shared tail for play/pause/stop: report failure through the status
    /// sink and collapse to a boolean.
    fn finish_bool_op(&self, op: &str, result: Result<()>, events: Vec<Event>) -> bool {
        match result {
            Ok(()) => {
                self.emit_events(events);
                true
            }
            Err(e) => {
                self.emit_events(events);
                let state = *self.shared.state.read();
                self.shared
                    .sinks
                    .emit_status(state, &format!("{op} failed: {e}"), Some(e.kind()));
                false
            }
        }
    }
}

impl Shared {
    /// Receiver thread reported a socket failure while playing.
    fn receiver_failed(self: Arc<Self>, epoch: u64, error: RtspError) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return; // torn down in the meantime
        }
        tracing::warn!(error = %error, "stream failed");
        *self.state.write() = SessionState::Error;
        self.sinks.emit_status(
            SessionState::Error,
            &format!("stream failed: {error}"),
            Some(error.kind()),
        );
        self.resolve_error(true);
    }

    /// Leave the Error state: either schedule the reconnect task or settle
    /// in Disconnected.
    fn resolve_error(self: Arc<Self>, was_playing: bool) {
        let params = *self.reconnect.read();
        if !params.retries_enabled() {
            {
                let mut core = self.session.lock();
                if let Some(receiver) = core.receiver.take() {
                    receiver.signal();
                }
                if let Some(channel) = core.channel.take() {
                    channel.shutdown();
                }
                core.tracks = Arc::new(Vec::new());
            }
            *self.state.write() = SessionState::Disconnected;
            self.sinks
                .emit_status(SessionState::Disconnected, "disconnected", None);
            return;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let weak = Arc::downgrade(&self);
        thread::spawn(move || reconnect_loop(weak, epoch, params, was_playing));
    }

    fn cancelled(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last handle gone: stop background work. The receiver thread only
        // holds a weak reference, so it cannot keep the session alive.
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let core = self.session.get_mut();
        if let Some(receiver) = core.receiver.take() {
            receiver.signal();
        }
        if let Some(channel) = core.channel.take() {
            channel.shutdown();
        }
    }
}

/// The reconnection task: delayed CONNECT attempts with exponential
/// backoff, cancelled by disconnect or when every client handle is gone.
fn reconnect_loop(
    weak: std::sync::Weak<Shared>,
    epoch: u64,
    params: ReconnectParams,
    was_playing: bool,
) {
    let mut delays = params.delays();
    let mut attempt: i32 = 0;

    loop {
        if params.max_retries >= 0 && attempt >= params.max_retries {
            break;
        }
        attempt += 1;

        let delay = delays
            .next()
            .unwrap_or(Duration::from_millis(params.max_delay_ms));
        if !sleep_cancellable(&weak, epoch, delay) {
            return;
        }

        let Some(shared) = weak.upgrade() else { return };
        if shared.cancelled(epoch) {
            return;
        }
        let client = RtspClient { shared };

        tracing::info!(attempt, "reconnecting");
        let reconnected = {
            let mut events: Vec<Event> = Vec::new();
            let result = {
                let mut core = client.shared.session.lock();
                if client.shared.cancelled(epoch) {
                    return;
                }
                client.push_state(&mut events, SessionState::Connecting, "reconnecting", None);
                client.establish(&mut core, &mut events)
            };
            match result {
                Ok(()) => {
                    client.emit_events(events);
                    true
                }
                Err(e) => {
                    client.push_state(
                        &mut events,
                        SessionState::Error,
                        &format!("reconnect attempt {attempt} failed: {e}"),
                        Some(e.kind()),
                    );
                    client.emit_events(events);
                    false
                }
            }
        };

        if reconnected {
            if was_playing {
                client.play();
            }
            return;
        }
    }

    // Retries exhausted.
    if let Some(shared) = weak.upgrade() {
        if shared.cancelled(epoch) {
            return;
        }
        *shared.state.write() = SessionState::Disconnected;
        shared.sinks.emit_status(
            SessionState::Disconnected,
            "reconnect attempts exhausted",
            None,
        );
    }
}

/// Sleep in small quanta so cancellation is observed promptly. Returns
/// false when the session was cancelled or dropped.
fn sleep_cancellable(weak: &std::sync::Weak<Shared>, epoch: u64, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        match weak.upgrade() {
            Some(shared) if !shared.cancelled(epoch) => {}
            _ => return false,
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(RECONNECT_QUANTUM.min(deadline - now));
    }
}
