//! Error types for the RTSP client library.
//!
//! Variants map to specific failure modes across the stack:
//!
//! - **Configuration**: [`Url`](RtspError::Url), [`Config`](RtspError::Config)
//!   — bad input, rejected before any socket is touched.
//! - **Transport**: [`Io`](RtspError::Io) — TCP/UDP failures and timeouts.
//! - **Protocol**: [`Parse`](RtspError::Parse) — malformed RTSP, SDP, or RTP.
//! - **Server**: [`Status`](RtspError::Status) — non-2xx RTSP status codes.
//! - **Auth**: [`Unauthorized`](RtspError::Unauthorized) — 401 after
//!   credentials were supplied.
//! - **Lifecycle**: [`State`](RtspError::State),
//!   [`Cancelled`](RtspError::Cancelled).

use std::fmt;

use crate::session::SessionState;

/// Errors that can occur in the RTSP client library.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// The RTSP URL could not be parsed.
    #[error("invalid RTSP URL: {0}")]
    Url(#[from] UrlError),

    /// Reconnect parameters or other caller-supplied configuration are
    /// nonsensical.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Underlying I/O or socket error, including read/write timeouts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP response, SDP body, or RTP packet.
    #[error("protocol error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The server answered an RTSP request with a non-2xx status.
    #[error("{method} returned status {code}")]
    Status { method: String, code: u16 },

    /// The server rejected our credentials (401 after Authorization was
    /// already sent).
    #[error("authentication rejected by server")]
    Unauthorized,

    /// The operation is not valid in the current session state
    /// (e.g. `play()` while Disconnected).
    #[error("operation not valid while {0:?}")]
    State(SessionState),

    /// The operation was aborted by `disconnect()`.
    #[error("operation cancelled")]
    Cancelled,
}

impl RtspError {
    /// Collapse the variant onto the coarse kind reported through status
    /// callbacks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Url(_) | Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Network,
            Self::Parse { .. } => ErrorKind::Protocol,
            Self::Status { .. } => ErrorKind::Server,
            Self::Unauthorized => ErrorKind::Auth,
            Self::State(_) => ErrorKind::State,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Coarse error classification carried by status callbacks.
///
/// [`Sink`](ErrorKind::Sink) never originates from an [`RtspError`]: it marks
/// a panic caught inside an application frame sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Network,
    Protocol,
    Server,
    Auth,
    State,
    Cancelled,
    Sink,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Server => "server",
            Self::Auth => "auth",
            Self::State => "state",
            Self::Cancelled => "cancelled",
            Self::Sink => "sink",
        };
        write!(f, "{name}")
    }
}

/// Specific kind of RTSP/SDP/RTP parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Response was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `RTSP/1.0 <code> <reason>`
    /// format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// A header required by the exchange was absent.
    MissingHeader(&'static str),
    /// DESCRIBE returned something other than a non-empty
    /// `application/sdp` body.
    NotSdp,
    /// The SDP body contained no usable `m=video`/`m=audio` description.
    NoMedia,
    /// The `Transport` response header lacked a parsable `server_port`
    /// pair.
    InvalidTransport,
    /// A later SETUP returned a session identifier different from the one
    /// already negotiated.
    SessionMismatch,
    /// An RTP datagram was too short or carried an unsupported version.
    InvalidRtpHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::MissingHeader(name) => write!(f, "missing {name} header"),
            Self::NotSdp => write!(f, "no SDP body in DESCRIBE response"),
            Self::NoMedia => write!(f, "SDP contains no usable media"),
            Self::InvalidTransport => write!(f, "unparsable Transport header"),
            Self::SessionMismatch => write!(f, "session identifier mismatch"),
            Self::InvalidRtpHeader => write!(f, "invalid RTP header"),
        }
    }
}

/// Specific field of an RTSP URL that failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// The URL does not start with `rtsp://`.
    #[error("missing rtsp:// scheme")]
    MissingScheme,
    /// The host portion is empty or malformed.
    #[error("empty or malformed host")]
    EmptyHost,
    /// The port portion is not a number in 1-65535.
    #[error("invalid port")]
    InvalidPort,
    /// Username or password contains an ASCII control character.
    #[error("control character in credentials")]
    CredentialControlChar,
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
