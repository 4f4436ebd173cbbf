//! Negotiated media tracks and their per-track RTP reception state.

use std::net::UdpSocket;

use parking_lot::Mutex;

use crate::error::Result;
use crate::media::TrackKind;
use crate::media::rtp::RtpHeader;
use crate::protocol::TrackDraft;
use crate::session::transport::{RtpTransport, ServerPorts};

/// Reception-side RTP state observed on one track.
///
/// Sequence tracking is advisory: discontinuities bump a counter but never
/// reorder or drop frames.
#[derive(Debug, Default)]
pub struct RtpState {
    /// Last observed synchronization source; 0 until the first packet.
    pub ssrc: u32,
    pub last_sequence: u16,
    pub last_timestamp: u32,
    /// Number of observed sequence discontinuities.
    pub sequence_gaps: u64,
    seen: bool,
}

/// A media track negotiated via SETUP: codec identity, its UDP socket
/// pair, the server's send ports, and reception state.
///
/// Created from a [`TrackDraft`] during connect, destroyed on disconnect.
/// The sockets are read only by the RTP receiver while playing.
pub struct Track {
    pub kind: TrackKind,
    pub codec: String,
    /// Clock rate in Hz from the SDP rtpmap.
    pub clock_rate: u32,
    pub payload_type: u8,
    /// Control target used as the SETUP request URI.
    pub control: String,
    /// Opaque codec parameters from `a=fmtp`, for downstream decoders.
    pub fmtp: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub rtp_socket: UdpSocket,
    pub rtcp_socket: UdpSocket,
    transport: RtpTransport,
    rtp_state: Mutex<RtpState>,
}

impl Track {
    /// Bind the RTP/RTCP socket pair and build a track from a draft.
    ///
    /// Both sockets bind to `0.0.0.0:0`; the OS-assigned ports are read
    /// back and announced in the SETUP `Transport` header. No even/odd
    /// pairing is assumed. Sockets are nonblocking: the receiver polls
    /// them alongside every other track.
    pub fn bind(draft: &TrackDraft, control: String) -> Result<Self> {
        let rtp_socket = UdpSocket::bind("0.0.0.0:0")?;
        let rtcp_socket = UdpSocket::bind("0.0.0.0:0")?;
        rtp_socket.set_nonblocking(true)?;
        rtcp_socket.set_nonblocking(true)?;

        let client_rtp_port = rtp_socket.local_addr()?.port();
        let client_rtcp_port = rtcp_socket.local_addr()?.port();

        tracing::debug!(
            kind = draft.kind.as_str(),
            codec = %draft.codec,
            rtp_port = client_rtp_port,
            rtcp_port = client_rtcp_port,
            "bound RTP socket pair"
        );

        Ok(Track {
            kind: draft.kind,
            codec: draft.codec.clone(),
            clock_rate: draft.clock_rate,
            payload_type: draft.payload_type,
            control,
            fmtp: draft.fmtp.clone(),
            width: None,
            height: None,
            fps: None,
            rtp_socket,
            rtcp_socket,
            transport: RtpTransport {
                client_rtp_port,
                client_rtcp_port,
                server_rtp_port: 0,
                server_rtcp_port: 0,
            },
            rtp_state: Mutex::new(RtpState::default()),
        })
    }

    /// The `Transport` header value for this track's SETUP request.
    pub fn transport_request_value(&self) -> String {
        RtpTransport::request_value(
            self.transport.client_rtp_port,
            self.transport.client_rtcp_port,
        )
    }

    /// Store the server's send ports from the SETUP response.
    pub fn set_server_ports(&mut self, ports: ServerPorts) {
        self.transport.server_rtp_port = ports.rtp;
        self.transport.server_rtcp_port = ports.rtcp;
    }

    pub fn transport(&self) -> RtpTransport {
        self.transport
    }

    /// Last observed SSRC (0 until a packet arrives).
    pub fn ssrc(&self) -> u32 {
        self.rtp_state.lock().ssrc
    }

    /// Observed sequence discontinuities.
    pub fn sequence_gaps(&self) -> u64 {
        self.rtp_state.lock().sequence_gaps
    }

    /// Fold one received packet into the track's reception state.
    ///
    /// A changed SSRC is accepted and re-keys the stored value (cameras
    /// legally re-key mid-stream). Out-of-order sequences only bump the
    /// gap counter.
    pub(crate) fn record_packet(&self, header: &RtpHeader) {
        let mut state = self.rtp_state.lock();
        if state.seen {
            let expected = state.last_sequence.wrapping_add(1);
            if header.sequence != expected {
                state.sequence_gaps += 1;
                tracing::debug!(
                    track = self.kind.as_str(),
                    expected,
                    got = header.sequence,
                    "sequence discontinuity"
                );
            }
            if state.ssrc != header.ssrc {
                tracing::debug!(
                    track = self.kind.as_str(),
                    old = format_args!("{:#010X}", state.ssrc),
                    new = format_args!("{:#010X}", header.ssrc),
                    "SSRC re-keyed"
                );
            }
        }
        state.ssrc = header.ssrc;
        state.last_sequence = header.sequence;
        state.last_timestamp = header.timestamp;
        state.seen = true;
    }
}

/// Snapshot of a track's identity for the public `track_info` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub codec: String,
}
