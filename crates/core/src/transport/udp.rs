//! The RTP receive loop: one thread multiplexing every track's RTP and
//! RTCP socket.
//!
//! Sockets are nonblocking; each pass polls every socket once and sleeps a
//! short quantum when nothing was readable, so the stop flag is observed
//! promptly without a dedicated wakeup mechanism — the same discipline as
//! a nonblocking accept loop.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{ErrorKind, Result};
use crate::media::RtpFrame;
use crate::media::rtp::RtpHeader;
use crate::session::track::Track;
use crate::session::{SessionState, SinkRegistry};

/// Largest possible UDP datagram; the read buffer is reused across reads.
const MAX_DATAGRAM: usize = 65_535;

/// Idle sleep between poll passes. Bounds cancellation latency well under
/// the one-second ceiling.
const IDLE_QUANTUM: Duration = Duration::from_millis(20);

/// Receive RTP until the stop flag is raised or a socket fails.
///
/// Runs on its own thread while the session is playing. RTCP datagrams
/// are drained and discarded so the kernel receive buffer cannot fill.
/// Returns Err only for a real socket failure; a failure observed after
/// the stop flag was raised is part of normal teardown.
pub(crate) fn run(
    tracks: Arc<Vec<Arc<Track>>>,
    sinks: Arc<SinkRegistry>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    tracing::debug!(tracks = tracks.len(), "RTP receiver started");

    while !stop.load(Ordering::SeqCst) {
        let mut busy = false;

        for track in tracks.iter() {
            // A sink may raise the stop flag mid-pass (re-entrant
            // disconnect); nothing further may be dispatched after that.
            if stop.load(Ordering::SeqCst) {
                break;
            }

            match track.rtp_socket.recv_from(&mut buf) {
                Ok((len, _)) => {
                    busy = true;
                    dispatch(&buf[..len], track, &tracks, &sinks);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    if stop.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    return Err(e.into());
                }
            }

            match track.rtcp_socket.recv_from(&mut buf) {
                Ok((len, _)) => {
                    busy = true;
                    tracing::trace!(track = track.kind.as_str(), len, "drained RTCP datagram");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    if stop.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    return Err(e.into());
                }
            }
        }

        if !busy {
            thread::sleep(IDLE_QUANTUM);
        }
    }

    tracing::debug!("RTP receiver stopped");
    Ok(())
}

/// Decode one datagram and hand its payload to the matching sink.
fn dispatch(datagram: &[u8], arrival: &Arc<Track>, tracks: &[Arc<Track>], sinks: &SinkRegistry) {
    let header = match RtpHeader::parse(datagram) {
        Ok(header) => header,
        Err(_) => {
            tracing::trace!(len = datagram.len(), "discarding invalid RTP datagram");
            return;
        }
    };

    // Payload type selects the track; the arrival socket settles ties and
    // unknown payload types.
    let track = if header.payload_type == arrival.payload_type {
        arrival
    } else {
        tracks
            .iter()
            .find(|t| t.payload_type == header.payload_type)
            .unwrap_or_else(|| {
                tracing::debug!(
                    pt = header.payload_type,
                    track = arrival.kind.as_str(),
                    "unknown payload type, keeping arrival track"
                );
                arrival
            })
    };

    track.record_packet(&header);

    let Some(sink) = sinks.frame_sink(track.kind) else {
        return;
    };

    let frame = RtpFrame {
        kind: track.kind,
        payload: header.payload(datagram).to_vec(),
        timestamp: header.timestamp,
        marker: header.marker,
        width: track.width,
        height: track.height,
    };

    // A panicking sink must not take the receiver down with it.
    if catch_unwind(AssertUnwindSafe(|| sink(frame))).is_err() {
        tracing::error!(track = track.kind.as_str(), "frame sink panicked");
        sinks.emit_status(
            SessionState::Playing,
            "frame sink panicked; stream continues",
            Some(ErrorKind::Sink),
        );
    }
}
