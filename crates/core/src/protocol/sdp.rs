//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Consumes the body of a DESCRIBE response and extracts the subset needed
//! to set up RTP reception:
//!
//! ```text
//! v=0                                ← tolerated, ignored
//! o=- 123 1 IN IP4 10.0.0.5          ← tolerated, ignored
//! s=Camera                           ← tolerated, ignored
//! m=video 0 RTP/AVP 96               ← opens a media description
//! a=rtpmap:96 H264/90000             ← codec name / clock rate
//! a=fmtp:96 packetization-mode=1     ← kept opaque for decoders
//! a=control:track1                   ← track control target
//! ```
//!
//! Only `m=video` and `m=audio` descriptions become track drafts; other
//! media kinds are skipped along with their attributes. Unknown lines are
//! ignored. Drafts are fully built here and turned into live tracks later,
//! so nothing holds references into a growing collection.

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::TrackKind;

/// A media description lifted from one `m=` section, not yet backed by
/// sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDraft {
    pub kind: TrackKind,
    /// RTP payload type from the `m=` line (7-bit, RFC 3551).
    pub payload_type: u8,
    /// Codec name from `a=rtpmap` (e.g. `H264`, `PCMU`).
    pub codec: String,
    /// Clock rate in Hz from `a=rtpmap`.
    pub clock_rate: u32,
    /// Channel count from the optional `/<channels>` rtpmap suffix.
    pub channels: Option<u32>,
    /// Raw `a=control` value; resolved against the request path by
    /// [`resolve_control`].
    pub control: Option<String>,
    /// Opaque `a=fmtp` parameters for this payload type, kept for
    /// downstream decoders.
    pub fmtp: Option<String>,
}

/// Parse an SDP body into track drafts, preserving SDP order.
///
/// Drafts whose media section never produced a matching `a=rtpmap` are
/// discarded. An empty result is a hard error: a camera answering
/// DESCRIBE with no usable media cannot be played.
pub fn parse_sdp(body: &str) -> Result<Vec<TrackDraft>> {
    // Draft under construction per m= section; None while inside a skipped
    // (non-audio/video) section or before the first m= line.
    let mut drafts: Vec<(TrackDraft, bool)> = Vec::new();
    let mut current: Option<usize> = None;

    for raw in body.lines() {
        let line = raw.trim_end_matches('\r');
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }

        match &line[..2] {
            "m=" => {
                current = parse_media_line(&line[2..]).map(|draft| {
                    drafts.push((draft, false));
                    drafts.len() - 1
                });
            }
            "a=" => {
                let Some(idx) = current else { continue };
                let (draft, has_rtpmap) = &mut drafts[idx];
                apply_attribute(&line[2..], draft, has_rtpmap);
            }
            _ => {}
        }
    }

    let tracks: Vec<TrackDraft> = drafts
        .into_iter()
        .filter_map(|(draft, has_rtpmap)| {
            if has_rtpmap {
                Some(draft)
            } else {
                tracing::warn!(kind = ?draft.kind, pt = draft.payload_type, "dropping media without rtpmap");
                None
            }
        })
        .collect();

    if tracks.is_empty() {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::NoMedia,
        });
    }
    Ok(tracks)
}

/// `m=<kind> <port> RTP/AVP <pt>` → draft, or None for skipped media kinds.
fn parse_media_line(rest: &str) -> Option<TrackDraft> {
    let mut parts = rest.split_whitespace();
    let kind = match parts.next()? {
        "video" => TrackKind::Video,
        "audio" => TrackKind::Audio,
        other => {
            tracing::debug!(kind = other, "skipping media description");
            return None;
        }
    };
    let _port = parts.next()?;
    let proto = parts.next()?;
    if !proto.starts_with("RTP/AVP") {
        tracing::debug!(proto, "skipping non-RTP/AVP media");
        return None;
    }
    let payload_type: u8 = parts.next()?.parse().ok().filter(|pt| *pt < 128)?;

    Some(TrackDraft {
        kind,
        payload_type,
        codec: String::new(),
        clock_rate: 0,
        channels: None,
        control: None,
        fmtp: None,
    })
}

fn apply_attribute(rest: &str, draft: &mut TrackDraft, has_rtpmap: &mut bool) {
    let Some((name, value)) = rest.split_once(':') else {
        // Flag attributes like a=recvonly carry no value we interpret.
        return;
    };

    match name {
        "rtpmap" => {
            // a=rtpmap:96 H264/90000[/2]
            let mut parts = value.split_whitespace();
            let pt: Option<u8> = parts.next().and_then(|p| p.parse().ok());
            if pt != Some(draft.payload_type) {
                return;
            }
            let Some(encoding) = parts.next() else { return };
            let mut pieces = encoding.split('/');
            let Some(codec) = pieces.next() else { return };
            let Some(rate) = pieces.next().and_then(|r| r.parse().ok()) else {
                return;
            };
            draft.codec = codec.to_string();
            draft.clock_rate = rate;
            draft.channels = pieces.next().and_then(|c| c.parse().ok());
            *has_rtpmap = true;
        }
        "control" => {
            draft.control = Some(value.trim().to_string());
        }
        "fmtp" => {
            // a=fmtp:96 packetization-mode=1;profile-level-id=...
            if let Some((pt, params)) = value.split_once(' ')
                && pt.parse::<u8>() == Ok(draft.payload_type)
            {
                draft.fmtp = Some(params.to_string());
            }
        }
        _ => {}
    }
}

/// Resolve a track's `a=control` value against the DESCRIBE request path.
///
/// A full `rtsp://` URL is used verbatim; `*` or a missing attribute means
/// the media is controlled through the presentation path itself; anything
/// else is joined onto the request path.
pub fn resolve_control(control: Option<&str>, request_path: &str) -> String {
    match control {
        None | Some("*") | Some("") => request_path.to_string(),
        Some(absolute) if absolute.starts_with("rtsp://") => absolute.to_string(),
        Some(relative) => {
            if request_path.ends_with('/') {
                format!("{request_path}{relative}")
            } else {
                format!("{request_path}/{relative}")
            }
        }
    }
}
