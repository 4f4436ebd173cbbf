use std::io::BufRead;

use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP response (RFC 2326 §7).
///
/// RTSP responses follow HTTP/1.1 syntax:
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body is read
/// exactly when `Content-Length` announces one.
#[derive(Debug)]
pub struct RtspResponse {
    /// Numeric status code (200, 401, 454, ...).
    pub status_code: u16,
    /// Reason phrase as sent by the server.
    pub status_text: String,
    /// Headers as ordered (name, value) pairs. Names are stored
    /// as-received; lookups via [`get_header`](Self::get_header) are
    /// case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Message body; empty when the response carried none.
    pub body: String,
}

impl RtspResponse {
    /// Read one complete response from a buffered stream: status line,
    /// headers up to the blank line, then `Content-Length` bytes of body.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut status_line = String::new();
        if reader.read_line(&mut status_line)? == 0 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyResponse,
            });
        }

        let (status_code, status_text) = parse_status_line(status_line.trim_end())?;

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        let mut response = RtspResponse {
            status_code,
            status_text,
            headers,
            body: String::new(),
        };

        if let Some(len) = response
            .get_header("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|len| *len > 0)
        {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            response.body = String::from_utf8_lossy(&body).into_owned();
        }

        Ok(response)
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the status code is in the 2xx success class.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Session identifier from the `Session` header with its `;timeout=`
    /// (and any other) parameters stripped (RFC 2326 §12.37).
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(3, ' ');

    let version = parts.next().unwrap_or("");
    if !version.starts_with("RTSP/") {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        });
    }
    if version != "RTSP/1.0" {
        tracing::warn!(version, "server sent non-RTSP/1.0 version");
    }

    let code: u16 = parts
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or(RtspError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;
    let reason = parts.next().unwrap_or("").to_string();

    Ok((code, reason))
}
