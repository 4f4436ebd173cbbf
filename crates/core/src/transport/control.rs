//! The RTSP control connection: one TCP stream carrying serialized
//! request/response exchanges.

use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::protocol::auth::{self, Challenge};
use crate::protocol::{RtspRequest, RtspResponse, USER_AGENT};

/// Owns the TCP connection to the server, the monotonic CSeq counter, the
/// negotiated session identifier, and credentials.
///
/// All exchanges are strictly serialized: one request is written, one
/// response is read, both bounded by the timeouts set at open time. A
/// timeout leaves the channel intact; the caller decides whether to close.
pub struct ControlChannel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    cseq: u32,
    session_id: Option<String>,
    credentials: Option<(String, String)>,
    /// Challenge from the most recent 401, reused for follow-up requests.
    challenge: Option<Challenge>,
}

impl ControlChannel {
    /// Connect to `host:port` and arm equal send/receive timeouts.
    pub fn open(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let mut last_err: Option<std::io::Error> = None;
        let addrs = (host, port).to_socket_addrs()?;

        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match stream {
            Some(s) => s,
            None => {
                return Err(last_err
                    .unwrap_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::AddrNotAvailable,
                            "host resolved to no addresses",
                        )
                    })
                    .into());
            }
        };

        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        tracing::info!(host, port, "control connection established");

        let reader_stream = stream.try_clone()?;
        Ok(ControlChannel {
            reader: BufReader::new(reader_stream),
            writer: stream,
            cseq: 1,
            session_id: None,
            credentials: None,
            challenge: None,
        })
    }

    /// Store credentials for Authorization headers and 401 retries.
    pub fn set_credentials(&mut self, username: &str, password: &str) {
        self.credentials = Some((username.to_string(), password.to_string()));
    }

    /// Session identifier negotiated by SETUP, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, id: &str) {
        self.session_id = Some(id.to_string());
    }

    /// Issue one RTSP request and read its response.
    ///
    /// Composes CSeq, Authorization (when credentials are known),
    /// User-Agent, the caller's extra headers, and `Content-Length` for a
    /// non-empty body. On a 401 carrying a challenge we have not yet
    /// satisfied on this request, the request is retried exactly once with
    /// a recomputed Authorization; a second 401 is an auth failure.
    /// Non-2xx statuses other than the handled 401 are returned to the
    /// caller undisturbed.
    pub fn request(
        &mut self,
        method: &str,
        uri: &str,
        extra_headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> Result<RtspResponse> {
        let auth_header = self.authorization(method, uri);
        let response = self.send_once(method, uri, extra_headers, body, auth_header.as_deref())?;

        if response.status_code != 401 {
            return Ok(response);
        }

        let Some(challenge) = response
            .get_header("WWW-Authenticate")
            .and_then(Challenge::parse)
        else {
            return Ok(response);
        };

        if self.credentials.is_none() {
            // Nothing to retry with; surface the 401 to the caller.
            return Ok(response);
        }
        if auth_header.is_some() && self.challenge.as_ref() == Some(&challenge) {
            // We already answered this exact challenge and were refused.
            return Err(RtspError::Unauthorized);
        }

        tracing::debug!(method, uri, "retrying request with authentication");
        self.challenge = Some(challenge);
        let auth_header = self.authorization(method, uri);
        let retried = self.send_once(method, uri, extra_headers, body, auth_header.as_deref())?;
        if retried.status_code == 401 {
            return Err(RtspError::Unauthorized);
        }
        Ok(retried)
    }

    /// Unblock any pending read/write; used by `disconnect()` before the
    /// channel is dropped.
    pub fn shutdown(&self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }

    fn send_once(
        &mut self,
        method: &str,
        uri: &str,
        extra_headers: &[(&str, &str)],
        body: Option<&str>,
        auth_header: Option<&str>,
    ) -> Result<RtspResponse> {
        let cseq = self.cseq;
        self.cseq += 1;

        let mut request = RtspRequest::new(method, uri).add_header("CSeq", &cseq.to_string());
        if let Some(value) = auth_header {
            request = request.add_header("Authorization", value);
        }
        request = request.add_header("User-Agent", USER_AGENT);
        for (name, value) in extra_headers {
            request = request.add_header(name, value);
        }
        if let Some(body) = body {
            if !body.is_empty() {
                request = request.with_body(body.to_string());
            }
        }

        tracing::debug!(method, uri, cseq, "request");
        self.writer.write_all(request.serialize().as_bytes())?;
        self.writer.flush()?;

        let response = RtspResponse::read_from(&mut self.reader)?;
        tracing::debug!(method, status = response.status_code, "response");
        Ok(response)
    }

    /// Authorization header value for the current credentials and cached
    /// challenge. Nothing is sent until a server has challenged once;
    /// afterwards every request answers the cached challenge.
    fn authorization(&self, method: &str, uri: &str) -> Option<String> {
        let (username, password) = self.credentials.as_ref()?;
        match self.challenge.as_ref()? {
            Challenge::Basic => Some(auth::basic_authorization(username, password)),
            Challenge::Digest {
                realm,
                nonce,
                qop_auth,
            } => Some(auth::digest_authorization(
                username, password, method, uri, realm, nonce, *qop_auth,
            )),
        }
    }
}
