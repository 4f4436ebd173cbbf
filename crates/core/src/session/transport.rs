use std::fmt;

/// Negotiated RTP/RTCP transport parameters for one track
/// (RFC 2326 §12.39).
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/UDP;unicast;client_port=5000-5001
///
/// Server → Client:
///   Transport: RTP/AVP/UDP;unicast;client_port=5000-5001;server_port=6000-6001
/// ```
///
/// The client receives RTP on `client_rtp_port` and drains RTCP on
/// `client_rtcp_port`; the server ports are recorded for diagnostics and
/// source matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpTransport {
    /// Local RTP receive port (OS-assigned).
    pub client_rtp_port: u16,
    /// Local RTCP receive port (OS-assigned).
    pub client_rtcp_port: u16,
    /// Server's RTP send port from the SETUP response.
    pub server_rtp_port: u16,
    /// Server's RTCP port from the SETUP response.
    pub server_rtcp_port: u16,
}

impl RtpTransport {
    /// The `Transport` request header value announcing our receive ports.
    pub fn request_value(client_rtp_port: u16, client_rtcp_port: u16) -> String {
        format!("RTP/AVP/UDP;unicast;client_port={client_rtp_port}-{client_rtcp_port}")
    }
}

impl fmt::Display for RtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "client {}-{} server {}-{}",
            self.client_rtp_port, self.client_rtcp_port, self.server_rtp_port, self.server_rtcp_port
        )
    }
}

/// Parsed server-side port pair from the SETUP response `Transport` header.
///
/// Looks for `server_port=RTP-RTCP` among semicolon-separated parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPorts {
    pub rtp: u16,
    pub rtcp: u16,
}

impl ServerPorts {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_client::session::transport::ServerPorts;
    ///
    /// let ports =
    ///     ServerPorts::parse("RTP/AVP/UDP;unicast;client_port=5000-5001;server_port=6000-6001")
    ///         .unwrap();
    /// assert_eq!(ports.rtp, 6000);
    /// assert_eq!(ports.rtcp, 6001);
    ///
    /// assert!(ServerPorts::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("server_port=") {
                let (rtp, rtcp) = ports.split_once('-')?;
                return Some(ServerPorts {
                    rtp: rtp.trim().parse().ok()?,
                    rtcp: rtcp.trim().parse().ok()?,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_transport() {
        let ports = ServerPorts::parse(
            "RTP/AVP/UDP;unicast;client_port=5000-5001;server_port=50000-50001",
        )
        .unwrap();
        assert_eq!(ports.rtp, 50000);
        assert_eq!(ports.rtcp, 50001);
    }

    #[test]
    fn parse_no_server_port() {
        assert!(ServerPorts::parse("RTP/AVP;unicast;client_port=5000-5001").is_none());
    }

    #[test]
    fn parse_malformed_pair() {
        assert!(ServerPorts::parse("RTP/AVP;unicast;server_port=6000").is_none());
        assert!(ServerPorts::parse("RTP/AVP;unicast;server_port=a-b").is_none());
    }

    #[test]
    fn request_value_format() {
        assert_eq!(
            RtpTransport::request_value(5000, 5001),
            "RTP/AVP/UDP;unicast;client_port=5000-5001"
        );
    }
}
