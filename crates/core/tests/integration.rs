//! Integration tests: full RTSP handshake and RTP delivery against a
//! scripted in-process camera server.
//!
//! The mock camera accepts one control connection, answers
//! OPTIONS → DESCRIBE → SETUP → PLAY → PAUSE → TEARDOWN from a canned
//! script, and records every request so tests can assert on the wire
//! traffic.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rtsp_client::{ErrorKind, ReconnectParams, RtspClient, SessionState, StatusUpdate, TrackKind};

const SESSION_ID: &str = "12345678";

const VIDEO_SDP: &str = "v=0\r\n\
    o=- 1234567890 1 IN IP4 127.0.0.1\r\n\
    s=Mock Camera\r\n\
    t=0 0\r\n\
    m=video 0 RTP/AVP 96\r\n\
    a=rtpmap:96 H264/90000\r\n\
    a=fmtp:96 packetization-mode=1\r\n\
    a=control:track1\r\n";

#[derive(Clone, Default)]
struct MockConfig {
    sdp: Option<&'static str>,
    /// Answer the first unauthenticated DESCRIBE with 401 Basic.
    require_auth: bool,
    /// Answer DESCRIBE with Content-Length: 0.
    empty_describe: bool,
}

#[derive(Default)]
struct MockLog {
    /// (method, full request text) in arrival order.
    requests: Vec<(String, String)>,
    /// client_port pairs announced by SETUP requests.
    setup_client_ports: Vec<(u16, u16)>,
    teardowns: usize,
}

struct MockCamera {
    addr: SocketAddr,
    log: Arc<Mutex<MockLog>>,
}

impl MockCamera {
    fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock camera");
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(MockLog::default()));

        let thread_log = log.clone();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve_connection(stream, config, thread_log);
            }
        });

        MockCamera { addr, log }
    }

    fn url(&self) -> String {
        format!("rtsp://{}/stream", self.addr)
    }

    fn cseqs(&self) -> Vec<u32> {
        self.log
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter_map(|(_, text)| header_value(text, "CSeq")?.parse().ok())
            .collect()
    }

    fn methods(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    fn client_rtp_port(&self) -> Option<u16> {
        self.log
            .lock()
            .unwrap()
            .setup_client_ports
            .first()
            .map(|(rtp, _)| *rtp)
    }
}

fn serve_connection(stream: TcpStream, config: MockConfig, log: Arc<Mutex<MockLog>>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone mock stream"));
    let mut writer = stream;
    let sdp = config.sdp.unwrap_or(VIDEO_SDP);

    loop {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => {
                    text.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }
            }
        }

        let method = text.split_whitespace().next().unwrap_or("").to_string();
        let cseq = header_value(&text, "CSeq").unwrap_or_default();

        let response = match method.as_str() {
            "OPTIONS" => format!(
                "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                 Public: OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN\r\n\r\n"
            ),
            "DESCRIBE" => {
                if config.require_auth && header_value(&text, "Authorization").is_none() {
                    format!(
                        "RTSP/1.0 401 Unauthorized\r\nCSeq: {cseq}\r\n\
                         WWW-Authenticate: Basic realm=\"camera\"\r\n\r\n"
                    )
                } else if config.empty_describe {
                    format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                         Content-Type: application/sdp\r\nContent-Length: 0\r\n\r\n"
                    )
                } else {
                    format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                         Content-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
                        sdp.len(),
                        sdp
                    )
                }
            }
            "SETUP" => {
                let transport = header_value(&text, "Transport").unwrap_or_default();
                if let Some(ports) = parse_client_ports(&transport) {
                    log.lock().unwrap().setup_client_ports.push(ports);
                }
                format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                     Session: {SESSION_ID};timeout=60\r\n\
                     Transport: {transport};server_port=50000-50001\r\n\r\n"
                )
            }
            "PLAY" | "PAUSE" => format!(
                "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nSession: {SESSION_ID}\r\n\r\n"
            ),
            "TEARDOWN" => {
                log.lock().unwrap().teardowns += 1;
                format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n")
            }
            _ => format!("RTSP/1.0 501 Not Implemented\r\nCSeq: {cseq}\r\n\r\n"),
        };

        log.lock().unwrap().requests.push((method, text));

        if writer.write_all(response.as_bytes()).is_err() {
            return;
        }
    }
}

fn header_value(request: &str, name: &str) -> Option<String> {
    request.lines().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        if n.trim().eq_ignore_ascii_case(name) {
            Some(v.trim().to_string())
        } else {
            None
        }
    })
}

fn parse_client_ports(transport: &str) -> Option<(u16, u16)> {
    let ports = transport
        .split(';')
        .find_map(|part| part.trim().strip_prefix("client_port="))?;
    let (rtp, rtcp) = ports.split_once('-')?;
    Some((rtp.parse().ok()?, rtcp.parse().ok()?))
}

fn connect_timeout() -> Duration {
    Duration::from_secs(2)
}

#[test]
fn happy_path_connect_play_disconnect() {
    let camera = MockCamera::start(MockConfig::default());
    let client = RtspClient::new();

    assert!(client.connect(&camera.url(), None, None, connect_timeout()));
    assert_eq!(client.status(), SessionState::Connected);
    assert_eq!(client.track_count(), 1);
    assert_eq!(client.track_kind(0), Some(TrackKind::Video));
    assert_eq!(client.track_info(0).unwrap().codec, "H264");

    // Both RTP sockets were bound and announced to the server.
    {
        let log = camera.log.lock().unwrap();
        let (rtp, rtcp) = log.setup_client_ports[0];
        assert_ne!(rtp, 0);
        assert_ne!(rtcp, 0);
        assert_ne!(rtp, rtcp);
    }

    assert!(client.play());
    assert_eq!(client.status(), SessionState::Playing);

    // PLAY echoed the session identifier and asked for the whole range.
    {
        let log = camera.log.lock().unwrap();
        let (_, play) = log
            .requests
            .iter()
            .find(|(m, _)| m == "PLAY")
            .expect("PLAY was sent");
        assert_eq!(header_value(play, "Session").as_deref(), Some(SESSION_ID));
        assert_eq!(header_value(play, "Range").as_deref(), Some("npt=0.000-"));
    }

    client.disconnect();
    assert_eq!(client.status(), SessionState::Disconnected);

    assert_eq!(
        camera.methods(),
        vec!["OPTIONS", "DESCRIBE", "SETUP", "PLAY", "TEARDOWN"]
    );
    // CSeq values are a strictly increasing prefix of the positive
    // integers.
    assert_eq!(camera.cseqs(), vec![1, 2, 3, 4, 5]);
    assert_eq!(camera.log.lock().unwrap().teardowns, 1);
}

#[test]
fn rtp_datagram_reaches_video_sink() {
    let camera = MockCamera::start(MockConfig::default());
    let client = RtspClient::new();

    let (tx, rx) = mpsc::channel();
    client.set_frame_sink(TrackKind::Video, move |frame| {
        let _ = tx.send(frame);
    });

    assert!(client.connect(&camera.url(), None, None, connect_timeout()));
    assert!(client.play());

    let rtp_port = camera.client_rtp_port().expect("SETUP announced ports");
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let datagram = [
        0x80u8, 0x60, 0x00, 0x01, 0x00, 0x00, 0x03, 0xE8, 0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02,
        0x03,
    ];
    sender.send_to(&datagram, ("127.0.0.1", rtp_port)).unwrap();

    let frame = rx.recv_timeout(Duration::from_secs(2)).expect("frame");
    assert_eq!(frame.kind, TrackKind::Video);
    assert_eq!(frame.payload, vec![0x01, 0x02, 0x03]);
    assert_eq!(frame.timestamp, 1000);
    assert_eq!(client.track_ssrc(0), Some(0xDEAD_BEEF));

    // After disconnect no further frames are delivered.
    client.disconnect();
    assert_eq!(client.status(), SessionState::Disconnected);
    let _ = sender.send_to(&datagram, ("127.0.0.1", rtp_port));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn unauthenticated_describe_is_retried_with_basic() {
    let camera = MockCamera::start(MockConfig {
        require_auth: true,
        ..Default::default()
    });
    let client = RtspClient::new();

    assert!(client.connect(&camera.url(), Some("alice"), Some("secret"), connect_timeout()));
    assert_eq!(client.status(), SessionState::Connected);

    let log = camera.log.lock().unwrap();
    let describes: Vec<&String> = log
        .requests
        .iter()
        .filter(|(m, _)| m == "DESCRIBE")
        .map(|(_, text)| text)
        .collect();
    assert_eq!(describes.len(), 2, "401 triggers exactly one retry");
    assert!(header_value(describes[0], "Authorization").is_none());
    assert_eq!(
        header_value(describes[1], "Authorization").as_deref(),
        Some("Basic YWxpY2U6c2VjcmV0")
    );
}

#[test]
fn concurrent_disconnects_send_one_teardown() {
    let camera = MockCamera::start(MockConfig::default());
    let client = RtspClient::new();

    assert!(client.connect(&camera.url(), None, None, connect_timeout()));
    assert!(client.play());

    let c1 = client.clone();
    let c2 = client.clone();
    let t1 = thread::spawn(move || c1.disconnect());
    let t2 = thread::spawn(move || c2.disconnect());
    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(client.status(), SessionState::Disconnected);
    assert_eq!(camera.log.lock().unwrap().teardowns, 1);
}

#[test]
fn pause_and_replay_resume_the_stream() {
    let camera = MockCamera::start(MockConfig::default());
    let client = RtspClient::new();

    assert!(client.connect(&camera.url(), None, None, connect_timeout()));
    assert!(client.play());
    assert!(client.pause());
    assert_eq!(client.status(), SessionState::Paused);
    assert!(client.play());
    assert_eq!(client.status(), SessionState::Playing);
    assert!(client.stop());
    assert_eq!(client.status(), SessionState::Connected);

    let methods = camera.methods();
    let plays = methods.iter().filter(|m| *m == "PLAY").count();
    let pauses = methods.iter().filter(|m| *m == "PAUSE").count();
    assert_eq!(plays, 2);
    assert_eq!(pauses, 2);

    // Every PLAY carries a fresh range.
    let log = camera.log.lock().unwrap();
    for (_, text) in log.requests.iter().filter(|(m, _)| m == "PLAY") {
        assert_eq!(header_value(text, "Range").as_deref(), Some("npt=0.000-"));
    }
}

#[test]
fn empty_url_fails_without_socket() {
    let client = RtspClient::new();
    let errors: Arc<Mutex<Vec<StatusUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_errors = errors.clone();
    client.set_status_sink(move |update| {
        sink_errors.lock().unwrap().push(update.clone());
    });

    assert!(!client.connect("", None, None, connect_timeout()));
    assert_eq!(client.status(), SessionState::Disconnected);

    let errors = errors.lock().unwrap();
    assert!(
        errors
            .iter()
            .any(|u| u.error == Some(ErrorKind::Config)),
        "a config error must be reported: {errors:?}"
    );
}

#[test]
fn play_before_connect_is_a_state_error() {
    let client = RtspClient::new();
    let errors: Arc<Mutex<Vec<StatusUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_errors = errors.clone();
    client.set_status_sink(move |update| {
        sink_errors.lock().unwrap().push(update.clone());
    });

    assert!(!client.play());
    assert_eq!(client.status(), SessionState::Disconnected);
    assert!(
        errors
            .lock()
            .unwrap()
            .iter()
            .any(|u| u.error == Some(ErrorKind::State))
    );
}

#[test]
fn empty_describe_body_is_a_protocol_error() {
    let camera = MockCamera::start(MockConfig {
        empty_describe: true,
        ..Default::default()
    });
    let client = RtspClient::new();
    let errors: Arc<Mutex<Vec<StatusUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_errors = errors.clone();
    client.set_status_sink(move |update| {
        sink_errors.lock().unwrap().push(update.clone());
    });

    assert!(!client.connect(&camera.url(), None, None, connect_timeout()));
    assert!(
        errors
            .lock()
            .unwrap()
            .iter()
            .any(|u| u.error == Some(ErrorKind::Protocol))
    );
}

#[test]
fn sdp_with_unknown_attributes_yields_one_track() {
    const DECORATED_SDP: &str = "v=0\r\n\
        o=- 1 1 IN IP4 127.0.0.1\r\n\
        s=Mock Camera\r\n\
        a=recvonly\r\n\
        a=range:npt=0-\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=framerate:25\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=control:track1\r\n";

    let camera = MockCamera::start(MockConfig {
        sdp: Some(DECORATED_SDP),
        ..Default::default()
    });
    let client = RtspClient::new();

    assert!(client.connect(&camera.url(), None, None, connect_timeout()));
    assert_eq!(client.track_count(), 1);
    assert_eq!(client.track_kind(0), Some(TrackKind::Video));
}

#[test]
fn disconnect_from_inside_a_sink_does_not_deadlock() {
    let camera = MockCamera::start(MockConfig::default());
    let client = RtspClient::new();

    let sink_client = client.clone();
    let disconnects = Arc::new(AtomicUsize::new(0));
    let sink_disconnects = disconnects.clone();
    client.set_frame_sink(TrackKind::Video, move |_frame| {
        sink_client.disconnect();
        sink_disconnects.fetch_add(1, Ordering::SeqCst);
    });

    assert!(client.connect(&camera.url(), None, None, connect_timeout()));
    assert!(client.play());

    let rtp_port = camera.client_rtp_port().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let datagram = [
        0x80u8, 0x60, 0x00, 0x01, 0x00, 0x00, 0x03, 0xE8, 0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02,
        0x03,
    ];
    sender.send_to(&datagram, ("127.0.0.1", rtp_port)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while disconnects.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(disconnects.load(Ordering::SeqCst), 1, "sink ran disconnect");

    let deadline = Instant::now() + Duration::from_secs(3);
    while client.status() != SessionState::Disconnected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(client.status(), SessionState::Disconnected);
}

#[test]
fn refused_connection_retries_with_backoff() {
    // Grab a port with no listener behind it.
    let dead_addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let client = RtspClient::new();
    client
        .set_reconnect_params(ReconnectParams {
            enabled: true,
            max_retries: 4,
            initial_delay_ms: 100,
            max_delay_ms: 800,
            backoff_multiplier: 2.0,
        })
        .unwrap();

    let updates: Arc<Mutex<Vec<StatusUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_updates = updates.clone();
    client.set_status_sink(move |update| {
        sink_updates.lock().unwrap().push(update.clone());
    });

    let url = format!("rtsp://{dead_addr}/stream");
    let started = Instant::now();
    assert!(!client.connect(&url, None, None, Duration::from_millis(500)));

    // Wait for the schedule (100 + 200 + 400 + 800 ms) to play out.
    let deadline = Instant::now() + Duration::from_secs(10);
    while client.status() != SessionState::Disconnected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    let elapsed = started.elapsed();
    assert_eq!(client.status(), SessionState::Disconnected);
    assert!(
        elapsed >= Duration::from_millis(1400),
        "retries finished too fast: {elapsed:?}"
    );

    let updates = updates.lock().unwrap();
    let attempts = updates
        .iter()
        .filter(|u| u.state == SessionState::Connecting && u.message.contains("reconnecting"))
        .count();
    assert_eq!(attempts, 4, "updates: {updates:?}");
    let failures = updates
        .iter()
        .filter(|u| u.state == SessionState::Error)
        .count();
    assert_eq!(failures, 5, "initial failure plus four retries");
    assert_eq!(updates.last().unwrap().state, SessionState::Disconnected);
}
