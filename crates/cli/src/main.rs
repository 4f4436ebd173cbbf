use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use rtsp_client::{RtspClient, TrackKind};

#[derive(Parser)]
#[command(
    name = "rtsp-client",
    about = "Probe an RTSP camera stream and print frame statistics"
)]
struct Args {
    /// Camera URL (rtsp://[user:pass@]host[:port]/path)
    url: String,

    /// Username, when not embedded in the URL
    #[arg(long, short)]
    user: Option<String>,

    /// Password, when not embedded in the URL
    #[arg(long, short)]
    password: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let client = RtspClient::new();

    let video_frames = Arc::new(AtomicU64::new(0));
    let video_bytes = Arc::new(AtomicU64::new(0));
    {
        let frames = video_frames.clone();
        let bytes = video_bytes.clone();
        client.set_frame_sink(TrackKind::Video, move |frame| {
            let n = frames.fetch_add(1, Ordering::Relaxed) + 1;
            bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
            if n % 100 == 0 {
                println!("video: {n} frames, last ts {}", frame.timestamp);
            }
        });
    }
    client.set_frame_sink(TrackKind::Audio, |frame| {
        tracing::trace!(len = frame.len(), ts = frame.timestamp, "audio frame");
    });
    client.set_status_sink(|update| {
        println!("status: {:?} — {}", update.state, update.message);
    });

    if !client.connect(
        &args.url,
        args.user.as_deref(),
        args.password.as_deref(),
        Duration::from_secs(args.timeout),
    ) {
        eprintln!("Failed to connect to {}", args.url);
        return;
    }

    for i in 0..client.track_count() {
        if let (Some(kind), Some(info)) = (client.track_kind(i), client.track_info(i)) {
            println!("track {i}: {kind:?} {}", info.codec);
        }
    }

    if !client.play() {
        eprintln!("Failed to start playback");
        client.disconnect();
        return;
    }

    println!("Streaming from {} — press Enter to stop", args.url);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    client.disconnect();
    println!(
        "received {} video frames ({} bytes)",
        video_frames.load(Ordering::Relaxed),
        video_bytes.load(Ordering::Relaxed)
    );
}
