//! Transport layer: the RTSP control connection over TCP and the RTP/RTCP
//! receive loop over UDP.

pub mod control;
pub mod udp;

pub use control::ControlChannel;
