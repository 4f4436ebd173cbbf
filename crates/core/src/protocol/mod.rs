//! RTSP control-plane text handling: URLs, requests, responses, SDP, and
//! authentication.

pub mod auth;
pub mod request;
pub mod response;
pub mod sdp;
pub mod url;

pub use request::{RtspRequest, USER_AGENT};
pub use response::RtspResponse;
pub use sdp::TrackDraft;
pub use url::RtspUrl;
