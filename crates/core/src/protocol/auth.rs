//! RTSP authentication (RFC 2617, carried over from HTTP).
//!
//! Basic is mandatory and attached proactively once credentials are known.
//! Digest is computed on demand from a `WWW-Authenticate` challenge, with
//! `qop=auth` handled when the server offers it.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use md5::{Digest, Md5};
use rand::Rng;

/// `Authorization: Basic <base64(user:password)>` value.
pub fn basic_authorization(username: &str, password: &str) -> String {
    let credentials = format!("{username}:{password}");
    format!("Basic {}", BASE64.encode(credentials))
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Digest {
        realm: String,
        nonce: String,
        /// Server offered `qop=auth`.
        qop_auth: bool,
    },
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Returns None for schemes other than Basic and Digest.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        if header.len() >= 5 && header[..5].eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        let params = if header.len() >= 6 && header[..6].eq_ignore_ascii_case("digest") {
            &header[6..]
        } else {
            return None;
        };

        let realm = param_value(params, "realm")?;
        let nonce = param_value(params, "nonce")?;
        let qop_auth = param_value(params, "qop")
            .is_some_and(|qop| qop.split(',').any(|q| q.trim() == "auth"));

        Some(Challenge::Digest {
            realm,
            nonce,
            qop_auth,
        })
    }
}

/// Extract `key="value"` (or unquoted `key=value`) from a comma-separated
/// parameter list. Parts without `=` (continuations of quoted lists) are
/// skipped.
fn param_value(params: &str, key: &str) -> Option<String> {
    for part in params.split(',') {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case(key) {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

/// `Authorization: Digest ...` value for the given method/URI pair.
pub fn digest_authorization(
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    realm: &str,
    nonce: &str,
    qop_auth: bool,
) -> String {
    if qop_auth {
        let cnonce = format!("{:08x}", rand::rng().random::<u32>());
        let nc = "00000001";
        let response =
            digest_response(username, password, method, uri, realm, nonce, Some((nc, &cnonce)));
        format!(
            "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", \
             uri=\"{uri}\", qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\""
        )
    } else {
        let response = digest_response(username, password, method, uri, realm, nonce, None);
        format!(
            "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", \
             uri=\"{uri}\", response=\"{response}\""
        )
    }
}

/// `response = MD5(HA1:nonce[:nc:cnonce:auth]:HA2)` per RFC 2617 §3.2.2.
fn digest_response(
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    realm: &str,
    nonce: &str,
    qop: Option<(&str, &str)>,
) -> String {
    let ha1 = md5_hex(&format!("{username}:{realm}:{password}"));
    let ha2 = md5_hex(&format!("{method}:{uri}"));

    match qop {
        Some((nc, cnonce)) => md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}")),
        None => md5_hex(&format!("{ha1}:{nonce}:{ha2}")),
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}
