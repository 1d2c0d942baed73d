//! NTLMv2 message construction.
//!
//! Implements the three messages of the connection-oriented NTLM handshake
//! as used over HTTP (`Authorization: NTLM <base64>`):
//!
//! ```text
//! client                                   upstream
//!   │── NEGOTIATE (type 1) ──────────────────▶│
//!   │◀────────────────── CHALLENGE (type 2) ──│  401 + WWW-Authenticate
//!   │── AUTHENTICATE (type 3, NTLMv2) ───────▶│
//! ```
//!
//! Only the authentication part is implemented. No session key is
//! exchanged and no message signing or sealing happens afterwards.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;

use crate::error::{ProxyError, ProxyResult};

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSION_SECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSION_SECURITY
    | NEGOTIATE_128
    | NEGOTIATE_56;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

const NEGOTIATE_MESSAGE: u32 = 1;
const CHALLENGE_MESSAGE: u32 = 2;
const AUTHENTICATE_MESSAGE: u32 = 3;

/// Identity presented in the AUTHENTICATE message.
#[derive(Debug, Clone, Copy)]
pub struct NtlmIdentity<'a> {
    pub domain: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// Build the NEGOTIATE (type 1) message.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&NEGOTIATE_MESSAGE.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // Domain and workstation are not supplied.
    msg.extend_from_slice(&[0u8; 16]);
    msg
}

/// Decoded CHALLENGE (type 2) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl ChallengeMessage {
    /// Parse a raw CHALLENGE message.
    pub fn parse(bytes: &[u8]) -> ProxyResult<Self> {
        if bytes.len() < 32 || &bytes[..8] != SIGNATURE {
            return Err(ProxyError::Authentication("not an NTLM message".into()));
        }
        let message_type = read_u32(bytes, 8);
        if message_type != CHALLENGE_MESSAGE {
            return Err(ProxyError::Authentication(format!(
                "expected NTLM challenge, got message type {}",
                message_type
            )));
        }

        let flags = read_u32(bytes, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&bytes[24..32]);

        let target_info = if bytes.len() >= 48 && flags & NEGOTIATE_TARGET_INFO != 0 {
            read_security_buffer(bytes, 40)?.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// Server timestamp (`MsvAvTimestamp`) from the target info, if present.
    pub fn timestamp(&self) -> Option<[u8; 8]> {
        let info = &self.target_info;
        let mut at = 0;
        while at + 4 <= info.len() {
            let id = u16::from_le_bytes([info[at], info[at + 1]]);
            let len = u16::from_le_bytes([info[at + 2], info[at + 3]]) as usize;
            let value = info.get(at + 4..at + 4 + len)?;
            match id {
                AV_EOL => return None,
                AV_TIMESTAMP if len == 8 => {
                    let mut ts = [0u8; 8];
                    ts.copy_from_slice(value);
                    return Some(ts);
                }
                _ => at += 4 + len,
            }
        }
        None
    }

    fn unicode(&self) -> bool {
        self.flags & NEGOTIATE_UNICODE != 0
    }
}

/// Build the AUTHENTICATE (type 3) message answering `challenge`.
pub fn authenticate_message(challenge: &ChallengeMessage, identity: NtlmIdentity<'_>) -> Vec<u8> {
    let mut client_challenge = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut client_challenge);
    build_authenticate(challenge, identity, client_challenge, filetime_now())
}

fn build_authenticate(
    challenge: &ChallengeMessage,
    identity: NtlmIdentity<'_>,
    client_challenge: [u8; 8],
    filetime: u64,
) -> Vec<u8> {
    let key = ntowf_v2(identity.password, identity.username, identity.domain);

    // A server supplied timestamp means the LM response must be zeroed.
    let (timestamp, lm_response) = match challenge.timestamp() {
        Some(ts) => (ts, vec![0u8; 24]),
        None => (
            filetime.to_le_bytes(),
            lmv2_response(&key, &challenge.server_challenge, &client_challenge),
        ),
    };
    let nt_response = ntlmv2_response(
        &key,
        &challenge.server_challenge,
        &client_challenge,
        &timestamp,
        &challenge.target_info,
    );

    let unicode = challenge.unicode();
    let domain = encode_string(identity.domain, unicode);
    let user = encode_string(identity.username, unicode);
    let workstation: Vec<u8> = Vec::new();
    let session_key: Vec<u8> = Vec::new();

    let charset = if unicode { NEGOTIATE_UNICODE } else { NEGOTIATE_OEM };
    let flags = (CLIENT_FLAGS & challenge.flags) | charset;

    let fields: [&[u8]; 6] = [
        &lm_response,
        &nt_response,
        &domain,
        &user,
        &workstation,
        &session_key,
    ];
    let header_len = 64u32;

    let mut msg = Vec::with_capacity(header_len as usize + fields.iter().map(|f| f.len()).sum::<usize>());
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&AUTHENTICATE_MESSAGE.to_le_bytes());
    let mut offset = header_len;
    for field in fields {
        let len = field.len() as u16;
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&offset.to_le_bytes());
        offset += field.len() as u32;
    }
    msg.extend_from_slice(&flags.to_le_bytes());
    for field in fields {
        msg.extend_from_slice(field);
    }
    msg
}

/// NT one-way function (MD4 of the UTF-16LE password).
pub(crate) fn nt_hash(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

/// NTLMv2 response key: HMAC-MD5 over the upper-cased user and the domain.
pub(crate) fn ntowf_v2(password: &str, username: &str, domain: &str) -> [u8; 16] {
    let identity = utf16le(&format!("{}{}", username.to_uppercase(), domain));
    hmac_md5(&nt_hash(password), &[&identity])
}

fn lmv2_response(key: &[u8; 16], server_challenge: &[u8; 8], client_challenge: &[u8; 8]) -> Vec<u8> {
    let mut response = hmac_md5(key, &[server_challenge, client_challenge]).to_vec();
    response.extend_from_slice(client_challenge);
    response
}

fn ntlmv2_response(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: &[u8; 8],
    target_info: &[u8],
) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(timestamp);
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let proof = hmac_md5(key, &[server_challenge, &blob]);
    let mut response = proof.to_vec();
    response.extend_from_slice(&blob);
    response
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn encode_string(s: &str, unicode: bool) -> Vec<u8> {
    if unicode {
        utf16le(s)
    } else {
        s.as_bytes().to_vec()
    }
}

fn filetime_now() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_secs() + FILETIME_UNIX_OFFSET_SECS) * 10_000_000
        + u64::from(since_epoch.subsec_nanos() / 100)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_security_buffer(bytes: &[u8], at: usize) -> ProxyResult<&[u8]> {
    let len = u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize;
    let offset = read_u32(bytes, at + 4) as usize;
    bytes
        .get(offset..offset + len)
        .ok_or_else(|| ProxyError::Authentication("NTLM security buffer out of bounds".into()))
}
