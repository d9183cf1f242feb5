//! EIP-4361 (Sign-In with Ethereum) message parsing.

use chrono::{DateTime, Utc};
use url::Url;

use super::VerifyError;
use crate::models::Address;

const PREAMBLE_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const FARCASTER_FID_PREFIX: &str = "farcaster://fid/";

/// A parsed sign-in message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: Address,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub resources: Vec<String>,
}

fn malformed(reason: impl Into<String>) -> VerifyError {
    VerifyError::MalformedMessage(reason.into())
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, VerifyError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| malformed(format!("{field}: {e}")))
}

fn set_once<T>(slot: &mut Option<T>, field: &str, value: T) -> Result<(), VerifyError> {
    if slot.is_some() {
        return Err(malformed(format!("duplicate field {field}")));
    }
    *slot = Some(value);
    Ok(())
}

impl SiweMessage {
    pub fn parse(message: &str) -> Result<Self, VerifyError> {
        let mut lines = message.lines().peekable();

        let preamble = lines.next().ok_or_else(|| malformed("empty message"))?;
        let domain = preamble
            .strip_suffix(PREAMBLE_SUFFIX)
            .filter(|d| !d.is_empty() && !d.contains(char::is_whitespace))
            .ok_or_else(|| malformed("bad preamble"))?
            .to_string();

        let address = lines
            .next()
            .ok_or_else(|| malformed("missing address"))?
            .trim()
            .parse::<Address>()
            .map_err(|e| malformed(format!("address: {e}")))?;

        // Blank line, optional statement, blank line(s).
        let mut statement = None;
        while let Some(line) = lines.peek() {
            if line.starts_with("URI: ") {
                break;
            }
            let line = lines.next().unwrap_or_default();
            if line.is_empty() {
                continue;
            }
            set_once(&mut statement, "statement", line.to_string())?;
        }

        let mut uri = None;
        let mut version = None;
        let mut chain_id = None;
        let mut nonce = None;
        let mut issued_at = None;
        let mut expiration_time = None;
        let mut not_before = None;
        let mut request_id = None;
        let mut resources = Vec::new();

        while let Some(line) = lines.next() {
            if line == "Resources:" {
                for resource in lines.by_ref() {
                    let resource = resource
                        .strip_prefix("- ")
                        .ok_or_else(|| malformed("bad resource line"))?;
                    resources.push(resource.to_string());
                }
                break;
            }
            let (field, value) = line
                .split_once(": ")
                .ok_or_else(|| malformed(format!("unexpected line {line:?}")))?;
            match field {
                "URI" => {
                    Url::parse(value).map_err(|e| malformed(format!("uri: {e}")))?;
                    set_once(&mut uri, field, value.to_string())?
                }
                "Version" => set_once(&mut version, field, value.to_string())?,
                "Chain ID" => {
                    let id = value
                        .parse::<u64>()
                        .map_err(|e| malformed(format!("chain id: {e}")))?;
                    set_once(&mut chain_id, field, id)?
                }
                "Nonce" => set_once(&mut nonce, field, value.to_string())?,
                "Issued At" => set_once(&mut issued_at, field, parse_time(field, value)?)?,
                "Expiration Time" => {
                    set_once(&mut expiration_time, field, parse_time(field, value)?)?
                }
                "Not Before" => set_once(&mut not_before, field, parse_time(field, value)?)?,
                "Request ID" => set_once(&mut request_id, field, value.to_string())?,
                other => return Err(malformed(format!("unknown field {other}"))),
            }
        }

        let version = version.ok_or_else(|| malformed("missing Version"))?;
        if version != "1" {
            return Err(malformed(format!("unsupported version {version}")));
        }
        let nonce = nonce.ok_or_else(|| malformed("missing Nonce"))?;
        if nonce.len() < 8 || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed("nonce must be at least 8 alphanumeric characters"));
        }

        Ok(Self {
            domain,
            address,
            statement,
            uri: uri.ok_or_else(|| malformed("missing URI"))?,
            version,
            chain_id: chain_id.ok_or_else(|| malformed("missing Chain ID"))?,
            nonce,
            issued_at: issued_at.ok_or_else(|| malformed("missing Issued At"))?,
            expiration_time,
            not_before,
            request_id,
            resources,
        })
    }

    /// The Farcaster id named by a `farcaster://fid/<n>` resource.
    pub fn farcaster_fid(&self) -> Option<u64> {
        self.resources
            .iter()
            .find_map(|r| r.strip_prefix(FARCASTER_FID_PREFIX))
            .and_then(|fid| fid.parse().ok())
    }
}
