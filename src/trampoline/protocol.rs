//! Trampoline wire format
//!
//! The helper executable sends one message per connection:
//!
//! ```text
//! <argc>\0<arg 1>\0...<arg n>\0<envc>\0<KEY=VALUE>\0...\0<stdin bytes>
//! ```
//!
//! then half-closes the socket. The host answers with the text git expects on
//! the helper's stdout and closes the connection.

use std::collections::{BTreeMap, HashMap};

use crate::git::split::split_buffer;

use super::TrampolineError;

/// Port of the host's trampoline listener
pub const PORT_ENV: &str = "TIDYFLOW_PORT";
/// Address of the host's trampoline listener (IPv4 or IPv6 literal)
pub const HOST_ENV: &str = "TIDYFLOW_TRAMPOLINE_HOST";
/// Token correlating a helper call with the git invocation that spawned it
pub const TOKEN_ENV: &str = "TIDYFLOW_TRAMPOLINE_TOKEN";
/// Prefix of the variables the helper forwards to the host
pub const FORWARDED_ENV_PREFIX: &str = "TIDYFLOW_";

/// Upper bound on a single helper message
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// A decoded helper call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrampolineRequest {
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub stdin: String,
}

impl TrampolineRequest {
    pub fn token(&self) -> Option<&str> {
        self.env.get(TOKEN_ENV).map(String::as_str)
    }

    pub fn command(&self) -> Result<TrampolineCommand, TrampolineError> {
        TrampolineCommand::from_request(self)
    }
}

/// git credential helper actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialAction {
    Get,
    Store,
    Erase,
}

impl CredentialAction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "get" => Some(Self::Get),
            "store" => Some(Self::Store),
            "erase" => Some(Self::Erase),
            _ => None,
        }
    }
}

/// `key=value` attributes of the git credential protocol
pub type CredentialFields = BTreeMap<String, String>;

/// What the helper was invoked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrampolineCommand {
    /// `GIT_ASKPASS` / `SSH_ASKPASS`: a single prompt, answered with one line
    AskPass { prompt: String },
    /// `credential.helper`: `credential <action>` with fields on stdin
    Credential {
        action: CredentialAction,
        fields: CredentialFields,
    },
}

impl TrampolineCommand {
    fn from_request(request: &TrampolineRequest) -> Result<Self, TrampolineError> {
        match request.args.as_slice() {
            [mode, action, ..] if mode == "credential" => {
                let action = CredentialAction::parse(action).ok_or_else(|| {
                    TrampolineError::Malformed(format!("unknown credential action '{}'", action))
                })?;
                Ok(TrampolineCommand::Credential {
                    action,
                    fields: parse_credential_fields(&request.stdin),
                })
            }
            [prompt, ..] => Ok(TrampolineCommand::AskPass {
                prompt: prompt.clone(),
            }),
            [] => Err(TrampolineError::Malformed("missing arguments".to_string())),
        }
    }
}

/// Parse git credential protocol input (`key=value` lines, blank line ends)
pub fn parse_credential_fields(input: &str) -> CredentialFields {
    input
        .lines()
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Format fields for git credential protocol output
pub fn format_credential_fields(fields: &CredentialFields) -> String {
    let mut out = String::new();
    for (k, v) in fields {
        // Newlines would let a value inject extra attributes
        if k.contains(['\n', '=']) || v.contains('\n') {
            continue;
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}

/// Decode a complete helper message
pub fn decode_request(buffer: &[u8]) -> Result<TrampolineRequest, TrampolineError> {
    let ranges = split_buffer(buffer, b"\0")
        .map_err(|e| TrampolineError::Malformed(e.to_string()))?;
    let mut fields = ranges.iter();

    let mut next_field = |what: &str| -> Result<String, TrampolineError> {
        // The final range is stdin, never a header field
        match fields.next() {
            Some(range) if range.end() < buffer.len() => {
                String::from_utf8(range.slice(buffer).to_vec())
                    .map_err(|_| TrampolineError::Malformed(format!("{} is not UTF-8", what)))
            }
            _ => Err(TrampolineError::Malformed(format!("truncated before {}", what))),
        }
    };

    let parse_count = |s: String, what: &str| -> Result<usize, TrampolineError> {
        s.parse::<usize>()
            .map_err(|_| TrampolineError::Malformed(format!("invalid {} '{}'", what, s)))
    };

    let argc = parse_count(next_field("argc")?, "argc")?;
    let mut args = Vec::with_capacity(argc.min(64));
    for _ in 0..argc {
        args.push(next_field("argument")?);
    }

    let envc = parse_count(next_field("envc")?, "envc")?;
    let mut env = HashMap::new();
    for _ in 0..envc {
        let entry = next_field("environment entry")?;
        let (k, v) = entry.split_once('=').ok_or_else(|| {
            TrampolineError::Malformed("environment entry without '='".to_string())
        })?;
        env.insert(k.to_string(), v.to_string());
    }
    drop(next_field);

    // Everything after the last header terminator is stdin, delimiters included
    let stdin_start = fields.next().map(|r| r.offset).unwrap_or(buffer.len());
    let stdin = String::from_utf8_lossy(&buffer[stdin_start..]).into_owned();

    Ok(TrampolineRequest { args, env, stdin })
}

/// Encode a helper message; the inverse of [`decode_request`]
pub fn encode_request(args: &[String], env: &[(String, String)], stdin: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut field = |bytes: &[u8]| {
        out.extend_from_slice(bytes);
        out.push(0);
    };
    field(args.len().to_string().as_bytes());
    for arg in args {
        field(arg.as_bytes());
    }
    field(env.len().to_string().as_bytes());
    for (k, v) in env {
        field(format!("{}={}", k, v).as_bytes());
    }
    out.extend_from_slice(stdin);
    out
}
