//! protocol
//!
//! Smart-HTTP framing: service names, content types, pkt-lines, and the
//! ref-update commands at the head of a receive-pack request.
//!
//! Only what the gateway needs to inspect is parsed here. Pack data is
//! passed through to the git engine untouched.

use thiserror::Error;

use crate::core::types::{Oid, RefName};

/// Largest pkt-line, length prefix included.
pub const MAX_PKT_LEN: usize = 65520;

/// Errors from parsing pkt-line framed input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("malformed pkt-line at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("request ended before the command list was terminated")]
    Truncated,

    #[error("invalid command '{line}': {reason}")]
    InvalidCommand { line: String, reason: String },
}

/// A smart-HTTP git service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    /// Parse the `service` query parameter of `info/refs`.
    pub fn from_param(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "git-upload-pack" => Ok(GitService::UploadPack),
            "git-receive-pack" => Ok(GitService::ReceivePack),
            other => Err(ProtocolError::UnknownService(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    /// The `git` subcommand implementing this service.
    pub fn subcommand(&self) -> &'static str {
        match self {
            GitService::UploadPack => "upload-pack",
            GitService::ReceivePack => "receive-pack",
        }
    }

    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            GitService::UploadPack => "application/x-git-upload-pack-advertisement",
            GitService::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    pub fn request_content_type(&self) -> &'static str {
        match self {
            GitService::UploadPack => "application/x-git-upload-pack-request",
            GitService::ReceivePack => "application/x-git-receive-pack-request",
        }
    }

    pub fn result_content_type(&self) -> &'static str {
        match self {
            GitService::UploadPack => "application/x-git-upload-pack-result",
            GitService::ReceivePack => "application/x-git-receive-pack-result",
        }
    }
}

impl std::fmt::Display for GitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame `data` as one pkt-line.
///
/// ```
/// assert_eq!(mirrorgate::protocol::pkt_line("hi\n"), b"0007hi\n");
/// ```
pub fn pkt_line(data: &str) -> Vec<u8> {
    let len = data.len() + 4;
    format!("{len:04x}{data}").into_bytes()
}

/// The flush packet.
pub fn pkt_flush() -> &'static [u8] {
    b"0000"
}

/// `info/refs` body: the `# service=` banner, a flush, then the engine's
/// own ref advertisement.
pub fn advertisement(service: GitService, refs: &[u8]) -> Vec<u8> {
    let mut body = pkt_line(&format!("# service={}\n", service.as_str()));
    body.extend_from_slice(pkt_flush());
    body.extend_from_slice(refs);
    body
}

/// One `<old> <new> <ref>` update requested by a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCommand {
    pub old: Oid,
    pub new: Oid,
    pub refname: RefName,
}

impl PushCommand {
    pub fn is_create(&self) -> bool {
        self.old.is_zero()
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }
}

fn parse_command(line: &str) -> Result<PushCommand, ProtocolError> {
    let invalid = |reason: &str| ProtocolError::InvalidCommand {
        line: line.to_string(),
        reason: reason.to_string(),
    };
    let mut parts = line.splitn(3, ' ');
    let (Some(old), Some(new), Some(refname)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("expected '<old> <new> <ref>'"));
    };
    Ok(PushCommand {
        old: Oid::new(old).map_err(|e| invalid(&e.to_string()))?,
        new: Oid::new(new).map_err(|e| invalid(&e.to_string()))?,
        refname: RefName::new(refname).map_err(|e| invalid(&e.to_string()))?,
    })
}

/// Parse the command list at the head of a receive-pack request.
///
/// Stops at the first flush packet; whatever follows (the pack) is not
/// examined. Capabilities after the NUL on the first command are dropped,
/// as are `shallow` lines.
///
/// ```
/// use mirrorgate::protocol::{parse_push_commands, pkt_line};
///
/// let zero = "0".repeat(40);
/// let new = "a".repeat(40);
/// let mut body = pkt_line(&format!("{zero} {new} refs/heads/main\0report-status\n"));
/// body.extend_from_slice(b"0000PACK...");
///
/// let commands = parse_push_commands(&body).unwrap();
/// assert_eq!(commands.len(), 1);
/// assert!(commands[0].is_create());
/// ```
pub fn parse_push_commands(body: &[u8]) -> Result<Vec<PushCommand>, ProtocolError> {
    let mut commands = Vec::new();
    let mut pos = 0;
    loop {
        let Some(prefix) = body.get(pos..pos + 4) else {
            return Err(ProtocolError::Truncated);
        };
        let len = std::str::from_utf8(prefix)
            .ok()
            .and_then(|s| usize::from_str_radix(s, 16).ok())
            .ok_or_else(|| ProtocolError::Malformed {
                offset: pos,
                reason: "length prefix is not hexadecimal".into(),
            })?;
        if len == 0 {
            return Ok(commands);
        }
        if len < 4 || len > MAX_PKT_LEN {
            return Err(ProtocolError::Malformed {
                offset: pos,
                reason: format!("invalid length {len}"),
            });
        }
        let payload = body
            .get(pos + 4..pos + len)
            .ok_or(ProtocolError::Truncated)?;
        pos += len;

        let line = std::str::from_utf8(payload).map_err(|_| ProtocolError::Malformed {
            offset: pos - len,
            reason: "command is not UTF-8".into(),
        })?;
        let line = line.split('\0').next().unwrap_or(line);
        let line = line.trim_end_matches('\n');
        if line.starts_with("shallow ") || line.is_empty() {
            continue;
        }
        commands.push(parse_command(line)?);
    }
}
