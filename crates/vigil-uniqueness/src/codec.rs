//! Deterministic wire codec for replicated commands.
//!
//! Replica-to-replica bytes deliberately avoid the general object codec:
//! agreement is reached on these exact bytes, and every replica must map
//! them to the same command forever. Fixed little-endian layout, explicit
//! offsets, one version byte up front.

use crate::types::Party;
use thiserror::Error;
use vigil_merkle::{SecureHash, StateRef, TimeWindow};

const COMMAND_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandCodecError {
    #[error("command bytes truncated")]
    Truncated,
    #[error("unsupported command version {0}")]
    UnsupportedVersion(u8),
    #[error("requester name is not valid utf-8")]
    BadUtf8,
    #[error("trailing bytes after command")]
    TrailingBytes,
}

/// The one command the replicated state machine executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitCommand {
    pub tx_id: SecureHash,
    pub inputs: Vec<StateRef>,
    pub requester: Party,
    pub time_window: Option<TimeWindow>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CommandCodecError> {
        let end = self
            .offset
            .checked_add(n)
            .ok_or(CommandCodecError::Truncated)?;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(CommandCodecError::Truncated)?;
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CommandCodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CommandCodecError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, CommandCodecError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn hash(&mut self) -> Result<SecureHash, CommandCodecError> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(32)?);
        Ok(SecureHash(buf))
    }
}

impl CommitCommand {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.inputs.len() * 36);
        out.push(COMMAND_VERSION);
        out.extend_from_slice(&self.tx_id.0);

        out.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            out.extend_from_slice(&input.tx_id.0);
            out.extend_from_slice(&input.index.to_le_bytes());
        }

        let name = self.requester.name.as_bytes();
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&self.requester.key);

        match &self.time_window {
            None => out.push(0),
            Some(window) => {
                let mut flags = 1u8;
                if window.from.is_some() {
                    flags |= 2;
                }
                if window.until.is_some() {
                    flags |= 4;
                }
                out.push(flags);
                if let Some(from) = window.from {
                    out.extend_from_slice(&from.to_le_bytes());
                }
                if let Some(until) = window.until {
                    out.extend_from_slice(&until.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<CommitCommand, CommandCodecError> {
        let mut reader = Reader { bytes, offset: 0 };

        let version = reader.u8()?;
        if version != COMMAND_VERSION {
            return Err(CommandCodecError::UnsupportedVersion(version));
        }
        let tx_id = reader.hash()?;

        let input_count = reader.u32()? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            let id = reader.hash()?;
            let index = reader.u32()?;
            inputs.push(StateRef::new(id, index));
        }

        let name_len = reader.u32()? as usize;
        let name = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| CommandCodecError::BadUtf8)?
            .to_string();
        let mut key = [0u8; 32];
        key.copy_from_slice(reader.take(32)?);

        let flags = reader.u8()?;
        let time_window = if flags & 1 == 0 {
            None
        } else {
            let from = if flags & 2 != 0 {
                Some(reader.u64()?)
            } else {
                None
            };
            let until = if flags & 4 != 0 {
                Some(reader.u64()?)
            } else {
                None
            };
            Some(TimeWindow { from, until })
        };

        if reader.offset != bytes.len() {
            return Err(CommandCodecError::TrailingBytes);
        }

        Ok(CommitCommand {
            tx_id,
            inputs,
            requester: Party { name, key },
            time_window,
        })
    }

    /// Digest the agreement round votes on.
    pub fn digest(&self) -> SecureHash {
        SecureHash::hash(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(window: Option<TimeWindow>) -> CommitCommand {
        CommitCommand {
            tx_id: SecureHash::hash(b"tx"),
            inputs: vec![
                StateRef::new(SecureHash::hash(b"a"), 0),
                StateRef::new(SecureHash::hash(b"b"), 3),
            ],
            requester: Party {
                name: "alice".into(),
                key: [5u8; 32],
            },
            time_window: window,
        }
    }

    #[test]
    fn test_round_trip() {
        for window in [
            None,
            Some(TimeWindow::between(10, 20)),
            Some(TimeWindow::from_only(10)),
            Some(TimeWindow::until_only(20)),
            Some(TimeWindow { from: None, until: None }),
        ] {
            let cmd = command(window);
            let decoded = CommitCommand::decode(&cmd.encode()).unwrap();
            assert_eq!(decoded, cmd);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = command(Some(TimeWindow::between(1, 2)));
        let b = command(Some(TimeWindow::between(1, 2)));
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_covers_every_field() {
        let base = command(None);
        let mut other = base.clone();
        other.inputs[1].index = 4;
        assert_ne!(base.digest(), other.digest());

        let mut renamed = base.clone();
        renamed.requester.name = "mallory".into();
        assert_ne!(base.digest(), renamed.digest());

        let windowed = command(Some(TimeWindow::between(1, 2)));
        assert_ne!(base.digest(), windowed.digest());
    }

    #[test]
    fn test_truncation_rejected() {
        let bytes = command(None).encode();
        for cut in [0, 1, 20, bytes.len() - 1] {
            assert!(
                CommitCommand::decode(&bytes[..cut]).is_err(),
                "cut at {} accepted",
                cut
            );
        }
    }

    #[test]
    fn test_version_and_trailing_checks() {
        let mut bytes = command(None).encode();
        bytes[0] = 9;
        assert!(matches!(
            CommitCommand::decode(&bytes),
            Err(CommandCodecError::UnsupportedVersion(9))
        ));

        let mut padded = command(None).encode();
        padded.push(0);
        assert!(matches!(
            CommitCommand::decode(&padded),
            Err(CommandCodecError::TrailingBytes)
        ));
    }
}
