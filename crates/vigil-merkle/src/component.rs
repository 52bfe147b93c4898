//! Typed component model.
//!
//! On the wire a transaction is nothing but tagged lists of opaque byte
//! strings (see [`ComponentGroup`]). The types here are what the well-known
//! groups decode to; larger group indices are forward-compatibility slots
//! that stay opaque end to end.

use crate::hash::SecureHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte public key (compressed Ristretto point).
pub type PublicKey = [u8; 32];

/// 64-byte Schnorr signature encoding.
pub type SignatureBytes = [u8; 64];

/// Well-known component group indices. Indices above `SIGNERS` are
/// unknown-but-preserved.
pub const INPUTS_GROUP: u32 = 0;
pub const OUTPUTS_GROUP: u32 = 1;
pub const COMMANDS_GROUP: u32 = 2;
pub const ATTACHMENTS_GROUP: u32 = 3;
pub const NOTARY_GROUP: u32 = 4;
pub const TIMEWINDOW_GROUP: u32 = 5;
pub const SIGNERS_GROUP: u32 = 6;

/// Groups that hold at most one element.
pub fn is_singleton_group(group_index: u32) -> bool {
    group_index == NOTARY_GROUP || group_index == TIMEWINDOW_GROUP
}

/// A tagged, ordered list of opaque serialized components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentGroup {
    pub group_index: u32,
    pub components: Vec<Vec<u8>>,
}

impl ComponentGroup {
    pub fn new(group_index: u32, components: Vec<Vec<u8>>) -> Self {
        ComponentGroup {
            group_index,
            components,
        }
    }
}

/// Pointer to one output of a prior transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub tx_id: SecureHash,
    pub index: u32,
}

impl StateRef {
    pub fn new(tx_id: SecureHash, index: u32) -> Self {
        StateRef { tx_id, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tx_id, self.index)
    }
}

/// Identity of a notary service: the public key transactions are signed
/// under. In replicated deployments this is the cluster's group key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotaryId(pub PublicKey);

impl fmt::Display for NotaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NotaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotaryId({})", self)
    }
}

/// An output state: opaque contract data plus the metadata the notarisation
/// machinery acts on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionState {
    /// Opaque serialized contract state. The notary never interprets it.
    pub data: Vec<u8>,
    /// Identifier of the contract governing this state.
    pub contract: SecureHash,
    /// Notary providing uniqueness for this state.
    pub notary: NotaryId,
    /// Keys whose holders must approve reassignments of this state.
    pub participants: Vec<PublicKey>,
    /// "May only be spent together with output `i`" relation, by index into
    /// the same transaction's outputs.
    pub encumbrance: Option<u32>,
}

/// A command: an opaque instruction payload plus the keys required to sign
/// for it. The per-command key lists are mirrored in the SIGNERS group so
/// key-scoped disclosure proofs stay possible without revealing payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub payload: Vec<u8>,
    pub signers: Vec<PublicKey>,
}

/// Transaction validity window in Unix milliseconds. Either endpoint may be
/// open; `from` is inclusive, `until` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<u64>,
    pub until: Option<u64>,
}

impl TimeWindow {
    pub fn between(from: u64, until: u64) -> Self {
        TimeWindow {
            from: Some(from),
            until: Some(until),
        }
    }

    pub fn from_only(from: u64) -> Self {
        TimeWindow {
            from: Some(from),
            until: None,
        }
    }

    pub fn until_only(until: u64) -> Self {
        TimeWindow {
            from: None,
            until: Some(until),
        }
    }

    pub fn contains(&self, instant_millis: u64) -> bool {
        if let Some(from) = self.from {
            if instant_millis < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if instant_millis >= until {
                return false;
            }
        }
        true
    }
}

/// One typed component, as handed to filtering predicates.
///
/// Signer lists are not exposed here: the SIGNERS group follows command
/// selection automatically rather than being filtered element-wise.
#[derive(Clone, Debug)]
pub enum Component<'a> {
    Input(&'a StateRef),
    Output(&'a TransactionState),
    Command(&'a Command),
    Attachment(&'a SecureHash),
    Notary(&'a NotaryId),
    TimeWindow(&'a TimeWindow),
    Unknown { group_index: u32, bytes: &'a [u8] },
}
