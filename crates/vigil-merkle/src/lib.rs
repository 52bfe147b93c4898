//! Merkle transaction engine for the vigil notarisation subsystem.
//!
//! Transactions are bags of *component groups*: tagged, ordered lists of
//! opaque serialized components. Each component is hashed together with a
//! nonce derived from a per-transaction privacy salt, every group gets its
//! own Merkle tree, and the transaction id is the root over the group root
//! list. From that one id a holder can derive [`FilteredTransaction`]s:
//! partial views that reveal chosen components and prove, with partial
//! Merkle trees, that each revealed value is exactly what the signers
//! committed to.
//!
//! ```text
//! components ──hash with nonce──► group trees ──roots──► top tree ──► id
//!      │                               │
//!      └── filter(predicate) ──► partial trees ──► FilteredTransaction
//! ```
//!
//! Nothing here touches the ledger: uniqueness and notarisation build on
//! top of these types.

pub mod component;
pub mod error;
pub mod filtered;
pub mod hash;
pub mod partial;
pub mod transaction;
pub mod tree;

pub use component::{
    is_singleton_group, Command, Component, ComponentGroup, NotaryId, PublicKey, SignatureBytes,
    StateRef, TimeWindow, TransactionState, ATTACHMENTS_GROUP, COMMANDS_GROUP, INPUTS_GROUP,
    NOTARY_GROUP, OUTPUTS_GROUP, SIGNERS_GROUP, TIMEWINDOW_GROUP,
};
pub use error::{FilteredTransactionError, MalformedTransactionError, MerkleError};
pub use filtered::{FilteredComponentGroup, FilteredTransaction};
pub use hash::{component_leaf_hash, component_nonce, PrivacySalt, SecureHash};
pub use partial::{PartialMerkleTree, PartialProofError};
pub use transaction::{TransactionBuilder, WireTransaction};
pub use tree::MerkleTree;
