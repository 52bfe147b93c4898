//! Notary service for the vigil ledger.
//!
//! Ties the Merkle engine and the uniqueness providers into the
//! request/response protocol a counterparty drives: submit a transaction
//! (a filtered view for non-validating notaries, a fully signed one for
//! validating notaries) and receive either a signature over its id or a
//! single typed error. The notary-change protocol and the framed TCP
//! transport live here too, along with the node binary.

pub mod change;
pub mod error;
pub mod messages;
pub mod service;
pub mod transport;
pub mod validation;

pub use change::{
    build_notary_change, run_notary_change, KeyRing, ParticipantSigner, StateReplacementError,
};
pub use error::{NotaryError, ServiceError};
pub use messages::{
    CommitRequest, CommitResponse, NotarySignature, RequestEnvelope, SignedTransaction,
    TransactionSignature,
};
pub use service::{notarisation_view, NotaryService, ServiceMode};
pub use transport::{
    NotaryClient, NotaryServer, RemoteReplica, ReplicaRequest, ReplicaResponse, ReplicaServer,
    TransportError, MAX_FRAME_BYTES,
};
pub use validation::{
    AcceptAll, ContractRegistry, ContractVerifier, InMemoryResolver, ResolvedTransaction,
    TransactionResolver, TransactionValidator,
};
