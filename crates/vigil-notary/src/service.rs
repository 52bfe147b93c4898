//! The notary service and its per-request state machine.
//!
//! Every request walks the same explicit states:
//!
//! ```text
//! Verifying ──ok──► Committing ──ok──► Signing ──► Done(Ok)
//!     │                  │
//!     └─fail─► Done(Err) └─conflict─► Done(Err)
//! ```
//!
//! Verification never touches shared state; the commit is the only step
//! with side effects and it is idempotent, so a session that dies between
//! Committing and the response can simply be replayed by the client. The
//! trusted clock is read exactly once per request, after all verification
//! and before the commit.

use crate::error::{NotaryError, ServiceError};
use crate::messages::{CommitRequest, CommitResponse, NotarySignature, RequestEnvelope};
use crate::validation::TransactionValidator;
use std::sync::Arc;
use vigil_merkle::{Component, NotaryId, SecureHash, StateRef, TimeWindow};
use vigil_uniqueness::{
    Clock, CommitProof, Party, SchnorrKeyPair, UniquenessError, UniquenessProvider,
};

pub enum ServiceMode {
    /// Verify Merkle proofs of a filtered view; never see contract data.
    NonValidating,
    /// Re-execute contracts over the resolved dependency graph.
    Validating(TransactionValidator),
}

pub struct NotaryService {
    identity: NotaryId,
    signer: Option<SchnorrKeyPair>,
    provider: Arc<dyn UniquenessProvider>,
    clock: Arc<dyn Clock>,
    mode: ServiceMode,
}

impl NotaryService {
    /// Single-node non-validating notary; identity is the signing key.
    pub fn non_validating(
        keypair: SchnorrKeyPair,
        provider: Arc<dyn UniquenessProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        NotaryService {
            identity: NotaryId(keypair.public_key()),
            signer: Some(keypair),
            provider,
            clock,
            mode: ServiceMode::NonValidating,
        }
    }

    /// Single-node validating notary.
    pub fn validating(
        keypair: SchnorrKeyPair,
        provider: Arc<dyn UniquenessProvider>,
        clock: Arc<dyn Clock>,
        validator: TransactionValidator,
    ) -> Self {
        NotaryService {
            identity: NotaryId(keypair.public_key()),
            signer: Some(keypair),
            provider,
            clock,
            mode: ServiceMode::Validating(validator),
        }
    }

    /// Front of a replicated notary: the identity is the cluster's group
    /// key and the signature comes back from the commit itself, so there is
    /// no local signing key.
    pub fn replicated(
        identity: NotaryId,
        provider: Arc<dyn UniquenessProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        NotaryService {
            identity,
            signer: None,
            provider,
            clock,
            mode: ServiceMode::NonValidating,
        }
    }

    pub fn identity(&self) -> NotaryId {
        self.identity
    }

    /// Handle one request to completion. `Err` is an internal failure that
    /// must not reach the wire; the caller logs it and drops the session.
    pub fn process(&self, envelope: &RequestEnvelope) -> Result<CommitResponse, ServiceError> {
        let mut session = Session::new(self, envelope);
        loop {
            if let SessionState::Done(response) = session.state() {
                let response = response.clone();
                match &response {
                    CommitResponse::Ok { .. } => {
                        tracing::info!(tx_id = %envelope.request.tx_id(), requester = %envelope.requester, "request notarised")
                    }
                    CommitResponse::Err(error) => {
                        tracing::info!(tx_id = %envelope.request.tx_id(), %error, "request rejected")
                    }
                }
                return Ok(response);
            }
            session.step()?;
        }
    }
}

/// Everything verification extracts before the commit step.
struct VerifiedRequest {
    inputs: Vec<StateRef>,
    time_window: Option<TimeWindow>,
}

enum SessionState {
    Verifying,
    Committing(VerifiedRequest),
    Signing(CommitProof),
    Done(CommitResponse),
}

/// One request walking the notarisation states.
struct Session<'a> {
    service: &'a NotaryService,
    envelope: &'a RequestEnvelope,
    tx_id: SecureHash,
    state: SessionState,
}

impl<'a> Session<'a> {
    fn new(service: &'a NotaryService, envelope: &'a RequestEnvelope) -> Self {
        Session {
            service,
            envelope,
            tx_id: envelope.request.tx_id(),
            state: SessionState::Verifying,
        }
    }

    fn state(&self) -> &SessionState {
        &self.state
    }

    fn step(&mut self) -> Result<(), ServiceError> {
        self.state = match std::mem::replace(&mut self.state, SessionState::Verifying) {
            SessionState::Verifying => match self.verify() {
                Ok(verified) => SessionState::Committing(verified),
                Err(error) => SessionState::Done(CommitResponse::Err(error)),
            },
            SessionState::Committing(verified) => self.commit(verified)?,
            SessionState::Signing(proof) => self.sign(proof)?,
            done @ SessionState::Done(_) => done,
        };
        Ok(())
    }

    /// Mode-specific verification plus the one clock read.
    fn verify(&self) -> Result<VerifiedRequest, NotaryError> {
        let (declared_notary, inputs, time_window) = match &self.envelope.request {
            CommitRequest::NonValidating { filtered_tx } => {
                filtered_tx
                    .verify()
                    .map_err(|e| NotaryError::TransactionInvalid(e.to_string()))?;
                let notary = filtered_tx
                    .notary()
                    .map_err(|e| NotaryError::TransactionInvalid(e.to_string()))?
                    .ok_or_else(|| {
                        NotaryError::TransactionInvalid("notary component not revealed".into())
                    })?;
                let inputs = filtered_tx
                    .inputs()
                    .map_err(|e| NotaryError::TransactionInvalid(e.to_string()))?;
                let window = filtered_tx
                    .time_window()
                    .map_err(|e| NotaryError::TransactionInvalid(e.to_string()))?;
                (notary, inputs, window)
            }
            CommitRequest::Validating { signed_tx } => {
                let notary = *signed_tx.tx.notary().ok_or_else(|| {
                    NotaryError::TransactionInvalid("transaction names no notary".into())
                })?;
                if notary == self.service.identity {
                    match &self.service.mode {
                        ServiceMode::Validating(validator) => {
                            validator.validate(signed_tx, &self.service.identity.0)?
                        }
                        ServiceMode::NonValidating => {
                            return Err(NotaryError::TransactionInvalid(
                                "this notary does not accept full transactions".into(),
                            ))
                        }
                    }
                }
                (
                    notary,
                    signed_tx.tx.inputs().to_vec(),
                    signed_tx.tx.time_window().copied(),
                )
            }
        };

        if declared_notary != self.service.identity {
            return Err(NotaryError::WrongNotary);
        }

        // the single clock read of this request
        if let Some(window) = time_window {
            let at = self.service.clock.now_millis();
            if !window.contains(at) {
                return Err(NotaryError::TimeWindowInvalid { at, window });
            }
        }

        Ok(VerifiedRequest {
            inputs,
            time_window,
        })
    }

    fn commit(&self, verified: VerifiedRequest) -> Result<SessionState, ServiceError> {
        let outcome = self.service.provider.commit(
            &verified.inputs,
            self.tx_id,
            &self.envelope.requester,
            verified.time_window,
        );
        Ok(match outcome {
            Ok(proof) => SessionState::Signing(proof),
            Err(UniquenessError::Conflict(conflict)) => {
                SessionState::Done(CommitResponse::Err(NotaryError::Conflict(conflict)))
            }
            Err(UniquenessError::TimeWindowInvalid { at, window }) => {
                SessionState::Done(CommitResponse::Err(NotaryError::TimeWindowInvalid {
                    at,
                    window,
                }))
            }
            Err(UniquenessError::Storage(reason)) => {
                return Err(ServiceError::Storage(reason));
            }
            Err(UniquenessError::ClusterUnavailable(reason)) => {
                return Err(ServiceError::ClusterUnavailable(reason));
            }
        })
    }

    fn sign(&self, proof: CommitProof) -> Result<SessionState, ServiceError> {
        let signature = match proof {
            CommitProof::Signed(threshold) => NotarySignature::Threshold(threshold),
            CommitProof::Recorded => {
                let signer = self
                    .service
                    .signer
                    .as_ref()
                    .ok_or(ServiceError::NoSigningKey)?;
                NotarySignature::Single {
                    key: signer.public_key(),
                    signature: signer.sign(self.tx_id.as_bytes()),
                }
            }
        };
        Ok(SessionState::Done(CommitResponse::Ok {
            signatures: vec![signature],
        }))
    }
}

/// Build the filtered view a non-validating notary needs: inputs, notary
/// and time window, nothing else.
pub fn notarisation_view(tx: &vigil_merkle::WireTransaction) -> vigil_merkle::FilteredTransaction {
    vigil_merkle::FilteredTransaction::filter(tx, |component| {
        matches!(
            component,
            Component::Input(_) | Component::Notary(_) | Component::TimeWindow(_)
        )
    })
}
