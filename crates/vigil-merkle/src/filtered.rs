//! Filtered transactions: a partial view revealing selected components
//! together with proofs that each revealed value is authentic.
//!
//! The holder of a full transaction picks components with a predicate; the
//! recipient can verify every revealed component against the transaction id
//! without learning anything about the rest. An empty filtered transaction
//! still verifies, which is what blind-signing flows rely on.

use crate::component::{
    Command, Component, NotaryId, PublicKey, StateRef, TimeWindow, TransactionState,
    ATTACHMENTS_GROUP, COMMANDS_GROUP, INPUTS_GROUP, NOTARY_GROUP, OUTPUTS_GROUP, SIGNERS_GROUP,
    TIMEWINDOW_GROUP,
};
use crate::error::FilteredTransactionError;
use crate::hash::{component_leaf_hash, SecureHash};
use crate::partial::PartialMerkleTree;
use crate::transaction::WireTransaction;
use crate::tree::MerkleTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One group's worth of revealed components, their blinding nonces, and the
/// proof tying them to the group root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilteredComponentGroup {
    pub group_index: u32,
    pub components: Vec<Vec<u8>>,
    pub nonces: Vec<SecureHash>,
    pub proof: PartialMerkleTree,
}

/// A verifiable partial view of a transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilteredTransaction {
    id: SecureHash,
    /// Complete group root list of the original transaction, all-ones for
    /// absent groups; lets the recipient rebuild the top-level tree.
    group_hashes: Vec<SecureHash>,
    groups: Vec<FilteredComponentGroup>,
}

impl FilteredTransaction {
    /// Produce the partial view selected by `predicate`.
    ///
    /// Selecting any command also retains the whole SIGNERS group, so the
    /// recipient can still prove which commands a given key is bound to.
    /// Groups with nothing selected are omitted entirely.
    pub fn filter<F>(tx: &WireTransaction, predicate: F) -> FilteredTransaction
    where
        F: Fn(&Component<'_>) -> bool,
    {
        let mut selected: Vec<(u32, Vec<usize>)> = Vec::new();
        let mut command_selected = false;

        for group in tx.groups() {
            let idx = group.group_index;
            if idx == SIGNERS_GROUP {
                // follows command selection, never filtered element-wise
                continue;
            }
            let picks: Vec<usize> = (0..group.components.len())
                .filter(|&i| {
                    let component = match idx {
                        INPUTS_GROUP => Component::Input(&tx.inputs()[i]),
                        OUTPUTS_GROUP => Component::Output(&tx.outputs()[i]),
                        COMMANDS_GROUP => Component::Command(&tx.commands()[i]),
                        ATTACHMENTS_GROUP => Component::Attachment(&tx.attachments()[i]),
                        NOTARY_GROUP => match tx.notary() {
                            Some(n) => Component::Notary(n),
                            None => return false,
                        },
                        TIMEWINDOW_GROUP => match tx.time_window() {
                            Some(w) => Component::TimeWindow(w),
                            None => return false,
                        },
                        _ => Component::Unknown {
                            group_index: idx,
                            bytes: &group.components[i],
                        },
                    };
                    predicate(&component)
                })
                .collect();
            if idx == COMMANDS_GROUP && !picks.is_empty() {
                command_selected = true;
            }
            if !picks.is_empty() {
                selected.push((idx, picks));
            }
        }

        if command_selected {
            if let Some(signers) = tx.group(SIGNERS_GROUP) {
                selected.push((SIGNERS_GROUP, (0..signers.components.len()).collect()));
            }
        }

        let groups = selected
            .into_iter()
            .map(|(idx, picks)| {
                // safe: picks came from this group's index range
                let group = tx.group(idx).expect("selected group exists");
                let all_leaves = tx.group_leaf_hashes(idx);
                let all_nonces = tx.group_nonces(idx);
                let included: BTreeSet<SecureHash> =
                    picks.iter().map(|&i| all_leaves[i]).collect();
                // present groups are never empty, so the tree builds
                let tree = MerkleTree::build(&all_leaves).expect("non-empty group");
                FilteredComponentGroup {
                    group_index: idx,
                    components: picks.iter().map(|&i| group.components[i].clone()).collect(),
                    nonces: picks.iter().map(|&i| all_nonces[i]).collect(),
                    proof: PartialMerkleTree::build(&tree, &included),
                }
            })
            .collect();

        FilteredTransaction {
            id: tx.id(),
            groups,
            group_hashes: tx.group_root_list(),
        }
    }

    pub fn id(&self) -> SecureHash {
        self.id
    }

    pub fn groups(&self) -> &[FilteredComponentGroup] {
        &self.groups
    }

    pub fn group(&self, group_index: u32) -> Option<&FilteredComponentGroup> {
        self.groups.iter().find(|g| g.group_index == group_index)
    }

    pub fn group_hashes(&self) -> &[SecureHash] {
        &self.group_hashes
    }

    /// Verify the whole partial view against `id`.
    ///
    /// Checks that the group root list reproduces the transaction id, and
    /// that every revealed group's proof reproduces its group root with the
    /// revealed components hashing to exactly the leaves the proof expects,
    /// in order.
    pub fn verify(&self) -> Result<(), FilteredTransactionError> {
        let err = |reason: &str| FilteredTransactionError::verification(self.id, reason);

        if self.group_hashes.is_empty() {
            return Err(err("no group hashes"));
        }
        let top = MerkleTree::build(&self.group_hashes).map_err(|_| err("no group hashes"))?;
        if top.root() != self.id {
            return Err(err("group hashes do not match the transaction id"));
        }

        let mut seen_indices: Vec<u32> = self.groups.iter().map(|g| g.group_index).collect();
        seen_indices.sort_unstable();
        for pair in seen_indices.windows(2) {
            if pair[0] == pair[1] {
                return Err(err(&format!("group {} revealed twice", pair[0])));
            }
        }

        for group in &self.groups {
            let idx = group.group_index;
            if group.components.len() != group.nonces.len() {
                return Err(err(&format!(
                    "group {} has {} components but {} nonces",
                    idx,
                    group.components.len(),
                    group.nonces.len()
                )));
            }
            if group.components.is_empty() {
                return Err(err(&format!("group {} revealed without components", idx)));
            }
            let root = match self.group_hashes.get(idx as usize) {
                Some(root) => root,
                None => return Err(err(&format!("group {} beyond the group hash list", idx))),
            };
            let leaves: Vec<SecureHash> = group
                .nonces
                .iter()
                .zip(&group.components)
                .map(|(nonce, bytes)| component_leaf_hash(nonce, bytes))
                .collect();
            if !group.proof.verify(root, &leaves) {
                return Err(err(&format!("group {} proof does not verify", idx)));
            }
        }
        Ok(())
    }

    /// Prove that every component of `group_index` has been disclosed.
    ///
    /// Succeeds vacuously when the stored group root is the all-ones
    /// placeholder: that proves the group never existed in the original
    /// transaction.
    pub fn check_all_components_visible(
        &self,
        group_index: u32,
    ) -> Result<(), FilteredTransactionError> {
        let root = match self.group_hashes.get(group_index as usize) {
            Some(root) => *root,
            None => return Ok(()),
        };
        if root == SecureHash::ALL_ONES {
            return Ok(());
        }
        let group = self.group(group_index).ok_or_else(|| {
            FilteredTransactionError::visibility(
                self.id,
                format!("group {} was filtered out entirely", group_index),
            )
        })?;
        let leaves: Vec<SecureHash> = group
            .nonces
            .iter()
            .zip(&group.components)
            .map(|(nonce, bytes)| component_leaf_hash(nonce, bytes))
            .collect();
        let tree = MerkleTree::build(&leaves).map_err(|_| {
            FilteredTransactionError::visibility(
                self.id,
                format!("group {} revealed without components", group_index),
            )
        })?;
        if tree.root() != root {
            return Err(FilteredTransactionError::visibility(
                self.id,
                format!("revealed components of group {} are incomplete", group_index),
            ));
        }
        Ok(())
    }

    /// Prove that every command requiring `key` has been disclosed.
    ///
    /// With a SIGNERS group present, all signer lists must be visible and
    /// the number of lists naming `key` must equal the number of revealed
    /// commands naming it. Transactions predating the SIGNERS group fall
    /// back to full command visibility.
    pub fn check_command_visibility(
        &self,
        key: &PublicKey,
    ) -> Result<(), FilteredTransactionError> {
        let signers_present = self
            .group_hashes
            .get(SIGNERS_GROUP as usize)
            .map(|root| *root != SecureHash::ALL_ONES)
            .unwrap_or(false);

        if !signers_present {
            return self.check_all_components_visible(COMMANDS_GROUP);
        }

        self.check_all_components_visible(SIGNERS_GROUP)?;

        let signer_lists = self.decoded_group::<Vec<PublicKey>>(SIGNERS_GROUP)?;
        let expected = signer_lists.iter().filter(|list| list.contains(key)).count();

        let revealed_commands = self.decoded_group::<Command>(COMMANDS_GROUP)?;
        let matched = revealed_commands
            .iter()
            .filter(|c| c.signers.contains(key))
            .count();

        if matched != expected {
            return Err(FilteredTransactionError::visibility(
                self.id,
                format!(
                    "{} commands require the key but only {} are revealed",
                    expected, matched
                ),
            ));
        }
        Ok(())
    }

    fn decoded_group<T: serde::de::DeserializeOwned>(
        &self,
        group_index: u32,
    ) -> Result<Vec<T>, FilteredTransactionError> {
        let components = match self.group(group_index) {
            Some(g) => &g.components,
            None => return Ok(Vec::new()),
        };
        components
            .iter()
            .map(|bytes| {
                bincode::deserialize(bytes).map_err(|e| {
                    FilteredTransactionError::verification(
                        self.id,
                        format!("undecodable component in group {}: {}", group_index, e),
                    )
                })
            })
            .collect()
    }

    /// Revealed inputs, in revealed order.
    pub fn inputs(&self) -> Result<Vec<StateRef>, FilteredTransactionError> {
        self.decoded_group(INPUTS_GROUP)
    }

    /// Revealed outputs, in revealed order.
    pub fn outputs(&self) -> Result<Vec<TransactionState>, FilteredTransactionError> {
        self.decoded_group(OUTPUTS_GROUP)
    }

    /// Revealed commands, in revealed order.
    pub fn commands(&self) -> Result<Vec<Command>, FilteredTransactionError> {
        self.decoded_group(COMMANDS_GROUP)
    }

    /// Revealed attachments, in revealed order.
    pub fn attachments(&self) -> Result<Vec<SecureHash>, FilteredTransactionError> {
        self.decoded_group(ATTACHMENTS_GROUP)
    }

    /// The notary, when revealed.
    pub fn notary(&self) -> Result<Option<NotaryId>, FilteredTransactionError> {
        Ok(self.decoded_group(NOTARY_GROUP)?.into_iter().next())
    }

    /// The time window, when revealed.
    pub fn time_window(&self) -> Result<Option<TimeWindow>, FilteredTransactionError> {
        Ok(self.decoded_group(TIMEWINDOW_GROUP)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::PrivacySalt;
    use crate::transaction::TransactionBuilder;

    const K1: PublicKey = [0x11; 32];
    const K2: PublicKey = [0x22; 32];

    fn salt(byte: u8) -> PrivacySalt {
        PrivacySalt([byte; 32])
    }

    fn state_ref(byte: u8, index: u32) -> StateRef {
        StateRef::new(SecureHash::hash(&[byte]), index)
    }

    fn notary_id() -> NotaryId {
        NotaryId([0x33; 32])
    }

    fn output(data: &[u8]) -> TransactionState {
        TransactionState {
            data: data.to_vec(),
            contract: SecureHash::hash(b"token"),
            notary: notary_id(),
            participants: vec![K1],
            encumbrance: None,
        }
    }

    /// The transaction shape most tests share: three inputs, two outputs,
    /// one command signed by two keys, a notary and a time window.
    fn sample_tx() -> WireTransaction {
        TransactionBuilder::new()
            .add_input(state_ref(1, 0))
            .add_input(state_ref(2, 1))
            .add_input(state_ref(3, 0))
            .add_output(output(b"a"))
            .add_output(output(b"b"))
            .add_command(Command {
                payload: b"move".to_vec(),
                signers: vec![K1, K2],
            })
            .notary(notary_id())
            .time_window(TimeWindow::between(1_000, 2_000))
            .build(salt(1))
            .unwrap()
    }

    #[test]
    fn test_inputs_only_view() {
        let tx = sample_tx();
        let ftx = FilteredTransaction::filter(&tx, |c| matches!(c, Component::Input(_)));

        ftx.verify().unwrap();
        assert_eq!(ftx.inputs().unwrap(), tx.inputs());
        assert!(ftx.outputs().unwrap().is_empty());
        assert!(ftx.commands().unwrap().is_empty());
        assert!(ftx.group(SIGNERS_GROUP).is_none());
        assert_eq!(ftx.id(), tx.id());
    }

    #[test]
    fn test_empty_view_still_verifies() {
        let tx = sample_tx();
        let ftx = FilteredTransaction::filter(&tx, |_| false);

        ftx.verify().unwrap();
        assert!(ftx.groups().is_empty());
        // All seven indices up to SIGNERS are present in the root list,
        // with the placeholder standing in for the absent attachments.
        assert_eq!(ftx.group_hashes().len(), SIGNERS_GROUP as usize + 1);
        assert_eq!(
            ftx.group_hashes()[ATTACHMENTS_GROUP as usize],
            SecureHash::ALL_ONES
        );
    }

    #[test]
    fn test_full_view_round_trips() {
        let tx = sample_tx();
        let ftx = FilteredTransaction::filter(&tx, |_| true);

        ftx.verify().unwrap();
        assert_eq!(ftx.inputs().unwrap(), tx.inputs());
        assert_eq!(ftx.outputs().unwrap(), tx.outputs());
        assert_eq!(ftx.commands().unwrap(), tx.commands());
        assert_eq!(ftx.notary().unwrap().as_ref(), tx.notary());
        assert_eq!(ftx.time_window().unwrap().as_ref(), tx.time_window());
    }

    #[test]
    fn test_command_selection_drags_signers_along() {
        let tx = sample_tx();
        let ftx = FilteredTransaction::filter(&tx, |c| matches!(c, Component::Command(_)));

        ftx.verify().unwrap();
        let signers = ftx.group(SIGNERS_GROUP).expect("signers retained");
        assert_eq!(signers.components.len(), 1);
        ftx.check_all_components_visible(SIGNERS_GROUP).unwrap();
    }

    #[test]
    fn test_absent_group_vacuously_visible() {
        let tx = sample_tx();
        let ftx = FilteredTransaction::filter(&tx, |_| false);
        // No attachments ever existed; the placeholder proves it.
        ftx.check_all_components_visible(ATTACHMENTS_GROUP).unwrap();
        // Indices beyond the list are absent groups too.
        ftx.check_all_components_visible(40).unwrap();
    }

    #[test]
    fn test_partial_reveal_fails_visibility() {
        let tx = sample_tx();
        let first_input = tx.inputs()[0];
        let ftx = FilteredTransaction::filter(&tx, |c| match c {
            Component::Input(r) => **r == first_input,
            _ => false,
        });

        ftx.verify().unwrap();
        assert!(matches!(
            ftx.check_all_components_visible(INPUTS_GROUP),
            Err(FilteredTransactionError::ComponentVisibility { .. })
        ));
    }

    fn three_command_tx() -> WireTransaction {
        TransactionBuilder::new()
            .add_input(state_ref(9, 0))
            .add_command(Command {
                payload: b"issue".to_vec(),
                signers: vec![K1, K2],
            })
            .add_command(Command {
                payload: b"settle".to_vec(),
                signers: vec![K2],
            })
            .add_command(Command {
                payload: b"exit".to_vec(),
                signers: vec![K1],
            })
            .notary(notary_id())
            .build(salt(2))
            .unwrap()
    }

    #[test]
    fn test_command_visibility_by_key() {
        let tx = three_command_tx();
        let ftx = FilteredTransaction::filter(&tx, |c| match c {
            Component::Command(cmd) => cmd.signers.contains(&K1),
            _ => false,
        });

        ftx.verify().unwrap();
        assert_eq!(ftx.commands().unwrap().len(), 2);

        // Every command requiring K1 is revealed.
        ftx.check_command_visibility(&K1).unwrap();

        // One K2 command (settle) is hidden, so the K2 claim must fail.
        assert!(matches!(
            ftx.check_command_visibility(&K2),
            Err(FilteredTransactionError::ComponentVisibility { .. })
        ));
    }

    #[test]
    fn test_command_visibility_without_commands_group() {
        // A transaction with no commands at all: both checks pass vacuously.
        let tx = TransactionBuilder::new()
            .add_input(state_ref(4, 0))
            .notary(notary_id())
            .build(salt(3))
            .unwrap();
        let ftx = FilteredTransaction::filter(&tx, |_| false);
        ftx.check_command_visibility(&K1).unwrap();
    }

    #[test]
    fn test_tampered_component_fails_verify() {
        let tx = sample_tx();
        let mut ftx = FilteredTransaction::filter(&tx, |c| matches!(c, Component::Input(_)));
        ftx.groups[0].components[0].push(0xff);
        assert!(matches!(
            ftx.verify(),
            Err(FilteredTransactionError::Verification { .. })
        ));
    }

    #[test]
    fn test_wrong_id_fails_verify() {
        let tx = sample_tx();
        let mut ftx = FilteredTransaction::filter(&tx, |c| matches!(c, Component::Input(_)));
        ftx.id = SecureHash::hash(b"not the id");
        assert!(matches!(
            ftx.verify(),
            Err(FilteredTransactionError::Verification { .. })
        ));
    }

    #[test]
    fn test_swapped_group_hash_fails_verify() {
        let tx = sample_tx();
        let mut ftx = FilteredTransaction::filter(&tx, |c| matches!(c, Component::Input(_)));
        ftx.group_hashes.swap(OUTPUTS_GROUP as usize, COMMANDS_GROUP as usize);
        assert!(matches!(
            ftx.verify(),
            Err(FilteredTransactionError::Verification { .. })
        ));
    }

    #[test]
    fn test_unknown_groups_filter_generically() {
        let tx = TransactionBuilder::new()
            .add_input(state_ref(5, 0))
            .notary(notary_id())
            .add_unknown_group(crate::component::ComponentGroup::new(
                21,
                vec![vec![1], vec![2], vec![3]],
            ))
            .build(salt(4))
            .unwrap();

        let ftx = FilteredTransaction::filter(&tx, |c| match c {
            Component::Unknown { group_index, bytes } => *group_index == 21 && bytes[0] != 2,
            _ => false,
        });

        ftx.verify().unwrap();
        let unknown = ftx.group(21).unwrap();
        assert_eq!(unknown.components, vec![vec![1], vec![3]]);
        assert!(matches!(
            ftx.check_all_components_visible(21),
            Err(FilteredTransactionError::ComponentVisibility { .. })
        ));
    }

    #[test]
    fn test_serde_round_trip() {
        let tx = sample_tx();
        let ftx = FilteredTransaction::filter(&tx, |c| matches!(c, Component::Input(_)));
        let bytes = bincode::serialize(&ftx).unwrap();
        let back: FilteredTransaction = bincode::deserialize(&bytes).unwrap();
        back.verify().unwrap();
        assert_eq!(back.id(), ftx.id());
        assert_eq!(back.inputs().unwrap(), ftx.inputs().unwrap());
    }
}
