//! The wire transaction container and its deterministic identity.
//!
//! A transaction is a set of component groups plus a privacy salt. The
//! identity is the root of a Merkle tree over the *group root list*: for
//! every group index up to the maximum present, the root of that group's
//! component-hash tree, or the all-ones placeholder when the group is
//! absent. Groups are identified by index, never by position, so the order
//! groups are supplied in cannot affect the id; the order of components
//! inside a group can.

use crate::component::{
    is_singleton_group, Command, ComponentGroup, NotaryId, PublicKey, StateRef, TimeWindow,
    TransactionState, ATTACHMENTS_GROUP, COMMANDS_GROUP, INPUTS_GROUP, NOTARY_GROUP, OUTPUTS_GROUP,
    SIGNERS_GROUP, TIMEWINDOW_GROUP,
};
use crate::error::MalformedTransactionError;
use crate::hash::{component_leaf_hash, component_nonce, PrivacySalt, SecureHash};
use crate::tree::MerkleTree;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

fn decode_component<T: serde::de::DeserializeOwned>(
    group: u32,
    index: usize,
    bytes: &[u8],
) -> Result<T, MalformedTransactionError> {
    bincode::deserialize(bytes).map_err(|e| MalformedTransactionError::InvalidComponent {
        group,
        index: index as u32,
        reason: e.to_string(),
    })
}

/// A frozen, validated transaction.
///
/// Construction through [`WireTransaction::build`] is the only way to obtain
/// one, so every instance holds decodable well-known groups and a computed
/// id. The typed views are decoded once at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct WireTransaction {
    groups: Vec<ComponentGroup>,
    salt: PrivacySalt,
    id: SecureHash,
    inputs: Vec<StateRef>,
    outputs: Vec<TransactionState>,
    commands: Vec<Command>,
    attachments: Vec<SecureHash>,
    notary: Option<NotaryId>,
    time_window: Option<TimeWindow>,
    signer_groups: Vec<Vec<PublicKey>>,
}

impl WireTransaction {
    /// Validate a set of component groups and compute the transaction id.
    pub fn build(
        mut groups: Vec<ComponentGroup>,
        salt: PrivacySalt,
    ) -> Result<WireTransaction, MalformedTransactionError> {
        if groups.is_empty() {
            return Err(MalformedTransactionError::NoGroups);
        }

        groups.sort_by_key(|g| g.group_index);
        for pair in groups.windows(2) {
            if pair[0].group_index == pair[1].group_index {
                return Err(MalformedTransactionError::DuplicateGroupIndex(
                    pair[0].group_index,
                ));
            }
        }
        for group in &groups {
            if group.components.is_empty() {
                return Err(MalformedTransactionError::EmptyGroup(group.group_index));
            }
            if is_singleton_group(group.group_index) && group.components.len() > 1 {
                return Err(MalformedTransactionError::SingletonGroupOverflow(
                    group.group_index,
                    group.components.len(),
                ));
            }
        }

        let find = |idx: u32| groups.iter().find(|g| g.group_index == idx);

        let mut inputs = Vec::new();
        if let Some(g) = find(INPUTS_GROUP) {
            for (i, bytes) in g.components.iter().enumerate() {
                inputs.push(decode_component::<StateRef>(INPUTS_GROUP, i, bytes)?);
            }
        }
        let mut outputs = Vec::new();
        if let Some(g) = find(OUTPUTS_GROUP) {
            for (i, bytes) in g.components.iter().enumerate() {
                outputs.push(decode_component::<TransactionState>(OUTPUTS_GROUP, i, bytes)?);
            }
        }
        let mut commands = Vec::new();
        if let Some(g) = find(COMMANDS_GROUP) {
            for (i, bytes) in g.components.iter().enumerate() {
                commands.push(decode_component::<Command>(COMMANDS_GROUP, i, bytes)?);
            }
        }
        let mut attachments = Vec::new();
        if let Some(g) = find(ATTACHMENTS_GROUP) {
            for (i, bytes) in g.components.iter().enumerate() {
                attachments.push(decode_component::<SecureHash>(ATTACHMENTS_GROUP, i, bytes)?);
            }
        }
        let notary = match find(NOTARY_GROUP) {
            Some(g) => Some(decode_component::<NotaryId>(NOTARY_GROUP, 0, &g.components[0])?),
            None => None,
        };
        let time_window = match find(TIMEWINDOW_GROUP) {
            Some(g) => Some(decode_component::<TimeWindow>(
                TIMEWINDOW_GROUP,
                0,
                &g.components[0],
            )?),
            None => None,
        };
        let mut signer_groups = Vec::new();
        if let Some(g) = find(SIGNERS_GROUP) {
            for (i, bytes) in g.components.iter().enumerate() {
                signer_groups.push(decode_component::<Vec<PublicKey>>(SIGNERS_GROUP, i, bytes)?);
            }
            if signer_groups.len() != commands.len() {
                return Err(MalformedTransactionError::SignerCountMismatch {
                    signers: signer_groups.len(),
                    commands: commands.len(),
                });
            }
            for (i, (list, command)) in signer_groups.iter().zip(&commands).enumerate() {
                if list != &command.signers {
                    return Err(MalformedTransactionError::SignerListMismatch(i as u32));
                }
            }
        }

        let id = compute_id(&groups, &salt);

        Ok(WireTransaction {
            groups,
            salt,
            id,
            inputs,
            outputs,
            commands,
            attachments,
            notary,
            time_window,
            signer_groups,
        })
    }

    pub fn id(&self) -> SecureHash {
        self.id
    }

    pub fn salt(&self) -> &PrivacySalt {
        &self.salt
    }

    /// Component groups, sorted by group index.
    pub fn groups(&self) -> &[ComponentGroup] {
        &self.groups
    }

    pub fn group(&self, group_index: u32) -> Option<&ComponentGroup> {
        self.groups.iter().find(|g| g.group_index == group_index)
    }

    pub fn inputs(&self) -> &[StateRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TransactionState] {
        &self.outputs
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn attachments(&self) -> &[SecureHash] {
        &self.attachments
    }

    pub fn notary(&self) -> Option<&NotaryId> {
        self.notary.as_ref()
    }

    pub fn time_window(&self) -> Option<&TimeWindow> {
        self.time_window.as_ref()
    }

    pub fn signer_groups(&self) -> &[Vec<PublicKey>] {
        &self.signer_groups
    }

    /// Union of all command signer lists, deduplicated and ordered.
    pub fn required_signers(&self) -> BTreeSet<PublicKey> {
        self.commands
            .iter()
            .flat_map(|c| c.signers.iter().copied())
            .collect()
    }

    pub fn max_group_index(&self) -> u32 {
        // groups is sorted and non-empty
        self.groups[self.groups.len() - 1].group_index
    }

    /// The complete group root list, with the all-ones placeholder for every
    /// absent index up to the maximum present one.
    pub fn group_root_list(&self) -> Vec<SecureHash> {
        group_root_list(&self.groups, &self.salt)
    }

    /// Blinding nonces for one group, in component order.
    pub fn group_nonces(&self, group_index: u32) -> Vec<SecureHash> {
        match self.group(group_index) {
            Some(g) => (0..g.components.len() as u32)
                .map(|i| component_nonce(&self.salt, group_index, i))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Component leaf hashes for one group, in component order.
    pub fn group_leaf_hashes(&self, group_index: u32) -> Vec<SecureHash> {
        match self.group(group_index) {
            Some(g) => g
                .components
                .iter()
                .enumerate()
                .map(|(i, bytes)| {
                    let nonce = component_nonce(&self.salt, group_index, i as u32);
                    component_leaf_hash(&nonce, bytes)
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

fn group_root_list(groups: &[ComponentGroup], salt: &PrivacySalt) -> Vec<SecureHash> {
    let max = groups.iter().map(|g| g.group_index).max().unwrap_or(0);
    (0..=max)
        .map(|idx| match groups.iter().find(|g| g.group_index == idx) {
            Some(group) => {
                let leaves: Vec<SecureHash> = group
                    .components
                    .iter()
                    .enumerate()
                    .map(|(i, bytes)| {
                        let nonce = component_nonce(salt, idx, i as u32);
                        component_leaf_hash(&nonce, bytes)
                    })
                    .collect();
                // present groups are never empty, checked at build
                MerkleTree::build(&leaves)
                    .map(|t| t.root())
                    .unwrap_or(SecureHash::ALL_ONES)
            }
            None => SecureHash::ALL_ONES,
        })
        .collect()
}

fn compute_id(groups: &[ComponentGroup], salt: &PrivacySalt) -> SecureHash {
    let roots = group_root_list(groups, salt);
    // roots is non-empty whenever groups is
    match MerkleTree::build(&roots) {
        Ok(tree) => tree.root(),
        Err(_) => SecureHash::ZERO,
    }
}

/// Serialized form: groups and salt only. Group roots and the id are always
/// derived locally, never transmitted.
#[derive(Serialize, Deserialize)]
struct WireForm {
    groups: Vec<ComponentGroup>,
    salt: PrivacySalt,
}

impl Serialize for WireTransaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireForm {
            groups: self.groups.clone(),
            salt: self.salt,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WireTransaction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let form = WireForm::deserialize(deserializer)?;
        WireTransaction::build(form.groups, form.salt).map_err(D::Error::custom)
    }
}

/// Assembles the component groups of a transaction from typed parts.
#[derive(Default)]
pub struct TransactionBuilder {
    inputs: Vec<StateRef>,
    outputs: Vec<TransactionState>,
    commands: Vec<Command>,
    attachments: Vec<SecureHash>,
    notary: Option<NotaryId>,
    time_window: Option<TimeWindow>,
    unknown_groups: Vec<ComponentGroup>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        TransactionBuilder::default()
    }

    pub fn add_input(mut self, input: StateRef) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn add_output(mut self, output: TransactionState) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn add_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn add_attachment(mut self, attachment: SecureHash) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn notary(mut self, notary: NotaryId) -> Self {
        self.notary = Some(notary);
        self
    }

    pub fn time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    /// Carry an opaque forward-compatibility group.
    pub fn add_unknown_group(mut self, group: ComponentGroup) -> Self {
        self.unknown_groups.push(group);
        self
    }

    pub fn build(self, salt: PrivacySalt) -> Result<WireTransaction, MalformedTransactionError> {
        fn encode_all<T: Serialize>(
            group: u32,
            items: &[T],
        ) -> Result<Vec<Vec<u8>>, MalformedTransactionError> {
            items
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    bincode::serialize(c).map_err(|e| MalformedTransactionError::InvalidComponent {
                        group,
                        index: i as u32,
                        reason: e.to_string(),
                    })
                })
                .collect()
        }

        let mut groups = Vec::new();
        if !self.inputs.is_empty() {
            groups.push(ComponentGroup::new(
                INPUTS_GROUP,
                encode_all(INPUTS_GROUP, &self.inputs)?,
            ));
        }
        if !self.outputs.is_empty() {
            groups.push(ComponentGroup::new(
                OUTPUTS_GROUP,
                encode_all(OUTPUTS_GROUP, &self.outputs)?,
            ));
        }
        if !self.commands.is_empty() {
            groups.push(ComponentGroup::new(
                COMMANDS_GROUP,
                encode_all(COMMANDS_GROUP, &self.commands)?,
            ));
            let signer_lists: Vec<Vec<PublicKey>> =
                self.commands.iter().map(|c| c.signers.clone()).collect();
            groups.push(ComponentGroup::new(
                SIGNERS_GROUP,
                encode_all(SIGNERS_GROUP, &signer_lists)?,
            ));
        }
        if !self.attachments.is_empty() {
            groups.push(ComponentGroup::new(
                ATTACHMENTS_GROUP,
                encode_all(ATTACHMENTS_GROUP, &self.attachments)?,
            ));
        }
        if let Some(notary) = &self.notary {
            groups.push(ComponentGroup::new(
                NOTARY_GROUP,
                encode_all(NOTARY_GROUP, &[*notary])?,
            ));
        }
        if let Some(window) = &self.time_window {
            groups.push(ComponentGroup::new(
                TIMEWINDOW_GROUP,
                encode_all(TIMEWINDOW_GROUP, &[*window])?,
            ));
        }
        groups.extend(self.unknown_groups);

        WireTransaction::build(groups, salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salt(byte: u8) -> PrivacySalt {
        PrivacySalt([byte; 32])
    }

    fn state_ref(byte: u8, index: u32) -> StateRef {
        StateRef::new(SecureHash::hash(&[byte]), index)
    }

    fn notary(byte: u8) -> NotaryId {
        NotaryId([byte; 32])
    }

    fn output(notary_id: NotaryId) -> TransactionState {
        TransactionState {
            data: vec![1, 2, 3],
            contract: SecureHash::hash(b"contract"),
            notary: notary_id,
            participants: vec![[9u8; 32]],
            encumbrance: None,
        }
    }

    fn sample_tx(s: PrivacySalt) -> WireTransaction {
        TransactionBuilder::new()
            .add_input(state_ref(1, 0))
            .add_input(state_ref(2, 1))
            .add_output(output(notary(5)))
            .add_command(Command {
                payload: b"move".to_vec(),
                signers: vec![[7u8; 32]],
            })
            .notary(notary(5))
            .time_window(TimeWindow::between(0, 1000))
            .build(s)
            .unwrap()
    }

    #[test]
    fn test_deterministic_id() {
        let a = sample_tx(salt(1));
        let b = sample_tx(salt(1));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_id_depends_on_salt() {
        assert_ne!(sample_tx(salt(1)).id(), sample_tx(salt(2)).id());
    }

    #[test]
    fn test_id_independent_of_group_order() {
        let tx = sample_tx(salt(3));
        let mut shuffled = tx.groups().to_vec();
        shuffled.reverse();
        let rebuilt = WireTransaction::build(shuffled, *tx.salt()).unwrap();
        assert_eq!(rebuilt.id(), tx.id());
    }

    #[test]
    fn test_id_sensitive_to_component_order() {
        let tx = sample_tx(salt(4));
        let mut groups = tx.groups().to_vec();
        let inputs = groups
            .iter_mut()
            .find(|g| g.group_index == INPUTS_GROUP)
            .unwrap();
        inputs.components.swap(0, 1);
        let reordered = WireTransaction::build(groups, *tx.salt()).unwrap();
        assert_ne!(reordered.id(), tx.id());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let tx = sample_tx(salt(5));
        let mut groups = tx.groups().to_vec();
        groups.push(groups[0].clone());
        assert!(matches!(
            WireTransaction::build(groups, salt(5)),
            Err(MalformedTransactionError::DuplicateGroupIndex(_))
        ));
    }

    #[test]
    fn test_empty_group_rejected() {
        let groups = vec![
            ComponentGroup::new(INPUTS_GROUP, vec![bincode::serialize(&state_ref(1, 0)).unwrap()]),
            ComponentGroup::new(12, vec![]),
        ];
        assert!(matches!(
            WireTransaction::build(groups, salt(6)),
            Err(MalformedTransactionError::EmptyGroup(12))
        ));
    }

    #[test]
    fn test_singleton_group_overflow_rejected() {
        let n = bincode::serialize(&notary(1)).unwrap();
        let groups = vec![ComponentGroup::new(NOTARY_GROUP, vec![n.clone(), n])];
        assert!(matches!(
            WireTransaction::build(groups, salt(7)),
            Err(MalformedTransactionError::SingletonGroupOverflow(NOTARY_GROUP, 2))
        ));
    }

    #[test]
    fn test_undecodable_component_rejected() {
        let groups = vec![ComponentGroup::new(TIMEWINDOW_GROUP, vec![vec![0xff; 3]])];
        assert!(matches!(
            WireTransaction::build(groups, salt(8)),
            Err(MalformedTransactionError::InvalidComponent { group: TIMEWINDOW_GROUP, .. })
        ));
    }

    #[test]
    fn test_no_groups_rejected() {
        assert!(matches!(
            WireTransaction::build(vec![], salt(9)),
            Err(MalformedTransactionError::NoGroups)
        ));
    }

    #[test]
    fn test_signer_lists_must_parallel_commands() {
        let tx = sample_tx(salt(10));
        let mut groups = tx.groups().to_vec();
        let signers = groups
            .iter_mut()
            .find(|g| g.group_index == SIGNERS_GROUP)
            .unwrap();
        signers.components[0] = bincode::serialize(&vec![[8u8; 32]]).unwrap();
        assert!(matches!(
            WireTransaction::build(groups, salt(10)),
            Err(MalformedTransactionError::SignerListMismatch(0))
        ));
    }

    #[test]
    fn test_group_root_list_has_placeholders() {
        let tx = sample_tx(salt(11));
        let roots = tx.group_root_list();
        // Groups present: inputs, outputs, commands, notary, timewindow,
        // signers. Attachments absent, so index 3 is the placeholder.
        assert_eq!(roots.len(), SIGNERS_GROUP as usize + 1);
        assert_eq!(roots[ATTACHMENTS_GROUP as usize], SecureHash::ALL_ONES);
        assert!(roots
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != ATTACHMENTS_GROUP as usize)
            .all(|(_, r)| *r != SecureHash::ALL_ONES));
    }

    #[test]
    fn test_typed_views() {
        let tx = sample_tx(salt(12));
        assert_eq!(tx.inputs().len(), 2);
        assert_eq!(tx.outputs().len(), 1);
        assert_eq!(tx.commands().len(), 1);
        assert_eq!(tx.notary(), Some(&notary(5)));
        assert_eq!(tx.time_window(), Some(&TimeWindow::between(0, 1000)));
        assert_eq!(tx.signer_groups(), &[vec![[7u8; 32]]]);
        assert!(tx.required_signers().contains(&[7u8; 32]));
    }

    #[test]
    fn test_serde_round_trip_revalidates() {
        let tx = sample_tx(salt(13));
        let bytes = bincode::serialize(&tx).unwrap();
        let back: WireTransaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.id(), tx.id());
        assert_eq!(back, tx);
    }

    #[test]
    fn test_unknown_groups_preserved() {
        let tx = TransactionBuilder::new()
            .add_input(state_ref(1, 0))
            .notary(notary(5))
            .add_unknown_group(ComponentGroup::new(42, vec![vec![0xab, 0xcd]]))
            .build(salt(14))
            .unwrap();
        assert_eq!(tx.max_group_index(), 42);
        assert_eq!(tx.group(42).unwrap().components, vec![vec![0xab, 0xcd]]);
        assert_eq!(tx.group_root_list().len(), 43);
    }
}
