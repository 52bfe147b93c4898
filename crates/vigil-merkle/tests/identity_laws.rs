//! Property tests for the transaction identity.

use proptest::collection::vec;
use proptest::prelude::*;
use vigil_merkle::{ComponentGroup, PrivacySalt, SecureHash, WireTransaction};

/// Unknown-index groups with arbitrary component bytes. Sticking to indices
/// above the well-known range keeps the generated components free of typed
/// decoding constraints.
fn arb_groups() -> impl Strategy<Value = Vec<ComponentGroup>> {
    vec(
        (10u32..40, vec(vec(any::<u8>(), 0..24), 1..6)),
        1..8,
    )
    .prop_map(|raw| {
        let mut groups: Vec<ComponentGroup> = Vec::new();
        for (index, components) in raw {
            if groups.iter().all(|g| g.group_index != index) {
                groups.push(ComponentGroup::new(index, components));
            }
        }
        groups
    })
    .prop_filter("at least one group", |groups| !groups.is_empty())
}

proptest! {
    #[test]
    fn id_is_deterministic(groups in arb_groups(), salt in any::<[u8; 32]>()) {
        let a = WireTransaction::build(groups.clone(), PrivacySalt(salt)).unwrap();
        let b = WireTransaction::build(groups, PrivacySalt(salt)).unwrap();
        prop_assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_ignores_group_order(groups in arb_groups(), salt in any::<[u8; 32]>()) {
        let forward = WireTransaction::build(groups.clone(), PrivacySalt(salt)).unwrap();
        let mut reversed = groups;
        reversed.reverse();
        let backward = WireTransaction::build(reversed, PrivacySalt(salt)).unwrap();
        prop_assert_eq!(forward.id(), backward.id());
    }

    #[test]
    fn id_depends_on_salt(groups in arb_groups(), s1 in any::<[u8; 32]>(), s2 in any::<[u8; 32]>()) {
        prop_assume!(s1 != s2);
        let a = WireTransaction::build(groups.clone(), PrivacySalt(s1)).unwrap();
        let b = WireTransaction::build(groups, PrivacySalt(s2)).unwrap();
        prop_assert_ne!(a.id(), b.id());
    }

    #[test]
    fn id_sensitive_to_component_order(
        mut components in vec(vec(any::<u8>(), 0..16), 2..6),
        salt in any::<[u8; 32]>(),
    ) {
        prop_assume!(components[0] != components[1]);
        let original = WireTransaction::build(
            vec![ComponentGroup::new(10, components.clone())],
            PrivacySalt(salt),
        )
        .unwrap();
        components.swap(0, 1);
        let swapped = WireTransaction::build(
            vec![ComponentGroup::new(10, components)],
            PrivacySalt(salt),
        )
        .unwrap();
        prop_assert_ne!(original.id(), swapped.id());
    }

    #[test]
    fn group_root_list_covers_every_index(groups in arb_groups(), salt in any::<[u8; 32]>()) {
        let tx = WireTransaction::build(groups, PrivacySalt(salt)).unwrap();
        let roots = tx.group_root_list();
        prop_assert_eq!(roots.len() as u32, tx.max_group_index() + 1);
        for (i, root) in roots.iter().enumerate() {
            let present = tx.group(i as u32).is_some();
            prop_assert_eq!(present, *root != SecureHash::ALL_ONES);
        }
    }
}
