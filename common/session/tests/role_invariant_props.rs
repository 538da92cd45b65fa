use std::sync::Arc;

use common_session::{
    Identity, InMemoryPersistence, Role, SessionSnapshot, SessionStore,
};
use proptest::prelude::*;
use uuid::Uuid;

const ROLE_POOL: [&str; 6] = ["admin", "teacher", "student", "warden", "librarian", "accountant"];

fn store_holding(roles: &[&str]) -> SessionStore {
    let identity = Identity::new(Uuid::new_v4(), "Prop Tester", roles.iter().copied());
    let persistence = InMemoryPersistence::with_snapshot(SessionSnapshot {
        current_role: identity.roles.first().cloned(),
        is_authenticated: true,
        identity: Some(identity),
        access_token: Some("token".into()),
        refresh_token: None,
    });
    let store = SessionStore::new(Arc::new(persistence));
    store.restore().expect("restore");
    store
}

proptest! {
    // Whatever roles are requested, the active role is always one the identity holds.
    #[test]
    fn current_role_always_held(
        held in prop::sample::subsequence(ROLE_POOL.to_vec(), 1..=ROLE_POOL.len()),
        requests in prop::collection::vec(prop::sample::select(ROLE_POOL.to_vec()), 0..32),
    ) {
        let store = store_holding(&held);
        let mut expected = store.current_role();

        for name in requests {
            let role = Role::new(name);
            let changed = store.set_current_role(&role);
            if held.contains(&name) {
                prop_assert_eq!(changed, expected.as_ref() != Some(&role));
                expected = Some(role);
            } else {
                prop_assert!(!changed);
            }

            let current = store.current_role();
            prop_assert_eq!(&current, &expected);
            let current = current.expect("a held role stays active");
            prop_assert!(store.roles().contains(&current));
        }
    }

    // Mixed casing and padding never produce a second copy of the same role.
    #[test]
    fn role_tags_normalise_before_comparison(
        name in prop::sample::select(ROLE_POOL.to_vec()),
        upper in any::<bool>(),
        pad in 0usize..3,
    ) {
        let raw = if upper { name.to_ascii_uppercase() } else { name.to_string() };
        let padded = format!("{}{}{}", " ".repeat(pad), raw, " ".repeat(pad));
        let store = store_holding(&[name]);

        store.set_current_role(&Role::new(&padded));
        prop_assert_eq!(store.current_role(), Some(Role::new(name)));
        prop_assert_eq!(store.roles().len(), 1);
    }
}
