//! End-to-end resolver tests over the in-memory store: the full path an API
//! handler exercises (ledger sync → source evaluation → decision/selector).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use commons_authz::{
    Actor, ContextRef, EntityKind, EntityPermission, EntityRef, GranteeRef, NewPermissionGrant,
    PermissionResolver, Selector, Verb,
};
use commons_core::{ChangemakerId, FieldValueId, FunderId, OrganizationId, UserId};

use crate::memory::InMemoryAuthzStore;
use crate::sources::resolver_for;
use crate::store::AuthzStore;

fn harness() -> (Arc<InMemoryAuthzStore>, PermissionResolver) {
    let store = Arc::new(InMemoryAuthzStore::new());
    let resolver = resolver_for(store.clone());
    (store, resolver)
}

fn user() -> Actor {
    Actor {
        user_id: UserId::new(),
        is_administrator: false,
    }
}

fn new_grant(
    grantee: GranteeRef,
    context: ContextRef,
    scope: &[EntityKind],
    verbs: &[Verb],
) -> NewPermissionGrant {
    NewPermissionGrant {
        grantee,
        context,
        scope: scope.iter().copied().collect(),
        verbs: verbs.iter().copied().collect(),
    }
}

#[tokio::test]
async fn grant_is_effective_exactly_while_it_exists() {
    let (store, resolver) = harness();
    let actor = user();
    let now = Utc::now();

    let funder = FunderId::new();
    store.register_entity(EntityRef::Funder(funder), None).await.unwrap();
    let grant = store
        .create_permission_grant(
            new_grant(
                GranteeRef::User(actor.user_id),
                ContextRef::Funder(funder),
                &[EntityKind::Funder],
                &[Verb::View, Verb::Edit],
            ),
            actor.user_id,
            now,
        )
        .await
        .unwrap();

    let target = EntityRef::Funder(funder);
    for verb in [Verb::View, Verb::Edit] {
        assert!(resolver.has_permission(&actor, verb, &target, now).await.unwrap());
    }
    assert!(!resolver.has_permission(&actor, Verb::Manage, &target, now).await.unwrap());

    store.delete_permission_grant(grant.id).await.unwrap();
    assert!(!resolver.has_permission(&actor, Verb::View, &target, now).await.unwrap());
}

#[tokio::test]
async fn lapsed_membership_disables_group_grants_until_resynced() {
    let (store, resolver) = harness();
    let actor = user();
    let now = Utc::now();
    let organization = OrganizationId::new();

    let funder = FunderId::new();
    store.register_entity(EntityRef::Funder(funder), None).await.unwrap();
    store
        .create_permission_grant(
            new_grant(
                GranteeRef::Organization(organization),
                ContextRef::Funder(funder),
                &[EntityKind::Funder],
                &[Verb::View],
            ),
            actor.user_id,
            now,
        )
        .await
        .unwrap();

    // Lapsed membership row: the matching group grant does not apply.
    store
        .sync_membership(actor.user_id, &[organization], now - Duration::hours(1))
        .await
        .unwrap();
    let target = EntityRef::Funder(funder);
    assert!(!resolver.has_permission(&actor, Verb::View, &target, now).await.unwrap());

    // Extending not_after, with no other change, flips the decision.
    store
        .sync_membership(actor.user_id, &[organization], now + Duration::hours(1))
        .await
        .unwrap();
    assert!(resolver.has_permission(&actor, Verb::View, &target, now).await.unwrap());
}

#[tokio::test]
async fn changemaker_grant_reaches_field_values_for_granted_verbs_only() {
    let (store, resolver) = harness();
    let actor = user();
    let now = Utc::now();

    let changemaker = ChangemakerId::new();
    let value = FieldValueId::new();
    store
        .register_entity(EntityRef::Changemaker(changemaker), None)
        .await
        .unwrap();
    store
        .register_entity(
            EntityRef::ChangemakerFieldValue(value),
            Some(EntityRef::Changemaker(changemaker)),
        )
        .await
        .unwrap();
    store
        .create_permission_grant(
            new_grant(
                GranteeRef::User(actor.user_id),
                ContextRef::Changemaker(changemaker),
                &[EntityKind::Changemaker, EntityKind::ChangemakerFieldValue],
                &[Verb::View],
            ),
            actor.user_id,
            now,
        )
        .await
        .unwrap();

    let value_ref = EntityRef::ChangemakerFieldValue(value);
    assert!(resolver.has_permission(&actor, Verb::View, &value_ref, now).await.unwrap());
    assert!(!resolver.has_permission(&actor, Verb::Edit, &value_ref, now).await.unwrap());
}

#[tokio::test]
async fn overlapping_shapes_appear_once_in_the_selector() {
    let (store, resolver) = harness();
    let actor = user();
    let now = Utc::now();

    let funder = FunderId::new();
    store.register_entity(EntityRef::Funder(funder), None).await.unwrap();
    store
        .put_entity_permission(EntityPermission {
            grantee: GranteeRef::User(actor.user_id),
            entity: EntityRef::Funder(funder),
            permission: Verb::View,
        })
        .await
        .unwrap();
    store
        .create_permission_grant(
            new_grant(
                GranteeRef::User(actor.user_id),
                ContextRef::Funder(funder),
                &[EntityKind::Funder],
                &[Verb::View],
            ),
            actor.user_id,
            now,
        )
        .await
        .unwrap();

    let selector = resolver
        .accessible_ids(&actor, Verb::View, EntityKind::Funder, now)
        .await
        .unwrap();
    assert_eq!(
        selector,
        Selector::Ids([Uuid::from(funder)].into_iter().collect()),
        "an actor covered by both shapes appears exactly once"
    );
}

#[tokio::test]
async fn administrator_is_unrestricted_with_zero_grants() {
    let (_store, resolver) = harness();
    let admin = Actor {
        user_id: UserId::new(),
        is_administrator: true,
    };
    let now = Utc::now();

    let target = EntityRef::Funder(FunderId::new());
    assert!(resolver.has_permission(&admin, Verb::Manage, &target, now).await.unwrap());
    let selector = resolver
        .accessible_ids(&admin, Verb::Manage, EntityKind::Funder, now)
        .await
        .unwrap();
    assert!(selector.is_unrestricted());
}

#[tokio::test]
async fn selector_intersects_with_caller_filters() {
    let (store, resolver) = harness();
    let actor = user();
    let now = Utc::now();

    let visible = FunderId::new();
    let hidden = FunderId::new();
    for funder in [visible, hidden] {
        store.register_entity(EntityRef::Funder(funder), None).await.unwrap();
    }
    store
        .put_entity_permission(EntityPermission {
            grantee: GranteeRef::User(actor.user_id),
            entity: EntityRef::Funder(visible),
            permission: Verb::View,
        })
        .await
        .unwrap();

    let caller_filter: BTreeSet<Uuid> = [Uuid::from(visible), Uuid::from(hidden)].into_iter().collect();
    let selector = resolver
        .accessible_ids(&actor, Verb::View, EntityKind::Funder, now)
        .await
        .unwrap()
        .restrict(&caller_filter);
    assert_eq!(selector, Selector::Ids([Uuid::from(visible)].into_iter().collect()));
}

mod consistency {
    use super::*;
    use proptest::prelude::*;

    /// One randomized world: four funders, a user, one organization, and an
    /// arbitrary mix of grant coverage per funder.
    async fn check_world(
        legacy_direct: [bool; 4],
        legacy_group: [bool; 4],
        grant_direct: [bool; 4],
        grant_group: [bool; 4],
        member_active: bool,
    ) {
        let (store, resolver) = harness();
        let actor = user();
        let now = Utc::now();
        let organization = OrganizationId::new();

        let expiry = if member_active {
            now + Duration::hours(1)
        } else {
            now - Duration::hours(1)
        };
        store
            .sync_membership(actor.user_id, &[organization], expiry)
            .await
            .unwrap();

        let funders: Vec<FunderId> = (0..4).map(|_| FunderId::new()).collect();
        for (i, funder) in funders.iter().enumerate() {
            store.register_entity(EntityRef::Funder(*funder), None).await.unwrap();
            if legacy_direct[i] {
                store
                    .put_entity_permission(EntityPermission {
                        grantee: GranteeRef::User(actor.user_id),
                        entity: EntityRef::Funder(*funder),
                        permission: Verb::View,
                    })
                    .await
                    .unwrap();
            }
            if legacy_group[i] {
                store
                    .put_entity_permission(EntityPermission {
                        grantee: GranteeRef::Organization(organization),
                        entity: EntityRef::Funder(*funder),
                        permission: Verb::View,
                    })
                    .await
                    .unwrap();
            }
            if grant_direct[i] {
                store
                    .create_permission_grant(
                        new_grant(
                            GranteeRef::User(actor.user_id),
                            ContextRef::Funder(*funder),
                            &[EntityKind::Funder],
                            &[Verb::View],
                        ),
                        actor.user_id,
                        now,
                    )
                    .await
                    .unwrap();
            }
            if grant_group[i] {
                store
                    .create_permission_grant(
                        new_grant(
                            GranteeRef::Organization(organization),
                            ContextRef::Funder(*funder),
                            &[EntityKind::Funder],
                            &[Verb::View],
                        ),
                        actor.user_id,
                        now,
                    )
                    .await
                    .unwrap();
            }
        }

        let selector = resolver
            .accessible_ids(&actor, Verb::View, EntityKind::Funder, now)
            .await
            .unwrap();
        for funder in &funders {
            let individually = resolver
                .has_permission(&actor, Verb::View, &EntityRef::Funder(*funder), now)
                .await
                .unwrap();
            assert_eq!(
                selector.contains(Uuid::from(*funder)),
                individually,
                "selector and boolean check diverged"
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: `accessible_ids` contains an id iff `has_permission`
        /// independently answers true for it.
        #[test]
        fn accessible_ids_agrees_with_has_permission(
            legacy_direct in proptest::array::uniform4(any::<bool>()),
            legacy_group in proptest::array::uniform4(any::<bool>()),
            grant_direct in proptest::array::uniform4(any::<bool>()),
            grant_group in proptest::array::uniform4(any::<bool>()),
            member_active in any::<bool>(),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("failed to build runtime");
            rt.block_on(check_world(
                legacy_direct,
                legacy_group,
                grant_direct,
                grant_group,
                member_active,
            ));
        }
    }
}
