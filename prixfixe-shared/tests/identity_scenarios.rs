/// End-to-end identity and tenancy scenarios
///
/// These tests require a running PostgreSQL database.
/// Run with: cargo test --test identity_scenarios
///
/// Every test creates its own uniquely named users and households, so the
/// suite can share one database and run in parallel.

mod common;

use common::{create_household, create_user, signup_input, test_querier};
use prixfixe_shared::identifiers::new_id;
use prixfixe_shared::models::household::HouseholdOwnershipTransferInput;
use prixfixe_shared::models::invitation::{HouseholdInvitationCreationInput, InvitationState};
use prixfixe_shared::models::membership::{HouseholdUserMembershipCreationInput, ModifyUserPermissionsInput};
use prixfixe_shared::models::user::{UserDatabaseCreationInput, UserReputation};
use prixfixe_shared::{DatabaseError, Querier};

#[tokio::test]
async fn test_fresh_signup_creates_default_personal_household() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "fresh").await;
    assert_eq!(user.reputation, UserReputation::Unverified);
    assert_eq!(user.service_roles, vec!["service_user".to_string()]);

    let memberships = querier
        .get_household_user_memberships_for_user(&user.id)
        .await
        .expect("Failed to list memberships");
    assert_eq!(memberships.len(), 1);

    let personal = &memberships[0];
    assert!(personal.membership.default_household);
    assert_eq!(personal.membership.household_roles, vec!["household_admin".to_string()]);
    assert_eq!(personal.household.belongs_to_user, user.id);

    let default_id = querier
        .get_default_household_id_for_user(&user.id)
        .await
        .expect("Failed to read default household");
    assert_eq!(default_id, personal.household.id);
}

#[tokio::test]
async fn test_duplicate_username_is_reported() {
    let Some(querier) = test_querier().await else { return };

    let first = signup_input("dupe");
    querier.create_user(&first).await.expect("Failed to create user");

    let second = UserDatabaseCreationInput {
        id: new_id(),
        email_address: format!("other_{}", first.email_address),
        ..first.clone()
    };
    let err = querier.create_user(&second).await.unwrap_err();
    assert!(matches!(err, DatabaseError::UserAlreadyExists));

    // Nothing from the failed sign-up survives.
    assert!(querier.get_user(&second.id).await.unwrap_err().is_not_found());

    let households: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM households WHERE belongs_to_user = $1")
        .bind(&second.id)
        .fetch_one(querier.pool())
        .await
        .unwrap();
    assert_eq!(households, 0);

    let memberships: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM household_user_memberships WHERE belongs_to_user = $1")
            .bind(&second.id)
            .fetch_one(querier.pool())
            .await
            .unwrap();
    assert_eq!(memberships, 0);
}

#[tokio::test]
async fn test_signup_consuming_invitation() {
    let Some(querier) = test_querier().await else { return };

    let inviter = create_user(&querier, "inviter").await;
    let destination = create_household(&querier, &inviter, "supper club").await;

    let invitee = signup_input("invitee");
    let token = new_id();
    let invitation = querier
        .create_household_invitation(&HouseholdInvitationCreationInput {
            id: new_id(),
            from_user: inviter.id.clone(),
            to_user: None,
            to_email: invitee.email_address.clone(),
            note: "join us".to_string(),
            token: token.clone(),
            destination_household_id: destination.id.clone(),
            expires_at: None,
        })
        .await
        .expect("Failed to create invitation");

    let input = UserDatabaseCreationInput {
        invitation_token: Some(token),
        destination_household_id: Some(destination.id.clone()),
        ..invitee
    };
    let user = querier.create_user(&input).await.expect("Failed to sign up");

    let memberships = querier
        .get_household_user_memberships_for_user(&user.id)
        .await
        .expect("Failed to list memberships");
    assert_eq!(memberships.len(), 2);

    let joined = memberships
        .iter()
        .find(|m| m.household.id == destination.id)
        .expect("Missing membership in destination");
    assert!(joined.membership.default_household);
    assert_eq!(joined.membership.household_roles, vec!["household_member".to_string()]);

    let personal = memberships
        .iter()
        .find(|m| m.household.id != destination.id)
        .expect("Missing personal household");
    assert!(!personal.membership.default_household);
    assert_eq!(personal.household.belongs_to_user, user.id);

    let accepted = querier
        .get_household_invitation_by_household_and_id(&destination.id, &invitation.id)
        .await
        .expect("Failed to read invitation");
    assert_eq!(accepted.status, InvitationState::Accepted);
    assert!(accepted.archived_on.is_some());
}

#[tokio::test]
async fn test_signup_with_unknown_token_writes_nothing() {
    let Some(querier) = test_querier().await else { return };

    let inviter = create_user(&querier, "owner").await;
    let destination = create_household(&querier, &inviter, "closed kitchen").await;

    let input = UserDatabaseCreationInput {
        invitation_token: Some("not-a-real-token".to_string()),
        destination_household_id: Some(destination.id.clone()),
        ..signup_input("gatecrasher")
    };
    let err = querier.create_user(&input).await.unwrap_err();
    assert!(matches!(err, DatabaseError::InvitationNotFound));
    assert!(querier.get_user(&input.id).await.unwrap_err().is_not_found());
}

async fn join(querier: &Querier, user_id: &str, household_id: &str, default_household: bool) {
    querier
        .add_user_to_household(&HouseholdUserMembershipCreationInput {
            id: new_id(),
            user_id: user_id.to_string(),
            household_id: household_id.to_string(),
            household_roles: vec!["household_member".to_string()],
            default_household,
        })
        .await
        .expect("Failed to add member");
}

#[tokio::test]
async fn test_owner_cannot_leave_their_own_household() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "captain").await;
    let personal = querier.get_default_household_id_for_user(&owner.id).await.unwrap();

    let err = querier
        .remove_user_from_household(&owner.id, &personal)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidId("user_id")));
    assert!(err.is_input_error());

    // Nothing changed.
    assert!(querier.user_is_member_of_household(&owner.id, &personal).await.unwrap());
    assert_eq!(querier.get_default_household_id_for_user(&owner.id).await.unwrap(), personal);
    assert_eq!(querier.get_household_by_id(&personal).await.unwrap().belongs_to_user, owner.id);
}

#[tokio::test]
async fn test_removing_last_membership_creates_personal_household() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "loner").await;
    let host = create_user(&querier, "host").await;
    let personal = querier.get_default_household_id_for_user(&user.id).await.unwrap();
    let shared = querier.get_default_household_id_for_user(&host.id).await.unwrap();

    // Join the host's household, then hand the personal one to the host so
    // the shared household is the only membership left.
    join(&querier, &user.id, &shared, false).await;
    join(&querier, &host.id, &personal, false).await;
    querier
        .transfer_household_ownership(
            &personal,
            &HouseholdOwnershipTransferInput {
                current_owner: user.id.clone(),
                new_owner: host.id.clone(),
                reason: "giving it away".to_string(),
            },
        )
        .await
        .expect("Failed to transfer ownership");
    assert_eq!(querier.get_default_household_id_for_user(&user.id).await.unwrap(), shared);

    querier
        .remove_user_from_household(&user.id, &shared)
        .await
        .expect("Failed to remove membership");

    assert!(!querier.user_is_member_of_household(&user.id, &shared).await.unwrap());

    let memberships = querier
        .get_household_user_memberships_for_user(&user.id)
        .await
        .expect("Failed to list memberships");
    assert_eq!(memberships.len(), 1);

    let replacement = &memberships[0];
    assert_ne!(replacement.household.id, shared);
    assert_ne!(replacement.household.id, personal);
    assert_eq!(replacement.household.belongs_to_user, user.id);
    assert!(replacement.membership.default_household);
    assert_eq!(replacement.membership.household_roles, vec!["household_admin".to_string()]);
}

#[tokio::test]
async fn test_removing_default_promotes_oldest_remaining() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "hopper").await;
    let personal = querier.get_default_household_id_for_user(&user.id).await.unwrap();
    let landlord = create_user(&querier, "landlord").await;
    let first = create_household(&querier, &landlord, "first").await;
    let second = create_household(&querier, &landlord, "second").await;

    join(&querier, &user.id, &first.id, true).await;
    join(&querier, &user.id, &second.id, false).await;
    assert_eq!(querier.get_default_household_id_for_user(&user.id).await.unwrap(), first.id);

    querier
        .remove_user_from_household(&user.id, &first.id)
        .await
        .expect("Failed to remove membership");

    // The personal household is the oldest one left.
    let default_id = querier.get_default_household_id_for_user(&user.id).await.unwrap();
    assert_eq!(default_id, personal);
    assert!(querier.user_is_member_of_household(&user.id, &second.id).await.unwrap());
}

#[tokio::test]
async fn test_membership_id_is_generated_when_empty() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "giver").await;
    let guest = create_user(&querier, "guest").await;
    let household = create_household(&querier, &owner, "open house").await;

    querier
        .add_user_to_household(&HouseholdUserMembershipCreationInput {
            id: String::new(),
            user_id: guest.id.clone(),
            household_id: household.id.clone(),
            household_roles: vec!["household_member".to_string()],
            default_household: false,
        })
        .await
        .expect("Failed to add member");

    let memberships = querier.get_household_user_memberships_for_user(&guest.id).await.unwrap();
    let joined = memberships
        .iter()
        .find(|m| m.household.id == household.id)
        .expect("membership missing");
    assert!(!joined.membership.id.is_empty());
}

#[tokio::test]
async fn test_permission_changes_are_idempotent() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "chef").await;
    let cook = create_user(&querier, "cook").await;
    let household = create_household(&querier, &owner, "kitchen").await;
    join(&querier, &cook.id, &household.id, false).await;

    let input = ModifyUserPermissionsInput {
        new_roles: vec!["household_admin".to_string()],
        reason: "promotion".to_string(),
    };
    for _ in 0..2 {
        querier
            .modify_user_permissions(&household.id, &cook.id, &input)
            .await
            .expect("Failed to modify permissions");
    }

    let session = querier.build_session_context_data_for_user(&cook.id).await.unwrap();
    let roles = session
        .household_permissions
        .get(&household.id)
        .expect("household missing from session");
    assert!(roles.is_household_admin());

    // No membership to update is not an error.
    let stranger = create_user(&querier, "outsider").await;
    querier
        .modify_user_permissions(&household.id, &stranger.id, &input)
        .await
        .expect("missing membership should be a no-op");
    assert!(!querier.user_is_member_of_household(&stranger.id, &household.id).await.unwrap());
}

#[tokio::test]
async fn test_marking_default_twice_is_idempotent() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "settler").await;
    let second = create_household(&querier, &user, "second").await;

    for _ in 0..2 {
        querier
            .mark_household_as_user_default(&user.id, &second.id)
            .await
            .expect("Failed to mark default");
    }

    let memberships = querier.get_household_user_memberships_for_user(&user.id).await.unwrap();
    let defaults = memberships.iter().filter(|m| m.membership.default_household).count();
    assert_eq!(defaults, 1);
    assert_eq!(querier.get_default_household_id_for_user(&user.id).await.unwrap(), second.id);
}

#[tokio::test]
async fn test_ownership_transfer_moves_household_and_membership() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "owner").await;
    let member = create_user(&querier, "member").await;
    let household = create_household(&querier, &owner, "family").await;

    querier
        .add_user_to_household(&HouseholdUserMembershipCreationInput {
            id: new_id(),
            user_id: member.id.clone(),
            household_id: household.id.clone(),
            household_roles: vec!["household_member".to_string()],
            default_household: false,
        })
        .await
        .expect("Failed to add member");

    querier
        .transfer_household_ownership(
            &household.id,
            &HouseholdOwnershipTransferInput {
                current_owner: owner.id.clone(),
                new_owner: member.id.clone(),
                reason: "moving out".to_string(),
            },
        )
        .await
        .expect("Failed to transfer ownership");

    let moved = querier.get_household_by_id(&household.id).await.unwrap();
    assert_eq!(moved.belongs_to_user, member.id);
    assert_eq!(moved.members.len(), 1);
    assert_eq!(moved.members[0].belongs_to_user.id, member.id);
    assert_eq!(moved.members[0].household_roles, vec!["household_admin".to_string()]);

    assert!(!querier.user_is_member_of_household(&owner.id, &household.id).await.unwrap());
    assert!(querier.user_is_member_of_household(&member.id, &household.id).await.unwrap());

    // The former owner keeps a default household.
    assert!(querier.get_default_household_id_for_user(&owner.id).await.is_ok());
}

#[tokio::test]
async fn test_default_swap_leaves_exactly_one_default() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "switcher").await;
    let first = querier.get_default_household_id_for_user(&user.id).await.unwrap();
    let second = create_household(&querier, &user, "second").await;
    let third = create_household(&querier, &user, "third").await;

    querier
        .mark_household_as_user_default(&user.id, &second.id)
        .await
        .expect("Failed to swap default");

    let memberships = querier.get_household_user_memberships_for_user(&user.id).await.unwrap();
    let defaults: Vec<_> = memberships
        .iter()
        .filter(|m| m.membership.default_household)
        .map(|m| m.household.id.clone())
        .collect();
    assert_eq!(defaults, vec![second.id.clone()]);
    assert_eq!(querier.get_default_household_id_for_user(&user.id).await.unwrap(), second.id);

    // A household the user does not belong to changes nothing.
    let stranger = create_user(&querier, "stranger").await;
    let foreign = querier.get_default_household_id_for_user(&stranger.id).await.unwrap();
    let err = querier
        .mark_household_as_user_default(&user.id, &foreign)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(querier.get_default_household_id_for_user(&user.id).await.unwrap(), second.id);

    let session = querier
        .build_session_context_data_for_user(&user.id)
        .await
        .expect("Failed to build session");
    assert_eq!(session.active_household_id, second.id);
    assert_eq!(session.household_permissions.len(), 3);
    for id in [&first, &second.id, &third.id] {
        assert!(session.household_permissions.contains_key(id));
    }
    assert!(!session.requester.service_permissions.is_service_admin());
}

#[tokio::test]
async fn test_archived_user_cannot_build_session() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "leaver").await;
    querier.archive_user(&user.id).await.expect("Failed to archive user");

    let err = querier.build_session_context_data_for_user(&user.id).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(querier.get_household_user_memberships_for_user(&user.id).await.unwrap().is_empty());
}
