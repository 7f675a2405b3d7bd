/// Integration tests for the household invitation lifecycle
///
/// These tests require a running PostgreSQL database.
/// Run with: cargo test --test invitations_tests

mod common;

use common::{create_household, create_user, test_querier};
use prixfixe_shared::db::query_builder::QueryFilter;
use prixfixe_shared::identifiers::new_id;
use prixfixe_shared::models::household::Household;
use prixfixe_shared::models::invitation::{
    HouseholdInvitation, HouseholdInvitationCreationInput, HouseholdInvitationUpdateRequestInput, InvitationState,
};
use prixfixe_shared::models::user::User;
use prixfixe_shared::{DatabaseError, Querier};

async fn invite(querier: &Querier, from: &User, to: &User, household: &Household) -> HouseholdInvitation {
    querier
        .create_household_invitation(&HouseholdInvitationCreationInput {
            id: new_id(),
            from_user: from.id.clone(),
            to_user: Some(to.id.clone()),
            to_email: to.email_address.to_uppercase(),
            note: "come cook with us".to_string(),
            token: new_id(),
            destination_household_id: household.id.clone(),
            expires_at: None,
        })
        .await
        .expect("Failed to create invitation")
}

#[tokio::test]
async fn test_invitation_is_created_pending_with_lowercased_email() {
    let Some(querier) = test_querier().await else { return };

    let host = create_user(&querier, "host").await;
    let guest = create_user(&querier, "guest").await;
    let household = create_household(&querier, &host, "potluck").await;

    let invitation = invite(&querier, &host, &guest, &household).await;
    assert_eq!(invitation.status, InvitationState::Pending);
    assert_eq!(invitation.to_email, guest.email_address.to_lowercase());
    assert_eq!(invitation.destination_household.id, household.id);
    assert_eq!(invitation.from_user.id, host.id);
    assert!(invitation.expires_at > invitation.created_on);

    assert!(querier.household_invitation_exists(&invitation.id).await.unwrap());

    let by_token = querier
        .get_household_invitation_by_email_and_token(&guest.email_address, &invitation.token)
        .await
        .expect("Failed to find invitation by email and token");
    assert_eq!(by_token.id, invitation.id);

    let from = querier
        .get_pending_household_invitations_from_user(&host.id, &QueryFilter::default())
        .await
        .unwrap();
    assert!(from.items.iter().any(|i| i.id == invitation.id));

    let to = querier
        .get_pending_household_invitations_for_user(&guest.id, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(to.items.len(), 1);
    assert_eq!(to.pagination.filtered_count, 1);
}

#[tokio::test]
async fn test_accepting_joins_household_and_makes_it_default() {
    let Some(querier) = test_querier().await else { return };

    let host = create_user(&querier, "host").await;
    let guest = create_user(&querier, "guest").await;
    let household = create_household(&querier, &host, "dinner party").await;
    let invitation = invite(&querier, &host, &guest, &household).await;

    querier
        .accept_household_invitation(
            &household.id,
            &invitation.id,
            &HouseholdInvitationUpdateRequestInput {
                token: invitation.token.clone(),
                note: "see you there".to_string(),
            },
        )
        .await
        .expect("Failed to accept invitation");

    assert!(querier.user_is_member_of_household(&guest.id, &household.id).await.unwrap());
    assert_eq!(
        querier.get_default_household_id_for_user(&guest.id).await.unwrap(),
        household.id
    );

    let accepted = querier
        .get_household_invitation_by_household_and_id(&household.id, &invitation.id)
        .await
        .unwrap();
    assert_eq!(accepted.status, InvitationState::Accepted);
    assert_eq!(accepted.status_note, "see you there");

    // A terminal invitation cannot change again.
    let err = querier
        .reject_household_invitation(&household.id, &invitation.id, "changed my mind")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_accepting_with_wrong_token_or_household_fails() {
    let Some(querier) = test_querier().await else { return };

    let host = create_user(&querier, "host").await;
    let guest = create_user(&querier, "guest").await;
    let household = create_household(&querier, &host, "brunch").await;
    let other = create_household(&querier, &host, "lunch").await;
    let invitation = invite(&querier, &host, &guest, &household).await;

    let wrong_token = HouseholdInvitationUpdateRequestInput {
        token: "nope".to_string(),
        note: String::new(),
    };
    let err = querier
        .accept_household_invitation(&household.id, &invitation.id, &wrong_token)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvitationNotFound));

    let right_token = HouseholdInvitationUpdateRequestInput {
        token: invitation.token.clone(),
        note: String::new(),
    };
    let err = querier
        .accept_household_invitation(&other.id, &invitation.id, &right_token)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvitationNotFound));

    assert!(!querier.user_is_member_of_household(&guest.id, &household.id).await.unwrap());
    let still_pending = querier
        .get_household_invitation_by_token_and_id(&invitation.token, &invitation.id)
        .await
        .unwrap();
    assert_eq!(still_pending.status, InvitationState::Pending);
}

#[tokio::test]
async fn test_cancelled_invitation_disappears_from_pending_lists() {
    let Some(querier) = test_querier().await else { return };

    let host = create_user(&querier, "host").await;
    let guest = create_user(&querier, "guest").await;
    let household = create_household(&querier, &host, "tasting").await;
    let invitation = invite(&querier, &host, &guest, &household).await;

    querier
        .cancel_household_invitation(&household.id, &invitation.id, "event moved")
        .await
        .expect("Failed to cancel invitation");

    assert!(!querier.household_invitation_exists(&invitation.id).await.unwrap());
    let pending = querier
        .get_pending_household_invitations_for_user(&guest.id, &QueryFilter::default())
        .await
        .unwrap();
    assert!(pending.items.is_empty());

    let err = querier
        .get_household_invitation_by_token_and_id(&invitation.token, &invitation.id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_expired_invitation_is_not_found_by_token() {
    let Some(querier) = test_querier().await else { return };

    let host = create_user(&querier, "host").await;
    let guest = create_user(&querier, "guest").await;
    let household = create_household(&querier, &host, "yesterday").await;

    let invitation = querier
        .create_household_invitation(&HouseholdInvitationCreationInput {
            id: new_id(),
            from_user: host.id.clone(),
            to_user: Some(guest.id.clone()),
            to_email: guest.email_address.clone(),
            note: String::new(),
            token: new_id(),
            destination_household_id: household.id.clone(),
            expires_at: Some(1),
        })
        .await
        .expect("Failed to create invitation");

    let err = querier
        .get_household_invitation_by_email_and_token(&guest.email_address, &invitation.token)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
