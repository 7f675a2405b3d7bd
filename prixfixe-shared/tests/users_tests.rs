/// Integration tests for the user querier
///
/// These tests require a running PostgreSQL database.
/// Run with: cargo test --test users_tests

mod common;

use common::{create_user, signup_input, test_querier, unique};
use prixfixe_shared::identifiers::new_id;
use prixfixe_shared::models::user::{UserReputation, UserReputationUpdateInput, UserUpdate};
use prixfixe_shared::DatabaseError;

#[tokio::test]
async fn test_created_user_reads_back_unchanged() {
    let Some(querier) = test_querier().await else { return };

    let input = signup_input("roundtrip");
    let created = querier.create_user(&input).await.expect("Failed to create user");
    let fetched = querier.get_user(&input.id).await.expect("Failed to get user");

    assert_eq!(fetched, created);
    assert_eq!(fetched.username, input.username);
    assert_eq!(fetched.email_address, input.email_address);
    assert_eq!(fetched.hashed_password, input.hashed_password);
    assert_eq!(fetched.two_factor_secret, input.two_factor_secret);
    assert!(fetched.two_factor_secret_verified_on.is_none());
    assert!(fetched.last_updated_on.is_none());
}

#[tokio::test]
async fn test_profile_and_credential_updates() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "editor").await;

    let mut update = UserUpdate::from(&user);
    update.username = unique("renamed");
    update.birth_month = Some(4);
    querier.update_user(&user.id, &update).await.expect("Failed to update user");

    let reloaded = querier.get_user(&user.id).await.unwrap();
    assert_eq!(reloaded.username, update.username);
    assert_eq!(reloaded.birth_month, Some(4));
    assert!(reloaded.last_updated_on.is_some());

    querier.update_user_password(&user.id, "$argon2id$new").await.unwrap();
    let reloaded = querier.get_user(&user.id).await.unwrap();
    assert_eq!(reloaded.hashed_password, "$argon2id$new");
    assert!(!reloaded.requires_password_change);
    assert!(reloaded.password_last_changed_on.is_some());
}

#[tokio::test]
async fn test_verifying_two_factor_secret_grants_good_standing() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "verifier").await;
    querier.mark_user_two_factor_secret_as_verified(&user.id).await.unwrap();

    let verified = querier.get_user(&user.id).await.unwrap();
    assert_eq!(verified.reputation, UserReputation::GoodStanding);
    assert!(verified.two_factor_secret_verified_on.is_some());

    // A new secret has to be verified again.
    querier
        .update_user_two_factor_secret(&user.id, "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB")
        .await
        .unwrap();
    let reset = querier.get_user(&user.id).await.unwrap();
    assert_eq!(reset.two_factor_secret, "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB");
    assert!(reset.two_factor_secret_verified_on.is_none());

    querier
        .update_user_reputation(&UserReputationUpdateInput {
            target_user_id: user.id.clone(),
            new_reputation: UserReputation::Banned,
            reason: "spam".to_string(),
        })
        .await
        .unwrap();
    let banned = querier.get_user(&user.id).await.unwrap();
    assert_eq!(banned.reputation, UserReputation::Banned);
    assert_eq!(banned.reputation_explanation, "spam");
}

#[tokio::test]
async fn test_updates_skip_archived_and_missing_users() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "ghost").await;
    let update = UserUpdate::from(&user);
    querier.archive_user(&user.id).await.expect("Failed to archive user");

    for id in [user.id.clone(), new_id()] {
        assert!(matches!(
            querier.update_user(&id, &update).await,
            Err(DatabaseError::NoRows)
        ));
        assert!(matches!(
            querier.update_user_password(&id, "$argon2id$other").await,
            Err(DatabaseError::NoRows)
        ));
        assert!(matches!(
            querier.update_user_two_factor_secret(&id, "CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC").await,
            Err(DatabaseError::NoRows)
        ));
        assert!(matches!(
            querier.mark_user_two_factor_secret_as_verified(&id).await,
            Err(DatabaseError::NoRows)
        ));
        assert!(matches!(
            querier
                .update_user_reputation(&UserReputationUpdateInput {
                    target_user_id: id.clone(),
                    new_reputation: UserReputation::Terminated,
                    reason: String::new(),
                })
                .await,
            Err(DatabaseError::NoRows)
        ));
    }
}
