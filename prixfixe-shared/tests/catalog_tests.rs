/// Integration tests for the catalog queriers
///
/// These tests require a running PostgreSQL database.
/// Run with: cargo test --test catalog_tests

mod common;

use common::{create_user, test_querier, unique};
use prixfixe_shared::catalog::api_clients::ApiClientCreationInput;
use prixfixe_shared::catalog::password_reset_tokens::PasswordResetTokenCreationInput;
use prixfixe_shared::catalog::valid_ingredient_preparations::{
    ValidIngredientPreparationCreationInput, ValidIngredientPreparationUpdate,
};
use prixfixe_shared::catalog::valid_ingredients::{IngredientFlags, ValidIngredientCreationInput};
use prixfixe_shared::catalog::valid_instruments::ValidInstrumentCreationInput;
use prixfixe_shared::catalog::valid_preparation_instruments::ValidPreparationInstrumentCreationInput;
use prixfixe_shared::catalog::valid_preparations::ValidPreparationCreationInput;
use prixfixe_shared::catalog::webhooks::WebhookCreationInput;
use prixfixe_shared::db::query_builder::QueryFilter;
use prixfixe_shared::identifiers::new_id;

#[tokio::test]
async fn test_webhook_lifecycle() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "hooker").await;
    let household_id = querier.get_default_household_id_for_user(&owner.id).await.unwrap();

    let webhook = querier
        .create_webhook(&WebhookCreationInput {
            id: new_id(),
            name: "meal plan updates".to_string(),
            content_type: "application/json".to_string(),
            url: "https://example.com/hooks".to_string(),
            method: "POST".to_string(),
            events: vec!["meal_plan.created".to_string(), "meal_plan.archived".to_string()],
            data_types: vec!["meal_plan".to_string()],
            topics: vec![],
            belongs_to_household: household_id.clone(),
        })
        .await
        .expect("Failed to create webhook");

    assert_eq!(webhook.events.len(), 2);
    assert!(webhook.topics.is_empty());
    assert!(querier.webhook_exists(&webhook.id, &household_id).await.unwrap());

    let page = querier.get_webhooks(&household_id, &QueryFilter::default()).await.unwrap();
    assert_eq!(page.items, vec![webhook.clone()]);
    assert_eq!(page.pagination.total_count, 1);

    // Another household cannot see or archive it.
    let stranger = create_user(&querier, "stranger").await;
    let other_household = querier.get_default_household_id_for_user(&stranger.id).await.unwrap();
    assert!(querier.get_webhook(&webhook.id, &other_household).await.unwrap_err().is_not_found());
    assert!(querier.archive_webhook(&webhook.id, &other_household).await.unwrap_err().is_not_found());

    querier.archive_webhook(&webhook.id, &household_id).await.unwrap();
    assert!(!querier.webhook_exists(&webhook.id, &household_id).await.unwrap());
}

#[tokio::test]
async fn test_api_client_lifecycle() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "integrator").await;
    let client = querier
        .create_api_client(&ApiClientCreationInput {
            id: new_id(),
            name: "cli".to_string(),
            client_id: unique("client"),
            client_secret: vec![7; 32],
            belongs_to_user: owner.id.clone(),
        })
        .await
        .expect("Failed to create api client");

    let by_client_id = querier.get_api_client_by_client_id(&client.client_id).await.unwrap();
    assert_eq!(by_client_id.id, client.id);
    assert_eq!(by_client_id.client_secret, vec![7; 32]);

    let page = querier.get_api_clients(&owner.id, &QueryFilter::default()).await.unwrap();
    assert_eq!(page.items.len(), 1);

    querier.archive_api_client(&client.id, &owner.id).await.unwrap();
    assert!(querier
        .get_api_client_by_client_id(&client.client_id)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_password_reset_token_is_single_use() {
    let Some(querier) = test_querier().await else { return };

    let user = create_user(&querier, "forgetful").await;
    let token = querier
        .create_password_reset_token(&PasswordResetTokenCreationInput {
            id: new_id(),
            token: new_id(),
            belongs_to_user: user.id.clone(),
            expires_at: None,
        })
        .await
        .expect("Failed to create token");
    assert!(!token.is_redeemed());

    let found = querier.get_password_reset_token_by_token(&token.token).await.unwrap();
    assert_eq!(found.id, token.id);

    querier.redeem_password_reset_token(&token.id).await.unwrap();
    assert!(querier.redeem_password_reset_token(&token.id).await.unwrap_err().is_not_found());
    assert!(querier
        .get_password_reset_token_by_token(&token.token)
        .await
        .unwrap_err()
        .is_not_found());

    let expired = querier
        .create_password_reset_token(&PasswordResetTokenCreationInput {
            id: new_id(),
            token: new_id(),
            belongs_to_user: user.id.clone(),
            expires_at: Some(1),
        })
        .await
        .expect("Failed to create token");
    assert!(querier
        .get_password_reset_token_by_token(&expired.token)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_vocabulary_and_pairings() {
    let Some(querier) = test_querier().await else { return };

    let ingredient = querier
        .create_valid_ingredient(&ValidIngredientCreationInput {
            id: new_id(),
            name: unique("shallot"),
            description: "small, mild onion".to_string(),
            flags: IngredientFlags {
                volumetric: true,
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .expect("Failed to create ingredient");

    let preparation = querier
        .create_valid_preparation(&ValidPreparationCreationInput {
            id: new_id(),
            name: unique("mince"),
            ..Default::default()
        })
        .await
        .expect("Failed to create preparation");

    let instrument = querier
        .create_valid_instrument(&ValidInstrumentCreationInput {
            id: new_id(),
            name: unique("knife"),
            variant: "chef's".to_string(),
            ..Default::default()
        })
        .await
        .expect("Failed to create instrument");

    let found = querier.search_for_valid_ingredients(&ingredient.name).await.unwrap();
    assert!(found.iter().any(|i| i.id == ingredient.id));
    assert!(querier.valid_preparation_exists(&preparation.id).await.unwrap());
    assert!(querier.get_random_valid_instrument().await.is_ok());

    let mut renamed = instrument.clone();
    renamed.description = "for everything".to_string();
    querier.update_valid_instrument(&renamed).await.unwrap();
    assert_eq!(
        querier.get_valid_instrument(&instrument.id).await.unwrap().description,
        "for everything"
    );

    let pairing = querier
        .create_valid_ingredient_preparation(&ValidIngredientPreparationCreationInput {
            id: new_id(),
            notes: "finely".to_string(),
            valid_ingredient_id: ingredient.id.clone(),
            valid_preparation_id: preparation.id.clone(),
        })
        .await
        .expect("Failed to pair ingredient and preparation");
    assert_eq!(pairing.ingredient.id, ingredient.id);
    assert_eq!(pairing.preparation.id, preparation.id);

    let mut update = ValidIngredientPreparationUpdate::from(&pairing);
    update.notes = "very finely".to_string();
    querier
        .update_valid_ingredient_preparation(&pairing.id, &update)
        .await
        .unwrap();

    let for_ingredient = querier
        .get_valid_ingredient_preparations_for_ingredient(&ingredient.id, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(for_ingredient.items.len(), 1);
    assert_eq!(for_ingredient.items[0].notes, "very finely");

    let tool = querier
        .create_valid_preparation_instrument(&ValidPreparationInstrumentCreationInput {
            id: new_id(),
            notes: String::new(),
            valid_preparation_id: preparation.id.clone(),
            valid_instrument_id: instrument.id.clone(),
        })
        .await
        .expect("Failed to pair preparation and instrument");

    let for_instrument = querier
        .get_valid_preparation_instruments_for_instrument(&instrument.id, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(for_instrument.items.len(), 1);
    assert_eq!(for_instrument.items[0].id, tool.id);

    // Archiving one side hides the pairings that use it.
    querier.archive_valid_preparation(&preparation.id).await.unwrap();
    assert!(!querier.valid_ingredient_preparation_exists(&pairing.id).await.unwrap());
    assert!(querier
        .get_valid_preparation_instruments_for_preparation(&preparation.id, &QueryFilter::default())
        .await
        .unwrap()
        .items
        .is_empty());
}

fn webhook_input(household_id: &str, name: &str) -> WebhookCreationInput {
    WebhookCreationInput {
        id: new_id(),
        name: name.to_string(),
        content_type: "application/json".to_string(),
        url: "https://example.com/hooks".to_string(),
        method: "POST".to_string(),
        events: vec!["recipe.created".to_string()],
        data_types: vec!["recipe".to_string()],
        topics: vec![],
        belongs_to_household: household_id.to_string(),
    }
}

#[tokio::test]
async fn test_page_past_the_end_still_reports_counts() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "pager").await;
    let household_id = querier.get_default_household_id_for_user(&owner.id).await.unwrap();
    for name in ["first", "second", "third"] {
        querier.create_webhook(&webhook_input(&household_id, name)).await.unwrap();
    }

    let filter = QueryFilter {
        page: 4,
        limit: 1,
        ..Default::default()
    };
    let page = querier.get_webhooks(&household_id, &filter).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.pagination.page, 4);
    assert_eq!(page.pagination.filtered_count, 3);
    assert_eq!(page.pagination.total_count, 3);

    // Household lists page over households and report their own counts.
    let households = querier.get_households(&owner.id, &filter).await.unwrap();
    assert!(households.items.is_empty());
    assert_eq!(households.pagination.filtered_count, 1);
    assert_eq!(households.pagination.total_count, 1);
}

#[tokio::test]
async fn test_include_archived_counts_archived_rows() {
    let Some(querier) = test_querier().await else { return };

    let owner = create_user(&querier, "archivist").await;
    let household_id = querier.get_default_household_id_for_user(&owner.id).await.unwrap();
    let kept = querier.create_webhook(&webhook_input(&household_id, "kept")).await.unwrap();
    let gone = querier.create_webhook(&webhook_input(&household_id, "gone")).await.unwrap();
    querier.archive_webhook(&gone.id, &household_id).await.unwrap();

    let live = querier.get_webhooks(&household_id, &QueryFilter::default()).await.unwrap();
    assert_eq!(live.items, vec![kept]);
    assert_eq!(live.pagination.filtered_count, 1);
    assert_eq!(live.pagination.total_count, 1);

    let filter = QueryFilter {
        include_archived: true,
        ..Default::default()
    };
    let all = querier.get_webhooks(&household_id, &filter).await.unwrap();
    assert_eq!(all.items.len(), 2);
    assert_eq!(all.pagination.filtered_count, 2);
    assert_eq!(all.pagination.total_count, 1);
}
