//! 行程推荐（游览）动作

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::dialog::ActionKind;
use crate::tools::schema::parameters_schema;
use crate::tools::travel::{search_listing, set_booked, update_columns, TravelDb};
use crate::tools::{parse_args, to_json_text, ActionError, ActionHandler, CallerContext};

const TABLE: &str = "trip_recommendations";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchTripRecommendationsArgs {
    /// The location of the trip recommendation.
    pub location: Option<String>,
    /// The name of the trip recommendation.
    pub name: Option<String>,
    /// Comma separated keywords associated with the trip recommendation.
    pub keywords: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecommendationIdArgs {
    /// The ID of the trip recommendation.
    pub recommendation_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateExcursionArgs {
    /// The ID of the trip recommendation to update.
    pub recommendation_id: i64,
    /// The new details of the trip recommendation.
    pub details: String,
}

pub struct SearchTripRecommendations {
    db: TravelDb,
}

impl SearchTripRecommendations {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for SearchTripRecommendations {
    fn kind(&self) -> ActionKind {
        ActionKind::SearchTripRecommendations
    }

    fn description(&self) -> &str {
        "Search for trip recommendations based on location, name, and keywords."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchTripRecommendationsArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: SearchTripRecommendationsArgs = parse_args(args)?;
        let rows = search_listing(&self.db, TABLE, args.location, args.name, args.keywords).await?;
        to_json_text(&rows)
    }
}

pub struct BookExcursion {
    db: TravelDb,
}

impl BookExcursion {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for BookExcursion {
    fn kind(&self) -> ActionKind {
        ActionKind::BookExcursion
    }

    fn description(&self) -> &str {
        "Book an excursion by its recommendation ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<RecommendationIdArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let id = parse_args::<RecommendationIdArgs>(args)?.recommendation_id;
        if set_booked(&self.db, TABLE, id, true).await? > 0 {
            Ok(format!("Trip recommendation {id} successfully booked."))
        } else {
            Ok(format!("No trip recommendation found with ID {id}."))
        }
    }
}

pub struct UpdateExcursion {
    db: TravelDb,
}

impl UpdateExcursion {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for UpdateExcursion {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateExcursion
    }

    fn description(&self) -> &str {
        "Update a trip recommendation's details by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<UpdateExcursionArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: UpdateExcursionArgs = parse_args(args)?;
        let id = args.recommendation_id;
        if update_columns(&self.db, TABLE, id, vec![("details", Some(args.details))]).await? > 0 {
            Ok(format!("Trip recommendation {id} successfully updated."))
        } else {
            Ok(format!("No trip recommendation found with ID {id}."))
        }
    }
}

pub struct CancelExcursion {
    db: TravelDb,
}

impl CancelExcursion {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for CancelExcursion {
    fn kind(&self) -> ActionKind {
        ActionKind::CancelExcursion
    }

    fn description(&self) -> &str {
        "Cancel a trip recommendation by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<RecommendationIdArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let id = parse_args::<RecommendationIdArgs>(args)?.recommendation_id;
        if set_booked(&self.db, TABLE, id, false).await? > 0 {
            Ok(format!("Trip recommendation {id} successfully cancelled."))
        } else {
            Ok(format!("No trip recommendation found with ID {id}."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::travel::db::fixtures::seeded_db;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_keywords_within_location() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SearchTripRecommendations::new(seeded_db(dir.path()));
        let out = tool
            .invoke(json!({"location": "Basel", "keywords": "museum,boat"}), &CallerContext::default())
            .await
            .unwrap();
        let rows: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Kunstmuseum Basel");
    }

    #[tokio::test]
    async fn test_book_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let caller = CallerContext::default();
        assert_eq!(
            BookExcursion::new(db.clone())
                .invoke(json!({"recommendation_id": 3}), &caller)
                .await
                .unwrap(),
            "Trip recommendation 3 successfully booked."
        );
        assert_eq!(
            CancelExcursion::new(db.clone())
                .invoke(json!({"recommendation_id": 9}), &caller)
                .await
                .unwrap(),
            "No trip recommendation found with ID 9."
        );
    }

    #[tokio::test]
    async fn test_update_details_requires_text() {
        let dir = tempfile::tempdir().unwrap();
        let err = UpdateExcursion::new(seeded_db(dir.path()))
            .invoke(json!({"recommendation_id": 1}), &CallerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments(_)));
    }
}
