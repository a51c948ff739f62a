//! 租车动作

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::dialog::ActionKind;
use crate::tools::schema::parameters_schema;
use crate::tools::travel::{search_listing, set_booked, update_columns, TravelDb};
use crate::tools::{parse_args, to_json_text, ActionError, ActionHandler, CallerContext};

const TABLE: &str = "car_rentals";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchCarRentalsArgs {
    /// The location of the car rental.
    pub location: Option<String>,
    /// The name of the car rental company.
    pub name: Option<String>,
    /// The price tier of the car rental.
    #[allow(dead_code)]
    pub price_tier: Option<String>,
    /// The start date of the car rental.
    #[allow(dead_code)]
    pub start_date: Option<String>,
    /// The end date of the car rental.
    #[allow(dead_code)]
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RentalIdArgs {
    /// The ID of the car rental.
    pub rental_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateCarRentalArgs {
    /// The ID of the car rental to update.
    pub rental_id: i64,
    /// The new start date of the car rental.
    pub start_date: Option<String>,
    /// The new end date of the car rental.
    pub end_date: Option<String>,
}

pub struct SearchCarRentals {
    db: TravelDb,
}

impl SearchCarRentals {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for SearchCarRentals {
    fn kind(&self) -> ActionKind {
        ActionKind::SearchCarRentals
    }

    fn description(&self) -> &str {
        "Search for car rentals based on location, name, price tier, start date, and end date."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchCarRentalsArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: SearchCarRentalsArgs = parse_args(args)?;
        let rows = search_listing(&self.db, TABLE, args.location, args.name, None).await?;
        to_json_text(&rows)
    }
}

pub struct BookCarRental {
    db: TravelDb,
}

impl BookCarRental {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for BookCarRental {
    fn kind(&self) -> ActionKind {
        ActionKind::BookCarRental
    }

    fn description(&self) -> &str {
        "Book a car rental by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<RentalIdArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let id = parse_args::<RentalIdArgs>(args)?.rental_id;
        if set_booked(&self.db, TABLE, id, true).await? > 0 {
            Ok(format!("Car rental {id} successfully booked."))
        } else {
            Ok(format!("No car rental found with ID {id}."))
        }
    }
}

pub struct UpdateCarRental {
    db: TravelDb,
}

impl UpdateCarRental {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for UpdateCarRental {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateCarRental
    }

    fn description(&self) -> &str {
        "Update a car rental's start and end dates by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<UpdateCarRentalArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: UpdateCarRentalArgs = parse_args(args)?;
        let id = args.rental_id;
        let columns = vec![("start_date", args.start_date), ("end_date", args.end_date)];
        if update_columns(&self.db, TABLE, id, columns).await? > 0 {
            Ok(format!("Car rental {id} successfully updated."))
        } else {
            Ok(format!("No car rental found with ID {id}."))
        }
    }
}

pub struct CancelCarRental {
    db: TravelDb,
}

impl CancelCarRental {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for CancelCarRental {
    fn kind(&self) -> ActionKind {
        ActionKind::CancelCarRental
    }

    fn description(&self) -> &str {
        "Cancel a car rental by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<RentalIdArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let id = parse_args::<RentalIdArgs>(args)?.rental_id;
        if set_booked(&self.db, TABLE, id, false).await? > 0 {
            Ok(format!("Car rental {id} successfully cancelled."))
        } else {
            Ok(format!("No car rental found with ID {id}."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::travel::db::fixtures::seeded_db;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_by_location_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SearchCarRentals::new(seeded_db(dir.path()));
        let caller = CallerContext::default();
        let all: Vec<Value> =
            serde_json::from_str(&tool.invoke(json!({"location": "Basel"}), &caller).await.unwrap()).unwrap();
        assert_eq!(all.len(), 2);
        let avis: Vec<Value> = serde_json::from_str(
            &tool.invoke(json!({"location": "Basel", "name": "avis"}), &caller).await.unwrap(),
        )
        .unwrap();
        assert_eq!(avis.len(), 1);
        assert_eq!(avis[0]["id"], 2);
    }

    #[tokio::test]
    async fn test_book_then_update_dates() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let caller = CallerContext::default();
        assert_eq!(
            BookCarRental::new(db.clone()).invoke(json!({"rental_id": 1}), &caller).await.unwrap(),
            "Car rental 1 successfully booked."
        );
        let out = UpdateCarRental::new(db.clone())
            .invoke(json!({"rental_id": 1, "end_date": "2024-04-18"}), &caller)
            .await
            .unwrap();
        assert_eq!(out, "Car rental 1 successfully updated.");

        let rows = db
            .run(|conn| crate::tools::travel::db::query_json(conn, "SELECT * FROM car_rentals WHERE id = 1", vec![]))
            .await
            .unwrap();
        assert_eq!(rows[0]["booked"], 1);
        assert_eq!(rows[0]["end_date"], "2024-04-18");
    }

    #[tokio::test]
    async fn test_update_without_dates_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let out = UpdateCarRental::new(seeded_db(dir.path()))
            .invoke(json!({"rental_id": 1}), &CallerContext::default())
            .await
            .unwrap();
        assert_eq!(out, "No car rental found with ID 1.");
    }
}
