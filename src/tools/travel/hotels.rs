//! 酒店动作：搜索（安全）、预订 / 改期 / 取消（敏感）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::dialog::ActionKind;
use crate::tools::schema::parameters_schema;
use crate::tools::travel::{search_listing, set_booked, update_columns, TravelDb};
use crate::tools::{parse_args, to_json_text, ActionError, ActionHandler, CallerContext};

const TABLE: &str = "hotels";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchHotelsArgs {
    /// The location of the hotel.
    pub location: Option<String>,
    /// The name of the hotel.
    pub name: Option<String>,
    /// The price tier of the hotel. Examples: Midscale, Upper Midscale, Upscale, Luxury
    #[allow(dead_code)]
    pub price_tier: Option<String>,
    /// The check-in date of the hotel.
    #[allow(dead_code)]
    pub checkin_date: Option<String>,
    /// The check-out date of the hotel.
    #[allow(dead_code)]
    pub checkout_date: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HotelIdArgs {
    /// The ID of the hotel.
    pub hotel_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateHotelArgs {
    /// The ID of the hotel to update.
    pub hotel_id: i64,
    /// The new check-in date.
    pub checkin_date: Option<String>,
    /// The new check-out date.
    pub checkout_date: Option<String>,
}

pub struct SearchHotels {
    db: TravelDb,
}

impl SearchHotels {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for SearchHotels {
    fn kind(&self) -> ActionKind {
        ActionKind::SearchHotels
    }

    fn description(&self) -> &str {
        "Search for hotels based on location, name, price tier, check-in date, and check-out date."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchHotelsArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        // 示例数据有限，价格等级与日期不参与过滤
        let args: SearchHotelsArgs = parse_args(args)?;
        let rows = search_listing(&self.db, TABLE, args.location, args.name, None).await?;
        to_json_text(&rows)
    }
}

pub struct BookHotel {
    db: TravelDb,
}

impl BookHotel {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for BookHotel {
    fn kind(&self) -> ActionKind {
        ActionKind::BookHotel
    }

    fn description(&self) -> &str {
        "Book a hotel by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<HotelIdArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let id = parse_args::<HotelIdArgs>(args)?.hotel_id;
        if set_booked(&self.db, TABLE, id, true).await? > 0 {
            Ok(format!("Hotel {id} successfully booked."))
        } else {
            Ok(format!("No hotel found with ID {id}."))
        }
    }
}

pub struct UpdateHotel {
    db: TravelDb,
}

impl UpdateHotel {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for UpdateHotel {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateHotel
    }

    fn description(&self) -> &str {
        "Update a hotel's check-in and check-out dates by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<UpdateHotelArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: UpdateHotelArgs = parse_args(args)?;
        let id = args.hotel_id;
        let columns = vec![
            ("checkin_date", args.checkin_date),
            ("checkout_date", args.checkout_date),
        ];
        if update_columns(&self.db, TABLE, id, columns).await? > 0 {
            Ok(format!("Hotel {id} successfully updated."))
        } else {
            Ok(format!("No hotel found with ID {id}."))
        }
    }
}

pub struct CancelHotel {
    db: TravelDb,
}

impl CancelHotel {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for CancelHotel {
    fn kind(&self) -> ActionKind {
        ActionKind::CancelHotel
    }

    fn description(&self) -> &str {
        "Cancel a hotel by its ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<HotelIdArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let id = parse_args::<HotelIdArgs>(args)?.hotel_id;
        if set_booked(&self.db, TABLE, id, false).await? > 0 {
            Ok(format!("Hotel {id} successfully cancelled."))
        } else {
            Ok(format!("No hotel found with ID {id}."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::travel::db::fixtures::seeded_db;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_by_location() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SearchHotels::new(seeded_db(dir.path()));
        let out = tool
            .invoke(json!({"location": "zurich", "price_tier": "Luxury"}), &CallerContext::default())
            .await
            .unwrap();
        let rows: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Marriott Zurich");
    }

    #[tokio::test]
    async fn test_book_update_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let caller = CallerContext::default();
        assert_eq!(
            BookHotel::new(db.clone()).invoke(json!({"hotel_id": 1}), &caller).await.unwrap(),
            "Hotel 1 successfully booked."
        );
        assert_eq!(
            UpdateHotel::new(db.clone())
                .invoke(json!({"hotel_id": 1, "checkin_date": "2024-05-01"}), &caller)
                .await
                .unwrap(),
            "Hotel 1 successfully updated."
        );
        assert_eq!(
            CancelHotel::new(db.clone()).invoke(json!({"hotel_id": 42}), &caller).await.unwrap(),
            "No hotel found with ID 42."
        );
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let err = BookHotel::new(seeded_db(dir.path()))
            .invoke(json!({"hotel": "one"}), &CallerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments(_)));
    }
}
