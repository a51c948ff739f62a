//! 旅行动作：航班、酒店、租车、行程推荐、政策查询
//!
//! 所有处理器显式持有 TravelDb（或 PolicyLookup），不依赖进程级全局状态。

pub mod car_rentals;
pub mod db;
pub mod excursions;
pub mod flights;
pub mod hotels;
pub mod policy;

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use crate::tools::{ActionError, ActionRegistry};

pub use car_rentals::{BookCarRental, CancelCarRental, SearchCarRentals, UpdateCarRental};
pub use db::TravelDb;
pub use excursions::{BookExcursion, CancelExcursion, SearchTripRecommendations, UpdateExcursion};
pub use flights::{fetch_user_flights, CancelTicket, FlightInfoProvider, SearchFlights, UpdateTicketToNewFlight};
pub use hotels::{BookHotel, CancelHotel, SearchHotels, UpdateHotel};
pub use policy::{LookupPolicy, PolicyLookup};

/// 注册全部数据库动作；政策查询另行注册
pub fn register_all(registry: &mut ActionRegistry, db: &TravelDb) {
    registry.register(SearchFlights::new(db.clone()));
    registry.register(UpdateTicketToNewFlight::new(db.clone()));
    registry.register(CancelTicket::new(db.clone()));
    registry.register(SearchHotels::new(db.clone()));
    registry.register(BookHotel::new(db.clone()));
    registry.register(UpdateHotel::new(db.clone()));
    registry.register(CancelHotel::new(db.clone()));
    registry.register(SearchCarRentals::new(db.clone()));
    registry.register(BookCarRental::new(db.clone()));
    registry.register(UpdateCarRental::new(db.clone()));
    registry.register(CancelCarRental::new(db.clone()));
    registry.register(SearchTripRecommendations::new(db.clone()));
    registry.register(BookExcursion::new(db.clone()));
    registry.register(UpdateExcursion::new(db.clone()));
    registry.register(CancelExcursion::new(db.clone()));
}

/// 按 location / name 模糊匹配，keywords 为逗号分隔、任一命中即可
pub(crate) async fn search_listing(
    db: &TravelDb,
    table: &'static str,
    location: Option<String>,
    name: Option<String>,
    keywords: Option<String>,
) -> Result<Vec<Map<String, Value>>, ActionError> {
    let mut sql = format!("SELECT * FROM {table} WHERE 1=1");
    let mut params = Vec::new();
    for (column, value) in [("location", location), ("name", name)] {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            sql.push_str(&format!(" AND {column} LIKE ?"));
            params.push(SqlValue::Text(format!("%{v}%")));
        }
    }
    if let Some(keywords) = keywords.filter(|k| !k.is_empty()) {
        let words: Vec<&str> = keywords.split(',').map(str::trim).collect();
        let clause = vec!["keywords LIKE ?"; words.len()].join(" OR ");
        sql.push_str(&format!(" AND ({clause})"));
        params.extend(words.into_iter().map(|w| SqlValue::Text(format!("%{w}%"))));
    }
    db.run(move |conn| db::query_json(conn, &sql, params)).await
}

/// 设置 booked 标记，返回受影响行数
pub(crate) async fn set_booked(
    db: &TravelDb,
    table: &'static str,
    id: i64,
    booked: bool,
) -> Result<usize, ActionError> {
    db.run(move |conn| {
        conn.execute(
            &format!("UPDATE {table} SET booked = ?1 WHERE id = ?2"),
            rusqlite::params![booked as i64, id],
        )
    })
    .await
}

/// 依次更新给定的列（值为 None 的跳过），返回最后一条语句的受影响行数
pub(crate) async fn update_columns(
    db: &TravelDb,
    table: &'static str,
    id: i64,
    columns: Vec<(&'static str, Option<String>)>,
) -> Result<usize, ActionError> {
    db.run(move |conn| {
        let mut affected = 0;
        for (column, value) in columns {
            if let Some(v) = value {
                affected = conn.execute(
                    &format!("UPDATE {table} SET {column} = ?1 WHERE id = ?2"),
                    rusqlite::params![v, id],
                )?;
            }
        }
        Ok(affected)
    })
    .await
}
