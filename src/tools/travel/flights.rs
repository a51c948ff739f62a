//! 航班动作：查询航班、改签、退票，以及每轮刷新乘客机票信息

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::dialog::ActionKind;
use crate::session::Session;
use crate::tools::schema::parameters_schema;
use crate::tools::travel::db::{parse_timestamp, query_json, TravelDb};
use crate::tools::{parse_args, to_json_text, ActionError, ActionHandler, CallerContext, UserContextProvider};

const USER_FLIGHTS_SQL: &str = "
SELECT
    t.ticket_no, t.book_ref,
    f.flight_id, f.flight_no, f.departure_airport, f.arrival_airport, f.scheduled_departure, f.scheduled_arrival,
    bp.seat_no, tf.fare_conditions
FROM
    tickets t
    JOIN ticket_flights tf ON t.ticket_no = tf.ticket_no
    JOIN flights f ON tf.flight_id = f.flight_id
    JOIN boarding_passes bp ON bp.ticket_no = t.ticket_no AND bp.flight_id = f.flight_id
WHERE
    t.passenger_id = ?1";

/// 乘客的全部机票及对应航班与座位
pub async fn fetch_user_flights(db: &TravelDb, passenger_id: &str) -> Result<Vec<Map<String, Value>>, ActionError> {
    let id = passenger_id.to_string();
    db.run(move |conn| query_json(conn, USER_FLIGHTS_SQL, vec![SqlValue::Text(id)]))
        .await
}

/// 每轮开始时把乘客当前机票写入 user_context.user_info
pub struct FlightInfoProvider {
    db: TravelDb,
    default_passenger_id: Option<String>,
}

impl FlightInfoProvider {
    pub fn new(db: TravelDb, default_passenger_id: Option<String>) -> Self {
        Self {
            db,
            default_passenger_id,
        }
    }
}

#[async_trait]
impl UserContextProvider for FlightInfoProvider {
    async fn refresh(&self, session: &Session) -> Result<BTreeMap<String, Value>, ActionError> {
        let mut context = session.user_context.clone();
        let passenger_id = match context.get("passenger_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self
                .default_passenger_id
                .clone()
                .ok_or_else(|| ActionError::MissingContext("No passenger ID configured.".to_string()))?,
        };
        let flights = fetch_user_flights(&self.db, &passenger_id).await?;
        context.insert("passenger_id".to_string(), Value::String(passenger_id));
        context.insert(
            "user_info".to_string(),
            Value::Array(flights.into_iter().map(Value::Object).collect()),
        );
        Ok(context)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFlightsArgs {
    /// Departure airport code.
    pub departure_airport: Option<String>,
    /// Arrival airport code.
    pub arrival_airport: Option<String>,
    /// Earliest scheduled departure.
    pub start_time: Option<String>,
    /// Latest scheduled departure.
    pub end_time: Option<String>,
    /// Maximum number of results.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub struct SearchFlights {
    db: TravelDb,
}

impl SearchFlights {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for SearchFlights {
    fn kind(&self) -> ActionKind {
        ActionKind::SearchFlights
    }

    fn description(&self) -> &str {
        "Search for flights based on departure airport, arrival airport, and departure time range."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchFlightsArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: SearchFlightsArgs = parse_args(args)?;
        let mut sql = String::from("SELECT * FROM flights WHERE 1 = 1");
        let mut params = Vec::new();
        let filters = [
            (" AND departure_airport = ?", args.departure_airport),
            (" AND arrival_airport = ?", args.arrival_airport),
            (" AND scheduled_departure >= ?", args.start_time),
            (" AND scheduled_departure <= ?", args.end_time),
        ];
        for (clause, value) in filters {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                sql.push_str(clause);
                params.push(SqlValue::Text(v));
            }
        }
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(args.limit));
        let rows = self.db.run(move |conn| query_json(conn, &sql, params)).await?;
        to_json_text(&rows)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateTicketArgs {
    /// The ticket number.
    pub ticket_no: String,
    /// The new flight id.
    pub new_flight_id: i64,
}

pub struct UpdateTicketToNewFlight {
    db: TravelDb,
}

impl UpdateTicketToNewFlight {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

/// 改签须距起飞至少 3 小时
const MIN_RESCHEDULE_SECS: i64 = 3 * 3600;

#[async_trait]
impl ActionHandler for UpdateTicketToNewFlight {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateTicketToNewFlight
    }

    fn description(&self) -> &str {
        "Update the user's ticket to a new valid flight."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<UpdateTicketArgs>()
    }

    async fn invoke(&self, args: Value, caller: &CallerContext) -> Result<String, ActionError> {
        let passenger_id = caller.require_str("passenger_id")?.to_string();
        let args: UpdateTicketArgs = parse_args(args)?;

        let new_flight_id = args.new_flight_id;
        let departure: Option<String> = self
            .db
            .run(move |conn| {
                conn.query_row(
                    "SELECT scheduled_departure FROM flights WHERE flight_id = ?1",
                    [new_flight_id],
                    |r| r.get(0),
                )
                .optional()
            })
            .await?;
        let Some(departure) = departure else {
            return Ok("Invalid new flight ID provided.".to_string());
        };
        let departure_time = parse_timestamp(&departure)
            .ok_or_else(|| ActionError::Failed(format!("unparseable departure time {departure}")))?;
        let time_until = departure_time.with_timezone(&Utc) - Utc::now();
        if time_until.num_seconds() < MIN_RESCHEDULE_SECS {
            return Ok(format!(
                "Not permitted to reschedule to a flight that is less than 3 hours from the current time. Selected flight is at {departure_time}."
            ));
        }

        let ticket_no = args.ticket_no;
        self.db
            .run(move |conn| {
                let current: Option<i64> = conn
                    .query_row(
                        "SELECT flight_id FROM ticket_flights WHERE ticket_no = ?1",
                        [&ticket_no],
                        |r| r.get(0),
                    )
                    .optional()?;
                if current.is_none() {
                    return Ok("No existing ticket found for the given ticket number.".to_string());
                }
                let owned = conn
                    .query_row(
                        "SELECT 1 FROM tickets WHERE ticket_no = ?1 AND passenger_id = ?2",
                        [&ticket_no, &passenger_id],
                        |_| Ok(()),
                    )
                    .optional()?;
                if owned.is_none() {
                    return Ok(format!(
                        "Current signed-in passenger with ID {passenger_id} not the owner of ticket {ticket_no}"
                    ));
                }
                conn.execute(
                    "UPDATE ticket_flights SET flight_id = ?1 WHERE ticket_no = ?2",
                    rusqlite::params![new_flight_id, ticket_no],
                )?;
                Ok("Ticket successfully updated to new flight.".to_string())
            })
            .await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CancelTicketArgs {
    /// The ticket number.
    pub ticket_no: String,
}

pub struct CancelTicket {
    db: TravelDb,
}

impl CancelTicket {
    pub fn new(db: TravelDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActionHandler for CancelTicket {
    fn kind(&self) -> ActionKind {
        ActionKind::CancelTicket
    }

    fn description(&self) -> &str {
        "Cancel the user's ticket and remove it from the database."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<CancelTicketArgs>()
    }

    async fn invoke(&self, args: Value, caller: &CallerContext) -> Result<String, ActionError> {
        let passenger_id = caller.require_str("passenger_id")?.to_string();
        let ticket_no = parse_args::<CancelTicketArgs>(args)?.ticket_no;
        self.db
            .run(move |conn| {
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT flight_id FROM ticket_flights WHERE ticket_no = ?1",
                        [&ticket_no],
                        |r| r.get(0),
                    )
                    .optional()?;
                if existing.is_none() {
                    return Ok("No existing ticket found for the given ticket number.".to_string());
                }
                let owned = conn
                    .query_row(
                        "SELECT 1 FROM tickets WHERE ticket_no = ?1 AND passenger_id = ?2",
                        [&ticket_no, &passenger_id],
                        |_| Ok(()),
                    )
                    .optional()?;
                if owned.is_none() {
                    return Ok(format!(
                        "Current signed-in passenger with ID {passenger_id} not the owner of ticket {ticket_no}"
                    ));
                }
                conn.execute("DELETE FROM ticket_flights WHERE ticket_no = ?1", [&ticket_no])?;
                Ok("Ticket successfully cancelled.".to_string())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::travel::db::fixtures::{seeded_db, PASSENGER, TICKET};
    use serde_json::json;

    fn caller() -> CallerContext {
        let mut values = BTreeMap::new();
        values.insert("passenger_id".to_string(), Value::String(PASSENGER.into()));
        CallerContext::new("s1", values)
    }

    #[tokio::test]
    async fn test_fetch_user_flights() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let flights = fetch_user_flights(&db, PASSENGER).await.unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0]["seat_no"], "18E");
    }

    #[tokio::test]
    async fn test_search_flights_filters_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SearchFlights::new(seeded_db(dir.path()));
        let out = tool
            .invoke(json!({"departure_airport": "CDG", "limit": 2}), &caller())
            .await
            .unwrap();
        let rows: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(rows.len(), 2);
        let none = tool.invoke(json!({"arrival_airport": "JFK"}), &caller()).await.unwrap();
        assert_eq!(none, "[]");
    }

    #[tokio::test]
    async fn test_update_ticket_rules() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let tool = UpdateTicketToNewFlight::new(db.clone());

        let out = tool.invoke(json!({"ticket_no": TICKET, "new_flight_id": 99}), &caller()).await.unwrap();
        assert_eq!(out, "Invalid new flight ID provided.");

        let out = tool.invoke(json!({"ticket_no": TICKET, "new_flight_id": 2}), &caller()).await.unwrap();
        assert!(out.starts_with("Not permitted to reschedule"));

        let out = tool
            .invoke(json!({"ticket_no": "9880005432000987", "new_flight_id": 3}), &caller())
            .await
            .unwrap();
        assert!(out.contains("not the owner of ticket"));

        let out = tool.invoke(json!({"ticket_no": TICKET, "new_flight_id": 3}), &caller()).await.unwrap();
        assert_eq!(out, "Ticket successfully updated to new flight.");
    }

    #[tokio::test]
    async fn test_update_ticket_requires_passenger() {
        let dir = tempfile::tempdir().unwrap();
        let tool = UpdateTicketToNewFlight::new(seeded_db(dir.path()));
        let err = tool
            .invoke(json!({"ticket_no": TICKET, "new_flight_id": 3}), &CallerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingContext(_)));
    }

    #[tokio::test]
    async fn test_cancel_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let tool = CancelTicket::new(db.clone());
        let out = tool.invoke(json!({"ticket_no": TICKET}), &caller()).await.unwrap();
        assert_eq!(out, "Ticket successfully cancelled.");
        let out = tool.invoke(json!({"ticket_no": TICKET}), &caller()).await.unwrap();
        assert_eq!(out, "No existing ticket found for the given ticket number.");
    }

    #[tokio::test]
    async fn test_flight_info_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FlightInfoProvider::new(seeded_db(dir.path()), Some(PASSENGER.to_string()));
        let ctx = provider.refresh(&Session::new("s1")).await.unwrap();
        assert_eq!(ctx["passenger_id"], PASSENGER);
        assert_eq!(ctx["user_info"].as_array().unwrap().len(), 1);

        let anonymous = FlightInfoProvider::new(TravelDb::new(dir.path().join("travel.sqlite")), None);
        assert!(anonymous.refresh(&Session::new("s2")).await.is_err());
    }
}
