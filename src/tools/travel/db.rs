//! 旅行数据库：显式持有数据库路径，交给每个动作处理器
//!
//! 每次调用在 spawn_blocking 中打开一条连接，查询结果按列名转为 JSON 对象。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};

use crate::tools::ActionError;

/// 数据库表结构（与公开的 travel2.sqlite 一致）
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS flights(
    flight_id INTEGER PRIMARY KEY,
    flight_no TEXT,
    scheduled_departure TEXT,
    scheduled_arrival TEXT,
    departure_airport TEXT,
    arrival_airport TEXT,
    status TEXT,
    aircraft_code TEXT,
    actual_departure TEXT,
    actual_arrival TEXT
);
CREATE TABLE IF NOT EXISTS bookings(
    book_ref TEXT PRIMARY KEY,
    book_date TEXT,
    total_amount REAL
);
CREATE TABLE IF NOT EXISTS tickets(
    ticket_no TEXT PRIMARY KEY,
    book_ref TEXT,
    passenger_id TEXT
);
CREATE TABLE IF NOT EXISTS ticket_flights(
    ticket_no TEXT,
    flight_id INTEGER,
    fare_conditions TEXT,
    amount REAL
);
CREATE TABLE IF NOT EXISTS boarding_passes(
    ticket_no TEXT,
    flight_id INTEGER,
    boarding_no INTEGER,
    seat_no TEXT
);
CREATE TABLE IF NOT EXISTS hotels(
    id INTEGER PRIMARY KEY,
    name TEXT,
    location TEXT,
    price_tier TEXT,
    checkin_date TEXT,
    checkout_date TEXT,
    booked INTEGER DEFAULT 0
);
CREATE TABLE IF NOT EXISTS car_rentals(
    id INTEGER PRIMARY KEY,
    name TEXT,
    location TEXT,
    price_tier TEXT,
    start_date TEXT,
    end_date TEXT,
    booked INTEGER DEFAULT 0
);
CREATE TABLE IF NOT EXISTS trip_recommendations(
    id INTEGER PRIMARY KEY,
    name TEXT,
    location TEXT,
    keywords TEXT,
    details TEXT,
    booked INTEGER DEFAULT 0
);
";

/// 数据中缺失时间戳的写法
const NULL_MARKER: &str = "\\N";

const FLIGHT_TIME_COLUMNS: [&str; 4] = [
    "scheduled_departure",
    "scheduled_arrival",
    "actual_departure",
    "actual_arrival",
];

#[derive(Debug, Clone)]
pub struct TravelDb {
    path: PathBuf,
}

impl TravelDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 在 spawn_blocking 中打开连接并执行 f
    pub async fn run<T, F>(&self, f: F) -> Result<T, ActionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| ActionError::Failed(e.to_string()))?
        .map_err(|e| ActionError::Failed(e.to_string()))
    }

    /// 建表（空库或测试库）
    pub fn create_schema(&self) -> rusqlite::Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)
    }

    /// 从备份恢复，并平移时间戳使最晚的实际起飞时间落在当前时刻
    pub fn refresh_dates(&self, backup: &Path) -> Result<(), ActionError> {
        std::fs::copy(backup, &self.path).map_err(|e| ActionError::Failed(e.to_string()))?;
        let mut conn = Connection::open(&self.path).map_err(|e| ActionError::Failed(e.to_string()))?;
        let shifted = shift_to_now(&mut conn, Utc::now()).map_err(|e| ActionError::Failed(e.to_string()))?;
        tracing::info!(db = %self.path.display(), rows = shifted, "travel db dates refreshed");
        Ok(())
    }
}

/// 按列名把查询结果转为 JSON 对象
pub fn query_json(
    conn: &Connection,
    sql: &str,
    params: Vec<SqlValue>,
) -> rusqlite::Result<Vec<Map<String, Value>>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt.query_map(params_from_iter(params), |row| {
        let mut obj = Map::new();
        for (i, name) in columns.iter().enumerate() {
            obj.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        Ok(obj)
    })?;
    rows.collect()
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

/// 解析库中的时间戳（如 `2024-04-30 09:50:00.000000-04:00`）
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
}

pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
}

fn shift_column(
    tx: &rusqlite::Transaction<'_>,
    table: &str,
    key: &str,
    column: &str,
    diff: Duration,
) -> rusqlite::Result<usize> {
    let rows: Vec<(SqlValue, Option<String>)> = {
        let mut stmt = tx.prepare(&format!("SELECT {key}, {column} FROM {table}"))?;
        let mapped = stmt.query_map([], |r| Ok((r.get::<_, SqlValue>(0)?, r.get::<_, Option<String>>(1)?)))?;
        mapped.collect::<rusqlite::Result<_>>()?
    };
    let mut updated = 0;
    for (id, raw) in rows {
        let Some(ts) = raw.as_deref().filter(|s| *s != NULL_MARKER).and_then(parse_timestamp) else {
            continue;
        };
        let shifted = format_timestamp(&(ts + diff));
        updated += tx.execute(
            &format!("UPDATE {table} SET {column} = ?1 WHERE {key} = ?2"),
            rusqlite::params![shifted, id],
        )?;
    }
    Ok(updated)
}

/// 平移 flights / bookings 中的时间戳；返回更新的行数
pub fn shift_to_now(conn: &mut Connection, now: DateTime<Utc>) -> rusqlite::Result<usize> {
    let latest: Option<DateTime<FixedOffset>> = {
        let mut stmt = conn.prepare("SELECT actual_departure FROM flights")?;
        let values = stmt.query_map([], |r| r.get::<_, Option<String>>(0))?;
        let mut latest = None;
        for v in values {
            if let Some(ts) = v?.as_deref().filter(|s| *s != NULL_MARKER).and_then(parse_timestamp) {
                if latest.map_or(true, |l| ts > l) {
                    latest = Some(ts);
                }
            }
        }
        latest
    };
    let Some(latest) = latest else {
        return Ok(0);
    };
    let diff = now.signed_duration_since(latest.with_timezone(&Utc));

    let tx = conn.transaction()?;
    let mut total = shift_column(&tx, "bookings", "book_ref", "book_date", diff)?;
    for column in FLIGHT_TIME_COLUMNS {
        total += shift_column(&tx, "flights", "flight_id", column, diff)?;
    }
    tx.commit()?;
    Ok(total)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const PASSENGER: &str = "3442 587242";
    pub const TICKET: &str = "7240005432906569";

    /// 建一个带少量种子数据的临时库；flight 2 在 1 小时后起飞，flight 3 在 2 天后
    pub fn seeded_db(dir: &Path) -> TravelDb {
        let db = TravelDb::new(dir.join("travel.sqlite"));
        db.create_schema().unwrap();
        let conn = Connection::open(db.path()).unwrap();
        let now = Utc::now().fixed_offset();
        let soon = format_timestamp(&(now + Duration::hours(1)));
        let later = format_timestamp(&(now + Duration::days(2)));
        let past = format_timestamp(&(now - Duration::days(1)));
        conn.execute(
            "INSERT INTO flights VALUES (1, 'LX0112', ?1, ?1, 'CDG', 'BSL', 'Arrived', 'SU9', ?1, ?1)",
            [&past],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO flights VALUES (2, 'LX0113', ?1, ?1, 'CDG', 'BSL', 'Scheduled', 'SU9', '\\N', '\\N')",
            [&soon],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO flights VALUES (3, 'LX0114', ?1, ?1, 'CDG', 'BSL', 'Scheduled', 'SU9', '\\N', '\\N')",
            [&later],
        )
        .unwrap();
        conn.execute_batch(&format!(
            "INSERT INTO tickets VALUES ('{TICKET}', 'C46E9F', '{PASSENGER}');
             INSERT INTO tickets VALUES ('9880005432000987', 'C46E9F', '8149 604011');
             INSERT INTO ticket_flights VALUES ('{TICKET}', 1, 'Economy', 11500.0);
             INSERT INTO ticket_flights VALUES ('9880005432000987', 1, 'Business', 42100.0);
             INSERT INTO boarding_passes VALUES ('{TICKET}', 1, 3, '18E');
             INSERT INTO bookings VALUES ('C46E9F', '{past}', 53600.0);
             INSERT INTO hotels VALUES (1, 'Hilton Basel', 'Basel', 'Luxury', '2024-04-22', '2024-04-20', 0);
             INSERT INTO hotels VALUES (2, 'Marriott Zurich', 'Zurich', 'Upscale', '2024-04-14', '2024-04-21', 0);
             INSERT INTO car_rentals VALUES (1, 'Europcar', 'Basel', 'Economy', '2024-04-14', '2024-04-11', 0);
             INSERT INTO car_rentals VALUES (2, 'Avis', 'Basel', 'Luxury', '2024-04-10', '2024-04-20', 0);
             INSERT INTO trip_recommendations VALUES (1, 'Basel Minster', 'Basel', 'landmark, history', 'Visit the historic Basel Minster.', 0);
             INSERT INTO trip_recommendations VALUES (2, 'Kunstmuseum Basel', 'Basel', 'art, museum', 'Explore the collection.', 0);
             INSERT INTO trip_recommendations VALUES (3, 'Zurich Lake Cruise', 'Zurich', 'boat, scenic', 'Cruise on the lake.', 0);"
        ))
        .unwrap();
        db
    }
}
