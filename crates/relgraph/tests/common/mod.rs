//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::sync::{Mutex, PoisonError};

use relgraph::{
    Column, ColumnType, Engine, EngineConfig, EntityDescriptor, ModelRegistry, Result, Row,
    Session, SqliteConnection, Transport, Value,
};

/// Person <- Hero inheritance, Hero -> Team reference, Team -> Hero children,
/// Hero <-> Power association, Hero -> Mission children, a Profile
/// implementation table, and a sequenced Ticket.
pub fn registry() -> ModelRegistry {
    ModelRegistry::builder()
        .entity(
            EntityDescriptor::new("Person", "person")
                .column(Column::primary("id"))
                .column(Column::new("name", ColumnType::Text)),
        )
        .entity(
            EntityDescriptor::new("Team", "team")
                .column(Column::primary("id"))
                .column(Column::new("name", ColumnType::Text).unique())
                .column(Column::reference("rival_id", "Team"))
                .reference("rival", "rival_id")
                .children("members", "Hero", "team_id"),
        )
        .entity(
            EntityDescriptor::new("Hero", "hero")
                .column(Column::primary("id"))
                .column(Column::new("alias", ColumnType::Text).unique())
                .column(Column::new("age", ColumnType::Integer).nullable())
                .column(Column::reference("team_id", "Team"))
                .column(Column::reference("profile_id", "Profile"))
                .parent("Person")
                .reference("team", "team_id")
                .association("powers", "Power", "hero_power", "hero_id", "power_id")
                .children("missions", "Mission", "hero_id")
                .implementation("Profile", "profile_id"),
        )
        .entity(
            EntityDescriptor::new("Power", "power")
                .column(Column::primary("id"))
                .column(Column::new("name", ColumnType::Text).unique()),
        )
        .entity(
            EntityDescriptor::new("Mission", "mission")
                .column(Column::primary("id"))
                .column(Column::new("title", ColumnType::Text))
                .column(Column::reference("hero_id", "Hero"))
                .reference("hero", "hero_id"),
        )
        .entity(
            EntityDescriptor::new("Profile", "profile")
                .column(Column::primary("id"))
                .column(Column::new("bio", ColumnType::Text))
                .column(Column::new("extra", ColumnType::Object).nullable()),
        )
        .entity(
            EntityDescriptor::new("Ticket", "ticket")
                .column(Column::primary("id"))
                .column(Column::new("number", ColumnType::BigInt).nullable())
                .column(Column::new("subject", ColumnType::Text))
                .sequenced("number"),
        )
        .build()
        .expect("fixture registry is consistent")
}

/// Test-only DDL for the fixture schema.
pub const SCHEMA: &str = "
    CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE team (id INTEGER PRIMARY KEY, name TEXT UNIQUE, rival_id INTEGER);
    CREATE TABLE hero (
        id INTEGER PRIMARY KEY,
        alias TEXT UNIQUE,
        age INTEGER,
        team_id INTEGER,
        profile_id INTEGER
    );
    CREATE TABLE power (id INTEGER PRIMARY KEY, name TEXT UNIQUE);
    CREATE TABLE hero_power (hero_id INTEGER NOT NULL, power_id INTEGER NOT NULL);
    CREATE TABLE mission (id INTEGER PRIMARY KEY, title TEXT, hero_id INTEGER);
    CREATE TABLE profile (id INTEGER PRIMARY KEY, bio TEXT, extra BLOB);
    CREATE TABLE ticket (id INTEGER PRIMARY KEY, number INTEGER, subject TEXT);
";

/// In-memory SQLite with the fixture schema.
pub fn database() -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open in-memory database");
    conn.execute_raw(SCHEMA).expect("create fixture schema");
    conn
}

pub fn engine() -> Engine {
    Engine::new(registry())
}

pub fn engine_with(config: EngineConfig) -> Engine {
    Engine::with_config(registry(), config)
}

/// A transport that records every statement before delegating.
#[derive(Debug)]
pub struct RecordingTransport<T> {
    inner: T,
    log: Mutex<Vec<String>>,
}

impl<T: Transport> RecordingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn record(&self, sql: &str) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded statements starting with `prefix` (e.g. "SELECT").
    pub fn count(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<T: Transport> Transport for RecordingTransport<T> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql);
        self.inner.execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.record(sql);
        self.inner.insert(sql, params)
    }

    fn begin(&self) -> Result<()> {
        self.record("BEGIN");
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.record("COMMIT");
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.record("ROLLBACK");
        self.inner.rollback()
    }
}

/// A session over a recording in-memory database.
pub fn recording_session(engine: &Engine) -> Session<RecordingTransport<SqliteConnection>> {
    engine.session(RecordingTransport::new(database()))
}
