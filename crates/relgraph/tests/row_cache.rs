//! Identity, sharing and commit visibility of the row cache.

mod common;

use std::sync::{Arc, PoisonError};

use relgraph::{EngineConfig, Error, Query, RowCacheConfig, SessionConfig, Value};

/// Seed one team named `name` and return its id.
fn seed_team(engine: &relgraph::Engine, db: &relgraph::SqliteConnection, name: &str) -> i64 {
    let team = engine.entity("Team").unwrap();
    let mut session = engine.session(db);
    let t = session.create(team).unwrap();
    session.set(t, "name", name).unwrap();
    session.save(t).unwrap();
    session.commit().unwrap();
    session.id_of(t).unwrap().unwrap()
}

fn cached_name(engine: &relgraph::Engine, id: i64) -> Option<Value> {
    let team = engine.entity("Team").unwrap();
    let row = engine.cache().get(team, id)?;
    let guard = row.read().unwrap_or_else(PoisonError::into_inner);
    guard.get(1).cloned()
}

#[test]
fn test_repeated_loads_return_the_same_instance_and_row() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let id = seed_team(&engine, &db, "Avengers");
    engine.cache().clear();

    let mut first = engine.session(&db);
    let a = first.find(team, id).unwrap().unwrap();
    let b = first.find(team, id).unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(first.fetch(&Query::new(team)).unwrap(), vec![a]);

    let mut second = engine.session(&db);
    let c = second.find(team, id).unwrap().unwrap();
    let row_a = first.instance(a).unwrap().row_for(team).unwrap();
    let row_c = second.instance(c).unwrap().row_for(team).unwrap();
    assert!(Arc::ptr_eq(&row_a, &row_c));
}

#[test]
fn test_find_is_served_from_the_cache_without_sql() {
    let engine = common::engine();
    let db = common::database();
    let hero = engine.entity("Hero").unwrap();
    let id = {
        let mut session = engine.session(&db);
        let h = session.create(hero).unwrap();
        session.set(h, "name", "Wanda").unwrap();
        session.save(h).unwrap();
        session.commit().unwrap();
        session.id_of(h).unwrap().unwrap()
    };

    let mut session = engine.session(common::RecordingTransport::new(&db));
    let h = session.find(hero, id).unwrap().unwrap();
    assert_eq!(session.get(h, "name").unwrap(), Value::Text("Wanda".into()));
    assert!(session.transport().statements().is_empty());
    assert!(engine.cache().stats().hits >= 2);
}

#[test]
fn test_writes_copy_the_shared_row_until_commit() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let id = seed_team(&engine, &db, "Red");

    let mut writer = engine.session(&db);
    let t = writer.find(team, id).unwrap().unwrap();
    writer.set(t, "name", "Blue").unwrap();
    assert_eq!(cached_name(&engine, id), Some(Value::Text("Red".into())));

    let mut reader = engine.session(&db);
    let r = reader.find(team, id).unwrap().unwrap();
    assert_eq!(reader.get(r, "name").unwrap(), Value::Text("Red".into()));

    writer.save(t).unwrap();
    assert_eq!(cached_name(&engine, id), Some(Value::Text("Red".into())));

    writer.commit().unwrap();
    assert_eq!(cached_name(&engine, id), Some(Value::Text("Blue".into())));

    let mut late = engine.session(&db);
    let l = late.find(team, id).unwrap().unwrap();
    assert_eq!(late.get(l, "name").unwrap(), Value::Text("Blue".into()));
}

#[test]
fn test_rollback_never_reaches_the_cache() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let id = seed_team(&engine, &db, "Red");
    let cached = engine.cache().len();

    let mut session = engine.session(&db);
    let t = session.find(team, id).unwrap().unwrap();
    session.set(t, "name", "Blue").unwrap();
    session.save(t).unwrap();
    let ghost = session.create(team).unwrap();
    session.set(ghost, "name", "Ghost").unwrap();
    session.save(ghost).unwrap();
    assert_eq!(session.pending_counts().inserted, 1);
    session.rollback().unwrap();

    assert_eq!(cached_name(&engine, id), Some(Value::Text("Red".into())));
    assert_eq!(engine.cache().len(), cached);
    assert_eq!(session.pending_counts().inserted, 0);

    let mut fresh = engine.session(&db);
    let names = fresh.fetch(&Query::new(team)).unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(fresh.get(names[0], "name").unwrap(), Value::Text("Red".into()));
}

#[test]
fn test_reloading_keeps_unsaved_edits() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let id = seed_team(&engine, &db, "Red");

    let mut session = engine.session(&db);
    let t = session.find(team, id).unwrap().unwrap();
    session.set(t, "name", "Draft").unwrap();
    let again = session.fetch(&Query::new(team)).unwrap();
    assert_eq!(again, vec![t]);
    assert_eq!(session.get(t, "name").unwrap(), Value::Text("Draft".into()));
    assert!(session.is_modified(t).unwrap());
}

#[test]
fn test_zero_capacity_retains_nothing() {
    let engine = common::engine_with(
        EngineConfig::default().cache(RowCacheConfig::default().capacity_per_entity(0)),
    );
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let id = seed_team(&engine, &db, "Red");
    assert!(engine.cache().is_empty());

    let mut session = engine.session(common::RecordingTransport::new(&db));
    assert!(session.find(team, id).unwrap().is_some());
    assert_eq!(session.transport().count("SELECT"), 1);
}

#[test]
fn test_loaded_instances_can_be_locked() {
    let engine = common::engine_with(
        EngineConfig::default().session(SessionConfig::default().lock_loaded(true)),
    );
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let id = seed_team(&engine, &db, "Red");

    let mut session = engine.session(&db);
    let t = session.find(team, id).unwrap().unwrap();
    let err = session.set(t, "name", "Blue").unwrap_err();
    assert!(matches!(err, Error::Locked(e) if e.entity == "Team" && e.column == "name"));
    assert_eq!(cached_name(&engine, id), Some(Value::Text("Red".into())));
}
