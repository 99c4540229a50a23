//! Session lifecycle: interceptors, transaction events, locking, misuse and
//! tree export.

mod common;

use std::sync::{Arc, Mutex, PoisonError};

use relgraph::{EngineConfig, Error, InstanceEvent, SessionConfig, SessionErrorKind, Value};

fn session_kind(err: Error) -> SessionErrorKind {
    match err {
        Error::Session(e) => e.kind,
        other => panic!("expected a session error, got {other:?}"),
    }
}

#[test]
fn test_interceptors_run_after_commit_with_the_cache_current() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let mut session = engine.session(&db);

    let seen: Arc<Mutex<Vec<(InstanceEvent, Option<Value>)>>> = Arc::default();
    let cache = Arc::clone(engine.cache());
    let sink = Arc::clone(&seen);
    session.on_updated(move |event| {
        let name = cache.get(event.entity, event.id).and_then(|row| {
            row.read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(1)
                .cloned()
        });
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.clone(), name));
    });
    let deleted: Arc<Mutex<Vec<i64>>> = Arc::default();
    let sink = Arc::clone(&deleted);
    session.on_deleted(move |event| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.id);
    });

    let t = session.create(team).unwrap();
    session.set(t, "name", "Red").unwrap();
    session.save(t).unwrap();
    assert!(seen.lock().unwrap().is_empty());

    session.commit().unwrap();
    let id = session.id_of(t).unwrap().unwrap();
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.instance, t);
        assert_eq!(seen[0].0.entity, team);
        assert_eq!(seen[0].0.id, id);
        assert_eq!(seen[0].1, Some(Value::Text("Red".into())));
    }

    session.delete(t).unwrap();
    assert!(deleted.lock().unwrap().is_empty());
    session.commit().unwrap();
    assert_eq!(*deleted.lock().unwrap(), vec![id]);
    assert!(!engine.cache().contains(team, id));
}

#[test]
fn test_without_auto_begin_each_save_publishes_immediately() {
    let engine = common::engine_with(
        EngineConfig::default().session(SessionConfig::default().auto_begin(false)),
    );
    let team = engine.entity("Team").unwrap();
    let mut session = common::recording_session(&engine);

    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    session.on_updated(move |_| {
        *sink.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    });

    let t = session.create(team).unwrap();
    session.set(t, "name", "Red").unwrap();
    session.save(t).unwrap();
    assert!(!session.in_transaction());
    assert_eq!(*count.lock().unwrap(), 1);
    let id = session.id_of(t).unwrap().unwrap();
    assert!(engine.cache().contains(team, id));
    assert_eq!(session.transport().count("BEGIN"), 0);

    let err = session.commit().unwrap_err();
    assert_eq!(session_kind(err), SessionErrorKind::NoTransaction);
    let err = session.rollback().unwrap_err();
    assert_eq!(session_kind(err), SessionErrorKind::NoTransaction);
}

#[test]
fn test_before_commit_can_veto() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let mut session = engine.session(&db);

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let sink = Arc::clone(&events);
    session.on_before_commit(move || {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push("before");
        Err(Error::Custom("not today".into()))
    });
    let sink = Arc::clone(&events);
    session.on_after_commit(move || {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push("after");
        Ok(())
    });
    let sink = Arc::clone(&events);
    session.on_after_rollback(move || {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push("rollback");
        Ok(())
    });

    let t = session.create(team).unwrap();
    session.set(t, "name", "Red").unwrap();
    session.save(t).unwrap();

    assert!(matches!(session.commit(), Err(Error::Custom(_))));
    assert!(session.in_transaction());
    session.rollback().unwrap();
    assert!(!session.in_transaction());
    assert_eq!(*events.lock().unwrap(), vec!["before", "rollback"]);
    assert!(engine.cache().is_empty());
}

#[test]
fn test_tree_export_follows_materialized_relations() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let hero = engine.entity("Hero").unwrap();
    let mut session = engine.session(&db);

    let t = session.create(team).unwrap();
    session.set(t, "name", "Red").unwrap();
    let h = session.create(hero).unwrap();
    session.set(h, "alias", "Scarlet").unwrap();
    session.set(h, "name", "Wanda").unwrap();
    session.add_related(t, "members", h).unwrap();
    session.save(t).unwrap();
    session.commit().unwrap();

    let tree = session.to_tree(t).unwrap();
    assert_eq!(tree.entity, "Team");
    let json = serde_json::to_value(&tree).unwrap();
    assert_eq!(json["type"], "Team");
    assert_eq!(json["fields"]["name"], "Red");
    let members = json["collections"]["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["type"], "Hero");
    assert_eq!(members[0]["fields"]["alias"], "Scarlet");
    assert_eq!(members[0]["fields"]["name"], "Wanda");
    assert_eq!(members[0]["fields"]["team_id"], json["id"]);
}

#[test]
fn test_tree_export_stops_at_the_depth_limit() {
    let engine = common::engine_with(
        EngineConfig::default().session(SessionConfig::default().max_tree_depth(0)),
    );
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let mut session = engine.session(&db);

    let red = session.create(team).unwrap();
    session.set(red, "name", "Red").unwrap();
    session.set_reference(red, "rival", Some(red)).unwrap();

    let tree = session.to_tree(red).unwrap();
    assert!(tree.truncated);
    assert!(tree.references.is_empty());
}

#[test]
fn test_locked_instances_reject_edits_but_take_stamps() {
    let engine = common::engine();
    let db = common::database();
    let team = engine.entity("Team").unwrap();
    let hero = engine.entity("Hero").unwrap();
    let mut session = engine.session(&db);

    let h = session.create(hero).unwrap();
    session.set(h, "alias", "Vision").unwrap();
    session.save(h).unwrap();
    session.lock(h).unwrap();

    match session.set(h, "alias", "Viv").unwrap_err() {
        Error::Locked(e) => {
            assert_eq!(e.entity, "Hero");
            assert_eq!(e.column, "alias");
        }
        other => panic!("expected a locked error, got {other:?}"),
    }
    let t = session.create(team).unwrap();
    assert!(matches!(
        session.set_reference(h, "team", Some(t)),
        Err(Error::Locked(_))
    ));

    session.set(t, "name", "Avengers").unwrap();
    session.add_related(t, "members", h).unwrap();
    session.save(t).unwrap();
    session.commit().unwrap();

    let team_id = session.id_of(t).unwrap().unwrap();
    assert_eq!(session.get(h, "team_id").unwrap().as_i64(), Some(team_id));
    assert_eq!(session.get(h, "alias").unwrap(), Value::Text("Vision".into()));
}

#[test]
fn test_misuse_is_reported_without_side_effects() {
    let engine = common::engine();
    let team = engine.entity("Team").unwrap();
    let hero = engine.entity("Hero").unwrap();
    let power = engine.entity("Power").unwrap();
    let mut session = common::recording_session(&engine);

    let t = session.create(team).unwrap();
    let h = session.create(hero).unwrap();
    let p = session.create(power).unwrap();

    assert!(matches!(session.set(t, "id", 7), Err(Error::Custom(_))));
    assert!(matches!(session.set(h, "age", "old"), Err(Error::Type(_))));
    assert!(matches!(session.set(t, "nope", 1), Err(Error::Build(_))));

    let err = session.set_reference(t, "members", Some(h)).unwrap_err();
    assert_eq!(session_kind(err), SessionErrorKind::RelationKind);
    let err = session.add_related(h, "team", t).unwrap_err();
    assert_eq!(session_kind(err), SessionErrorKind::RelationKind);
    let err = session.add_related(t, "members", p).unwrap_err();
    assert_eq!(session_kind(err), SessionErrorKind::RelationKind);
    let err = session.reference(t, "members").unwrap_err();
    assert_eq!(session_kind(err), SessionErrorKind::RelationKind);

    assert!(session.transport().statements().is_empty());
    assert_eq!(session.get(t, "name").unwrap(), Value::Null);
}

#[test]
fn test_unknown_entity_names_are_rejected() {
    let engine = common::engine();
    match engine.entity("Villain").unwrap_err() {
        Error::Build(e) => assert_eq!(e.kind, relgraph::BuildErrorKind::UnknownEntity),
        other => panic!("expected a build error, got {other:?}"),
    }
}
