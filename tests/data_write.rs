mod support;

use relcore::catalog::types::Value;
use relcore::commit::{DataSet, DataSets};
use relcore::config::EngineConfig;
use relcore::error::EngineErrorCode;
use relcore::query::{QueryExpression, QueryFilter, QueryFilterSide, QueryRequest};
use relcore::store::ExecContext;
use serde_json::json;
use std::collections::BTreeMap;
use support::{ADMIN, DEFAULT_SETTING_RECORD, Fixture, READER, RESTRICTED, RecordingTx};
use uuid::Uuid;

fn sets(items: Vec<DataSet>) -> DataSets {
    items
        .into_iter()
        .enumerate()
        .map(|(i, set)| (i as i32, set))
        .collect()
}

fn returning(id: i64) -> Vec<Vec<Value>> {
    vec![vec![Value::Integer(id)]]
}

#[test]
fn new_record_is_inserted_and_returns_its_id() {
    let f = Fixture::new();
    let engine = f.engine();
    let mut tx = RecordingTx::new().answer(returning(11));
    let data = sets(vec![
        DataSet::new(f.person)
            .set(f.person_name, json!("Ada"))
            .set(f.person_age, json!(36)),
    ]);
    let ids = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");

    assert_eq!(ids, BTreeMap::from([(0, 11)]));
    assert_eq!(
        tx.sql(),
        vec!["INSERT INTO \"app\".\"person\" (\"name\", \"age\") VALUES ($1, $2) RETURNING \"id\""]
    );
    assert_eq!(
        tx.statements[0].args,
        vec![Value::Text("Ada".into()), Value::Integer(36)]
    );
}

#[test]
fn referenced_records_are_written_first() {
    let f = Fixture::new();
    let engine = f.engine();
    // index 1 is the team index 0 points at through person.team
    let data = sets(vec![
        DataSet::new(f.person).set(f.person_name, json!("Ada")),
        DataSet::new(f.team)
            .set(f.team_name, json!("core"))
            .linked(0, f.person_team),
    ]);
    let mut tx = RecordingTx::new().answer(returning(5)).answer(returning(9));
    let ids = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");

    assert_eq!(ids, BTreeMap::from([(0, 9), (1, 5)]));
    assert!(tx.sql()[0].starts_with("INSERT INTO \"app\".\"team\""));
    assert_eq!(
        tx.sql()[1],
        "INSERT INTO \"app\".\"person\" (\"name\", \"team\") VALUES ($1, $2) RETURNING \"id\""
    );
    assert_eq!(
        tx.statements[1].args,
        vec![Value::Text("Ada".into()), Value::Integer(5)]
    );
}

#[test]
fn backward_links_store_the_key_on_the_later_index() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::new(f.team).set(f.team_name, json!("core")),
        DataSet::new(f.person)
            .set(f.person_name, json!("Ada"))
            .linked(0, f.person_team),
    ]);
    let mut tx = RecordingTx::new().answer(returning(5)).answer(returning(9));
    let ids = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");
    assert_eq!(ids, BTreeMap::from([(0, 5), (1, 9)]));
    assert_eq!(tx.statements[1].args[1], Value::Integer(5));
}

#[test]
fn self_references_link_forward_from_the_referencing_index() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::new(f.person).set(f.person_name, json!("Ada")),
        DataSet::new(f.person)
            .set(f.person_name, json!("Grace"))
            .linked(0, f.person_supervisor),
    ]);
    let mut tx = RecordingTx::new().answer(returning(2)).answer(returning(3));
    let ids = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");
    // the supervisor (index 1) exists before Ada points at it
    assert_eq!(ids, BTreeMap::from([(0, 3), (1, 2)]));
    assert_eq!(
        tx.statements[1].args,
        vec![Value::Text("Ada".into()), Value::Integer(2)]
    );
}

#[test]
fn link_cycles_and_dangling_links_are_rejected_before_writing() {
    let f = Fixture::new();
    let engine = f.engine();
    let cycle = sets(vec![
        DataSet::new(f.person).linked(1, f.person_supervisor),
        DataSet::new(f.person).linked(0, f.person_supervisor),
    ]);
    let mut tx = RecordingTx::new();
    let err = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &cycle)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Validation);
    assert!(tx.statements.is_empty());

    let dangling = sets(vec![DataSet::new(f.person).linked(4, f.person_supervisor)]);
    let err = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &dangling)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Validation);

    // team.name is no relationship between these two
    let not_a_link = sets(vec![
        DataSet::new(f.person),
        DataSet::new(f.team).linked(0, f.team_name),
    ]);
    let err = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &not_a_link)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Validation);
    assert!(tx.statements.is_empty());
}

#[test]
fn invalid_values_are_rejected() {
    let f = Fixture::new();
    let engine = f.engine();
    let cases = [
        DataSet::new(f.person).set(f.person_id, json!(4)),
        DataSet::new(f.person).set(f.person_age, json!("old")),
        DataSet::new(f.person).set(f.team_name, json!("core")),
        DataSet::existing(f.person, -3).set(f.person_name, json!("Ada")),
        DataSet::new(f.person).set(f.person_photos, json!({"added": "nope"})),
    ];
    for case in cases {
        let mut tx = RecordingTx::new();
        let err = engine
            .write(&ExecContext::new(), &mut tx, ADMIN, &sets(vec![case]))
            .unwrap_err();
        assert_eq!(err.code(), EngineErrorCode::Validation);
        assert!(tx.statements.is_empty());
    }
}

#[test]
fn write_access_is_required() {
    let f = Fixture::new();
    let engine = f.engine();
    let mut tx = RecordingTx::new();
    let create = sets(vec![DataSet::new(f.person).set(f.person_name, json!("Ada"))]);
    let err = engine
        .write(&ExecContext::new(), &mut tx, READER, &create)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Unauthorized);

    // restricted may write people but only read teams
    let team = sets(vec![DataSet::existing(f.team, 5).set(f.team_name, json!("x"))]);
    let err = engine
        .write(&ExecContext::new(), &mut tx, RESTRICTED, &team)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Unauthorized);
    assert!(tx.statements.is_empty());
}

#[test]
fn updates_apply_the_update_policy() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::existing(f.person, 4).set(f.person_name, json!("Eve")),
    ]);

    let mut tx = RecordingTx::new().affect(0);
    let err = engine
        .write(&ExecContext::new(), &mut tx, RESTRICTED, &data)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Unauthorized);
    assert_eq!(
        tx.sql(),
        vec![
            "UPDATE \"app\".\"person\" AS \"_r0\" SET \"name\" = $1 \
             WHERE \"_r0\".\"id\" = $2 AND \"_r0\".\"id\" <> ALL(\"app\".\"hidden_persons\"())"
        ]
    );

    let mut tx = RecordingTx::new();
    let ids = engine
        .write(&ExecContext::new(), &mut tx, RESTRICTED, &data)
        .expect("write");
    assert_eq!(ids, BTreeMap::from([(0, 4)]));
}

#[test]
fn protected_preset_values_and_records_stay_put() {
    let f = Fixture::new();
    let engine = f.engine();
    let ctx = ExecContext::new();

    let mut tx = RecordingTx::new();
    let rename = sets(vec![
        DataSet::existing(f.setting, DEFAULT_SETTING_RECORD).set(f.setting_key, json!("other")),
    ]);
    let err = engine.write(&ctx, &mut tx, ADMIN, &rename).unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::ProtectedViolation);
    assert!(tx.statements.is_empty());

    let retune = sets(vec![
        DataSet::existing(f.setting, DEFAULT_SETTING_RECORD).set(f.setting_value, json!("dark")),
    ]);
    engine
        .write(&ctx, &mut tx, ADMIN, &retune)
        .expect("unprotected value");
    assert_eq!(tx.statements.len(), 1);

    let err = engine
        .delete(&ctx, &mut tx, ADMIN, f.setting, DEFAULT_SETTING_RECORD)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::ProtectedViolation);
    assert_eq!(tx.statements.len(), 1);
}

#[test]
fn delete_checks_access_and_policy() {
    let f = Fixture::new();
    let engine = f.engine();
    let ctx = ExecContext::new();

    let mut tx = RecordingTx::new();
    engine
        .delete(&ctx, &mut tx, ADMIN, f.person, 3)
        .expect("delete");
    assert_eq!(
        tx.sql(),
        vec!["DELETE FROM \"app\".\"person\" AS \"_r0\" WHERE \"_r0\".\"id\" = $1"]
    );

    let mut tx = RecordingTx::new().affect(0);
    let err = engine
        .delete(&ctx, &mut tx, RESTRICTED, f.person, 3)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Unauthorized);
    assert!(tx.sql()[0].ends_with("<> ALL(\"app\".\"hidden_persons\"())"));

    let mut tx = RecordingTx::new();
    let err = engine.delete(&ctx, &mut tx, READER, f.person, 3).unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Unauthorized);
    assert!(tx.statements.is_empty());

    let err = engine
        .delete(&ctx, &mut tx, ADMIN, Uuid::new_v4(), 3)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::SchemaUnknown);
}

#[test]
fn many_to_many_links_are_synchronized() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![DataSet::existing(f.person, 4).set_outside_in(
        f.membership_person,
        Some(f.membership_team),
        json!([2, 3]),
    )]);
    let mut tx = RecordingTx::new().answer(returning(4)).answer(vec![
        vec![Value::Integer(1)],
        vec![Value::Integer(2)],
    ]);
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");

    assert_eq!(
        tx.sql(),
        vec![
            "SELECT \"_r0\".\"id\" FROM \"app\".\"person\" AS \"_r0\" WHERE \"_r0\".\"id\" = $1",
            "SELECT \"team\" FROM \"app\".\"membership\" WHERE \"person\" = $1",
            "DELETE FROM \"app\".\"membership\" WHERE \"person\" = $1 AND \"team\" = ANY($2)",
            "INSERT INTO \"app\".\"membership\" (\"person\", \"team\") VALUES ($1, $2)",
        ]
    );
    assert_eq!(
        tx.statements[2].args,
        vec![Value::Integer(4), Value::IntegerArray(vec![1])]
    );
    assert_eq!(
        tx.statements[3].args,
        vec![Value::Integer(4), Value::Integer(3)]
    );
}

#[test]
fn referencing_records_are_reassigned() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![DataSet::existing(f.team, 5).set_outside_in(
        f.person_team,
        None,
        json!([1, 2]),
    )]);
    let mut tx = RecordingTx::new().answer(returning(5));
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");
    assert_eq!(
        tx.sql(),
        vec![
            "SELECT \"_r0\".\"id\" FROM \"app\".\"team\" AS \"_r0\" WHERE \"_r0\".\"id\" = $1",
            "UPDATE \"app\".\"person\" SET \"team\" = NULL WHERE \"team\" = $1 AND \"id\" <> ALL($2)",
            "UPDATE \"app\".\"person\" SET \"team\" = $1 WHERE \"id\" = ANY($2)",
        ]
    );
    assert_eq!(
        tx.statements[2].args,
        vec![Value::Integer(5), Value::IntegerArray(vec![1, 2])]
    );
}

#[test]
fn links_and_files_of_existing_records_respect_the_update_policy() {
    let f = Fixture::new();
    let engine = f.engine();
    let guard = "SELECT \"_r0\".\"id\" FROM \"app\".\"person\" AS \"_r0\" \
                 WHERE \"_r0\".\"id\" = $1 AND \"_r0\".\"id\" <> ALL(\"app\".\"hidden_persons\"())";

    let teams = sets(vec![DataSet::existing(f.person, 4).set_outside_in(
        f.membership_person,
        Some(f.membership_team),
        json!([2]),
    )]);
    let mut tx = RecordingTx::new();
    let err = engine
        .write(&ExecContext::new(), &mut tx, RESTRICTED, &teams)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Unauthorized);
    assert_eq!(tx.sql(), vec![guard]);
    assert_eq!(tx.statements[0].args, vec![Value::Integer(4)]);

    let photos = sets(vec![
        DataSet::existing(f.person, 4).set(f.person_photos, json!({"deleted": [Uuid::new_v4()]})),
    ]);
    let mut tx = RecordingTx::new();
    let err = engine
        .write(&ExecContext::new(), &mut tx, RESTRICTED, &photos)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Unauthorized);
    assert_eq!(tx.sql(), vec![guard]);

    // a visible record takes the links
    let mut tx = RecordingTx::new().answer(returning(4));
    engine
        .write(&ExecContext::new(), &mut tx, RESTRICTED, &teams)
        .expect("write");
    assert_eq!(tx.sql()[0], guard);
    assert!(tx.sql()[2].starts_with("INSERT INTO \"app\".\"membership\""));
}

#[test]
fn negative_data_set_indexes_are_rejected() {
    let f = Fixture::new();
    let engine = f.engine();
    let cases = [
        DataSets::from([(-1, DataSet::new(f.person).set(f.person_name, json!("Ada")))]),
        DataSets::from([(-2, DataSet::existing(f.person, 4).set(f.person_name, json!("Ada")))]),
        DataSets::from([
            (0, DataSet::new(f.team).set(f.team_name, json!("core"))),
            (-1, DataSet::new(f.person).linked(0, f.person_team)),
        ]),
    ];
    for data in cases {
        let mut tx = RecordingTx::new();
        let err = engine
            .write(&ExecContext::new(), &mut tx, ADMIN, &data)
            .unwrap_err();
        assert_eq!(err.code(), EngineErrorCode::Validation);
        assert!(tx.statements.is_empty());
    }
}

#[test]
fn file_changes_follow_the_record() {
    let f = Fixture::new();
    let engine = f.engine();
    let (added, dropped) = (Uuid::new_v4(), Uuid::new_v4());
    let data = sets(vec![DataSet::new(f.person).set(
        f.person_photos,
        json!({"added": [{"id": added, "name": "a.png"}], "deleted": [dropped]}),
    )]);
    let mut tx = RecordingTx::new().answer(returning(12));
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");

    let sql = tx.sql();
    assert_eq!(sql[0], "INSERT INTO \"app\".\"person\" DEFAULT VALUES RETURNING \"id\"");
    assert!(sql[1].starts_with("INSERT INTO \"instance_file\".\"files_"));
    assert_eq!(
        tx.statements[1].args,
        vec![
            Value::Uuid(added),
            Value::Integer(12),
            Value::Text("a.png".into())
        ]
    );
    assert!(sql[2].ends_with(
        "SET \"date_delete\" = $1 WHERE \"file_id\" = $2 AND \"record_id\" = $3 \
         AND \"date_delete\" IS NULL"
    ));
}

#[test]
fn changed_values_are_logged_against_their_previous_state() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::existing(f.note, 3).set(f.note_body, json!("new")),
    ]);
    let mut tx = RecordingTx::new().answer(vec![vec![
        Value::Text("old".into()),
        Value::Integer(3),
    ]]);
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");

    let sql = tx.sql();
    assert_eq!(sql.len(), 4);
    assert!(sql[0].starts_with("SELECT \"_r0\".\"body\" AS \"_e0\""));
    assert!(sql[1].starts_with("UPDATE \"app\".\"note\""));
    assert!(sql[2].starts_with(
        "INSERT INTO \"instance\".\"data_log\" \
         (\"id\", \"relation_id\", \"record_id_wofk\", \"login_id\", \"date_change\")"
    ));
    assert!(sql[3].starts_with("INSERT INTO \"instance\".\"data_log_value\""));

    let entry = &tx.statements[2].args;
    assert_eq!(entry[1], Value::Uuid(f.note));
    assert_eq!(entry[2], Value::Integer(3));
    assert_eq!(entry[3], Value::Integer(ADMIN));
    let value = &tx.statements[3].args;
    assert_eq!(value[0], entry[0]);
    assert_eq!(value[1], Value::Uuid(f.note_body));
    assert_eq!(value[2], Value::Null);
    assert_eq!(value[3], Value::Boolean(false));
    assert_eq!(value[4], Value::Json(json!("new")));
}

#[test]
fn unchanged_values_write_no_log_entry() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::existing(f.note, 3).set(f.note_body, json!("same")),
    ]);
    let mut tx = RecordingTx::new().answer(vec![vec![
        Value::Text("same".into()),
        Value::Integer(3),
    ]]);
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");
    assert_eq!(tx.statements.len(), 2);
}

#[test]
fn unchanged_single_links_write_no_log_entry() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::existing(f.note, 3).set_outside_in(f.pin_note, None, json!([8])),
    ]);
    // the pin reads back as a single id
    let mut tx = RecordingTx::new()
        .answer(vec![vec![Value::Integer(8), Value::Integer(3)]])
        .answer(returning(3));
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");

    let sql = tx.sql();
    assert_eq!(sql.len(), 4);
    assert!(sql[0].contains("LIMIT 1"));
    assert!(sql[2].starts_with("UPDATE \"app\".\"pin\" SET \"note\" = NULL"));
    assert!(sql.iter().all(|s| !s.contains("data_log")));
}

#[test]
fn new_records_log_their_initial_values() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::new(f.note)
            .set(f.note_body, json!("hello"))
            .set(f.note_person, json!(4)),
    ]);
    let mut tx = RecordingTx::new().answer(returning(21));
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");
    let sql = tx.sql();
    assert_eq!(sql.len(), 4);
    assert!(sql[0].starts_with("INSERT INTO \"app\".\"note\""));
    assert_eq!(tx.statements[1].args[2], Value::Integer(21));
    assert_eq!(tx.statements[3].args[4], Value::Json(json!(4)));
}

#[test]
fn change_log_can_be_switched_off() {
    let f = Fixture::new();
    let engine = f.engine_with(EngineConfig::default().without_change_log());
    let data = sets(vec![
        DataSet::existing(f.note, 3).set(f.note_body, json!("new")),
    ]);
    let mut tx = RecordingTx::new();
    engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .expect("write");
    assert_eq!(tx.statements.len(), 1);
}

#[test]
fn retention_prunes_values_before_entries() {
    let f = Fixture::new();
    let engine = f.engine();
    let ctx = ExecContext::new();
    let mut tx = RecordingTx::new().affect(6).affect(2);
    let removed = engine
        .prune_change_log(&ctx, &mut tx, f.note)
        .expect("prune");
    assert_eq!(removed, 2);

    let sql = tx.sql();
    assert!(sql[0].starts_with(
        "DELETE FROM \"instance\".\"data_log_value\" WHERE \"data_log_id\" = ANY(SELECT \"_l\".\"id\""
    ));
    assert!(sql[1].starts_with(
        "DELETE FROM \"instance\".\"data_log\" AS \"_l\" WHERE \"_l\".\"relation_id\" = $1 \
         AND \"_l\".\"date_change\" < $2"
    ));
    assert!(sql[1].contains("\"_n\".\"record_id_wofk\" = \"_l\".\"record_id_wofk\""));
    assert!(sql[1].ends_with(") >= $3"));
    let args = &tx.statements[1].args;
    assert_eq!(args[0], Value::Uuid(f.note));
    assert_eq!(args[2], Value::Integer(5));

    let mut tx = RecordingTx::new();
    assert_eq!(
        engine
            .prune_change_log(&ctx, &mut tx, f.person)
            .expect("prune"),
        0
    );
    assert!(tx.statements.is_empty());
}

#[test]
fn written_ids_feed_follow_up_reads() {
    let f = Fixture::new();
    let engine = f.engine();
    let ctx = ExecContext::new();
    let mut tx = RecordingTx::new().answer(returning(31));
    let ids = engine
        .write(
            &ctx,
            &mut tx,
            ADMIN,
            &sets(vec![DataSet::new(f.person).set(f.person_name, json!("Ada"))]),
        )
        .expect("write");

    let mut tx = tx.answer(vec![vec![Value::Text("Ada".into()), Value::Integer(ids[&0])]]);
    let request = QueryRequest::new(f.person)
        .expression(QueryExpression::attribute(f.person_name, 0))
        .filter(QueryFilter::new(
            "=",
            QueryFilterSide::attribute(f.person_id, 0),
            QueryFilterSide::value(json!(ids[&0])),
        ));
    let result = engine.query(&ctx, &mut tx, ADMIN, &request).expect("query");
    assert_eq!(tx.statements.last().map(|s| s.args.clone()), Some(vec![Value::Integer(31)]));
    assert_eq!(result.rows[0].values, vec![json!("Ada")]);
    assert_eq!(result.rows[0].index_record_ids.get(&0), Some(&Some(31)));
}

#[test]
fn failed_later_data_sets_fail_the_whole_write() {
    let f = Fixture::new();
    let engine = f.engine();
    let data = sets(vec![
        DataSet::new(f.person).set(f.person_name, json!("Ada")),
        DataSet::new(f.team).set(f.team_budget, json!("a lot")),
    ]);
    let mut tx = RecordingTx::new().answer(returning(1));
    let err = engine
        .write(&ExecContext::new(), &mut tx, ADMIN, &data)
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::Validation);
    // nothing is committed here; the caller rolls back its transaction
    assert_eq!(tx.statements.len(), 1);
}
