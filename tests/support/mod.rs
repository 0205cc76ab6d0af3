#![allow(dead_code)]

use relcore::Engine;
use relcore::catalog::PresetSource;
use relcore::catalog::access::{AccessLevel, LoginRoles, MembershipSource};
use relcore::catalog::schema::{
    Attribute, ModuleDef, PgFunction, Preset, PresetValue, RelationDef, RelationPolicy, Role,
    RoleAccess,
};
use relcore::catalog::types::{ContentType, ContentUse, Value};
use relcore::config::EngineConfig;
use relcore::error::EngineError;
use relcore::store::{ExecContext, Statement, StoreError, StoreRow, StoreTx};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

pub const ADMIN: i64 = 1;
pub const READER: i64 = 2;
pub const RESTRICTED: i64 = 3;
pub const STRANGER: i64 = 4;
/// Carries the admin flag but no roles.
pub const FLAGGED: i64 = 5;

/// Record id the protected `default` setting preset lives at.
pub const DEFAULT_SETTING_RECORD: i64 = 7;

/// Module `app`:
///
/// - `person(id, name, age, birthday, supervisor -> person, team -> team, photos)`
/// - `team(id, name, budget)`
/// - `membership(id, person -> person, team -> team)`, the person/team n:m link
/// - `note(id, person -> person, body)`, change-logged
/// - `setting(id, key, value)` with the protected preset `default`
/// - `pin(id, note -> note)`, at most one pin per note
pub struct Fixture {
    pub module: Uuid,

    pub person: Uuid,
    pub person_id: Uuid,
    pub person_name: Uuid,
    pub person_age: Uuid,
    pub person_birthday: Uuid,
    pub person_supervisor: Uuid,
    pub person_team: Uuid,
    pub person_photos: Uuid,

    pub team: Uuid,
    pub team_id: Uuid,
    pub team_name: Uuid,
    pub team_budget: Uuid,

    pub membership: Uuid,
    pub membership_person: Uuid,
    pub membership_team: Uuid,

    pub note: Uuid,
    pub note_id: Uuid,
    pub note_person: Uuid,
    pub note_body: Uuid,

    pub setting: Uuid,
    pub setting_key: Uuid,
    pub setting_value: Uuid,
    pub preset_default: Uuid,

    pub pin: Uuid,
    pub pin_note: Uuid,

    pub fn_hidden_persons: Uuid,
    pub fn_own_teams: Uuid,

    pub role_admin: Uuid,
    pub role_reader: Uuid,
    pub role_restricted: Uuid,
}

fn attr(id: Uuid, name: &str, content: ContentType) -> Attribute {
    Attribute {
        id,
        relation_id: Uuid::nil(),
        name: name.into(),
        content,
        content_use: ContentUse::Default,
        nullable: name != "id",
        primary_key: name == "id",
        relationship_id: None,
    }
}

fn link(id: Uuid, name: &str, content: ContentType, target: Uuid) -> Attribute {
    Attribute {
        relationship_id: Some(target),
        ..attr(id, name, content)
    }
}

fn relation(id: Uuid, name: &str, attributes: Vec<Attribute>) -> RelationDef {
    RelationDef {
        id,
        name: name.into(),
        retention_count: None,
        retention_days: None,
        attributes,
        policies: vec![],
        presets: vec![],
    }
}

fn levels(ids: &[Uuid], level: AccessLevel) -> HashMap<Uuid, AccessLevel> {
    ids.iter().map(|id| (*id, level)).collect()
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            module: Uuid::new_v4(),
            person: Uuid::new_v4(),
            person_id: Uuid::new_v4(),
            person_name: Uuid::new_v4(),
            person_age: Uuid::new_v4(),
            person_birthday: Uuid::new_v4(),
            person_supervisor: Uuid::new_v4(),
            person_team: Uuid::new_v4(),
            person_photos: Uuid::new_v4(),
            team: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            team_name: Uuid::new_v4(),
            team_budget: Uuid::new_v4(),
            membership: Uuid::new_v4(),
            membership_person: Uuid::new_v4(),
            membership_team: Uuid::new_v4(),
            note: Uuid::new_v4(),
            note_id: Uuid::new_v4(),
            note_person: Uuid::new_v4(),
            note_body: Uuid::new_v4(),
            setting: Uuid::new_v4(),
            setting_key: Uuid::new_v4(),
            setting_value: Uuid::new_v4(),
            preset_default: Uuid::new_v4(),
            pin: Uuid::new_v4(),
            pin_note: Uuid::new_v4(),
            fn_hidden_persons: Uuid::new_v4(),
            fn_own_teams: Uuid::new_v4(),
            role_admin: Uuid::new_v4(),
            role_reader: Uuid::new_v4(),
            role_restricted: Uuid::new_v4(),
        }
    }

    pub fn module_def(&self) -> ModuleDef {
        let mut birthday = attr(self.person_birthday, "birthday", ContentType::Bigint);
        birthday.content_use = ContentUse::Date;
        let mut person = relation(
            self.person,
            "person",
            vec![
                attr(self.person_id, "id", ContentType::Bigint),
                attr(self.person_name, "name", ContentType::Text),
                attr(self.person_age, "age", ContentType::Integer),
                birthday,
                link(
                    self.person_supervisor,
                    "supervisor",
                    ContentType::ManyToOne,
                    self.person,
                ),
                link(self.person_team, "team", ContentType::ManyToOne, self.team),
                attr(self.person_photos, "photos", ContentType::Files),
            ],
        );
        person.policies = vec![RelationPolicy {
            role_id: self.role_restricted,
            pg_function_id_excl: Some(self.fn_hidden_persons),
            pg_function_id_incl: None,
            action_select: true,
            action_update: true,
            action_delete: true,
        }];

        let mut team = relation(
            self.team,
            "team",
            vec![
                attr(self.team_id, "id", ContentType::Bigint),
                attr(self.team_name, "name", ContentType::Text),
                attr(self.team_budget, "budget", ContentType::Numeric),
            ],
        );
        team.policies = vec![RelationPolicy {
            role_id: self.role_restricted,
            pg_function_id_excl: None,
            pg_function_id_incl: Some(self.fn_own_teams),
            action_select: true,
            action_update: false,
            action_delete: false,
        }];

        let membership = relation(
            self.membership,
            "membership",
            vec![
                attr(Uuid::new_v4(), "id", ContentType::Bigint),
                link(
                    self.membership_person,
                    "person",
                    ContentType::ManyToOne,
                    self.person,
                ),
                link(
                    self.membership_team,
                    "team",
                    ContentType::ManyToOne,
                    self.team,
                ),
            ],
        );

        let mut note = relation(
            self.note,
            "note",
            vec![
                attr(self.note_id, "id", ContentType::Bigint),
                link(
                    self.note_person,
                    "person",
                    ContentType::ManyToOne,
                    self.person,
                ),
                attr(self.note_body, "body", ContentType::Text),
            ],
        );
        note.retention_count = Some(5);
        note.retention_days = Some(30);

        let mut setting = relation(
            self.setting,
            "setting",
            vec![
                attr(Uuid::new_v4(), "id", ContentType::Bigint),
                attr(self.setting_key, "key", ContentType::Varchar),
                attr(self.setting_value, "value", ContentType::Text),
            ],
        );
        setting.presets = vec![Preset {
            id: self.preset_default,
            relation_id: self.setting,
            name: "default".into(),
            protected: true,
            values: vec![
                PresetValue {
                    attribute_id: self.setting_key,
                    protected: true,
                    value: json!("theme"),
                },
                PresetValue {
                    attribute_id: self.setting_value,
                    protected: false,
                    value: json!("light"),
                },
            ],
        }];

        let pin = relation(
            self.pin,
            "pin",
            vec![
                attr(Uuid::new_v4(), "id", ContentType::Bigint),
                link(self.pin_note, "note", ContentType::OneToOne, self.note),
            ],
        );

        let all_relations = [
            self.person,
            self.team,
            self.membership,
            self.note,
            self.setting,
            self.pin,
        ];
        ModuleDef {
            id: self.module,
            name: "app".into(),
            relations: vec![person, team, membership, note, setting, pin],
            roles: vec![
                Role {
                    id: self.role_admin,
                    module_id: self.module,
                    name: "admin".into(),
                    child_role_ids: vec![],
                    access: RoleAccess {
                        relations: levels(&all_relations, AccessLevel::DELETE),
                        ..RoleAccess::default()
                    },
                },
                Role {
                    id: self.role_reader,
                    module_id: self.module,
                    name: "reader".into(),
                    child_role_ids: vec![],
                    access: RoleAccess {
                        relations: levels(&all_relations, AccessLevel::READ),
                        attributes: levels(&[self.person_age], AccessLevel::NONE),
                        ..RoleAccess::default()
                    },
                },
                Role {
                    id: self.role_restricted,
                    module_id: self.module,
                    name: "restricted".into(),
                    // inherits read access everywhere, adds write on people
                    child_role_ids: vec![self.role_reader],
                    access: RoleAccess {
                        relations: levels(&[self.person, self.membership], AccessLevel::DELETE),
                        attributes: levels(&[self.person_age], AccessLevel::WRITE),
                        ..RoleAccess::default()
                    },
                },
            ],
            pg_functions: vec![
                PgFunction {
                    id: self.fn_hidden_persons,
                    module_id: self.module,
                    name: "hidden_persons".into(),
                },
                PgFunction {
                    id: self.fn_own_teams,
                    module_id: self.module,
                    name: "own_teams".into(),
                },
            ],
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine_with(EngineConfig::default())
    }

    pub fn engine_with(&self, config: EngineConfig) -> Engine {
        let membership = StaticMembership(HashMap::from([
            (ADMIN, vec![self.role_admin]),
            (READER, vec![self.role_reader]),
            (RESTRICTED, vec![self.role_restricted]),
        ]));
        let presets = StaticPresets(HashMap::from([(
            self.preset_default,
            DEFAULT_SETTING_RECORD,
        )]));
        let engine = Engine::new(config, Arc::new(membership), Arc::new(presets));
        engine
            .reload(vec![self.module_def()])
            .expect("fixture module loads");
        engine
    }
}

pub struct StaticMembership(pub HashMap<i64, Vec<Uuid>>);

impl MembershipSource for StaticMembership {
    fn login_roles(&self, login_id: i64) -> Result<LoginRoles, EngineError> {
        Ok(LoginRoles {
            role_ids: self.0.get(&login_id).cloned().unwrap_or_default(),
            admin: matches!(login_id, ADMIN | FLAGGED),
        })
    }
}

pub struct StaticPresets(pub HashMap<Uuid, i64>);

impl PresetSource for StaticPresets {
    fn preset_record_ids(&self) -> Result<HashMap<Uuid, i64>, EngineError> {
        Ok(self.0.clone())
    }
}

/// Store double: records every statement and answers from scripted queues.
///
/// Queries without a scripted answer return no rows; executes without one
/// report a single affected row.
#[derive(Default)]
pub struct RecordingTx {
    pub statements: Vec<Statement>,
    pub rows: VecDeque<Vec<StoreRow>>,
    pub affected: VecDeque<u64>,
    pub fail_with: Option<StoreError>,
}

impl RecordingTx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows
            .push_back(rows.into_iter().map(StoreRow::new).collect());
        self
    }

    pub fn affect(mut self, count: u64) -> Self {
        self.affected.push_back(count);
        self
    }

    pub fn sql(&self) -> Vec<&str> {
        self.statements.iter().map(|s| s.sql.as_str()).collect()
    }
}

impl StoreTx for RecordingTx {
    fn query(
        &mut self,
        _ctx: &ExecContext,
        statement: &Statement,
    ) -> Result<Vec<StoreRow>, StoreError> {
        self.statements.push(statement.clone());
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(self.rows.pop_front().unwrap_or_default())
    }

    fn execute(&mut self, _ctx: &ExecContext, statement: &Statement) -> Result<u64, StoreError> {
        self.statements.push(statement.clone());
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(self.affected.pop_front().unwrap_or(1))
    }
}

/// Checks that a statement numbers its placeholders `$1..$n` without gaps.
pub fn placeholders_are_dense(statement: &Statement) -> bool {
    let mut seen = Vec::new();
    let bytes = statement.sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if let Ok(n) = statement.sql[start..end].parse::<usize>() {
                seen.push(n);
            }
            i = end;
        } else {
            i += 1;
        }
    }
    seen == (1..=statement.args.len()).collect::<Vec<_>>()
}
