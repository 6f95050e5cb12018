diesel::table! {
    pipelines (id) {
        id -> Integer,
        repository_id -> BigInt,
        repository_owner -> Text,
        repository_name -> Text,
        pusher_id -> BigInt,
        trigger_event -> Text,
        ref_name -> Text,
        commit_sha -> Text,
        configuration -> Text,
        stage -> Integer,
        status -> Text,
        success -> Bool,
        error -> Nullable<Text>,
        begin_at -> Nullable<BigInt>,
        end_at -> Nullable<BigInt>,
        created_at -> BigInt,
    }
}

diesel::table! {
    stage_results (id) {
        id -> Integer,
        pipeline_id -> Integer,
        kind -> Text,
        task_index -> Integer,
        name -> Text,
        log -> Text,
        error -> Nullable<Text>,
        success -> Bool,
        begin_at -> BigInt,
        end_at -> BigInt,
        payload -> Nullable<Text>,
    }
}

diesel::joinable!(stage_results -> pipelines (pipeline_id));
diesel::allow_tables_to_appear_in_same_query!(pipelines, stage_results);

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS pipelines (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    repository_id BIGINT NOT NULL,
    repository_owner TEXT NOT NULL,
    repository_name TEXT NOT NULL,
    pusher_id BIGINT NOT NULL,
    trigger_event TEXT NOT NULL,
    ref_name TEXT NOT NULL,
    commit_sha TEXT NOT NULL,
    configuration TEXT NOT NULL,
    stage INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'not_started',
    success BOOLEAN NOT NULL DEFAULT 0,
    error TEXT,
    begin_at BIGINT,
    end_at BIGINT,
    created_at BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS pipelines_repository_commit
    ON pipelines (repository_id, commit_sha);

CREATE INDEX IF NOT EXISTS pipelines_status ON pipelines (status);

CREATE TABLE IF NOT EXISTS stage_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines (id),
    kind TEXT NOT NULL,
    task_index INTEGER NOT NULL,
    name TEXT NOT NULL,
    log TEXT NOT NULL,
    error TEXT,
    success BOOLEAN NOT NULL,
    begin_at BIGINT NOT NULL,
    end_at BIGINT NOT NULL,
    payload TEXT
);
"#;
