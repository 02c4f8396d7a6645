//! Embedded schema migration, applied with `batch_execute` at startup.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// SQL migration for the build lifecycle engine.
///
/// The unique index on (application_id, pipeline_id, environment_id,
/// build_number) backs the monotonic build-number guarantee.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS project (
    id              BIGSERIAL PRIMARY KEY,
    projectkey      VARCHAR(64) NOT NULL UNIQUE,
    name            VARCHAR(255) NOT NULL
);

CREATE TABLE IF NOT EXISTS "user" (
    id              BIGSERIAL PRIMARY KEY,
    username        VARCHAR(255) NOT NULL UNIQUE,
    fullname        VARCHAR(255) NOT NULL DEFAULT '',
    email           VARCHAR(255) NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS group_user (
    group_id        BIGINT NOT NULL,
    user_id         BIGINT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS application (
    id              BIGSERIAL PRIMARY KEY,
    project_id      BIGINT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
    name            VARCHAR(255) NOT NULL,
    repo_fullname   VARCHAR(255),
    vcs_server      VARCHAR(255),
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS environment (
    id              BIGSERIAL PRIMARY KEY,
    project_id      BIGINT REFERENCES project(id) ON DELETE CASCADE,
    name            VARCHAR(255) NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline (
    id              BIGSERIAL PRIMARY KEY,
    project_id      BIGINT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
    name            VARCHAR(255) NOT NULL,
    type            VARCHAR(32) NOT NULL DEFAULT 'build',
    stages          TEXT NOT NULL DEFAULT '[]',
    args            TEXT NOT NULL DEFAULT '[]',
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS pipeline_group (
    pipeline_id     BIGINT NOT NULL REFERENCES pipeline(id) ON DELETE CASCADE,
    group_id        BIGINT NOT NULL,
    PRIMARY KEY (pipeline_id, group_id)
);

CREATE TABLE IF NOT EXISTS pipeline_build (
    id              BIGSERIAL PRIMARY KEY,
    pipeline_id     BIGINT NOT NULL REFERENCES pipeline(id),
    application_id  BIGINT NOT NULL REFERENCES application(id),
    environment_id  BIGINT NOT NULL REFERENCES environment(id),
    build_number    BIGINT NOT NULL,
    version         BIGINT NOT NULL,
    status          VARCHAR(32) NOT NULL DEFAULT 'Building',
    args            TEXT NOT NULL DEFAULT '[]',
    stages          TEXT NOT NULL DEFAULT '[]',
    commits         TEXT NOT NULL DEFAULT '[]',
    start           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    done            TIMESTAMPTZ,
    manual_trigger  BOOLEAN NOT NULL DEFAULT FALSE,
    scheduled_trigger BOOLEAN NOT NULL DEFAULT FALSE,
    triggered_by    BIGINT REFERENCES "user"(id),
    parent_pipeline_build_id BIGINT REFERENCES pipeline_build(id),
    vcs_changes_branch VARCHAR(255),
    vcs_changes_hash VARCHAR(64),
    vcs_changes_author VARCHAR(255)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_pipeline_build_number
    ON pipeline_build (application_id, pipeline_id, environment_id, build_number);
CREATE INDEX IF NOT EXISTS idx_pipeline_build_status ON pipeline_build (status);
CREATE INDEX IF NOT EXISTS idx_pipeline_build_branch ON pipeline_build (application_id, vcs_changes_branch);
CREATE INDEX IF NOT EXISTS idx_pipeline_build_hash ON pipeline_build (vcs_changes_hash);
CREATE INDEX IF NOT EXISTS idx_pipeline_build_parent ON pipeline_build (parent_pipeline_build_id);

CREATE TABLE IF NOT EXISTS pipeline_build_job (
    id              BIGSERIAL PRIMARY KEY,
    pipeline_build_id BIGINT NOT NULL REFERENCES pipeline_build(id),
    job             TEXT NOT NULL DEFAULT '{}',
    parameters      TEXT NOT NULL DEFAULT '[]',
    status          VARCHAR(32) NOT NULL DEFAULT 'Waiting',
    queued          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    start           TIMESTAMPTZ,
    done            TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_pipeline_build_job_build ON pipeline_build_job (pipeline_build_id);

CREATE TABLE IF NOT EXISTS build_log (
    id              BIGSERIAL PRIMARY KEY,
    pipeline_build_id BIGINT NOT NULL,
    pipeline_build_job_id BIGINT NOT NULL,
    step_order      INTEGER NOT NULL DEFAULT 0,
    value           TEXT NOT NULL DEFAULT '',
    start           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_modified   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    done            TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_build_log_build ON build_log (pipeline_build_id);
CREATE INDEX IF NOT EXISTS idx_build_log_job ON build_log (pipeline_build_job_id);

CREATE TABLE IF NOT EXISTS artifact (
    id              BIGSERIAL PRIMARY KEY,
    application_id  BIGINT NOT NULL,
    pipeline_id     BIGINT NOT NULL,
    environment_id  BIGINT NOT NULL,
    build_number    BIGINT NOT NULL,
    name            VARCHAR(255) NOT NULL,
    tag             VARCHAR(255) NOT NULL DEFAULT '',
    size_bytes      BIGINT,
    download_hash   VARCHAR(255)
);

CREATE INDEX IF NOT EXISTS idx_artifact_build
    ON artifact (application_id, pipeline_id, environment_id, build_number);

CREATE TABLE IF NOT EXISTS pipeline_test_result (
    pipeline_build_id BIGINT PRIMARY KEY REFERENCES pipeline_build(id),
    data            TEXT NOT NULL DEFAULT '{}'
);
"#;

/// Apply the engine migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("engine migration failed: {e}"))?;
    Ok(())
}
