//! Diesel table definitions.
//!
//! Tables: project, application, environment, pipeline, pipeline_build,
//! pipeline_build_job, build_log, artifact, pipeline_test_result, user,
//! group_user, pipeline_group. The build's `args`, `stages` and `commits`
//! columns hold JSON text that the store never introspects.

diesel::table! {
    project (id) {
        id -> Int8,
        projectkey -> Varchar,
        name -> Varchar,
    }
}

diesel::table! {
    application (id) {
        id -> Int8,
        project_id -> Int8,
        name -> Varchar,
        repo_fullname -> Nullable<Varchar>,
        vcs_server -> Nullable<Varchar>,
    }
}

diesel::table! {
    environment (id) {
        id -> Int8,
        project_id -> Nullable<Int8>,
        name -> Varchar,
    }
}

diesel::table! {
    pipeline (id) {
        id -> Int8,
        project_id -> Int8,
        name -> Varchar,
        #[sql_name = "type"]
        kind -> Varchar,
        stages -> Text,
        args -> Text,
    }
}

diesel::table! {
    pipeline_build (id) {
        id -> Int8,
        pipeline_id -> Int8,
        application_id -> Int8,
        environment_id -> Int8,
        build_number -> Int8,
        version -> Int8,
        status -> Varchar,
        args -> Text,
        stages -> Text,
        commits -> Text,
        start -> Timestamptz,
        done -> Nullable<Timestamptz>,
        manual_trigger -> Bool,
        scheduled_trigger -> Bool,
        triggered_by -> Nullable<Int8>,
        parent_pipeline_build_id -> Nullable<Int8>,
        vcs_changes_branch -> Nullable<Varchar>,
        vcs_changes_hash -> Nullable<Varchar>,
        vcs_changes_author -> Nullable<Varchar>,
    }
}

diesel::table! {
    pipeline_build_job (id) {
        id -> Int8,
        pipeline_build_id -> Int8,
        job -> Text,
        parameters -> Text,
        status -> Varchar,
        queued -> Timestamptz,
        start -> Nullable<Timestamptz>,
        done -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    build_log (id) {
        id -> Int8,
        pipeline_build_id -> Int8,
        pipeline_build_job_id -> Int8,
        step_order -> Int4,
        value -> Text,
        start -> Timestamptz,
        last_modified -> Timestamptz,
        done -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    artifact (id) {
        id -> Int8,
        application_id -> Int8,
        pipeline_id -> Int8,
        environment_id -> Int8,
        build_number -> Int8,
        name -> Varchar,
        tag -> Varchar,
        size_bytes -> Nullable<Int8>,
        download_hash -> Nullable<Varchar>,
    }
}

diesel::table! {
    pipeline_test_result (pipeline_build_id) {
        pipeline_build_id -> Int8,
        data -> Text,
    }
}

diesel::table! {
    user (id) {
        id -> Int8,
        username -> Varchar,
        fullname -> Varchar,
        email -> Varchar,
    }
}

diesel::table! {
    group_user (group_id, user_id) {
        group_id -> Int8,
        user_id -> Int8,
    }
}

diesel::table! {
    pipeline_group (pipeline_id, group_id) {
        pipeline_id -> Int8,
        group_id -> Int8,
    }
}

// Foreign key relationships
diesel::joinable!(application -> project (project_id));
diesel::joinable!(pipeline -> project (project_id));
diesel::joinable!(pipeline_build -> pipeline (pipeline_id));
diesel::joinable!(pipeline_build -> application (application_id));
diesel::joinable!(pipeline_build -> environment (environment_id));
diesel::joinable!(pipeline_build -> user (triggered_by));
diesel::joinable!(pipeline_build_job -> pipeline_build (pipeline_build_id));
diesel::joinable!(build_log -> pipeline_build (pipeline_build_id));
diesel::joinable!(pipeline_test_result -> pipeline_build (pipeline_build_id));
diesel::joinable!(pipeline_group -> pipeline (pipeline_id));

diesel::allow_tables_to_appear_in_same_query!(
    project,
    application,
    environment,
    pipeline,
    pipeline_build,
    pipeline_build_job,
    build_log,
    artifact,
    pipeline_test_result,
    user,
    group_user,
    pipeline_group,
);
