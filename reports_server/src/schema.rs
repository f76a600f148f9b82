//! Diesel table definitions for the report metadata collections.
//!
//! Tables: report_artifact_indexes, build_activities. Both carry a
//! `revision` column that every conditional write compares and bumps.

diesel::table! {
    report_artifact_indexes (org, app) {
        org -> Varchar,
        app -> Varchar,
        revision -> Int8,
        versions -> Jsonb,
        write_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    build_activities (org, app, branch, build_number) {
        org -> Varchar,
        app -> Varchar,
        branch -> Varchar,
        build_number -> Varchar,
        revision -> Int8,
        report_links -> Jsonb,
        write_date -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(report_artifact_indexes, build_activities,);
