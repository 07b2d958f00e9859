// Hand-written to match migrations/2024-01-01-000000_init/up.sql; kept in sync manually since
// this crate has no build-time `diesel print-schema` step.

diesel::table! {
    configurations (key) {
        key -> Text,
        value -> Text,
        category -> Nullable<Text>,
        description -> Nullable<Text>,
    }
}

diesel::table! {
    file_data_sources (id) {
        id -> Integer,
        name -> Text,
        folder_path -> Text,
        archive_folder_path -> Nullable<Text>,
        file_pattern -> Text,
        is_enabled -> Bool,
        needs_refresh -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    upload_jobs (id) {
        id -> Integer,
        data_source_name -> Text,
        local_path -> Text,
        target_container -> Text,
        target_object_name -> Text,
        size_bytes -> BigInt,
        state -> Text,
        attempts -> Integer,
        last_error -> Nullable<Text>,
        next_attempt_at -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}
