use chrono::{DateTime, Utc};
use diesel::prelude::*;
use strum_macros::{Display, EnumString};

use super::schema::{configurations, file_data_sources, upload_jobs};

#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum UploadState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = configurations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConfigurationRow {
    pub key: String,
    pub value: String,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = file_data_sources)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DataSourceRow {
    pub id: i32,
    pub name: String,
    pub folder_path: String,
    pub archive_folder_path: Option<String>,
    pub file_pattern: String,
    pub is_enabled: bool,
    pub needs_refresh: bool,
    pub created_at: String,
}

/// Patch for `DataSourceService::update`: any field left `None` keeps its current value.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = file_data_sources)]
pub struct DataSourceUpdate {
    pub folder_path: Option<String>,
    pub archive_folder_path: Option<Option<String>>,
    pub file_pattern: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = file_data_sources)]
pub struct NewDataSourceRow {
    pub name: String,
    pub folder_path: String,
    pub archive_folder_path: Option<String>,
    pub file_pattern: String,
    pub is_enabled: bool,
    pub needs_refresh: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = upload_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UploadJobRow {
    pub id: i32,
    pub data_source_name: String,
    pub local_path: String,
    pub target_container: String,
    pub target_object_name: String,
    pub size_bytes: i64,
    pub state: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl UploadJobRow {
    pub fn parsed_state(&self) -> UploadState {
        self.state
            .parse()
            .unwrap_or_else(|_| panic!("invalid upload_jobs.state value: {}", self.state))
    }

    pub fn parsed_next_attempt_at(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.next_attempt_at)
            .expect("stored next_attempt_at is valid RFC 3339")
            .with_timezone(&Utc)
    }

    pub fn parsed_updated_at(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .expect("stored updated_at is valid RFC 3339")
            .with_timezone(&Utc)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = upload_jobs)]
pub struct NewUploadJobRow {
    pub data_source_name: String,
    pub local_path: String,
    pub target_container: String,
    pub target_object_name: String,
    pub size_bytes: i64,
    pub state: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: String,
    pub created_at: String,
    pub updated_at: String,
}
