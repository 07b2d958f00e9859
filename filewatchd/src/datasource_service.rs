//! CRUD over `file_data_sources`, plus the one specialized operation the supervisor needs:
//! clearing `needs_refresh` after it has acted on a row.

use diesel::prelude::*;

use crate::error::StoreError;
use crate::store::models::{DataSourceRow, DataSourceUpdate, NewDataSourceRow};
use crate::store::schema::file_data_sources::dsl as d;
use crate::store::Store;

#[derive(Clone)]
pub struct DataSourceService {
    store: Store,
}

impl DataSourceService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Ordered by `name` ascending so supervisor reconciliation diffs are stable across ticks.
    pub async fn list_all(&self) -> Result<Vec<DataSourceRow>, StoreError> {
        self.store
            .with_conn(|conn| {
                d::file_data_sources
                    .order(d::name.asc())
                    .load::<DataSourceRow>(conn)
                    .map_err(StoreError::from)
            })
            .await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<DataSourceRow>, StoreError> {
        let name = name.to_owned();
        self.store
            .with_conn(move |conn| {
                d::file_data_sources
                    .filter(d::name.eq(&name))
                    .first::<DataSourceRow>(conn)
                    .optional()
                    .map_err(StoreError::from)
            })
            .await
    }

    pub async fn create(&self, row: NewDataSourceRow) -> Result<DataSourceRow, StoreError> {
        self.store
            .with_conn(move |conn| {
                diesel::insert_into(d::file_data_sources)
                    .values(&row)
                    .execute(conn)?;
                d::file_data_sources
                    .filter(d::name.eq(&row.name))
                    .first::<DataSourceRow>(conn)
                    .map_err(StoreError::from)
            })
            .await
    }

    /// Patches `folder_path`/`archive_folder_path`/`file_pattern`; also marks the row for refresh
    /// so the supervisor picks up the change on its next tick, same as `set_enabled` does.
    pub async fn update(&self, name: &str, patch: DataSourceUpdate) -> Result<(), StoreError> {
        let name = name.to_owned();
        self.store
            .with_conn(move |conn| {
                diesel::update(d::file_data_sources.filter(d::name.eq(&name)))
                    .set(&patch)
                    .execute(conn)
                    .map_err(StoreError::from)?;
                diesel::update(d::file_data_sources.filter(d::name.eq(&name)))
                    .set(d::needs_refresh.eq(true))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .await
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let name = name.to_owned();
        self.store
            .with_conn(move |conn| {
                diesel::delete(d::file_data_sources.filter(d::name.eq(&name)))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .await
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), StoreError> {
        let name = name.to_owned();
        self.store
            .with_conn(move |conn| {
                diesel::update(d::file_data_sources.filter(d::name.eq(&name)))
                    .set((d::is_enabled.eq(enabled), d::needs_refresh.eq(true)))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .await
    }

    pub async fn request_refresh(&self, name: &str) -> Result<(), StoreError> {
        let name = name.to_owned();
        self.store
            .with_conn(move |conn| {
                diesel::update(d::file_data_sources.filter(d::name.eq(&name)))
                    .set(d::needs_refresh.eq(true))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .await
    }

    pub async fn clear_needs_refresh(&self, name: &str) -> Result<(), StoreError> {
        let name = name.to_owned();
        self.store
            .with_conn(move |conn| {
                diesel::update(d::file_data_sources.filter(d::name.eq(&name)))
                    .set(d::needs_refresh.eq(false))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .await
    }
}
