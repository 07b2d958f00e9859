//! The cheaply-cloneable service bundle threaded through every component's constructor, in place
//! of ambient global state.

use std::sync::Arc;

use blob_storage::BlobUploader;

use crate::clock::Clock;
use crate::config_service::ConfigService;
use crate::datasource_service::DataSourceService;
use crate::store::Store;

#[derive(Clone)]
pub struct CoreServices {
    pub store: Store,
    pub config: ConfigService,
    pub data_sources: DataSourceService,
    pub blob: Arc<dyn BlobUploader>,
    pub clock: Arc<dyn Clock>,
}
