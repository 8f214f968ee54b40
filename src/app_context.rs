use std::{path::PathBuf, sync::Arc};

use crate::{
    audio_engine::AudioEngine, db_manager::DbManager, playback_session::IndexPicker,
    worker_pool::WorkerPool,
};

/// Media locations used by imports and by application reset.
#[derive(Clone, Debug)]
pub(crate) struct StoragePaths {
    pub(crate) downloads_dir: PathBuf,
    pub(crate) thumbnails_dir: PathBuf,
}

/// Long-lived services built once in `main` and handed to the controller.
pub(crate) struct AppServices {
    pub(crate) db: Arc<DbManager>,
    pub(crate) workers: WorkerPool,
    pub(crate) storage: StoragePaths,
}

impl AppServices {
    pub(crate) fn new(db: Arc<DbManager>, workers: WorkerPool, storage: StoragePaths) -> Self {
        Self {
            db,
            workers,
            storage,
        }
    }
}

/// Builds the engine handle and shuffle picker for each new playback session.
pub(crate) struct SessionFactory {
    pub(crate) engine: Box<dyn Fn() -> Box<dyn AudioEngine> + Send>,
    pub(crate) picker: Box<dyn Fn() -> Box<dyn IndexPicker> + Send>,
}
