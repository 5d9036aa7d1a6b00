use crate::clock::{Clock, SystemClock};
use crate::error::SdkError;
use crate::models::{AttendanceRecord, Config, Course, Enrollment, Mark, Stage, Student};
use crate::payment::{HttpTransport, ReqwestTransport};
use crate::persist::{RecordsBackend, RemoteStore, ScopedRemoteStore, SqliteRemoteStore};
use crate::RecordsSdk;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

const DB_FILE_NAME: &str = "records.db";

/// The remote collections behind each cache
#[derive(Clone)]
pub(crate) struct RemoteStores {
    pub(crate) students: Arc<dyn RemoteStore<Student>>,
    pub(crate) stages: Arc<dyn RemoteStore<Stage>>,
    pub(crate) courses: Arc<dyn RemoteStore<Course>>,
    pub(crate) enrollments: Arc<dyn ScopedRemoteStore<Enrollment>>,
    pub(crate) marks: Arc<dyn ScopedRemoteStore<Mark>>,
    pub(crate) attendance: Arc<dyn ScopedRemoteStore<AttendanceRecord>>,
}

impl RemoteStores {
    fn from_backend<B: RecordsBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            students: backend.clone(),
            stages: backend.clone(),
            courses: backend.clone(),
            enrollments: backend.clone(),
            marks: backend.clone(),
            attendance: backend,
        }
    }
}

/// Builder for creating and configuring a `RecordsSdk` instance
pub struct SdkBuilder {
    config: Config,
    stores: Option<RemoteStores>,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SdkBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stores: None,
            transport: None,
            clock: None,
        }
    }

    /// Sets the store serving every cached collection
    ///
    /// Defaults to a SQLite database under `data_dir`.
    pub fn backend<B: RecordsBackend + 'static>(mut self, backend: Arc<B>) -> Self {
        self.stores = Some(RemoteStores::from_backend(backend));
        self
    }

    /// Sets the HTTP transport used to reach the payment provider
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the `RecordsSdk` instance without loading any collection
    pub fn build(self) -> Result<RecordsSdk, SdkError> {
        let stores = match self.stores {
            Some(stores) => stores,
            None => {
                let path = PathBuf::from(&self.config.data_dir)
                    .join(self.config.environment.to_string().to_lowercase());
                fs::create_dir_all(&path)?;
                let store = SqliteRemoteStore::new(&path.join(DB_FILE_NAME))?;
                RemoteStores::from_backend(Arc::new(store))
            }
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let (shutdown_sender, shutdown_receiver) = watch::channel(());

        Ok(RecordsSdk::new(
            self.config,
            stores,
            transport,
            clock,
            shutdown_sender,
            shutdown_receiver,
        ))
    }
}
