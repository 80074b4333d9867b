use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Store;
use crate::mail::{HttpMailer, LogMailer, Mailer, MemoryMailer};
use crate::storage::{FakeStorage, S3Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = Store::connect(&config.database_url).await?;

        let storage = Arc::new(
            S3Storage::new(
                &config.minio_endpoint,
                &config.minio_bucket,
                &config.minio_access_key,
                &config.minio_secret_key,
                "us-east-1",
            )
            .await?,
        ) as Arc<dyn StorageClient>;

        let mailer: Arc<dyn Mailer> = match &config.mail.api_url {
            Some(url) => Arc::new(HttpMailer::new(url, &config.mail.api_key)),
            None => {
                tracing::warn!("MAIL_API_URL not set; mails will only be logged");
                Arc::new(LogMailer)
            }
        };

        Ok(Self {
            store,
            config,
            storage,
            mailer,
        })
    }

    pub fn from_parts(
        store: Store,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            config,
            storage,
            mailer,
        }
    }

    /// In-memory store, recording storage and an in-memory outbox.
    pub fn fake() -> Self {
        Self::fake_with(Arc::new(MemoryMailer::default()), Arc::new(FakeStorage::default()))
    }

    pub fn fake_with(mailer: Arc<dyn Mailer>, storage: Arc<dyn StorageClient>) -> Self {
        Self::from_parts(
            Store::memory(),
            Arc::new(AppConfig::for_tests()),
            storage,
            mailer,
        )
    }
}
