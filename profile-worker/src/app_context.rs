use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_producer::{create_kafka_producer, KafkaContext};
use common_redis::RedisClient;
use health::HealthRegistry;
use rdkafka::producer::FutureProducer;
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;
use crate::error::UnhandledError;
use crate::sync::postgres::PostgresDocumentStore;
use crate::sync::DocumentStore;
use crate::version_manager::VersionManager;

pub struct AppContext {
    pub health_registry: HealthRegistry,
    pub config: Config,
    pub document_store: Arc<dyn DocumentStore>,
    pub version_manager: Arc<VersionManager>,
    /// Shared producer, used for demoting exhausted immediate events.
    pub kafka_producer: FutureProducer<KafkaContext>,
}

impl AppContext {
    pub async fn from_config(config: &Config) -> Result<Self, UnhandledError> {
        let health_registry = HealthRegistry::new("liveness");

        let producer_liveness =
            health_registry.register("producer".to_string(), Duration::from_secs(30));
        let kafka_producer = create_kafka_producer(&config.kafka, producer_liveness).await?;

        let options = PgPoolOptions::new().max_connections(config.max_pg_connections);
        let pool = options.connect(&config.database_url).await?;
        let document_store = Arc::new(PostgresDocumentStore::new(
            pool,
            Duration::from_millis(config.docstore_apply_timeout_ms),
        ));

        let redis = Arc::new(RedisClient::new(config.redis_url.clone()).await?);
        let version_manager = Arc::new(VersionManager::new(
            redis,
            Duration::from_millis(config.fastpath_lock_ttl_ms),
            Duration::from_millis(config.fastpath_lock_wait_ms),
        ));

        Ok(Self {
            health_registry,
            config: config.clone(),
            document_store,
            version_manager,
            kafka_producer,
        })
    }
}
