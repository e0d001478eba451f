use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "immediate-sync-events")]
    pub immediate_topic: String,

    #[envconfig(default = "batch-sync-events")]
    pub batch_topic: String,

    // at_least_once forwards with a plain producer and stores the source
    // offset after delivery; exactly_once wraps the read-process-write in a
    // Kafka transaction.
    #[envconfig(from = "ROUTER_PROCESSING_GUARANTEE", default = "at_least_once")]
    pub processing_guarantee: String,

    // Records forwarded per transaction in exactly_once mode.
    #[envconfig(default = "100")]
    pub max_txn_batch: usize,

    #[envconfig(default = "250")]
    pub txn_batch_wait_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingGuarantee {
    AtLeastOnce,
    ExactlyOnce,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults("profile-router", "profile-sync-events");
        Self::init_from_env()
    }

    pub fn processing_guarantee(&self) -> ProcessingGuarantee {
        match self.processing_guarantee.trim().to_lowercase().as_str() {
            "exactly_once" => ProcessingGuarantee::ExactlyOnce,
            _ => ProcessingGuarantee::AtLeastOnce,
        }
    }
}
