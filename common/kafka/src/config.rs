use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    // We default to "earliest" for this, but if you're bringing up a new service,
    // you probably want "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Consumers used in a transactional fashion must disable auto offset
    // commits, as their offsets are committed via the transactional producer.
    // All consumers disable auto offset /storing/.
    #[envconfig(default = "true")]
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: i32,
}

impl ConsumerConfig {
    /// For services that run a single consumer group, set the group/topic
    /// defaults before init'ing the main config struct from the environment.
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        };
        if std::env::var("KAFKA_CONSUMER_TOPIC").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPIC", consumer_topic);
        };
    }

    /// For services that run more than one consumer group in the same
    /// process, where nested env init would collide.
    pub fn for_topic(consumer_group: &str, consumer_topic: &str, auto_commit: bool) -> Self {
        Self {
            kafka_consumer_group: consumer_group.to_string(),
            kafka_consumer_topic: consumer_topic.to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_consumer_auto_commit: auto_commit,
            kafka_consumer_auto_commit_interval_ms: 5000,
        }
    }
}
