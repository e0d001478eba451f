use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tokio::time::timeout;

use crate::{Client, CustomRedisError};

const DEFAULT_REDIS_TIMEOUT_MILLISECS: u64 = 100;

fn get_redis_timeout_ms() -> u64 {
    std::env::var("REDIS_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_REDIS_TIMEOUT_MILLISECS)
}

// KEYS[1] = key, ARGV[1] = expected current value, ARGV[2] = new value, ARGV[3] = TTL seconds.
// An empty expected value means "key must be absent".
const SET_IF_EQUALS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if (cur == false and ARGV[1] == '') or cur == ARGV[1] then
    if tonumber(ARGV[3]) > 0 then
        redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    else
        redis.call('SET', KEYS[1], ARGV[2])
    end
    return 1
end
return 0
"#;

// KEYS[1] = key, ARGV[1] = expected current value.
const DEL_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(RedisClient { connection })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(get_redis_timeout_ms())
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Option<Vec<u8>> = timeout(self.timeout(), conn.get(k)).await??;

        match result {
            Some(bytes) => Ok(String::from_utf8(bytes)?),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout(), conn.set::<_, _, ()>(k, v)).await??;
        Ok(())
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout(), conn.set_ex::<_, _, ()>(k, v, seconds)).await??;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&k).arg(&v).arg("NX").arg("EX").arg(seconds);
        let set = cmd.query_async::<Option<String>>(&mut conn);
        let result = timeout(self.timeout(), set).await??;
        Ok(result.is_some())
    }

    async fn set_if_equals(
        &self,
        k: String,
        expected: Option<String>,
        v: String,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let script = Script::new(SET_IF_EQUALS_SCRIPT);
        let mut invocation = script.key(&k);
        invocation.arg(expected.unwrap_or_default()).arg(&v).arg(0u64);
        let swapped: i64 = timeout(self.timeout(), invocation.invoke_async(&mut conn)).await??;
        Ok(swapped == 1)
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout(), conn.del::<_, ()>(k)).await??;
        Ok(())
    }

    async fn del_if_equals(&self, k: String, expected: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let script = Script::new(DEL_IF_EQUALS_SCRIPT);
        let mut invocation = script.key(&k);
        invocation.arg(&expected);
        let deleted: i64 = timeout(self.timeout(), invocation.invoke_async(&mut conn)).await??;
        Ok(deleted == 1)
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: bool = timeout(self.timeout(), conn.exists(k)).await??;
        Ok(result)
    }
}
