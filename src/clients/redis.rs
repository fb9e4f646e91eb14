use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    models::task::{DeadLetter, Task},
    queue::{Broker, Lease, LeaseToken, MaintenanceReport},
};

/// Moves the oldest pending task to the active list and records its lease
/// deadline, atomically, so a crash can never strand a task between the two.
const LEASE_SCRIPT: &str = r#"
local raw = redis.call('RPOP', KEYS[1])
if not raw then
  return false
end
redis.call('LPUSH', KEYS[2], raw)
redis.call('ZADD', KEYS[3], ARGV[1], raw)
return raw
"#;

/// Makes retries whose backoff has elapsed leasable again.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, raw in ipairs(due) do
  redis.call('ZREM', KEYS[1], raw)
  redis.call('LPUSH', KEYS[2], raw)
end
return #due
"#;

/// Returns tasks whose lease expired to the head of the pending list.
const RECLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local reclaimed = 0
for _, raw in ipairs(expired) do
  redis.call('ZREM', KEYS[1], raw)
  if redis.call('LREM', KEYS[2], 1, raw) > 0 then
    redis.call('RPUSH', KEYS[3], raw)
    reclaimed = reclaimed + 1
  end
end
return reclaimed
"#;

const MAINTENANCE_BATCH: usize = 100;
const DEAD_LETTER_CAP: isize = 1_000;

pub async fn connect(redis_url: &str) -> Result<MultiplexedConnection> {
    let client = Client::open(redis_url)?;
    let connection = client.get_multiplexed_async_connection().await?;
    Ok(connection)
}

/// Redis-backed broker.
///
/// Keys, all under `{namespace}:`
/// - `pending`   list, producers `LPUSH`, workers take from the right
/// - `active`    list of leased tasks
/// - `leases`    sorted set of leased tasks scored by lease deadline (ms)
/// - `scheduled` sorted set of retries scored by ready time (ms)
/// - `dead`      list of dead letters, newest first, capped
pub struct RedisBroker {
    connection: MultiplexedConnection,
    pending_key: String,
    active_key: String,
    leases_key: String,
    scheduled_key: String,
    dead_key: String,
    lease_script: Script,
    promote_script: Script,
    reclaim_script: Script,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self> {
        info!(namespace, "Connecting to Redis broker");
        let connection = connect(redis_url).await?;
        info!("Redis broker connection established");

        Ok(Self::with_connection(connection, namespace))
    }

    pub fn with_connection(connection: MultiplexedConnection, namespace: &str) -> Self {
        Self {
            connection,
            pending_key: format!("{}:pending", namespace),
            active_key: format!("{}:active", namespace),
            leases_key: format!("{}:leases", namespace),
            scheduled_key: format!("{}:scheduled", namespace),
            dead_key: format!("{}:dead", namespace),
            lease_script: Script::new(LEASE_SCRIPT),
            promote_script: Script::new(PROMOTE_SCRIPT),
            reclaim_script: Script::new(RECLAIM_SCRIPT),
        }
    }

    fn raw_token(lease: &Lease) -> Result<&str> {
        match &lease.token {
            LeaseToken::Raw(raw) => Ok(raw),
            LeaseToken::DeliveryTag(_) => Err(Error::internal(
                "redis broker cannot settle an AMQP lease",
            )),
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, task: &Task) -> Result<()> {
        let raw = serde_json::to_string(task)?;
        let mut conn = self.connection.clone();
        conn.lpush::<_, _, ()>(&self.pending_key, raw).await?;
        Ok(())
    }

    async fn lease(&self, lease_timeout: Duration) -> Result<Option<Lease>> {
        let deadline = Self::now_ms() + lease_timeout.as_millis() as i64;
        let mut conn = self.connection.clone();

        let raw: Option<String> = self
            .lease_script
            .key(&self.pending_key)
            .key(&self.active_key)
            .key(&self.leases_key)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;

        Ok(raw.map(|raw| {
            let task = serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Leased an unreadable task");
                Task::unreadable(raw.as_bytes())
            });
            Lease {
                task,
                token: LeaseToken::Raw(raw),
            }
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        let raw = Self::raw_token(lease)?;
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .lrem(&self.active_key, 1, raw)
            .ignore()
            .zrem(&self.leases_key, raw)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry(&self, lease: &Lease, next: &Task, delay: Duration) -> Result<()> {
        let raw = Self::raw_token(lease)?;
        let next_raw = serde_json::to_string(next)?;
        let ready_at = Self::now_ms() + delay.as_millis() as i64;
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .lrem(&self.active_key, 1, raw)
            .ignore()
            .zrem(&self.leases_key, raw)
            .ignore()
            .zadd(&self.scheduled_key, next_raw, ready_at)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, lease: &Lease, letter: &DeadLetter) -> Result<()> {
        let raw = Self::raw_token(lease)?;
        let letter_raw = serde_json::to_string(letter)?;
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .lrem(&self.active_key, 1, raw)
            .ignore()
            .zrem(&self.leases_key, raw)
            .ignore()
            .lpush(&self.dead_key, letter_raw)
            .ignore()
            .ltrim(&self.dead_key, 0, DEAD_LETTER_CAP - 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let raws: Vec<String> = conn
            .lrange(&self.dead_key, 0, limit as isize - 1)
            .await?;

        Ok(raws
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(letter) => Some(letter),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable dead letter");
                    None
                }
            })
            .collect())
    }

    async fn maintain(&self) -> Result<MaintenanceReport> {
        let now = Self::now_ms();
        let mut conn = self.connection.clone();

        let promoted: usize = self
            .promote_script
            .key(&self.scheduled_key)
            .key(&self.pending_key)
            .arg(now)
            .arg(MAINTENANCE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        let reclaimed: usize = self
            .reclaim_script
            .key(&self.leases_key)
            .key(&self.active_key)
            .key(&self.pending_key)
            .arg(now)
            .arg(MAINTENANCE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        Ok(MaintenanceReport {
            promoted,
            reclaimed,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.ping::<String>().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The multiplexed connection closes when its last clone is dropped.
        Ok(())
    }
}
