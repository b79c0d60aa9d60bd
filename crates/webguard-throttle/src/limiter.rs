//! Sliding-window rate limiter.
//!
//! Each window is a sorted set keyed `identifier + throttle_key` whose members
//! are request timestamps. All windows touched by one request are pruned,
//! counted and updated in a single atomic procedure.

use std::sync::LazyLock;

use async_trait::async_trait;
use redis::{FromRedisValue, RedisResult, Script, Value};
use uuid::Uuid;
use webguard_cache::{AtomicProcedure, CacheBackend, CacheResult, LocalTxn, unix_now};

use crate::ThrottleResult;
use crate::rule::LimitRule;

/// Decides whether a request exceeds any of the applicable rules.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Seconds to wait for every rule the request exceeds. Empty means the
    /// request is admitted.
    async fn is_deny(&self, identifier: &str, rules: &[&LimitRule]) -> ThrottleResult<Vec<f64>>;
}

/// Window key for one caller under one rule.
pub fn window_key(identifier: &str, rule: &LimitRule) -> String {
    format!("{identifier}{}", rule.throttle_key)
}

// ARGV[1] = now, ARGV[2] = member nonce, then (max_requests, interval) per key.
static SLIDING_WINDOW_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local now = tonumber(ARGV[1])
local member = ARGV[1] .. ':' .. ARGV[2]
local result = {}
for i, key in ipairs(KEYS) do
    local limit = tonumber(ARGV[1 + 2 * i])
    local interval = tonumber(ARGV[2 + 2 * i])
    redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - interval))
    local count = redis.call('ZCARD', key)
    -- rules sharing a key record the request once
    if not redis.call('ZSCORE', key, member) and count <= limit then
        redis.call('ZADD', key, now, member)
        count = count + 1
    end
    redis.call('EXPIRE', key, math.ceil(interval))
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    result[i] = {count, oldest[2] or ARGV[1]}
end
return result
",
    )
});

/// Count and oldest retained timestamp of one window after the update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowState {
    pub count: u64,
    pub oldest: f64,
}

// Lua numbers come back truncated to integers, so the score travels as a string.
impl FromRedisValue for WindowState {
    fn from_redis_value(value: &Value) -> RedisResult<Self> {
        let (count, oldest): (u64, String) = FromRedisValue::from_redis_value(value)?;
        let oldest = oldest.parse::<f64>().map_err(|err| {
            redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "window score is not a number",
                err.to_string(),
            ))
        })?;
        Ok(Self { count, oldest })
    }
}

#[derive(Debug, Clone)]
struct SlidingWindow {
    keys: Vec<String>,
    limits: Vec<(u64, f64)>,
    now: f64,
    nonce: String,
}

impl SlidingWindow {
    fn member(&self) -> String {
        format!("{}:{}", self.now, self.nonce)
    }
}

impl AtomicProcedure for SlidingWindow {
    type Output = Vec<WindowState>;

    const NAME: &'static str = "sliding_window";

    fn script(&self) -> &'static Script {
        &SLIDING_WINDOW_SCRIPT
    }

    fn keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    fn args(&self) -> Vec<Vec<u8>> {
        let mut args = vec![
            self.now.to_string().into_bytes(),
            self.nonce.clone().into_bytes(),
        ];
        for (max_requests, interval) in &self.limits {
            args.push(max_requests.to_string().into_bytes());
            args.push(interval.to_string().into_bytes());
        }
        args
    }

    fn run_local(&self, txn: &mut LocalTxn<'_>) -> CacheResult<Vec<WindowState>> {
        let member = self.member();
        let mut states = Vec::with_capacity(self.keys.len());

        for (key, (max_requests, interval)) in self.keys.iter().zip(&self.limits) {
            txn.zrem_older_than(key, self.now - interval)?;
            let mut count = txn.zcard(key)? as u64;
            let recorded = txn.zscore(key, &member)?.is_some();
            if !recorded && count <= *max_requests {
                txn.zadd(key, self.now, &member)?;
                count += 1;
            }
            txn.expire_at(key, self.now + interval.ceil());

            let oldest = txn
                .zrange(key)?
                .first()
                .map_or(self.now, |(_, score)| *score);
            states.push(WindowState { count, oldest });
        }
        Ok(states)
    }
}

/// [`Limiter`] backed by the shared cache.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    cache: CacheBackend,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("cache", &self.cache.mode())
            .finish()
    }
}

impl SlidingWindowLimiter {
    pub fn new(cache: CacheBackend) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    async fn is_deny(&self, identifier: &str, rules: &[&LimitRule]) -> ThrottleResult<Vec<f64>> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let now = unix_now();
        let procedure = SlidingWindow {
            keys: rules.iter().map(|rule| window_key(identifier, rule)).collect(),
            limits: rules
                .iter()
                .map(|rule| (rule.max_requests, rule.interval.as_secs_f64()))
                .collect(),
            now,
            nonce: Uuid::new_v4().simple().to_string(),
        };
        let states = self.cache.run_procedure(&procedure).await?;

        let waits: Vec<f64> = rules
            .iter()
            .zip(&states)
            .filter(|(rule, state)| state.count > rule.max_requests)
            .map(|(rule, state)| state.oldest + rule.interval.as_secs_f64() - now)
            .collect();

        if waits.is_empty() {
            metrics::counter!("webguard_throttle_admitted_total").increment(1);
        } else {
            metrics::counter!("webguard_throttle_denied_total").increment(1);
            tracing::debug!(
                identifier = %identifier,
                rules = rules.len(),
                exceeded = waits.len(),
                "Rate limit exceeded"
            );
        }
        Ok(waits)
    }
}
