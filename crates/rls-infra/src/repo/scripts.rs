//! Atomic server-side scripts.
//!
//! Each limiter executes as a single script so the read-modify-write cycle
//! is indivisible across service replicas; hash-tagged keys keep one
//! (rule, dim)'s state on a single cluster shard.

use redis::{Script, Value};

/// Sliding window over a sorted set of request timestamps.
/// KEYS[1] = zset key; ARGV = now_ms, window_ms, limit.
/// Returns {allowed, count_in_window}.
const SLIDING: &str = r#"
local now    = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit  = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, now - window)
redis.call('ZADD', KEYS[1], now, now)
redis.call('PEXPIRE', KEYS[1], window + 1000)

local cnt = redis.call('ZCARD', KEYS[1])
if cnt > limit then
  return {0, cnt}
else
  return {1, cnt}
end
"#;

/// Token bucket stored as a hash {tokens, last_ts}.
/// KEYS[1] = bucket key; ARGV = capacity, refill_per_ms, now_ms, ttl_ms.
/// Returns {allowed, tokens_after}.
const TOKEN: &str = r#"
local cap  = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now  = tonumber(ARGV[3])
local ttl  = tonumber(ARGV[4])

local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens') or cap)
local last   = tonumber(redis.call('HGET', KEYS[1], 'last_ts') or now)

if now > last then
  local add = (now - last) * rate
  if add > 0 then
    tokens = math.min(cap, tokens + add)
  end
end

local ok = 0
if tokens >= 1 then
  tokens = tokens - 1
  ok = 1
end

redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_ts', now)
redis.call('PEXPIRE', KEYS[1], ttl)

return {ok, tokens}
"#;

/// Leaky bucket stored as a hash {level, last_ts}.
/// KEYS[1] = bucket key; ARGV = rate_per_ms, now_ms, max_queue, ttl_ms.
/// Returns {allowed, level_after}.
const LEAKY: &str = r#"
local rate = tonumber(ARGV[1])
local now  = tonumber(ARGV[2])
local maxq = tonumber(ARGV[3])
local ttl  = tonumber(ARGV[4])

local lvl  = tonumber(redis.call('HGET', KEYS[1], 'level') or 0)
local last = tonumber(redis.call('HGET', KEYS[1], 'last_ts') or now)

if now > last then
  local leak = (now - last) * rate
  lvl = math.max(0, lvl - leak)
end

local ok = 0
if lvl < maxq then
  lvl = lvl + 1
  ok = 1
end

redis.call('HSET', KEYS[1], 'level', lvl, 'last_ts', now)
redis.call('PEXPIRE', KEYS[1], ttl)

return {ok, lvl}
"#;

/// Counter with TTL bound to the first increment.
/// KEYS[1] = counter key; ARGV[1] = ttl_ms. Returns the new count.
const INCR_EXPIRE: &str = r#"
local cnt = redis.call('INCR', KEYS[1])
if cnt == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return cnt
"#;

/// Check-before-increment over the hour/day quota buckets.
/// KEYS = hour key, day key; ARGV = h_limit, d_limit, h_ttl_s, d_ttl_s,
/// default_remaining. Returns {allowed, scope, current_or_remaining}.
const QUOTA: &str = r#"
local h_limit = tonumber(ARGV[1])
local d_limit = tonumber(ARGV[2])
local h_ttl   = tonumber(ARGV[3])
local d_ttl   = tonumber(ARGV[4])
local default_rem = tonumber(ARGV[5])

local h_current = tonumber(redis.call('GET', KEYS[1]) or '0')
local d_current = tonumber(redis.call('GET', KEYS[2]) or '0')

if h_limit > 0 and h_current + 1 > h_limit then
  return {0, 'hour', h_current}
end
if d_limit > 0 and d_current + 1 > d_limit then
  return {0, 'day', d_current}
end

local h_new = redis.call('INCR', KEYS[1])
local d_new = redis.call('INCR', KEYS[2])

if h_new == 1 then redis.call('EXPIRE', KEYS[1], h_ttl) end
if d_new == 1 then redis.call('EXPIRE', KEYS[2], d_ttl) end

local h_rem = h_limit > 0 and (h_limit - h_new) or default_rem
local d_rem = d_limit > 0 and (d_limit - d_new) or default_rem

return {1, 'ok', math.min(h_rem, d_rem)}
"#;

/// Preloaded script handles, built once per repository.
pub(crate) struct Scripts {
    pub sliding: Script,
    pub token: Script,
    pub leaky: Script,
    pub incr_expire: Script,
    pub quota: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            sliding: Script::new(SLIDING),
            token: Script::new(TOKEN),
            leaky: Script::new(LEAKY),
            incr_expire: Script::new(INCR_EXPIRE),
            quota: Script::new(QUOTA),
        }
    }
}

/// Integer out of a script reply element.
pub(crate) fn script_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn script_str(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// `{int, int}` reply shared by the three limiter scripts.
pub(crate) fn script_pair(value: &Value) -> Option<(i64, i64)> {
    match value {
        Value::Array(items) if items.len() >= 2 => {
            Some((script_int(&items[0])?, script_int(&items[1])?))
        }
        _ => None,
    }
}

/// `{int, string, int}` reply of the quota script.
pub(crate) fn script_triple(value: &Value) -> Option<(i64, String, i64)> {
    match value {
        Value::Array(items) if items.len() >= 3 => Some((
            script_int(&items[0])?,
            script_str(&items[1])?,
            script_int(&items[2])?,
        )),
        _ => None,
    }
}
