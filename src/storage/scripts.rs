//! Lua scripts implementing the atomic operations server-side.
//!
//! Each script reads the JSON-encoded entry at `KEYS[1]`, runs the same
//! transition as [`AtomicOp::apply`](crate::storage::AtomicOp::apply),
//! stores the result with a millisecond TTL and returns
//! `{allowed (0|1), entry_json}`. Redis runs a script without interleaving
//! any other command, which gives the per-key atomicity the store protocol
//! requires.
//!
//! cjson encodes an empty table as `{}`, so empty arrays are left out of
//! the entry instead.

use std::sync::LazyLock;

use deadpool_redis::redis::Script;

use crate::storage::AtomicOp;

const PRELUDE: &str = r#"
local function num(v, default)
  if type(v) == 'number' then return v end
  return default
end

local state = nil
local raw = redis.call('GET', KEYS[1])
if raw then state = cjson.decode(raw) end

local function store(entry, ttl)
  redis.call('SET', KEYS[1], cjson.encode(entry), 'PX', ttl)
end
"#;

const INCREMENT: &str = r#"
local window_start = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local hits = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local start, count = window_start, 0
if state and num(state.window_start, 0) >= window_start then
  start = state.window_start
  count = num(state.count, 0)
end
count = count + hits

local entry = {count = count, window_start = start, last_update = start}
store(entry, ttl)
return {count <= limit and 1 or 0, cjson.encode(entry)}
"#;

const WEIGHTED_INCREMENT: &str = r#"
local now = tonumber(ARGV[1])
local slot_ms = tonumber(ARGV[2])
local slots = tonumber(ARGV[3])
local limit = tonumber(ARGV[4])
local hits = tonumber(ARGV[5])
local charge = tonumber(ARGV[6]) == 1
local ttl = tonumber(ARGV[7])

local len = slots + 1
local slot_start = math.floor(now / slot_ms) * slot_ms
local start = slot_start
local buckets = {}
for i = 1, len do buckets[i] = 0 end

if state and type(state.buckets) == 'table' and #state.buckets == len then
  local stored_start = num(state.window_start, 0)
  if stored_start >= slot_start then
    start = stored_start
    for i = 1, len do buckets[i] = state.buckets[i] end
  else
    local shift = math.floor((slot_start - stored_start) / slot_ms)
    if shift < len then
      for i = 1, len - shift do buckets[i] = state.buckets[i + shift] end
    end
  end
end

local elapsed = math.min(math.max(now - start, 0), slot_ms)
local estimate = buckets[1] * (1 - elapsed / slot_ms)
for i = 2, len do estimate = estimate + buckets[i] end

local allowed = estimate + hits <= limit + 1e-9
if allowed or charge then buckets[len] = buckets[len] + hits end

local entry = {count = 0, window_start = start, last_update = start, buckets = buckets}
store(entry, ttl)
return {allowed and 1 or 0, cjson.encode(entry)}
"#;

const PRUNE_COUNT_APPEND: &str = r#"
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local hits = tonumber(ARGV[4])
local charge = tonumber(ARGV[5]) == 1
local ttl = tonumber(ARGV[6])

local log = {}
if state and type(state.timestamps) == 'table' then
  for _, ts in ipairs(state.timestamps) do
    if ts + window_ms > now then table.insert(log, ts) end
  end
end

local count = #log
local allowed = count + hits <= limit
local appended = 0
if allowed then
  appended = hits
elseif charge then
  appended = math.max(math.min(limit - count, hits), 0)
end

local pos = 1
while pos <= #log and log[pos] <= now do pos = pos + 1 end
for _ = 1, appended do table.insert(log, pos, now) end

local entry = {count = #log, window_start = log[1] or 0, last_update = log[#log] or 0}
if #log > 0 then entry.timestamps = log end
store(entry, ttl)
return {allowed and 1 or 0, cjson.encode(entry)}
"#;

const ADVANCE_TAT: &str = r#"
local now = tonumber(ARGV[1])
local emission = tonumber(ARGV[2])
local tolerance = tonumber(ARGV[3])
local hits = tonumber(ARGV[4])
local charge = tonumber(ARGV[5]) == 1
local ttl = tonumber(ARGV[6])

local now_us = now * 1000
local tat = now_us
if state then tat = num(state.tat, now_us) end
local base = math.max(tat, now_us)

local allowed = base + emission * math.max(hits - 1, 0) <= now_us + tolerance + 999
local stored = tat
if allowed or charge then stored = base + emission * hits end

-- cjson keeps 14 significant digits; a microsecond TAT needs 16.
local json = string.format(
  '{"count":0,"window_start":0,"tat":%.0f,"last_update":%.0f}', stored, now)
redis.call('SET', KEYS[1], json, 'PX', ttl)
return {allowed and 1 or 0, json}
"#;

const REFILL_AND_TAKE: &str = r#"
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])
local hits = tonumber(ARGV[4])
local charge = tonumber(ARGV[5]) == 1
local ttl = tonumber(ARGV[6])

local tokens, last = capacity, now
if state and type(state.tokens) == 'number' then
  tokens = state.tokens
  last = num(state.last_update, now)
end

local elapsed = math.max(now - last, 0) / 1000
tokens = math.min(math.max(tokens + elapsed * rate, 0), capacity)
last = math.max(last, now)

local allowed = tokens + 1e-9 >= hits
if allowed or charge then tokens = math.max(tokens - hits, 0) end

local entry = {count = 0, window_start = 0, tokens = tokens, last_update = last}
store(entry, ttl)
return {allowed and 1 or 0, cjson.encode(entry)}
"#;

fn compile(body: &str) -> Script {
    Script::new(&format!("{}{}", PRELUDE, body))
}

static INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| compile(INCREMENT));
static WEIGHTED_INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| compile(WEIGHTED_INCREMENT));
static PRUNE_COUNT_APPEND_SCRIPT: LazyLock<Script> = LazyLock::new(|| compile(PRUNE_COUNT_APPEND));
static ADVANCE_TAT_SCRIPT: LazyLock<Script> = LazyLock::new(|| compile(ADVANCE_TAT));
static REFILL_AND_TAKE_SCRIPT: LazyLock<Script> = LazyLock::new(|| compile(REFILL_AND_TAKE));

/// The script implementing `op`.
pub(crate) fn script_for(op: &AtomicOp) -> &'static Script {
    match op {
        AtomicOp::Increment { .. } => &INCREMENT_SCRIPT,
        AtomicOp::WeightedIncrement { .. } => &WEIGHTED_INCREMENT_SCRIPT,
        AtomicOp::PruneCountAppend { .. } => &PRUNE_COUNT_APPEND_SCRIPT,
        AtomicOp::AdvanceTat { .. } => &ADVANCE_TAT_SCRIPT,
        AtomicOp::RefillAndTake { .. } => &REFILL_AND_TAKE_SCRIPT,
    }
}
