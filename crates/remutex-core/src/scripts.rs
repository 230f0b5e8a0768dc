//! Server-side scripts for the scripted protocol handler.
//!
//! Each script performs one protocol operation in a single store round trip.
//! The first line of every source is a stable marker: the Redis store hands
//! the source to the server verbatim, while the in-memory store dispatches on
//! the marker and runs equivalent native semantics atomically. Editing a
//! script must keep its marker line unchanged.
//!
//! Shared conventions: KEYS are full lock names; lease values are
//! `"<owner>$<deadline-seconds-float>"` with the owner extending to the
//! rightmost `$`; a value whose deadline cannot be parsed is treated as free.

/// Marker line identifying [`TRY_LOCK`].
pub const TRY_LOCK_MARKER: &str = "-- remutex:try_lock";
/// Marker line identifying [`UNLOCK`].
pub const UNLOCK_MARKER: &str = "-- remutex:unlock";
/// Marker line identifying [`REFRESH`].
pub const REFRESH_MARKER: &str = "-- remutex:refresh";

/// Claim every key or none.
///
/// `KEYS[..]`: lock names. `ARGV[1]`: lease value, `ARGV[2]`: owner,
/// `ARGV[3]`: deadline in Unix milliseconds. Returns 1 when all keys were
/// either absent, expired, or already held by this owner and are now claimed
/// with expiry armed; 0 with no state change otherwise.
pub const TRY_LOCK: &str = r#"-- remutex:try_lock
local time = redis.call('TIME')
local now_ms = time[1] * 1000 + math.floor(time[2] / 1000)
for i = 1, #KEYS do
  local value = redis.call('GET', KEYS[i])
  if value then
    local sep = string.find(value, '%$[^%$]*$')
    local owner = sep and string.sub(value, 1, sep - 1) or ''
    local deadline = sep and tonumber(string.sub(value, sep + 1)) or nil
    if owner ~= ARGV[2] and deadline and deadline * 1000 > now_ms then
      return 0
    end
  end
end
for i = 1, #KEYS do
  redis.call('SET', KEYS[i], ARGV[1])
  redis.call('PEXPIREAT', KEYS[i], tonumber(ARGV[3]))
end
return 1
"#;

/// Release every key still held by this owner and announce the releases.
///
/// `KEYS[..]`: lock names. `ARGV[1]`: owner, `ARGV[2]`: signal channel.
/// Returns the list of released names; publishes the same list as a JSON
/// array when non-empty.
pub const UNLOCK: &str = r#"-- remutex:unlock
local released = {}
for i = 1, #KEYS do
  local value = redis.call('GET', KEYS[i])
  if value then
    local sep = string.find(value, '%$[^%$]*$')
    local owner = sep and string.sub(value, 1, sep - 1) or ''
    if owner == ARGV[1] then
      redis.call('DEL', KEYS[i])
      released[#released + 1] = KEYS[i]
    end
  end
end
if #released > 0 then
  redis.call('PUBLISH', ARGV[2], cjson.encode(released))
end
return released
"#;

/// Extend the lease on every key still held by this owner.
///
/// `KEYS[..]`: lock names. `ARGV[1]`: new lease value, `ARGV[2]`: owner,
/// `ARGV[3]`: new deadline in Unix milliseconds. A key whose value still
/// names this owner is updated even when its recorded deadline has already
/// passed (the holder may reclaim its own stale lease). Returns the number of
/// keys updated.
pub const REFRESH: &str = r#"-- remutex:refresh
local updated = 0
for i = 1, #KEYS do
  local value = redis.call('GET', KEYS[i])
  if value then
    local sep = string.find(value, '%$[^%$]*$')
    local owner = sep and string.sub(value, 1, sep - 1) or ''
    if owner == ARGV[2] then
      redis.call('SET', KEYS[i], ARGV[1])
      redis.call('PEXPIREAT', KEYS[i], tonumber(ARGV[3]))
      updated = updated + 1
    end
  end
end
return updated
"#;

/// The marker line of a script source, used by stores that dispatch natively.
pub fn marker_of(source: &str) -> Option<&str> {
    source.lines().next()
}
