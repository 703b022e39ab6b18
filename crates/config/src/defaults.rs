pub fn default_service_name() -> String {
    "matchd".to_string()
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_order_channel_capacity() -> usize {
    10_000
}

pub fn default_log_channel_capacity() -> usize {
    10_000
}

pub fn default_expiry_channel_capacity() -> usize {
    10_000
}

pub fn default_snapshot_channel_capacity() -> usize {
    32
}

pub fn default_request_channel_capacity() -> usize {
    1024
}

pub fn default_commit_batch_size() -> usize {
    100
}

pub fn default_snapshot_interval() -> u64 {
    30
}

pub fn default_snapshot_min_offset_delta() -> i64 {
    1000
}

pub fn default_order_id_window_capacity() -> u64 {
    10_000
}

pub fn default_expiry_tick_millis() -> u64 {
    1000
}

pub fn default_fetch_backoff_initial_millis() -> u64 {
    10
}

pub fn default_fetch_backoff_max_millis() -> u64 {
    5000
}

pub fn default_store_type() -> String {
    "memory".to_string()
}

pub fn default_redis_port() -> u16 {
    6379
}

/// Seven days, matching the retention of the order topics.
pub fn default_snapshot_ttl() -> u64 {
    7 * 24 * 60 * 60
}
