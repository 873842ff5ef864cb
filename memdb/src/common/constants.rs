// doc constants
pub const DOC_ID: &str = "_id";

// path constants
pub const FIELD_SEPARATOR: char = '.';
pub const OPERATOR_PREFIX: char = '$';

// lock constants
pub const LOCK_KEY_SEPARATOR: &str = ":";
pub const INDEX_LOCK_SEPARATOR: &str = "$";

// event constants
pub const MEMDB_EVENT: &str = "memdb_event";

// shard defaults
pub const DEFAULT_LOCK_TTL_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 1_800_000;
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 31017;

// connection monitor
pub const CONNECTION_CHECK_INTERVAL_MS: u64 = 100;

// lock retry defaults
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 5;
pub const DEFAULT_RETRY_FACTOR: u32 = 2;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 100;
pub const DEFAULT_RETRY_WINDOW_MS: u64 = 10_000;
pub const DEFAULT_RETRY_JITTER: f64 = 0.5;

pub const MEMDB_VERSION: &str = env!("CARGO_PKG_VERSION");
