use std::time::Duration;

/// Time a pending transaction waits for a reply before the cleanup sweep
/// expires it.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_millis(5000);

/// Cadence of the expiration sweep over pending transactions.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_millis(1000);

/// Distinct peers a router lookup asks before giving up.
pub const DEFAULT_ROUTER_HOP_LIMIT: usize = 3;

/// Starting recursion depth of introset lookups; each forwarding hop
/// decrements it, and at zero queries turn iterative.
pub const DEFAULT_INTRO_RECURSION_DEPTH: u64 = 4;

/// How many locally stored introsets a single tag query may return.
pub const DEFAULT_MAX_LOCAL_TAG_RESULTS: usize = 1;

/// Bound on the local introset store.
pub const DEFAULT_MAX_STORED_INTROSETS: usize = 1000;

/// DHT tunables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Defaults to [DEFAULT_JOB_TIMEOUT].
    pub job_timeout: Duration,
    /// Defaults to [DEFAULT_CLEANUP_INTERVAL].
    pub cleanup_interval: Duration,
    /// Defaults to [DEFAULT_ROUTER_HOP_LIMIT].
    pub router_hop_limit: usize,
    /// Defaults to [DEFAULT_INTRO_RECURSION_DEPTH].
    pub intro_recursion_depth: u64,
    /// Defaults to [DEFAULT_MAX_LOCAL_TAG_RESULTS].
    pub max_local_tag_results: usize,
    /// Defaults to [DEFAULT_MAX_STORED_INTROSETS].
    pub max_stored_introsets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job_timeout: DEFAULT_JOB_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            router_hop_limit: DEFAULT_ROUTER_HOP_LIMIT,
            intro_recursion_depth: DEFAULT_INTRO_RECURSION_DEPTH,
            max_local_tag_results: DEFAULT_MAX_LOCAL_TAG_RESULTS,
            max_stored_introsets: DEFAULT_MAX_STORED_INTROSETS,
        }
    }
}
