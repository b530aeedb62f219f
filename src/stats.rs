use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::account::{Account, Progress, WeakAccount};
use crate::config::{Config, DataRateUnit};
use crate::limiter::{Limiter, TokenBucket, Unlimited};
use crate::size::{format_duration, SizeSuffix};

/// Transfers currently being accounted, by name.
///
/// Entries are weak so a forgotten account does not outlive its last handle.
pub struct InProgress {
    accounts: DashMap<String, WeakAccount>,
}

impl InProgress {
    pub fn new() -> Self {
        Self { accounts: DashMap::new() }
    }

    pub fn set(&self, name: &str, account: &Account) {
        self.accounts.insert(name.to_string(), account.downgrade());
    }

    /// Remove `name` if it still refers to `account`. A newer transfer
    /// registered under the same name is left alone.
    pub fn clear(&self, name: &str, account: &Account) {
        self.accounts.remove_if(name, |_, weak| weak.is(account));
    }

    pub(crate) fn clear_dead(&self, name: &str) {
        self.accounts.remove_if(name, |_, weak| weak.is_dead());
    }

    pub fn get(&self, name: &str) -> Option<Account> {
        let weak = self.accounts.get(name)?.value().clone();
        weak.upgrade()
    }

    /// Live accounts sorted by name.
    pub fn list(&self) -> Vec<Account> {
        // Snapshot the weak handles first: upgrading and dropping an account
        // while a shard is locked could re-enter the map from its destructor.
        let snapshot: Vec<(String, WeakAccount)> =
            self.accounts.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let mut live: Vec<(String, Account)> = snapshot
            .into_iter()
            .filter_map(|(name, weak)| weak.upgrade().map(|account| (name, account)))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live.into_iter().map(|(_, account)| account).collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Default for InProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide accounting state shared by every [`Account`]: the
/// configuration, the bandwidth limiter, the global byte counter and the
/// in-progress registry.
pub struct Stats {
    config: Config,
    limiter: Box<dyn Limiter>,
    in_progress: InProgress,
    bytes: AtomicU64,
    start: Instant,
}

impl Stats {
    /// Stats with a limiter built from `config.bwlimit`.
    pub fn new(config: Config) -> Self {
        let limiter: Box<dyn Limiter> = if config.bwlimit > 0 {
            Box::new(TokenBucket::new(config.bwlimit, config.bwlimit_burst))
        } else {
            Box::new(Unlimited)
        };
        Self::with_boxed_limiter(config, limiter)
    }

    pub fn with_limiter<L: Limiter + 'static>(config: Config, limiter: L) -> Self {
        Self::with_boxed_limiter(config, Box::new(limiter))
    }

    fn with_boxed_limiter(config: Config, limiter: Box<dyn Limiter>) -> Self {
        Self {
            config,
            limiter,
            in_progress: InProgress::new(),
            bytes: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn in_progress(&self) -> &InProgress {
        &self.in_progress
    }

    /// Add `n` bytes to the global transfer count.
    pub fn bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn limit(&self, n: usize) {
        self.limiter.limit(n);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn progress(&self, name: &str) -> (u64, i64) {
        self.in_progress.get(name).as_ref().progress()
    }

    pub fn speed(&self, name: &str) -> (f64, f64) {
        self.in_progress.get(name).as_ref().speed()
    }

    pub fn eta(&self, name: &str) -> Option<Duration> {
        self.in_progress.get(name).as_ref().eta()
    }

    /// Multi-line summary of the whole process followed by one line per
    /// transfer in progress.
    pub fn render(&self) -> String {
        let elapsed = self.elapsed();
        let total = self.total_bytes();
        let mut rate = total as f64 / elapsed.as_secs_f64().max(1e-3);
        if self.config.data_rate_unit == DataRateUnit::Bits {
            rate *= 8.0;
        }
        let mut out = format!(
            "Transferred:   {} ({}/s)\nElapsed time:  {}\n",
            SizeSuffix(total as i64),
            SizeSuffix::from(rate),
            format_duration(elapsed),
        );
        let accounts = self.in_progress.list();
        if !accounts.is_empty() {
            out.push_str("Transferring:\n");
            for account in accounts {
                out.push_str(" * ");
                out.push_str(&account.render());
                out.push('\n');
            }
        }
        out
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
