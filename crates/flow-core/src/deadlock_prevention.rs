//! Lock ordering enforcement for the Execution Context and Debug Controller.
//!
//! Both own more than one internal lock (variables, step_outputs, breakpoint
//! index, session state); this registry makes the acquisition order explicit
//! and checkable instead of relying on convention.

use crate::error::CoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy)]
pub struct LockTimeoutConfig {
    pub timeout: Duration,
    pub log_timeout_events: bool,
}

impl LockTimeoutConfig {
    pub fn default_config() -> Self {
        LockTimeoutConfig { timeout: Duration::from_secs(5), log_timeout_events: true }
    }

    pub fn short_timeout() -> Self {
        LockTimeoutConfig { timeout: Duration::from_millis(500), log_timeout_events: false }
    }
}

/// Maps lock names to their acquisition priority (lower acquired first).
#[derive(Debug)]
pub struct LockOrderRegistry {
    lock_priorities: HashMap<String, u64>,
    next_priority: AtomicU64,
}

impl LockOrderRegistry {
    pub fn new() -> Self {
        Self { lock_priorities: HashMap::new(), next_priority: AtomicU64::new(1) }
    }

    /// Priority ordering for the locks the engine actually holds concurrently:
    /// variables/step_outputs on the Execution Context, then the Debug
    /// Controller's session state and breakpoint index.
    pub fn engine_default() -> Self {
        let mut registry = Self::new();
        registry.register_lock("context.variables", 10);
        registry.register_lock("context.step_outputs", 20);
        registry.register_lock("debug.session", 100);
        registry.register_lock("debug.breakpoints", 110);
        registry
    }

    pub fn register_lock(&mut self, lock_name: &str, priority: u64) {
        self.lock_priorities.insert(lock_name.to_string(), priority);
    }

    pub fn register_lock_auto(&mut self, lock_name: &str) -> u64 {
        let priority = self.next_priority.fetch_add(1, Ordering::Relaxed);
        self.lock_priorities.insert(lock_name.to_string(), priority);
        priority
    }

    pub fn get_priority(&self, lock_name: &str) -> Option<u64> {
        self.lock_priorities.get(lock_name).copied()
    }

    pub fn validate_lock_order(&self, current_locks: &[String], new_lock: &str) -> Result<(), CoreError> {
        let new_priority = self
            .get_priority(new_lock)
            .ok_or_else(|| CoreError::Internal(format!("unregistered lock: {}", new_lock)))?;

        for current_lock in current_locks {
            let current_priority = self
                .get_priority(current_lock)
                .ok_or_else(|| CoreError::Internal(format!("unregistered lock: {}", current_lock)))?;
            if new_priority <= current_priority {
                return Err(CoreError::Internal(format!(
                    "lock ordering violation: acquiring '{}' (priority {}) while holding '{}' (priority {})",
                    new_lock, new_priority, current_lock, current_priority
                )));
            }
        }
        Ok(())
    }
}

impl Default for LockOrderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquires a set of locks in priority order with a bounded wait, so a stuck
/// acquisition surfaces as a timeout error rather than hanging forever.
pub struct DeadlockSafeLockManager {
    registry: Arc<RwLock<LockOrderRegistry>>,
    timeout_config: LockTimeoutConfig,
}

impl DeadlockSafeLockManager {
    pub fn new(timeout_config: LockTimeoutConfig) -> Self {
        Self { registry: Arc::new(RwLock::new(LockOrderRegistry::engine_default())), timeout_config }
    }

    pub async fn register_locks(&self, locks: Vec<(&str, u64)>) {
        let mut registry = self.registry.write().await;
        for (lock_name, priority) in locks {
            registry.register_lock(lock_name, priority);
        }
    }

    pub async fn acquire_locks_ordered<'a, T>(
        &self,
        locks: Vec<(&str, &'a Arc<Mutex<T>>)>,
    ) -> Result<Vec<tokio::sync::MutexGuard<'a, T>>, CoreError> {
        let registry = self.registry.read().await;
        let mut lock_info: Vec<_> = locks.into_iter().collect();
        lock_info.sort_by_key(|(name, _)| registry.get_priority(name).unwrap_or(u64::MAX));

        let mut guards = Vec::new();
        for (lock_name, mutex) in lock_info {
            let start = Instant::now();
            match tokio::time::timeout(self.timeout_config.timeout, mutex.lock()).await {
                Ok(guard) => {
                    if self.timeout_config.log_timeout_events && start.elapsed() > Duration::from_millis(100) {
                        log::warn!("acquired lock '{}' after {:?}", lock_name, start.elapsed());
                    }
                    guards.push(guard);
                }
                Err(_) => {
                    return Err(CoreError::Internal(format!(
                        "timeout acquiring lock '{}' after {:?}",
                        lock_name,
                        start.elapsed()
                    )));
                }
            }
        }
        Ok(guards)
    }

    pub async fn acquire_read_locks_ordered<'a, T>(
        &self,
        locks: Vec<(&str, &'a Arc<RwLock<T>>)>,
    ) -> Result<Vec<tokio::sync::RwLockReadGuard<'a, T>>, CoreError> {
        let registry = self.registry.read().await;
        let mut lock_info: Vec<_> = locks.into_iter().collect();
        lock_info.sort_by_key(|(name, _)| registry.get_priority(name).unwrap_or(u64::MAX));

        let mut guards = Vec::new();
        for (lock_name, rwlock) in lock_info {
            let start = Instant::now();
            match tokio::time::timeout(self.timeout_config.timeout, rwlock.read()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    return Err(CoreError::Internal(format!(
                        "timeout acquiring read lock '{}' after {:?}",
                        lock_name,
                        start.elapsed()
                    )));
                }
            }
        }
        Ok(guards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_ascending_priority_order() {
        let mut registry = LockOrderRegistry::new();
        registry.register_lock("lock_a", 10);
        registry.register_lock("lock_b", 20);
        assert!(registry.validate_lock_order(&["lock_a".to_string()], "lock_b").is_ok());
        assert!(registry.validate_lock_order(&["lock_b".to_string()], "lock_a").is_err());
    }

    #[tokio::test]
    async fn acquires_locks_in_registered_order() {
        let manager = DeadlockSafeLockManager::new(LockTimeoutConfig::short_timeout());
        manager.register_locks(vec![("lock_a", 10), ("lock_b", 20)]).await;

        let mutex_a = Arc::new(Mutex::new(1));
        let mutex_b = Arc::new(Mutex::new(2));

        let guards = manager
            .acquire_locks_ordered(vec![("lock_b", &mutex_b), ("lock_a", &mutex_a)])
            .await
            .unwrap();

        assert_eq!(*guards[0], 1);
        assert_eq!(*guards[1], 2);
    }
}
