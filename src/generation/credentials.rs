//! Explicit API credential pool with forward-circular rotation.
//!
//! Rotation state lives in one injectable object instead of per-component
//! mutable fields, so retry behavior is testable without process-wide
//! singletons. Cycles are serialized by the scheduler, so a plain mutex is
//! enough here.

use std::sync::Mutex;

/// A pool of API keys rotated on rate-limit signals.
#[derive(Debug)]
pub struct CredentialPool {
    keys: Vec<String>,
    index: Mutex<usize>,
}

impl CredentialPool {
    /// Create a pool from a non-empty key list.
    ///
    /// # Panics
    ///
    /// Panics if `keys` is empty; config validation rejects that earlier.
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        assert!(!keys.is_empty(), "credential pool requires at least one key");
        Self {
            keys,
            index: Mutex::new(0),
        }
    }

    /// The currently selected key.
    #[must_use]
    pub fn current(&self) -> String {
        let index = self.index.lock().expect("credential pool lock poisoned");
        self.keys[*index].clone()
    }

    /// Advance to the next key (circularly) and return it.
    pub fn rotate(&self) -> String {
        let mut index = self.index.lock().expect("credential pool lock poisoned");
        *index = (*index + 1) % self.keys.len();
        self.keys[*index].clone()
    }

    /// Number of distinct keys, which bounds rotation retry loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable() {
        let pool = CredentialPool::new(vec!["a".into(), "b".into()]);
        assert_eq!(pool.current(), "a");
        assert_eq!(pool.current(), "a");
    }

    #[test]
    fn test_rotation_is_forward_circular() {
        let pool = CredentialPool::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(pool.rotate(), "b");
        assert_eq!(pool.rotate(), "c");
        assert_eq!(pool.rotate(), "a");
        assert_eq!(pool.current(), "a");
    }

    #[test]
    fn test_single_key_rotates_to_itself() {
        let pool = CredentialPool::new(vec!["only".into()]);
        assert_eq!(pool.rotate(), "only");
        assert_eq!(pool.len(), 1);
    }
}
