//! Credential Pool
//!
//! An ordered set of API keys with a single active-key cursor.

use rand::Rng;
use std::fmt;

/// Pool of API keys owned by one client
#[derive(Clone, Default)]
pub struct CredentialPool {
    /// Key values, in resolution order
    keys: Vec<String>,

    /// Index of the active key; meaningless while `keys` is empty
    cursor: usize,
}

impl CredentialPool {
    /// Create a pool whose cursor starts on a uniformly random key
    pub fn randomized(keys: Vec<String>) -> Self {
        let cursor = if keys.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..keys.len())
        };
        Self { keys, cursor }
    }

    /// Create a pool whose cursor starts on the first key
    pub fn at_start(keys: Vec<String>) -> Self {
        Self { keys, cursor: 0 }
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of keys in the pool
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// 0-based index of the active key
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 1-based position of the active key, 0 when the pool is empty
    pub fn position(&self) -> usize {
        if self.keys.is_empty() {
            0
        } else {
            self.cursor + 1
        }
    }

    /// The active key
    pub fn current(&self) -> Option<&str> {
        self.keys.get(self.cursor).map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    /// Advance to the next key, wrapping at the end. No-op on an empty pool.
    pub fn rotate(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        self.cursor = (self.cursor + 1) % self.keys.len();
    }

    /// Make `index` the active key. Out-of-range indexes are ignored.
    pub fn select(&mut self, index: usize) {
        if index < self.keys.len() {
            self.cursor = index;
        }
    }

    /// Replace the keys and put the cursor back on the first one
    pub fn reset(&mut self, keys: Vec<String>) {
        self.keys = keys;
        self.cursor = 0;
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field(
                "keys",
                &self.keys.iter().map(|k| mask_key(k)).collect::<Vec<_>>(),
            )
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Shorten a key for logs: first 10 characters followed by `...`
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(10).collect();
    format!("{}...", prefix)
}
