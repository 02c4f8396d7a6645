//! Process-wide invalidation cache for derived query results.
//!
//! Keys are colon-joined, e.g. `application:ACME:lastbuilds`. The engine
//! wipes `application:{project_key}:*` on every build status change and on
//! application mutations. Purely a performance layer: a miss always falls
//! through to the database.

use std::collections::HashMap;
use std::sync::Mutex;

/// Build a cache key from its parts: `key(&["application", "ACME", "*"])`.
pub fn key(parts: &[&str]) -> String {
    parts.join(":")
}

#[derive(Default)]
pub struct QueryCache {
    inner: Mutex<HashMap<String, serde_json::Value>>,
}

impl QueryCache {
    pub fn new() -> QueryCache {
        QueryCache::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().expect("cache poisoned").get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner
            .lock()
            .expect("cache poisoned")
            .insert(key.into(), value);
    }

    /// Remove every entry matching the pattern. A trailing `*` matches any
    /// suffix; anything else is an exact key.
    pub fn delete_all(&self, pattern: &str) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        match pattern.strip_suffix('*') {
            Some(prefix) => inner.retain(|k, _| !k.starts_with(prefix)),
            None => {
                inner.remove(pattern);
            }
        }
    }

    /// Wipe derived application queries for a project.
    pub fn invalidate_application(&self, project_key: &str) {
        self.delete_all(&key(&["application", project_key, "*"]));
    }
}
