use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;

use super::Credential;
use crate::errors::ProxyError;

/// Strict round-robin over a fixed, non-empty list of credentials.
///
/// The cursor is a single atomic counter, so concurrent callers each take a
/// distinct slot. Replacing the list keeps the cursor where it is.
pub struct CredentialPool {
    credentials: ArcSwap<Vec<Arc<Credential>>>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Result<Self, ProxyError> {
        if credentials.is_empty() {
            return Err(ProxyError::NoCredentialsAvailable);
        }
        Ok(Self {
            credentials: ArcSwap::from_pointee(credentials.into_iter().map(Arc::new).collect()),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the zero-based index and the credential for the next call.
    pub fn next(&self) -> Result<(usize, Arc<Credential>), ProxyError> {
        let credentials = self.credentials.load();
        if credentials.is_empty() {
            return Err(ProxyError::NoCredentialsAvailable);
        }
        let len = credentials.len();
        // The cursor is kept below `len` so it never wraps out of cycle.
        let previous = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cursor| {
                Some((cursor % len + 1) % len)
            })
            .unwrap_or_else(|cursor| cursor);
        let index = previous % len;
        Ok((index, credentials[index].clone()))
    }

    pub fn replace(&self, credentials: Vec<Credential>) -> Result<(), ProxyError> {
        if credentials.is_empty() {
            return Err(ProxyError::NoCredentialsAvailable);
        }
        self.credentials
            .store(Arc::new(credentials.into_iter().map(Arc::new).collect()));
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Credential>>> {
        self.credentials.load_full()
    }

    pub fn len(&self) -> usize {
        self.credentials.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("len", &self.len())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use smithery_common::CredentialConfig;

    use super::*;

    fn pool(count: usize) -> CredentialPool {
        let credentials = (0..count)
            .map(|i| {
                Credential::from_config(
                    i,
                    CredentialConfig {
                        name: None,
                        access_token: format!("a{i}"),
                        refresh_token: "r".to_string(),
                        token_type: None,
                        expires_in: None,
                        expires_at: 0,
                        user: Value::Null,
                    },
                    "ref",
                )
            })
            .collect();
        CredentialPool::new(credentials).unwrap()
    }

    #[test]
    fn rotation_stays_cyclic_from_a_huge_cursor() {
        let pool = pool(3);
        pool.cursor.store(usize::MAX - 1, Ordering::Relaxed);
        let order: Vec<usize> = (0..5).map(|_| pool.next().unwrap().0).collect();
        assert_eq!(order, vec![2, 0, 1, 2, 0]);
        assert!(pool.cursor.load(Ordering::Relaxed) < 3);
    }

    #[test]
    fn cursor_never_leaves_the_list_bounds() {
        let pool = pool(4);
        for _ in 0..10 {
            pool.next().unwrap();
            assert!(pool.cursor.load(Ordering::Relaxed) < 4);
        }
    }
}
