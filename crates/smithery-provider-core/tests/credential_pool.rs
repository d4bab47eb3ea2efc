use std::collections::HashMap;
use std::sync::Arc;

use smithery_common::CredentialConfig;
use smithery_provider_core::{Credential, CredentialPool, ProxyError};

fn credentials(count: usize) -> Vec<Credential> {
    (0..count)
        .map(|i| {
            Credential::from_config(
                i,
                CredentialConfig {
                    name: Some(format!("cred-{i}")),
                    access_token: format!("token-{i}"),
                    refresh_token: "r".to_string(),
                    token_type: None,
                    expires_in: None,
                    expires_at: 0,
                    user: serde_json::Value::Null,
                },
                "ref",
            )
        })
        .collect()
}

#[test]
fn empty_pool_is_rejected() {
    assert!(matches!(
        CredentialPool::new(Vec::new()),
        Err(ProxyError::NoCredentialsAvailable)
    ));
}

#[test]
fn selection_is_cyclic_in_configured_order() {
    let pool = CredentialPool::new(credentials(3)).unwrap();
    let order: Vec<usize> = (0..7).map(|_| pool.next().unwrap().0).collect();
    assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);

    let (index, credential) = pool.next().unwrap();
    assert_eq!(index, 1);
    assert_eq!(credential.name, "cred-1");
}

#[test]
fn counts_are_balanced_for_any_n() {
    for k in 1..=4usize {
        for n in 0..=13usize {
            let pool = CredentialPool::new(credentials(k)).unwrap();
            let mut counts = vec![0usize; k];
            for _ in 0..n {
                counts[pool.next().unwrap().0] += 1;
            }
            for count in counts {
                assert!(count == n / k || count == n.div_ceil(k), "k={k} n={n}");
            }
        }
    }
}

#[test]
fn replace_swaps_list_and_keeps_cursor() {
    let pool = CredentialPool::new(credentials(2)).unwrap();
    assert_eq!(pool.next().unwrap().0, 0);

    pool.replace(credentials(3)).unwrap();
    assert_eq!(pool.len(), 3);
    assert_eq!(pool.next().unwrap().0, 1);
    assert_eq!(pool.next().unwrap().0, 2);

    assert!(matches!(
        pool.replace(Vec::new()),
        Err(ProxyError::NoCredentialsAvailable)
    ));
    assert_eq!(pool.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_split_evenly() {
    let pool = Arc::new(CredentialPool::new(credentials(4)).unwrap());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            (0..100).map(|_| pool.next().unwrap().0).collect::<Vec<_>>()
        }));
    }

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for handle in handles {
        for index in handle.await.unwrap() {
            *counts.entry(index).or_default() += 1;
        }
    }
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|count| *count == 200));
}
