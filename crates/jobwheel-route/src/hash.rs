//! Consistent-hash routing. A job keeps landing on the same executor while
//! the candidate set is stable, and only jobs owned by a removed executor
//! move when it goes away.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use jobwheel_core::JobId;

use crate::router::ExecutorRouter;

const VIRTUAL_NODES: usize = 100;

fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[derive(Debug, Default)]
pub struct ConsistentHashRouter;

impl ConsistentHashRouter {
    pub fn new() -> Self {
        Self
    }

    fn ring(addresses: &[String]) -> BTreeMap<u64, &str> {
        let mut ring = BTreeMap::new();
        for address in addresses {
            for node in 0..VIRTUAL_NODES {
                ring.insert(hash_key(&format!("SHARD-{address}-NODE-{node}")), address.as_str());
            }
        }
        ring
    }
}

impl ExecutorRouter for ConsistentHashRouter {
    fn select_address(&self, job_id: JobId, addresses: &[String]) -> Option<String> {
        let ring = Self::ring(addresses);
        let point = hash_key(&job_id.to_string());
        ring.range(point..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, address)| address.to_string())
    }
}
