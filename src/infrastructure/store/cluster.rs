//! Client-side sharding over several stores with a consistent-hash ring

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::domain::store::{
    KeyTtl, MessageHandler, PersistentStore, SetOptions, StoreCommand, StoreReply,
    SubscriptionHandle,
};
use crate::domain::{DomainError, HealthReport, HealthStatus};

/// Virtual nodes placed on the ring per physical node
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Low bits of a cluster cursor carry the node's own cursor
const CURSOR_SHIFT: u32 = 48;
const NODE_CURSOR_MASK: u64 = (1 << CURSOR_SHIFT) - 1;

fn ring_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Consistent-hash ring mapping keys to node indices
///
/// Adding or removing a node only moves the keys on the arcs that node owns.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    virtual_nodes: usize,
    ring: BTreeMap<u64, usize>,
    nodes: Vec<String>,
}

impl ConsistentHashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: BTreeMap::new(),
            nodes: Vec::new(),
        }
    }

    /// Adds a node and returns its index; re-adding an existing id is a no-op
    pub fn add_node(&mut self, node_id: impl Into<String>) -> usize {
        let node_id = node_id.into();

        let index = match self.nodes.iter().position(|n| *n == node_id) {
            Some(index) if self.ring.values().any(|owner| *owner == index) => return index,
            Some(index) => index,
            None => {
                self.nodes.push(node_id.clone());
                self.nodes.len() - 1
            }
        };

        for vnode in 0..self.virtual_nodes {
            self.ring
                .entry(ring_hash(&format!("{}:{}", node_id, vnode)))
                .or_insert(index);
        }

        index
    }

    /// Removes a node's virtual nodes; every node keeps its index
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        let Some(index) = self.nodes.iter().position(|n| n == node_id) else {
            return false;
        };

        let before = self.ring.len();
        self.ring.retain(|_, owner| *owner != index);
        self.ring.len() != before
    }

    pub fn node_ids(&self) -> &[String] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Index of the node owning `key`
    pub fn get_node(&self, key: &str) -> Option<usize> {
        let hash = ring_hash(key);

        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| *node)
    }

    /// Up to `count` distinct nodes walking clockwise from `key`; the first is the owner
    pub fn get_nodes_for_key(&self, key: &str, count: usize) -> Vec<usize> {
        let hash = ring_hash(key);
        let mut nodes = Vec::with_capacity(count);

        for (_, node) in self.ring.range(hash..).chain(self.ring.range(..hash)) {
            if nodes.len() >= count {
                break;
            }
            if !nodes.contains(node) {
                nodes.push(*node);
            }
        }

        nodes
    }

    /// Fraction of the hash space owned by each node, indexed like `node_ids`
    pub fn ownership(&self) -> Vec<f64> {
        let mut owned = vec![0u128; self.nodes.len()];
        let Some((&last, _)) = self.ring.iter().next_back() else {
            return vec![0.0; self.nodes.len()];
        };

        let mut previous = last;
        for (&position, &node) in &self.ring {
            // Each position owns the arc from its predecessor (exclusive) to itself
            let arc = position.wrapping_sub(previous);
            owned[node] += if arc == 0 { 1u128 << 64 } else { arc as u128 };
            previous = position;
        }

        let space = (1u128 << 64) as f64;
        owned.into_iter().map(|arc| arc as f64 / space).collect()
    }
}

/// One node's share of traffic and of the ring
#[derive(Debug, Clone, Serialize)]
pub struct NodeDistribution {
    pub node_id: String,
    pub routed_keys: u64,
    pub ring_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterDistribution {
    pub nodes: Vec<NodeDistribution>,
    pub total_routed: u64,
    /// Busiest node's routed keys over the mean; 1.0 is perfectly even
    pub imbalance: f64,
}

struct ClusterNode {
    id: String,
    store: Arc<dyn PersistentStore>,
    routed: AtomicU64,
}

/// `PersistentStore` that shards keys across node stores
pub struct ClusterStore {
    nodes: Vec<ClusterNode>,
    ring: ConsistentHashRing,
}

impl fmt::Debug for ClusterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterStore")
            .field("nodes", &self.ring.node_ids())
            .field("virtual_nodes", &self.ring.virtual_nodes)
            .finish()
    }
}

impl ClusterStore {
    pub fn new(
        nodes: Vec<(String, Arc<dyn PersistentStore>)>,
        virtual_nodes: usize,
    ) -> Result<Self, DomainError> {
        if nodes.is_empty() {
            return Err(DomainError::configuration("Cluster store needs at least one node"));
        }

        if nodes.len() > (u64::MAX >> CURSOR_SHIFT) as usize {
            return Err(DomainError::configuration(format!(
                "Cluster store supports at most {} nodes",
                u64::MAX >> CURSOR_SHIFT
            )));
        }

        let mut ring = ConsistentHashRing::new(virtual_nodes);
        let mut cluster_nodes = Vec::with_capacity(nodes.len());

        for (id, store) in nodes {
            if ring.node_ids().contains(&id) {
                return Err(DomainError::configuration(format!(
                    "Duplicate cluster node id '{}'",
                    id
                )));
            }

            ring.add_node(id.clone());
            cluster_nodes.push(ClusterNode {
                id,
                store,
                routed: AtomicU64::new(0),
            });
        }

        info!(
            nodes = cluster_nodes.len(),
            virtual_nodes = ring.virtual_nodes,
            "Cluster store ring built"
        );

        Ok(Self {
            nodes: cluster_nodes,
            ring,
        })
    }

    pub fn ring(&self) -> &ConsistentHashRing {
        &self.ring
    }

    /// Owner first, then the next distinct nodes clockwise (replica candidates)
    pub fn get_nodes_for_key(&self, key: &str, count: usize) -> Vec<&str> {
        self.ring
            .get_nodes_for_key(key, count)
            .into_iter()
            .map(|index| self.nodes[index].id.as_str())
            .collect()
    }

    pub fn distribution_stats(&self) -> ClusterDistribution {
        let shares = self.ring.ownership();
        let nodes: Vec<NodeDistribution> = self
            .nodes
            .iter()
            .zip(shares)
            .map(|(node, ring_share)| NodeDistribution {
                node_id: node.id.clone(),
                routed_keys: node.routed.load(Ordering::Relaxed),
                ring_share,
            })
            .collect();

        let total_routed: u64 = nodes.iter().map(|n| n.routed_keys).sum();
        let busiest = nodes.iter().map(|n| n.routed_keys).max().unwrap_or(0);
        let mean = total_routed as f64 / nodes.len() as f64;

        ClusterDistribution {
            imbalance: if mean > 0.0 { busiest as f64 / mean } else { 1.0 },
            nodes,
            total_routed,
        }
    }

    fn route(&self, key: &str) -> usize {
        let index = self.ring.get_node(key).unwrap_or(0);
        self.nodes[index].routed.fetch_add(1, Ordering::Relaxed);
        index
    }

    fn node(&self, key: &str) -> &dyn PersistentStore {
        self.nodes[self.route(key)].store.as_ref()
    }

    fn group_keys(&self, keys: &[String]) -> HashMap<usize, Vec<String>> {
        let mut groups: HashMap<usize, Vec<String>> = HashMap::new();

        for key in keys {
            groups.entry(self.route(key)).or_default().push(key.clone());
        }

        groups
    }

    /// Splits a command into per-node parts; only DEL can span nodes
    fn split_command(&self, command: StoreCommand) -> Vec<(usize, StoreCommand)> {
        match command {
            StoreCommand::Delete { keys } => self
                .group_keys(&keys)
                .into_iter()
                .map(|(node, keys)| (node, StoreCommand::Delete { keys }))
                .collect(),
            StoreCommand::Get { ref key }
            | StoreCommand::Set { ref key, .. }
            | StoreCommand::Incr { ref key, .. }
            | StoreCommand::Expire { ref key, .. } => vec![(self.route(key), command.clone())],
        }
    }
}

#[async_trait]
impl PersistentStore for ClusterStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DomainError> {
        self.node(key).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> Result<bool, DomainError> {
        self.node(key).set(key, value, options).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, DomainError> {
        let groups = self.group_keys(keys);
        let counts = try_join_all(
            groups
                .iter()
                .map(|(node, keys)| self.nodes[*node].store.delete(keys)),
        )
        .await?;

        Ok(counts.into_iter().sum())
    }

    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        self.node(key).exists(key).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, DomainError> {
        self.node(key).ttl(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DomainError> {
        self.node(key).expire(key, ttl).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, DomainError> {
        let groups = self.group_keys(keys);
        let maps = try_join_all(
            groups
                .iter()
                .map(|(node, keys)| self.nodes[*node].store.multi_get(keys)),
        )
        .await?;

        Ok(maps.into_iter().flatten().collect())
    }

    async fn multi_set(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let mut groups: HashMap<usize, Vec<(String, Vec<u8>)>> = HashMap::new();
        for (key, value) in entries {
            groups
                .entry(self.route(key))
                .or_default()
                .push((key.clone(), value.clone()));
        }

        let results = try_join_all(
            groups
                .iter()
                .map(|(node, entries)| self.nodes[*node].store.multi_set(entries, ttl)),
        )
        .await?;

        Ok(results.into_iter().all(|ok| ok))
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        self.node(key).incr(key, by).await
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), DomainError> {
        let index = (cursor >> CURSOR_SHIFT) as usize;
        let node_cursor = cursor & NODE_CURSOR_MASK;

        let node = self.nodes.get(index).ok_or_else(|| {
            DomainError::validation(format!("Scan cursor {} names an unknown node", cursor))
        })?;

        let (next_node_cursor, keys) = node.store.scan(pattern, node_cursor, count).await?;

        if next_node_cursor > NODE_CURSOR_MASK {
            return Err(DomainError::store(format!(
                "Node '{}' returned a scan cursor wider than {} bits",
                node.id, CURSOR_SHIFT
            )));
        }

        let next_cursor = if next_node_cursor != 0 {
            ((index as u64) << CURSOR_SHIFT) | next_node_cursor
        } else if index + 1 < self.nodes.len() {
            ((index + 1) as u64) << CURSOR_SHIFT
        } else {
            0
        };

        Ok((next_cursor, keys))
    }

    /// Runs one sub-pipeline per node; `atomic` holds per node, not across nodes
    async fn pipeline(
        &self,
        commands: Vec<StoreCommand>,
        atomic: bool,
    ) -> Result<Vec<StoreReply>, DomainError> {
        let mut batches: Vec<Vec<StoreCommand>> = vec![Vec::new(); self.nodes.len()];
        let mut slots: Vec<Vec<(usize, usize)>> = Vec::with_capacity(commands.len());

        for command in commands {
            let parts = self.split_command(command);
            let mut positions = Vec::with_capacity(parts.len());

            for (node, part) in parts {
                positions.push((node, batches[node].len()));
                batches[node].push(part);
            }

            slots.push(positions);
        }

        let results = join_all(batches.into_iter().enumerate().map(|(node, batch)| async move {
            if batch.is_empty() {
                return Ok(Vec::new());
            }
            self.nodes[node].store.pipeline(batch, atomic).await
        }))
        .await;

        let replies: Vec<Vec<StoreReply>> = results.into_iter().collect::<Result<_, _>>()?;

        slots
            .into_iter()
            .map(|positions| {
                let mut parts = positions.into_iter().map(|(node, position)| {
                    replies[node].get(position).cloned().ok_or_else(|| {
                        DomainError::store("Pipeline reply missing for a node command")
                    })
                });

                match parts.len() {
                    0 => Ok(StoreReply::Count(0)),
                    1 => parts.next().unwrap_or(Ok(StoreReply::Count(0))),
                    _ => parts.try_fold(StoreReply::Count(0), |total, reply| {
                        match (total, reply?) {
                            (StoreReply::Count(a), StoreReply::Count(b)) => {
                                Ok(StoreReply::Count(a + b))
                            }
                            (_, other) => Err(DomainError::store(format!(
                                "Unexpected reply {:?} for a split delete",
                                other
                            ))),
                        }
                    }),
                }
            })
            .collect()
    }

    async fn publish(&self, channel: &str, message: &[u8]) -> Result<u64, DomainError> {
        self.node(channel).publish(channel, message).await
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, DomainError> {
        self.node(channel).subscribe(channel, handler).await
    }

    async fn health_check(&self) -> HealthReport {
        let reports = join_all(self.nodes.iter().map(|node| node.store.health_check())).await;

        let unhealthy = reports
            .iter()
            .filter(|r| r.status == HealthStatus::Unhealthy)
            .count();

        let mut report = HealthReport::healthy().with_detail("nodes", self.nodes.len());
        for (node, node_report) in self.nodes.iter().zip(reports) {
            report = report.merge(&node.id, node_report);
        }

        if unhealthy > 0 && unhealthy < self.nodes.len() {
            report.status = HealthStatus::Degraded;
        }

        report
    }
}
