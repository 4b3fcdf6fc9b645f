//! Group registry: which connections receive which broadcasts.
//!
//! [`GroupRegistry`] is the seam for swapping in a shared message-bus backend
//! when fan-out has to span several server processes. The in-memory default
//! keeps two sharded maps (group -> members, connection -> groups) so that
//! join/leave/broadcast on different groups never contend on one lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, Utf8Bytes};
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;

use super::{ConnectionHandle, ConnectionId, GroupName};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already closed")]
    ConnectionClosed(ConnectionId),
}

#[async_trait]
pub trait GroupRegistry: Send + Sync {
    /// Register `conn` under `group`. Re-joining is a no-op.
    async fn join(&self, group: &GroupName, conn: &ConnectionHandle) -> Result<(), RegistryError>;

    /// Remove `id` from `group` if present.
    async fn leave(&self, group: &GroupName, id: ConnectionId);

    /// Remove `id` from every group. Safe after a partial join and safe to repeat.
    async fn leave_all(&self, id: ConnectionId);

    /// Deliver `frame` to every current member of `group`; returns how many
    /// members accepted it.
    async fn broadcast(&self, group: &GroupName, frame: String) -> usize;
}

struct Member {
    handle: ConnectionHandle,
    consecutive_failures: AtomicU32,
}

/// Delivery counters, mostly for logs and tests.
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub evicted: AtomicU64,
}

pub struct InMemoryGroupRegistry {
    groups: DashMap<GroupName, HashMap<ConnectionId, Arc<Member>>>,
    memberships: DashMap<ConnectionId, HashSet<GroupName>>,
    max_delivery_failures: u32,
    stats: RegistryStats,
}

impl InMemoryGroupRegistry {
    pub fn new(max_delivery_failures: u32) -> Self {
        Self {
            groups: DashMap::new(),
            memberships: DashMap::new(),
            max_delivery_failures: max_delivery_failures.max(1),
            stats: RegistryStats::default(),
        }
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Connection ids currently in `group`, sorted.
    pub fn members(&self, group: &GroupName) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .groups
            .get(group)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Groups `id` currently belongs to, sorted.
    pub fn groups_of(&self, id: ConnectionId) -> Vec<GroupName> {
        let mut groups: Vec<GroupName> = self
            .memberships
            .get(&id)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn remove_member(&self, group: &GroupName, id: ConnectionId) {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(&id);
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
    }

    fn remove_everywhere(&self, id: ConnectionId) -> usize {
        let Some((_, groups)) = self.memberships.remove(&id) else {
            return 0;
        };
        for group in &groups {
            self.remove_member(group, id);
        }
        groups.len()
    }

    /// Drop a connection that stopped accepting frames and tell its session to close.
    /// The session's writer sends the close frame; the outbound buffer may be full.
    fn evict(&self, member: &Member, reason: &'static str) {
        let id = member.handle.id;
        if self.remove_everywhere(id) == 0 {
            // Another broadcast got here first.
            return;
        }
        self.stats.evicted.fetch_add(1, Ordering::Relaxed);
        member.handle.evicted.cancel();
        tracing::warn!(connection = %id, reason, "Evicted connection from registry");
    }
}

#[async_trait]
impl GroupRegistry for InMemoryGroupRegistry {
    async fn join(&self, group: &GroupName, conn: &ConnectionHandle) -> Result<(), RegistryError> {
        if conn.sender.is_closed() || conn.evicted.is_cancelled() {
            return Err(RegistryError::ConnectionClosed(conn.id));
        }

        // Reverse index first: leave_all walks it, so a concurrent teardown
        // can always find what this join is about to add.
        self.memberships
            .entry(conn.id)
            .or_default()
            .insert(group.clone());

        let member = Arc::new(Member {
            handle: conn.clone(),
            consecutive_failures: AtomicU32::new(0),
        });
        self.groups
            .entry(group.clone())
            .or_default()
            .entry(conn.id)
            .or_insert(member);

        // leave_all may have raced between the two inserts above.
        let still_registered = self
            .memberships
            .get(&conn.id)
            .map(|g| g.contains(group))
            .unwrap_or(false);
        if !still_registered {
            self.remove_member(group, conn.id);
            return Err(RegistryError::ConnectionClosed(conn.id));
        }

        tracing::debug!(connection = %conn.id, group = %group, "Joined group");
        Ok(())
    }

    async fn leave(&self, group: &GroupName, id: ConnectionId) {
        let mut drop_index = false;
        if let Some(mut groups) = self.memberships.get_mut(&id) {
            groups.remove(group);
            drop_index = groups.is_empty();
        }
        if drop_index {
            self.memberships.remove_if(&id, |_, groups| groups.is_empty());
        }
        self.remove_member(group, id);
        tracing::debug!(connection = %id, group = %group, "Left group");
    }

    async fn leave_all(&self, id: ConnectionId) {
        let removed = self.remove_everywhere(id);
        tracing::debug!(connection = %id, groups = removed, "Left all groups");
    }

    async fn broadcast(&self, group: &GroupName, frame: String) -> usize {
        // Snapshot the members and release the shard lock before sending.
        let members: Vec<Arc<Member>> = match self.groups.get(group) {
            Some(members) => members
                .iter()
                .map(|(id, member)| {
                    if *id != member.handle.id {
                        tracing::error!(
                            group = %group,
                            key = %id,
                            member = %member.handle.id,
                            "Registry membership corrupted"
                        );
                        panic!("registry entry {} holds connection {}", id, member.handle.id);
                    }
                    member.clone()
                })
                .collect(),
            None => return 0,
        };

        let frame = Utf8Bytes::from(frame);
        let mut delivered = 0;
        for member in members {
            match member.handle.sender.try_send(Message::Text(frame.clone())) {
                Ok(()) => {
                    member.consecutive_failures.store(0, Ordering::Relaxed);
                    delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    let failures = member.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(
                        connection = %member.handle.id,
                        group = %group,
                        failures,
                        "Outbound buffer full, frame dropped"
                    );
                    if failures >= self.max_delivery_failures {
                        self.evict(&member, "Too slow");
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    self.evict(&member, "Connection closed");
                }
            }
        }

        self.stats
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        tracing::trace!(group = %group, delivered, "Broadcast complete");
        delivered
    }
}
