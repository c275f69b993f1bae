//! In-memory registry of live servers with selection strategies.

// Layer 1: Standard library imports
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// Layer 3: Internal module imports
use super::server_info::{ServerInfo, ServerState};

/// Change observed between two discovery refreshes.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerChange {
    Added(ServerInfo),
    Updated(ServerInfo),
    Removed(ServerInfo),
}

struct CenterState {
    servers: HashMap<String, ServerInfo>,
    by_endpoint: HashMap<String, String>,
    cursors: HashMap<u16, usize>,
}

/// Registry of live servers keyed by nid.
///
/// Read-mostly: selection takes the read lock; refreshes and the
/// round-robin cursor take the write lock. All writes are serialized by
/// that single lock.
pub struct ServerInfoCenter {
    state: RwLock<CenterState>,
    ttl: Duration,
}

impl ServerInfoCenter {
    /// `ttl` is the silence budget before an entry is evicted.
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CenterState {
                servers: HashMap::new(),
                by_endpoint: HashMap::new(),
                cursors: HashMap::new(),
            }),
            ttl,
        }
    }

    /// Merge a full active list into the cache, emitting diffs.
    ///
    /// Entries are created on first sight and refreshed on every update;
    /// `Updated` is only emitted when a routable property (endpoint, state,
    /// weight) actually changed. Entries missing from the list are left to
    /// TTL eviction.
    pub fn update(&self, list: Vec<ServerInfo>) -> Vec<ServerChange> {
        let mut state = self.state.write();
        let mut changes = Vec::new();

        for incoming in list {
            let nid = incoming.nid();
            match state.servers.get(&nid).cloned() {
                None => {
                    state
                        .by_endpoint
                        .insert(incoming.endpoint.clone(), nid.clone());
                    state.servers.insert(nid, incoming.clone());
                    changes.push(ServerChange::Added(incoming));
                }
                Some(current) => {
                    let routable_change = current.endpoint != incoming.endpoint
                        || current.state != incoming.state
                        || current.weight != incoming.weight;
                    if current.endpoint != incoming.endpoint {
                        state.by_endpoint.remove(&current.endpoint);
                        state
                            .by_endpoint
                            .insert(incoming.endpoint.clone(), nid.clone());
                    }
                    state.servers.insert(nid, incoming.clone());
                    if routable_change {
                        changes.push(ServerChange::Updated(incoming));
                    }
                }
            }
        }
        changes
    }

    /// Drop entries whose heartbeat is older than the TTL.
    pub fn evict_expired(&self) -> Vec<ServerChange> {
        let now = Utc::now();
        let mut state = self.state.write();
        let expired: Vec<String> = state
            .servers
            .values()
            .filter(|info| info.is_expired(now, self.ttl))
            .map(ServerInfo::nid)
            .collect();

        let mut changes = Vec::new();
        for nid in expired {
            if let Some(info) = state.servers.remove(&nid) {
                state.by_endpoint.remove(&info.endpoint);
                changes.push(ServerChange::Removed(info));
            }
        }
        changes
    }

    pub fn find_by_nid(&self, nid: &str) -> Option<ServerInfo> {
        self.state.read().servers.get(nid).cloned()
    }

    /// O(1) lookup through the endpoint index.
    pub fn find_by_endpoint(&self, endpoint: &str) -> Option<ServerInfo> {
        let state = self.state.read();
        let nid = state.by_endpoint.get(endpoint)?;
        state.servers.get(nid).cloned()
    }

    /// Weighted round-robin over the Running servers of a service.
    ///
    /// `Disabled` servers are skipped; weight acts as a repetition count
    /// (0 counts as 1). Returns `None` when the service has no Running
    /// server.
    pub fn find_round_robin(&self, service_id: u16) -> Option<ServerInfo> {
        let mut state = self.state.write();
        let running = Self::running_sorted(&state.servers, service_id);
        if running.is_empty() {
            return None;
        }

        let total: usize = running
            .iter()
            .map(|info| usize::from(info.weight.max(1)))
            .sum();
        let cursor = state.cursors.entry(service_id).or_insert_with(|| {
            // Random start so a fresh fleet does not dogpile the first nid.
            SmallRng::from_entropy().gen_range(0..total.max(1))
        });
        let mut slot = *cursor % total;
        *cursor = cursor.wrapping_add(1);

        for info in &running {
            let reps = usize::from(info.weight.max(1));
            if slot < reps {
                return Some(info.clone());
            }
            slot -= reps;
        }
        running.last().cloned()
    }

    /// Stable account sharding: `hash(account_id) mod N` over the sorted
    /// Running list.
    ///
    /// N is the Running count at call time; topology churn re-routes only
    /// future calls.
    pub fn find_by_account_id(&self, service_id: u16, account_id: i64) -> Option<ServerInfo> {
        let state = self.state.read();
        let running = Self::running_sorted(&state.servers, service_id);
        if running.is_empty() {
            return None;
        }

        let mut hasher = DefaultHasher::new();
        account_id.hash(&mut hasher);
        let index = (hasher.finish() % running.len() as u64) as usize;
        running.get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<ServerInfo> {
        self.state.read().servers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().servers.is_empty()
    }

    fn running_sorted(servers: &HashMap<String, ServerInfo>, service_id: u16) -> Vec<ServerInfo> {
        let mut running: Vec<ServerInfo> = servers
            .values()
            .filter(|info| info.service_id == service_id && info.state == ServerState::Running)
            .cloned()
            .collect();
        running.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        running
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::discovery::ServiceType;
    use std::collections::HashSet;

    fn play(server_id: &str, endpoint: &str) -> ServerInfo {
        ServerInfo::new(ServiceType::Play, 1, server_id, endpoint)
    }

    #[test]
    fn test_update_emits_added_then_updated() {
        let center = ServerInfoCenter::new(Duration::from_secs(10));

        let changes = center.update(vec![play("play-1", "127.0.0.1:7001")]);
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], ServerChange::Added(_)));

        // Same entry again: heartbeat refresh, no visible change.
        let changes = center.update(vec![play("play-1", "127.0.0.1:7001")]);
        assert!(changes.is_empty());

        // Disabled now: routable change.
        let mut disabled = play("play-1", "127.0.0.1:7001");
        disabled.state = ServerState::Disabled;
        let changes = center.update(vec![disabled]);
        assert!(matches!(changes[0], ServerChange::Updated(_)));
    }

    #[test]
    fn test_ttl_eviction() {
        let center = ServerInfoCenter::new(Duration::from_millis(50));
        let mut stale = play("play-1", "127.0.0.1:7001");
        stale.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(5);
        center.update(vec![stale]);

        let removed = center.evict_expired();
        assert_eq!(removed.len(), 1);
        assert!(matches!(removed[0], ServerChange::Removed(_)));
        assert!(center.is_empty());
        assert!(center.find_by_endpoint("127.0.0.1:7001").is_none());
    }

    #[test]
    fn test_find_by_endpoint() {
        let center = ServerInfoCenter::new(Duration::from_secs(10));
        center.update(vec![play("play-1", "10.0.0.1:7001")]);
        let found = center.find_by_endpoint("10.0.0.1:7001").unwrap();
        assert_eq!(found.server_id, "play-1");
    }

    #[test]
    fn test_round_robin_skips_disabled() {
        let center = ServerInfoCenter::new(Duration::from_secs(10));
        let mut disabled = play("play-2", "127.0.0.1:7002");
        disabled.state = ServerState::Disabled;
        center.update(vec![
            play("play-1", "127.0.0.1:7001"),
            disabled,
            play("play-3", "127.0.0.1:7003"),
        ]);

        let mut seen = HashSet::new();
        for _ in 0..10 {
            seen.insert(center.find_round_robin(1).unwrap().server_id);
        }
        assert!(seen.contains("play-1"));
        assert!(seen.contains("play-3"));
        assert!(!seen.contains("play-2"));
    }

    #[test]
    fn test_round_robin_cycles_evenly() {
        let center = ServerInfoCenter::new(Duration::from_secs(10));
        center.update(vec![
            play("play-1", "127.0.0.1:7001"),
            play("play-2", "127.0.0.1:7002"),
        ]);

        let first = center.find_round_robin(1).unwrap().server_id;
        let second = center.find_round_robin(1).unwrap().server_id;
        let third = center.find_round_robin(1).unwrap().server_id;
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_account_sharding_is_stable() {
        let center = ServerInfoCenter::new(Duration::from_secs(10));
        center.update(vec![
            play("play-1", "127.0.0.1:7001"),
            play("play-2", "127.0.0.1:7002"),
            play("play-3", "127.0.0.1:7003"),
        ]);

        for account_id in [1i64, 99, 424242] {
            let a = center.find_by_account_id(1, account_id).unwrap();
            let b = center.find_by_account_id(1, account_id).unwrap();
            assert_eq!(a.server_id, b.server_id);
        }
    }

    #[test]
    fn test_selection_on_unknown_service_is_none() {
        let center = ServerInfoCenter::new(Duration::from_secs(10));
        assert!(center.find_round_robin(9).is_none());
        assert!(center.find_by_account_id(9, 1).is_none());
    }
}
