use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;

const SHARDS: usize = 64;

/// Capability set consumed by the PYMK engine and the HTTP surface.
///
/// Implementations must keep the two adjacency sides in step: any observer
/// sees an edge in both directions or in neither.
pub trait SocialGraph: Send + Sync {
    fn follow(&self, u: u64, v: u64) -> bool;
    fn unfollow(&self, u: u64, v: u64) -> bool;
    fn following(&self, u: u64) -> Vec<u64>;
    fn followers(&self, u: u64) -> Vec<u64>;
    fn has_edge(&self, u: u64, v: u64) -> bool;
    fn degree_out(&self, u: u64) -> usize;
    fn degree_in(&self, u: u64) -> usize;
    /// Bump the epoch of each user, invalidating cached recommendations.
    fn touch_users(&self, users: &[u64]);
    fn user_epoch(&self, u: u64) -> u64;
}

#[derive(Default)]
struct ShardMaps {
    following: HashMap<u64, HashSet<u64>>,
    followers: HashMap<u64, HashSet<u64>>,
}

/// Directed follow graph partitioned into 64 shards by `user_id % 64`.
///
/// Each shard guards its slice of both adjacency maps with one RwLock.
/// Epochs live outside the shards; they are advisory cache tokens, not part
/// of the edge-atomicity guarantee.
pub struct MemGraph {
    shards: Vec<RwLock<ShardMaps>>,
    epochs: DashMap<u64, AtomicU64>,
}

fn shard_of(u: u64) -> usize {
    (u % SHARDS as u64) as usize
}

fn link(
    following: &mut HashMap<u64, HashSet<u64>>,
    followers: &mut HashMap<u64, HashSet<u64>>,
    u: u64,
    v: u64,
) -> bool {
    if !following.entry(u).or_default().insert(v) {
        return false;
    }
    followers.entry(v).or_default().insert(u);
    true
}

fn unlink(
    following: &mut HashMap<u64, HashSet<u64>>,
    followers: &mut HashMap<u64, HashSet<u64>>,
    u: u64,
    v: u64,
) -> bool {
    match following.get_mut(&u) {
        Some(fset) => {
            if !fset.remove(&v) {
                return false;
            }
            if fset.is_empty() {
                following.remove(&u);
            }
            if let Some(rset) = followers.get_mut(&v) {
                rset.remove(&u);
                if rset.is_empty() {
                    followers.remove(&v);
                }
            }
            true
        }
        _ => false,
    }
}

impl MemGraph {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(ShardMaps::default())).collect(),
            epochs: DashMap::new(),
        }
    }
}

impl Default for MemGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SocialGraph for MemGraph {
    fn follow(&self, u: u64, v: u64) -> bool {
        if u == v {
            return false;
        }
        let (su, sv) = (shard_of(u), shard_of(v));
        let created = if su == sv {
            let mut s = self.shards[su].write();
            let ShardMaps { following, followers } = &mut *s;
            link(following, followers, u, v)
        } else {
            // Ascending shard-index order to preclude deadlock.
            let (lo, hi) = (su.min(sv), su.max(sv));
            let mut a = self.shards[lo].write();
            let mut b = self.shards[hi].write();
            if su == lo {
                link(&mut a.following, &mut b.followers, u, v)
            } else {
                link(&mut b.following, &mut a.followers, u, v)
            }
        };
        if created {
            self.touch_users(&[u, v]);
        }
        created
    }

    fn unfollow(&self, u: u64, v: u64) -> bool {
        let (su, sv) = (shard_of(u), shard_of(v));
        let removed = if su == sv {
            let mut s = self.shards[su].write();
            let ShardMaps { following, followers } = &mut *s;
            unlink(following, followers, u, v)
        } else {
            let (lo, hi) = (su.min(sv), su.max(sv));
            let mut a = self.shards[lo].write();
            let mut b = self.shards[hi].write();
            if su == lo {
                unlink(&mut a.following, &mut b.followers, u, v)
            } else {
                unlink(&mut b.following, &mut a.followers, u, v)
            }
        };
        if removed {
            self.touch_users(&[u, v]);
        }
        removed
    }

    fn following(&self, u: u64) -> Vec<u64> {
        let s = self.shards[shard_of(u)].read();
        s.following
            .get(&u)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn followers(&self, u: u64) -> Vec<u64> {
        let s = self.shards[shard_of(u)].read();
        s.followers
            .get(&u)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn has_edge(&self, u: u64, v: u64) -> bool {
        let s = self.shards[shard_of(u)].read();
        s.following.get(&u).is_some_and(|set| set.contains(&v))
    }

    fn degree_out(&self, u: u64) -> usize {
        let s = self.shards[shard_of(u)].read();
        s.following.get(&u).map_or(0, |set| set.len())
    }

    fn degree_in(&self, u: u64) -> usize {
        let s = self.shards[shard_of(u)].read();
        s.followers.get(&u).map_or(0, |set| set.len())
    }

    fn touch_users(&self, users: &[u64]) {
        for &u in users {
            self.epochs
                .entry(u)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn user_epoch(&self, u: u64) -> u64 {
        self.epochs.get(&u).map(|e| e.load(Ordering::Relaxed)).unwrap_or(0)
    }
}
