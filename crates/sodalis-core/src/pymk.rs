use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheHooks, CacheKey, SuggestionCache};
use crate::embeds::EmbeddingStore;
use crate::graph::SocialGraph;

pub const DEFAULT_K: usize = 20;

const EPS: f64 = 1e-9;

/// One ranked candidate with the raw feature values that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub user_id: u64,
    pub score: f64,
    pub why: Why,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Why {
    pub common_neighbors: usize,
    pub jaccard: f64,
    pub adamic_adar: f64,
    pub cosine: f64,
}

#[derive(Debug, Clone)]
pub struct PymkConfig {
    /// Per-neighbor bound on two-hop adjacency, in graph iteration order.
    /// 0 means unbounded.
    pub max_expand_per_neighbor: usize,
    /// Cap on distinct candidates tracked; accumulation into already
    /// admitted candidates continues past it. 0 means unbounded.
    pub max_candidates: usize,
    pub w_common: f64,
    pub w_jaccard: f64,
    pub w_aa: f64,
    pub w_cosine: f64,
    /// LRU entries; 0 disables caching.
    pub cache_size: usize,
    pub cache_ttl: Duration,
}

impl Default for PymkConfig {
    fn default() -> Self {
        Self {
            max_expand_per_neighbor: 200,
            max_candidates: 20_000,
            w_common: 1.0,
            w_jaccard: 0.6,
            w_aa: 0.8,
            w_cosine: 1.0,
            cache_size: 100_000,
            cache_ttl: Duration::from_secs(120),
        }
    }
}

struct CandStats {
    common: usize,
    aa: f64,
}

struct Scored {
    id: u64,
    common: usize,
    jaccard: f64,
    aa: f64,
    cos: f64,
    score: f64,
}

// Total order on (score, id); scores are finite by construction.
struct ByScore(Scored);

impl PartialEq for ByScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ByScore {}

impl PartialOrd for ByScore {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByScore {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| self.0.id.cmp(&other.0.id))
    }
}

/// People-you-may-know engine: two-hop expansion over the follow graph,
/// multi-signal scoring, and an epoch-keyed result cache.
pub struct PymkService {
    graph: Arc<dyn SocialGraph>,
    embeds: Arc<dyn EmbeddingStore>,
    cfg: PymkConfig,
    cache: SuggestionCache,
}

impl PymkService {
    pub fn new(
        graph: Arc<dyn SocialGraph>,
        embeds: Arc<dyn EmbeddingStore>,
        cfg: PymkConfig,
    ) -> Self {
        Self::with_cache_hooks(graph, embeds, cfg, CacheHooks::default())
    }

    pub fn with_cache_hooks(
        graph: Arc<dyn SocialGraph>,
        embeds: Arc<dyn EmbeddingStore>,
        cfg: PymkConfig,
        hooks: CacheHooks,
    ) -> Self {
        let cache = SuggestionCache::with_hooks(cfg.cache_size, cfg.cache_ttl, hooks);
        Self { graph, embeds, cfg, cache }
    }

    /// Ranked suggestions for `u`, best first. `k == 0` falls back to
    /// [`DEFAULT_K`]. Never fails; an unknown user yields an empty list,
    /// which is cached like any other answer.
    pub fn recommend(&self, u: u64, k: usize, exclude: &HashSet<u64>) -> Vec<Suggestion> {
        let k = if k == 0 { DEFAULT_K } else { k };
        let key = CacheKey { user: u, k, epoch: self.graph.user_epoch(u) };
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let out_u = self.graph.following(u);
        let in_u = self.graph.followers(u);
        let out_set: HashSet<u64> = out_u.iter().copied().collect();
        let mut one_hop = out_set.clone();
        one_hop.extend(in_u.iter().copied());

        // A mutual neighbor appears in both passes and contributes twice.
        let mut stats: HashMap<u64, CandStats> = HashMap::new();
        self.expand(&out_u, u, &one_hop, exclude, &mut stats);
        self.expand(&in_u, u, &one_hop, exclude, &mut stats);

        if stats.is_empty() {
            self.cache.set(key, Vec::new());
            return Vec::new();
        }

        let u_vec = self.embeds.get(u);
        let mut max_common = 0usize;
        let (mut max_jacc, mut max_aa, mut max_cos) = (0.0f64, 0.0f64, 0.0f64);
        let mut scored = Vec::with_capacity(stats.len());
        for (&c, st) in &stats {
            let out_c: HashSet<u64> = self.graph.following(c).into_iter().collect();
            let jaccard = if out_set.is_empty() && out_c.is_empty() {
                0.0
            } else {
                let inter = intersect_count(&out_set, &out_c) as f64;
                let union = (out_set.len() + out_c.len()) as f64 - inter;
                inter / (union + EPS)
            };
            let cos = match (&u_vec, self.embeds.get(c)) {
                (Some(a), Some(b)) => cosine(a, &b),
                _ => 0.0,
            };
            max_common = max_common.max(st.common);
            max_jacc = max_jacc.max(jaccard);
            max_aa = max_aa.max(st.aa);
            max_cos = max_cos.max(cos);
            scored.push(Scored { id: c, common: st.common, jaccard, aa: st.aa, cos, score: 0.0 });
        }

        // Per-request min-max normalization, min anchored at 0.
        for s in &mut scored {
            let n_common = if max_common > 0 { s.common as f64 / max_common as f64 } else { 0.0 };
            let n_jacc = if max_jacc > 0.0 { s.jaccard / max_jacc } else { 0.0 };
            let n_aa = if max_aa > 0.0 { s.aa / max_aa } else { 0.0 };
            let n_cos = if max_cos > 0.0 { s.cos / max_cos } else { 0.0 };
            s.score = self.cfg.w_common * n_common
                + self.cfg.w_jaccard * n_jacc
                + self.cfg.w_aa * n_aa
                + self.cfg.w_cosine * n_cos;
        }

        // Size-k min-heap; the root is the weakest keeper. Capacity is
        // bounded by the candidate count, not the caller's k.
        let mut heap: BinaryHeap<Reverse<ByScore>> =
            BinaryHeap::with_capacity(k.min(scored.len()) + 1);
        for s in scored {
            let item = ByScore(s);
            if heap.len() < k {
                heap.push(Reverse(item));
            } else if heap.peek().is_some_and(|Reverse(min)| item > *min) {
                heap.pop();
                heap.push(Reverse(item));
            }
        }
        let mut result = Vec::with_capacity(heap.len());
        while let Some(Reverse(ByScore(s))) = heap.pop() {
            result.push(Suggestion {
                user_id: s.id,
                score: s.score,
                why: Why {
                    common_neighbors: s.common,
                    jaccard: s.jaccard,
                    adamic_adar: s.aa,
                    cosine: s.cos,
                },
            });
        }
        result.reverse();

        self.cache.set(key, result.clone());
        result
    }

    fn expand(
        &self,
        neighbors: &[u64],
        u: u64,
        one_hop: &HashSet<u64>,
        exclude: &HashSet<u64>,
        stats: &mut HashMap<u64, CandStats>,
    ) {
        for &n in neighbors {
            let mut two_hop = self.graph.following(n);
            let cap = self.cfg.max_expand_per_neighbor;
            if cap > 0 && two_hop.len() > cap {
                two_hop.truncate(cap);
            }
            let deg_n = self.graph.degree_out(n) + self.graph.degree_in(n);
            let aa_weight = if deg_n > 0 {
                1.0 / (1.0 + deg_n as f64 + EPS).ln()
            } else {
                0.0
            };
            for c in two_hop {
                if c == u || one_hop.contains(&c) || exclude.contains(&c) {
                    continue;
                }
                if let Some(st) = stats.get_mut(&c) {
                    st.common += 1;
                    st.aa += aa_weight;
                } else if self.cfg.max_candidates == 0 || stats.len() < self.cfg.max_candidates {
                    stats.insert(c, CandStats { common: 1, aa: aa_weight });
                }
            }
        }
    }
}

fn intersect_count(a: &HashSet<u64>, b: &HashSet<u64>) -> usize {
    // iterate the smaller set
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().filter(|x| large.contains(x)).count()
}

/// Cosine similarity clamped to [0, 1]. Mismatched lengths, empty or
/// zero-norm vectors all yield 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeds::MemEmbeds;
    use crate::graph::MemGraph;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn service(cfg: PymkConfig) -> (Arc<MemGraph>, Arc<MemEmbeds>, PymkService) {
        let graph = Arc::new(MemGraph::new());
        let embeds = Arc::new(MemEmbeds::new());
        let svc = PymkService::new(graph.clone(), embeds.clone(), cfg);
        (graph, embeds, svc)
    }

    fn counting_service(
        cfg: PymkConfig,
    ) -> (Arc<MemGraph>, PymkService, Arc<AtomicU64>, Arc<AtomicU64>) {
        let graph = Arc::new(MemGraph::new());
        let embeds = Arc::new(MemEmbeds::new());
        let hits = Arc::new(AtomicU64::new(0));
        let misses = Arc::new(AtomicU64::new(0));
        let hooks = CacheHooks {
            on_hit: Some(Box::new({
                let hits = hits.clone();
                move || {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
            })),
            on_miss: Some(Box::new({
                let misses = misses.clone();
                move || {
                    misses.fetch_add(1, Ordering::Relaxed);
                }
            })),
            on_evict: None,
        };
        let svc = PymkService::with_cache_hooks(graph.clone(), embeds, cfg, hooks);
        (graph, svc, hits, misses)
    }

    #[test]
    fn triangle_yields_single_candidate_with_two_common_neighbors() {
        let (graph, _, svc) = service(PymkConfig::default());
        graph.follow(1, 2);
        graph.follow(1, 3);
        graph.follow(2, 4);
        graph.follow(3, 4);
        let res = svc.recommend(1, 5, &HashSet::new());
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].user_id, 4);
        assert_eq!(res[0].why.common_neighbors, 2);
        assert!(res[0].score > 0.0);
    }

    #[test]
    fn one_hop_neighborhood_and_self_are_never_suggested() {
        let (graph, _, svc) = service(PymkConfig::default());
        graph.follow(1, 2);
        graph.follow(2, 1);
        let res = svc.recommend(1, 5, &HashSet::new());
        assert!(res.iter().all(|s| s.user_id != 1 && s.user_id != 2));
    }

    #[test]
    fn explicit_exclude_removes_candidates() {
        let (graph, _, svc) = service(PymkConfig::default());
        graph.follow(1, 2);
        graph.follow(1, 3);
        graph.follow(2, 4);
        graph.follow(3, 4);
        let exclude: HashSet<u64> = [4].into_iter().collect();
        assert!(svc.recommend(1, 5, &exclude).is_empty());
    }

    #[test]
    fn unknown_user_yields_empty_result() {
        let (_, _, svc) = service(PymkConfig::default());
        assert!(svc.recommend(999, 5, &HashSet::new()).is_empty());
    }

    #[test]
    fn fan_out_cap_bounds_candidates_per_neighbor() {
        let cfg = PymkConfig {
            max_expand_per_neighbor: 100,
            ..PymkConfig::default()
        };
        let (graph, _, svc) = service(cfg);
        graph.follow(1, 2);
        for c in 100..1100u64 {
            graph.follow(2, c);
        }
        let res = svc.recommend(1, 2000, &HashSet::new());
        assert_eq!(res.len(), 100);
    }

    #[test]
    fn candidate_cap_rejects_new_but_keeps_accumulating() {
        let cfg = PymkConfig {
            max_expand_per_neighbor: 0,
            max_candidates: 5,
            ..PymkConfig::default()
        };
        let (graph, _, svc) = service(cfg);
        // Two first-hop neighbors both following the same 20 users: the
        // admitted 5 keep collecting contributions from the second pass.
        graph.follow(1, 2);
        graph.follow(1, 3);
        for c in 100..120u64 {
            graph.follow(2, c);
            graph.follow(3, c);
        }
        let res = svc.recommend(1, 50, &HashSet::new());
        assert_eq!(res.len(), 5);
        assert!(res.iter().all(|s| s.why.common_neighbors == 2));
    }

    #[test]
    fn results_are_sorted_descending_and_top_k_is_a_prefix() {
        let (graph, _, svc) = service(PymkConfig::default());
        graph.follow(1, 2);
        graph.follow(1, 3);
        // 4 reached twice, 5..8 once each
        graph.follow(2, 4);
        graph.follow(3, 4);
        graph.follow(2, 5);
        graph.follow(2, 6);
        graph.follow(3, 7);
        graph.follow(3, 8);
        let full = svc.recommend(1, 10, &HashSet::new());
        assert_eq!(full.len(), 5);
        for pair in full.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        let top = svc.recommend(1, 3, &HashSet::new());
        assert_eq!(top, full[..3].to_vec());
    }

    #[test]
    fn scores_stay_within_weight_sum() {
        let (graph, embeds, svc) = service(PymkConfig::default());
        let cfg = PymkConfig::default();
        let bound = cfg.w_common + cfg.w_jaccard + cfg.w_aa + cfg.w_cosine;
        for u in 0..10u64 {
            for v in 0..10u64 {
                if u != v && (u * 7 + v) % 3 != 0 {
                    graph.follow(u, v);
                }
            }
        }
        embeds.put(0, vec![1.0, 0.5]).unwrap();
        embeds.put(5, vec![0.5, 1.0]).unwrap();
        for u in 0..10u64 {
            for s in svc.recommend(u, 10, &HashSet::new()) {
                assert!(s.score >= 0.0 && s.score <= bound + EPS);
                assert!(s.why.cosine >= 0.0);
            }
        }
    }

    #[test]
    fn cosine_only_configuration_scores_identical_vectors_at_one() {
        let cfg = PymkConfig {
            w_common: 0.0,
            w_jaccard: 0.0,
            w_aa: 0.0,
            w_cosine: 1.0,
            ..PymkConfig::default()
        };
        let (graph, embeds, svc) = service(cfg);
        graph.follow(1, 10);
        graph.follow(10, 2);
        embeds.put(1, vec![0.3, 0.4, 0.5]).unwrap();
        embeds.put(2, vec![0.3, 0.4, 0.5]).unwrap();
        let res = svc.recommend(1, 5, &HashSet::new());
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].user_id, 2);
        assert!((res[0].score - 1.0).abs() < 1e-9);
        assert!((res[0].why.cosine - 1.0).abs() < 1e-9);
    }

    #[test]
    fn second_identical_request_is_served_from_cache() {
        let (graph, svc, hits, misses) = counting_service(PymkConfig::default());
        graph.follow(1, 2);
        graph.follow(2, 3);
        let first = svc.recommend(1, 5, &HashSet::new());
        assert_eq!(misses.load(Ordering::Relaxed), 1);
        // Mutating 2 and 4 leaves epoch(1) untouched: the cached answer
        // must be returned even though a recompute would now include 4.
        graph.follow(2, 4);
        let second = svc.recommend(1, 5, &HashSet::new());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(first, second);
        assert!(second.iter().all(|s| s.user_id != 4));
    }

    #[test]
    fn mutation_of_the_user_invalidates_the_cache() {
        let (graph, svc, hits, misses) = counting_service(PymkConfig::default());
        graph.follow(1, 2);
        graph.follow(2, 3);
        let first = svc.recommend(1, 5, &HashSet::new());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].user_id, 3);
        graph.follow(1, 3); // bumps epoch(1); 3 becomes one-hop
        let second = svc.recommend(1, 5, &HashSet::new());
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert_eq!(misses.load(Ordering::Relaxed), 2);
        assert!(second.iter().all(|s| s.user_id != 3));
    }

    #[test]
    fn zero_k_falls_back_to_default() {
        let (graph, _, svc) = service(PymkConfig::default());
        graph.follow(1, 2);
        for c in 10..60u64 {
            graph.follow(2, c);
        }
        let res = svc.recommend(1, 0, &HashSet::new());
        assert_eq!(res.len(), DEFAULT_K);
    }

    #[test]
    fn oversized_k_allocates_by_candidate_count() {
        let (graph, _, svc) = service(PymkConfig::default());
        graph.follow(1, 2);
        graph.follow(2, 3);
        let res = svc.recommend(1, usize::MAX, &HashSet::new());
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].user_id, 3);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[1.0, 0.0], &[-1.0, 0.0]), 0.0); // clamped
        assert!((cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mutual_neighbors_contribute_twice() {
        let (graph, _, svc) = service(PymkConfig::default());
        // 2 is both followed by and a follower of 1, so its followees are
        // expanded in both passes.
        graph.follow(1, 2);
        graph.follow(2, 1);
        graph.follow(2, 3);
        let res = svc.recommend(1, 5, &HashSet::new());
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].user_id, 3);
        assert_eq!(res[0].why.common_neighbors, 2);
    }
}
