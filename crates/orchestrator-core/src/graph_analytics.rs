//! Graph analytics: Node2Vec-style structural embeddings and Louvain
//! community detection, run on the shared worker pool alongside
//! reranking — never on the request-handling task. Grounded on the
//! original `graph_embeddings.py`/`semantic_partitioner.py` pass; PPR
//! (the other analytic named in the catalog) lives with the single-hop
//! path in `retrieval/single_hop.rs` since it only ever runs over that
//! path's own local edge set.

use rand::prelude::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};

const DEFAULT_WALK_LENGTH: usize = 80;
const DEFAULT_NUM_WALKS: usize = 10;
const DEFAULT_EMBEDDING_DIM: usize = 64;
const DEFAULT_P: f32 = 1.0;
const DEFAULT_Q: f32 = 0.5;

/// Undirected adjacency list built from whatever edges a retrieval path
/// already fetched. Cheap and local — this is never a whole-database
/// projection, just the neighborhood a query actually touched.
#[derive(Debug, Clone, Default)]
pub struct GraphTopology {
    pub nodes: Vec<String>,
    adjacency: HashMap<String, Vec<String>>,
}

impl GraphTopology {
    #[must_use]
    pub fn from_edges(edges: &[(String, String)]) -> Self {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for (source, target) in edges {
            adjacency.entry(source.clone()).or_default().push(target.clone());
            adjacency.entry(target.clone()).or_default().push(source.clone());
            for node in [source, target] {
                if seen.insert(node.clone()) {
                    nodes.push(node.clone());
                }
            }
        }
        Self { nodes, adjacency }
    }

    #[must_use]
    pub fn neighbors(&self, node: &str) -> &[String] {
        self.adjacency.get(node).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Node2VecConfig {
    pub walk_length: usize,
    pub num_walks: usize,
    pub embedding_dim: usize,
    pub p: f32,
    pub q: f32,
    pub seed: Option<u64>,
}

impl Default for Node2VecConfig {
    fn default() -> Self {
        Self {
            walk_length: DEFAULT_WALK_LENGTH,
            num_walks: DEFAULT_NUM_WALKS,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            p: DEFAULT_P,
            q: DEFAULT_Q,
            seed: None,
        }
    }
}

fn transition_weights(prev: Option<&str>, current: &str, neighbors: &[String], topology: &GraphTopology, p: f32, q: f32) -> Vec<f32> {
    if neighbors.is_empty() {
        return Vec::new();
    }
    let prev_neighbors: HashSet<&str> = prev.map(|p| topology.neighbors(p).iter().map(String::as_str).collect()).unwrap_or_default();

    let weights: Vec<f32> = neighbors
        .iter()
        .map(|nbr| {
            if Some(nbr.as_str()) == prev {
                1.0 / p
            } else if prev_neighbors.contains(nbr.as_str()) {
                1.0
            } else {
                1.0 / q
            }
        })
        .collect();

    let total: f32 = weights.iter().sum();
    let _ = current;
    if total == 0.0 {
        vec![1.0 / neighbors.len() as f32; neighbors.len()]
    } else {
        weights.iter().map(|w| w / total).collect()
    }
}

fn weighted_choice<R: Rng>(rng: &mut R, items: &[String], weights: &[f32]) -> String {
    let total: f32 = weights.iter().sum();
    let mut pick = rng.gen_range(0.0..total.max(f32::MIN_POSITIVE));
    for (item, weight) in items.iter().zip(weights) {
        if pick < *weight {
            return item.clone();
        }
        pick -= weight;
    }
    items.last().cloned().unwrap_or_default()
}

fn biased_random_walk<R: Rng>(start: &str, topology: &GraphTopology, config: &Node2VecConfig, rng: &mut R) -> Vec<String> {
    let mut walk = vec![start.to_string()];
    for _ in 0..config.walk_length.saturating_sub(1) {
        let current = walk.last().unwrap().clone();
        let neighbors = topology.neighbors(&current);
        if neighbors.is_empty() {
            break;
        }
        let prev = if walk.len() >= 2 { Some(walk[walk.len() - 2].as_str()) } else { None };
        let probs = transition_weights(prev, &current, neighbors, topology, config.p, config.q);
        walk.push(weighted_choice(rng, neighbors, &probs));
    }
    walk
}

/// One pass of biased random walks from every node, `num_walks` times
/// over, in a shuffled order each pass (matching the original's
/// per-walk node reshuffle rather than a single fixed visit order).
pub fn generate_walks(topology: &GraphTopology, config: &Node2VecConfig) -> Vec<Vec<String>> {
    let mut rng = config.seed.map_or_else(rand::rngs::StdRng::from_entropy, rand::rngs::StdRng::seed_from_u64);
    let mut walks = Vec::with_capacity(topology.nodes.len() * config.num_walks);
    for _ in 0..config.num_walks {
        let mut nodes = topology.nodes.clone();
        nodes.shuffle(&mut rng);
        for node in &nodes {
            walks.push(biased_random_walk(node, topology, config, &mut rng));
        }
    }
    walks
}

/// Hashes each walk position into a fixed-width bucket and counts
/// co-occurrences — a deterministic stand-in for the skip-gram
/// embedding a full Node2Vec/FastRP implementation would learn, same
/// shape and normalization as the original's `_hash_embedding`.
fn hash_embedding(node: &str, walks: &[Vec<String>], dim: usize) -> Vec<f32> {
    let mut embedding = vec![0.0_f32; dim];
    let mut count: u64 = 0;
    for walk in walks {
        for (i, w_node) in walk.iter().enumerate() {
            if w_node == node {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                std::hash::Hash::hash(&(i, count), &mut hasher);
                let bucket = (std::hash::Hasher::finish(&hasher) as usize) % dim;
                embedding[bucket] += 1.0;
                count += 1;
            }
        }
    }
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut embedding {
            *v /= norm;
        }
    }
    embedding
}

/// Node2Vec embedder with a deterministic hash-based fallback in place
/// of a trained skip-gram model — there is no offline training pipeline
/// in this workspace, only per-request local neighborhoods, so a
/// learned embedding space would need to be retrained (or at least
/// re-normalized) on every request anyway.
pub struct Node2VecEmbedder {
    config: Node2VecConfig,
}

impl Node2VecEmbedder {
    #[must_use]
    pub fn new(config: Node2VecConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn embed(&self, topology: &GraphTopology) -> HashMap<String, Vec<f32>> {
        let walks = generate_walks(topology, &self.config);
        topology.nodes.iter().map(|node| (node.clone(), hash_embedding(node, &walks, self.config.embedding_dim))).collect()
    }
}

/// Centroid of a set of embeddings — used to build the query's
/// structural vector from its seed candidates' embeddings.
#[must_use]
pub fn compute_centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(dim) = vectors.first().map(Vec::len) else { return Vec::new() };
    let mut centroid = vec![0.0_f32; dim];
    for v in vectors {
        for (c, x) in centroid.iter_mut().zip(v) {
            *c += x;
        }
    }
    let n = vectors.len() as f32;
    for c in &mut centroid {
        *c /= n;
    }
    centroid
}

const DEFAULT_RESOLUTION: f32 = 1.0;
const DEFAULT_MAX_ITERATIONS: usize = 10;

#[derive(Debug, Clone)]
pub struct Community {
    pub community_id: String,
    pub members: Vec<String>,
    pub modularity_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionResult {
    pub communities: Vec<Community>,
    pub node_to_community: HashMap<String, String>,
    pub modularity: f32,
}

impl PartitionResult {
    #[must_use]
    pub fn community_count(&self) -> usize {
        self.communities.len()
    }
}

fn count_edges(topology: &GraphTopology) -> usize {
    topology.nodes.iter().map(|n| topology.neighbors(n).len()).sum::<usize>() / 2
}

fn modularity(topology: &GraphTopology, partition: &HashMap<String, usize>, total_edges: usize) -> f32 {
    if total_edges == 0 {
        return 0.0;
    }
    let m2 = 2.0 * total_edges as f32;
    let degree: HashMap<&str, f32> = topology.nodes.iter().map(|n| (n.as_str(), topology.neighbors(n).len() as f32)).collect();

    let mut q_sum = 0.0_f32;
    for node_i in &topology.nodes {
        for node_j in topology.neighbors(node_i) {
            if partition.get(node_i) != partition.get(node_j) {
                continue;
            }
            q_sum += 1.0 - (degree[node_i.as_str()] * degree[node_j.as_str()]) / m2;
        }
    }
    q_sum / m2
}

fn best_community(node: &str, topology: &GraphTopology, partition: &HashMap<String, usize>, degree: &HashMap<&str, f32>, resolution: f32, m2: f32) -> usize {
    let current = partition[node];
    let mut neighbor_comms: HashMap<usize, f32> = HashMap::new();
    for nbr in topology.neighbors(node) {
        *neighbor_comms.entry(partition[nbr]).or_insert(0.0) += 1.0;
    }

    let mut best = current;
    let mut best_gain = 0.0_f32;
    for (&comm, &k_i_in) in &neighbor_comms {
        if comm == current {
            continue;
        }
        let sigma_tot: f32 = topology.nodes.iter().filter(|n| partition[n.as_str()] == comm).map(|n| degree[n.as_str()]).sum();
        let gain = k_i_in - resolution * (sigma_tot * degree[node]) / m2;
        if gain > best_gain {
            best_gain = gain;
            best = comm;
        }
    }
    best
}

fn louvain_partition(topology: &GraphTopology, resolution: f32, max_iterations: usize) -> HashMap<String, usize> {
    if topology.nodes.is_empty() {
        return HashMap::new();
    }

    let mut partition: HashMap<String, usize> = topology.nodes.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
    let total_edges = count_edges(topology);
    if total_edges == 0 {
        return partition;
    }

    let degree: HashMap<&str, f32> = topology.nodes.iter().map(|n| (n.as_str(), topology.neighbors(n).len() as f32)).collect();
    let m2 = 2.0 * total_edges as f32;

    for _ in 0..max_iterations {
        let mut moved = false;
        for node in &topology.nodes {
            let best = best_community(node, topology, &partition, &degree, resolution, m2);
            if best != partition[node] {
                partition.insert(node.clone(), best);
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    let mut comm_ids: Vec<usize> = partition.values().copied().collect::<HashSet<_>>().into_iter().collect();
    comm_ids.sort_unstable();
    let remap: HashMap<usize, usize> = comm_ids.into_iter().enumerate().map(|(new, old)| (old, new)).collect();
    partition.into_iter().map(|(node, comm)| (node, remap[&comm])).collect()
}

/// Louvain modularity-maximizing community detection over a local
/// topology — used to tag retrieval results with the community they
/// belong to, same semantics as the original's greedy single-level
/// pass (no recursive coarsening stage).
pub struct SemanticPartitioner {
    resolution: f32,
    max_iterations: usize,
}

impl Default for SemanticPartitioner {
    fn default() -> Self {
        Self { resolution: DEFAULT_RESOLUTION, max_iterations: DEFAULT_MAX_ITERATIONS }
    }
}

impl SemanticPartitioner {
    #[must_use]
    pub fn new(resolution: f32, max_iterations: usize) -> Self {
        Self { resolution, max_iterations }
    }

    #[must_use]
    pub fn partition(&self, topology: &GraphTopology) -> PartitionResult {
        let raw = louvain_partition(topology, self.resolution, self.max_iterations);

        let mut community_members: HashMap<usize, Vec<String>> = HashMap::new();
        for (node, comm_id) in &raw {
            community_members.entry(*comm_id).or_default().push(node.clone());
        }

        let total_edges = count_edges(topology);
        let modularity = modularity(topology, &raw, total_edges);

        let mut comm_ids: Vec<usize> = community_members.keys().copied().collect();
        comm_ids.sort_unstable();

        let mut communities = Vec::new();
        let mut node_to_community = HashMap::new();
        for comm_id in comm_ids {
            let mut members = community_members.remove(&comm_id).unwrap_or_default();
            members.sort_unstable();
            let cid = format!("community-{comm_id}");
            for member in &members {
                node_to_community.insert(member.clone(), cid.clone());
            }
            communities.push(Community { community_id: cid, members, modularity_score: modularity });
        }

        PartitionResult { communities, node_to_community, modularity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_topology() -> GraphTopology {
        GraphTopology::from_edges(&[
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "c".to_string()),
            ("c".to_string(), "d".to_string()),
        ])
    }

    #[test]
    fn embeddings_are_normalized_and_one_per_node() {
        let topology = chain_topology();
        let embedder = Node2VecEmbedder::new(Node2VecConfig { seed: Some(7), num_walks: 4, walk_length: 10, ..Default::default() });
        let embeddings = embedder.embed(&topology);
        assert_eq!(embeddings.len(), topology.nodes.len());
        for v in embeddings.values() {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn same_seed_is_deterministic() {
        let topology = chain_topology();
        let config = Node2VecConfig { seed: Some(42), num_walks: 3, walk_length: 8, ..Default::default() };
        let a = Node2VecEmbedder::new(config.clone()).embed(&topology);
        let b = Node2VecEmbedder::new(config).embed(&topology);
        assert_eq!(a.get("a"), b.get("a"));
    }

    #[test]
    fn centroid_of_single_vector_is_itself() {
        let centroid = compute_centroid(&[vec![1.0, 2.0, 3.0]]);
        assert_eq!(centroid, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn centroid_of_no_vectors_is_empty() {
        assert!(compute_centroid(&[]).is_empty());
    }

    #[test]
    fn disconnected_nodes_land_in_different_communities() {
        let topology = GraphTopology::from_edges(&[
            ("a".to_string(), "b".to_string()),
            ("x".to_string(), "y".to_string()),
        ]);
        let result = SemanticPartitioner::default().partition(&topology);
        assert_ne!(result.node_to_community["a"], result.node_to_community["x"]);
    }

    #[test]
    fn empty_topology_has_no_communities() {
        let result = SemanticPartitioner::default().partition(&GraphTopology::default());
        assert_eq!(result.community_count(), 0);
    }
}
