use std::collections::VecDeque;

pub struct ClusterGroup {
    pub cluster_indices: Vec<u32>,
}

/// CSR 邻接表: 共享顶点的 cluster 互为邻居
pub struct Adjacency {
    pub offsets: Vec<u32>,
    pub neighbors: Vec<u32>,
}

impl Adjacency {
    pub fn get_neighbors(&self, cluster_idx: u32) -> &[u32] {
        let start = self.offsets[cluster_idx as usize] as usize;
        let end = self.offsets[cluster_idx as usize + 1] as usize;
        &self.neighbors[start..end]
    }
}

/// `cluster_indices` holds each cluster's vertex indices back to back,
/// `cluster_index_counts[i]` is the length of cluster `i`'s run.
pub fn build_adjacency(cluster_indices: &[u32], cluster_index_counts: &[u32]) -> Adjacency {
    let num_clusters = cluster_index_counts.len();

    // 1. (VertexID, ClusterID) 对
    let mut entries = Vec::with_capacity(cluster_indices.len());
    let mut cursor = 0usize;
    for (cluster, &count) in cluster_index_counts.iter().enumerate() {
        for &v in &cluster_indices[cursor..cursor + count as usize] {
            entries.push((v, cluster as u32));
        }
        cursor += count as usize;
    }

    // 2. 按顶点排序, 同一顶点只保留一次 cluster
    entries.sort_unstable();
    entries.dedup();

    // 3. 线性提取: 只连接相邻的 cluster (C1-C2, C2-C3...)
    let mut raw_adj = Vec::with_capacity(entries.len());
    let mut i = 0;
    while i < entries.len() {
        let mut j = i + 1;
        while j < entries.len() && entries[j].0 == entries[i].0 {
            j += 1;
        }
        for k in i..j.saturating_sub(1) {
            let c1 = entries[k].1;
            let c2 = entries[k + 1].1;
            if c1 != c2 {
                raw_adj.push((c1.min(c2), c1.max(c2)));
            }
        }
        i = j;
    }

    raw_adj.sort_unstable();
    raw_adj.dedup();

    // 4. CSR
    let mut offsets = vec![0u32; num_clusters + 1];
    for &(c1, c2) in &raw_adj {
        offsets[c1 as usize + 1] += 1;
        offsets[c2 as usize + 1] += 1;
    }
    for i in 0..num_clusters {
        offsets[i + 1] += offsets[i];
    }

    let mut current_offsets = offsets.clone();
    let mut neighbors = vec![0u32; raw_adj.len() * 2];
    for (c1, c2) in raw_adj {
        neighbors[current_offsets[c1 as usize] as usize] = c2;
        current_offsets[c1 as usize] += 1;
        neighbors[current_offsets[c2 as usize] as usize] = c1;
        current_offsets[c2 as usize] += 1;
    }

    Adjacency { offsets, neighbors }
}

/// Breadth-first partition of clusters into groups of at most
/// `target_group_size` members, growing each group across shared vertices.
/// Every cluster lands in exactly one group.
pub fn partition_clusters(
    cluster_indices: &[u32],
    cluster_index_counts: &[u32],
    target_group_size: usize,
) -> Vec<ClusterGroup> {
    let num_clusters = cluster_index_counts.len();
    let target_group_size = target_group_size.max(1);
    let adj = build_adjacency(cluster_indices, cluster_index_counts);

    // BitSet 标记已分配
    let mut visited = vec![0u64; num_clusters.div_ceil(64)];
    let is_visited = |v: &[u64], i: usize| (v[i / 64] & (1 << (i % 64))) != 0;
    let set_visited = |v: &mut [u64], i: usize| v[i / 64] |= 1 << (i % 64);

    let mut groups = Vec::new();
    for start_idx in 0..num_clusters as u32 {
        if is_visited(&visited, start_idx as usize) {
            continue;
        }

        let mut current_group = Vec::with_capacity(target_group_size);
        let mut queue = VecDeque::with_capacity(target_group_size * 2);
        queue.push_back(start_idx);
        set_visited(&mut visited, start_idx as usize);

        while let Some(idx) = queue.pop_front() {
            current_group.push(idx);
            if current_group.len() + queue.len() >= target_group_size {
                // 队列里的 cluster 已被标记, 直接收下
                current_group.extend(queue.drain(..));
                break;
            }

            for &neighbor in adj.get_neighbors(idx) {
                if !is_visited(&visited, neighbor as usize) {
                    set_visited(&mut visited, neighbor as usize);
                    queue.push_back(neighbor);
                    if current_group.len() + queue.len() >= target_group_size {
                        break;
                    }
                }
            }
        }

        groups.push(ClusterGroup { cluster_indices: current_group });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(count: u32) -> (Vec<u32>, Vec<u32>) {
        // cluster i shares vertex (i + 1) with cluster i + 1
        let mut indices = Vec::new();
        let mut counts = Vec::new();
        for i in 0..count {
            indices.extend_from_slice(&[i, i + 1, 1000 + i]);
            counts.push(3);
        }
        (indices, counts)
    }

    #[test]
    fn test_adjacency_links_shared_vertices() {
        let (indices, counts) = strip(4);
        let adj = build_adjacency(&indices, &counts);
        assert_eq!(adj.get_neighbors(0), &[1]);
        let mut n1 = adj.get_neighbors(1).to_vec();
        n1.sort();
        assert_eq!(n1, vec![0, 2]);
    }

    #[test]
    fn test_partition_covers_every_cluster_once() {
        let (indices, counts) = strip(23);
        let groups = partition_clusters(&indices, &counts, 5);
        let mut seen: Vec<u32> = groups.iter().flat_map(|g| g.cluster_indices.clone()).collect();
        seen.sort();
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
        assert!(groups.iter().all(|g| !g.cluster_indices.is_empty() && g.cluster_indices.len() <= 5));
        assert_eq!(groups[0].cluster_indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_disconnected_clusters_form_singletons() {
        let indices = vec![0, 1, 2, 10, 11, 12];
        let groups = partition_clusters(&indices, &[3, 3], 5);
        assert_eq!(groups.len(), 2);
    }
}
