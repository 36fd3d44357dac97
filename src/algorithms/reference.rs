//! Sequential, unpartitioned `PageRank`
//!
//! Based on Page et al. (1999) "The `PageRank` Citation Ranking: Bringing Order to the Web".
//! Runs the same iteration as the distributed solver, push-style over the
//! original edge direction and in `f64`, so it serves as ground truth for the
//! partitioned engine.

/// Reference `PageRank` over `(source, destination)` edges
///
/// # Algorithm
///
/// ```text
/// bookmark[v] = alpha if outdegree(v) == 0 else 0
/// pr = 1/N,  dot = <bookmark, pr>
/// repeat iterations times:
///     pr'[u] = alpha * Σ pr[v] / outdegree(v)  over edges v → u
///     pr'   += dot / N
///     dot    = <bookmark, pr'>
///     pr     = pr' / ||pr'||₂
/// pr /= ||pr||₁
/// ```
///
/// # Panics
///
/// Panics if an edge endpoint is not below `num_vertices`
///
/// # Example
///
/// ```
/// use snmg_pagerank::pagerank_reference;
///
/// let scores = pagerank_reference(3, &[(0, 1), (1, 2), (2, 0)], 0.85, 20);
/// assert_eq!(scores.len(), 3);
/// assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-5); // Sum = 1.0
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)] // Graphs >2^52 nodes unlikely
#[allow(clippy::cast_possible_truncation)] // Scores are published as f32
pub fn pagerank_reference(
    num_vertices: usize,
    edges: &[(u32, u32)],
    alpha: f32,
    iterations: usize,
) -> Vec<f32> {
    let n = num_vertices;
    if n == 0 {
        return Vec::new();
    }
    let alpha = f64::from(alpha);

    let mut out_degrees = vec![0_u32; n];
    for &(src, _) in edges {
        out_degrees[src as usize] += 1;
    }
    let bookmark: Vec<f64> = out_degrees
        .iter()
        .map(|&d| if d == 0 { alpha } else { 0.0 })
        .collect();
    let dot = |v: &[f64]| bookmark.iter().zip(v).map(|(b, x)| b * x).sum::<f64>();

    let mut ranks = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];
    let mut dangling = dot(&ranks);

    for _ in 0..iterations {
        next.fill(0.0);
        for &(src, dst) in edges {
            next[dst as usize] += ranks[src as usize] / f64::from(out_degrees[src as usize]);
        }

        let teleport = dangling / n as f64;
        for r in &mut next {
            *r = alpha * *r + teleport;
        }
        dangling = dot(&next);

        let norm2 = next.iter().map(|r| r * r).sum::<f64>().sqrt();
        if norm2 > 0.0 {
            for r in &mut next {
                *r /= norm2;
            }
        }
        std::mem::swap(&mut ranks, &mut next);
    }

    let norm1: f64 = ranks.iter().map(|r| r.abs()).sum();
    ranks
        .iter()
        .map(|&r| if norm1 > 0.0 { (r / norm1) as f32 } else { r as f32 })
        .collect()
}
