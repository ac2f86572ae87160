use config::{bin_of, flatten, UnionFind};
use packbed::LocalJunction;

/// runs of coverage below `threshold` longer than `min_length`
///
/// # Arguments
///
/// * `cov` - per-base coverage
/// * `threshold` - values below it count as empty
/// * `min_length` - runs must be strictly longer than this
///
/// # Returns
///
/// Closed `(start, stop)` index pairs, sorted
///
/// # Example
///
/// ```rust
/// use iso_segment::find_empty_regions;
///
/// let cov = vec![0.0, 0.0, 0.0, 5.0, 5.0, 0.0];
/// assert_eq!(find_empty_regions(&cov, 1e-6, 2), vec![(0, 2)]);
/// ```
pub fn find_empty_regions(cov: &[f32], threshold: f32, min_length: usize) -> Vec<(usize, usize)> {
    let mut scanner = EmptyScanner::new(threshold, min_length);
    scanner.push(cov);
    scanner.finish()
}

/// `find_empty_regions` over a signal fed in consecutive chunks
#[derive(Debug, Clone)]
pub struct EmptyScanner {
    threshold: f32,
    min_length: usize,
    pos: usize,
    run_start: Option<usize>,
    regions: Vec<(usize, usize)>,
}

impl EmptyScanner {
    pub fn new(threshold: f32, min_length: usize) -> Self {
        Self {
            threshold,
            min_length,
            pos: 0,
            run_start: None,
            regions: Vec::new(),
        }
    }

    /// bases seen so far
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn push(&mut self, values: &[f32]) {
        for value in values {
            let idx = self.pos;
            match (*value < self.threshold, self.run_start) {
                (true, None) => self.run_start = Some(idx),
                (false, Some(start)) => {
                    if idx - start > self.min_length {
                        self.regions.push((start, idx - 1));
                    }
                    self.run_start = None;
                }
                _ => (),
            }
            self.pos += 1;
        }
    }

    pub fn finish(mut self) -> Vec<(usize, usize)> {
        if let Some(start) = self.run_start {
            if self.pos - start > self.min_length {
                self.regions.push((start, self.pos - 1));
            }
        }
        self.regions
    }
}

/// complement of `empty` within `[0, len)`
pub fn transcribed_regions(empty: &[(usize, usize)], len: usize) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut cursor = 0;

    for (start, stop) in flatten(empty.to_vec()) {
        if start > cursor {
            regions.push((cursor, start - 1));
        }
        cursor = stop + 1;
    }

    if cursor < len {
        regions.push((cursor, len - 1));
    }

    regions
}

/// groups disjoint sorted regions connected by junctions
///
/// A junction links the region holding its donor base (`start - 1`) to the
/// region holding its acceptor base (`stop + 1`); junctions whose ends fall
/// outside every region are skipped.
pub fn cluster_regions(
    regions: &[(usize, usize)],
    junctions: &[LocalJunction],
) -> Vec<Vec<(usize, usize)>> {
    if regions.is_empty() {
        return Vec::new();
    }

    let starts = regions.iter().map(|r| r.0).collect::<Vec<_>>();
    let locate = |pos: usize| {
        bin_of(&starts, pos).filter(|&idx| regions[idx].1 >= pos)
    };

    let mut uf = UnionFind::new(regions.len());
    for jn in junctions {
        if jn.start == 0 {
            continue;
        }

        if let (Some(a), Some(b)) = (locate(jn.start - 1), locate(jn.stop + 1)) {
            uf.union(a, b);
        }
    }

    uf.components()
        .into_iter()
        .map(|component| component.into_iter().map(|idx| regions[idx]).collect())
        .collect()
}

/// splits `[0, len)` at `split_points` and rejoins pieces linked by junctions
///
/// Piece `i` spans `(points[i] + 1, points[i + 1] - 1)` once `0` and `len`
/// are added as outer points. Adjacent pieces in one component merge into a
/// single region; non-adjacent ones stay separate regions.
pub fn cluster_split_points(
    split_points: &[usize],
    len: usize,
    junctions: &[LocalJunction],
) -> Vec<Vec<(usize, usize)>> {
    let mut points = split_points.to_vec();
    points.push(0);
    points.push(len);
    points.sort_unstable();
    points.dedup();

    if points.len() < 2 {
        return Vec::new();
    }

    let n_pieces = points.len() - 1;
    let (first, last) = (points[0], points[points.len() - 1]);
    let mut uf = UnionFind::new(n_pieces);

    for jn in junctions {
        if jn.start == 0 || jn.start - 1 < first || jn.stop + 1 >= last {
            continue;
        }

        if let (Some(a), Some(b)) = (bin_of(&points, jn.start - 1), bin_of(&points, jn.stop + 1)) {
            if a != b && a < n_pieces && b < n_pieces {
                uf.union(a, b);
            }
        }
    }

    // split points are left out of both neighbours, the locus start is not
    let piece_start = |idx: usize| if idx == 0 { first } else { points[idx] + 1 };

    uf.components()
        .into_iter()
        .filter_map(|component| {
            let mut regions: Vec<(usize, usize)> = Vec::new();
            let mut prev = component[0];
            let mut open = piece_start(prev);

            for &idx in component.iter().skip(1) {
                if idx > prev + 1 {
                    regions.push((open, points[prev + 1].saturating_sub(1)));
                    open = piece_start(idx);
                }
                prev = idx;
            }
            regions.push((open, points[prev + 1].saturating_sub(1)));

            let regions = regions
                .into_iter()
                .filter(|(start, stop)| stop >= start)
                .collect::<Vec<_>>();

            if regions.is_empty() {
                None
            } else {
                Some(regions)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_empty_regions_edges() {
        let mut cov = vec![0.0f32; 10];
        cov.extend(vec![3.0; 5]);
        cov.extend(vec![0.0; 4]);
        cov.extend(vec![2.0; 5]);
        cov.extend(vec![0.0; 6]);

        assert_eq!(find_empty_regions(&cov, 1e-6, 4), vec![(0, 9), (24, 29)]);
        assert_eq!(find_empty_regions(&cov, 1e-6, 3), vec![(0, 9), (15, 18), (24, 29)]);
        assert!(find_empty_regions(&[1.0, 1.0], 1e-6, 0).is_empty());
    }

    #[test]
    fn test_empty_scanner_joins_runs_across_chunks() {
        let mut cov = vec![0.0f32; 10];
        cov.extend(vec![3.0; 5]);
        cov.extend(vec![0.0; 4]);
        cov.extend(vec![2.0; 5]);
        cov.extend(vec![0.0; 6]);

        let mut scanner = EmptyScanner::new(1e-6, 3);
        for chunk in cov.chunks(7) {
            scanner.push(chunk);
        }
        assert_eq!(scanner.len(), 30);
        assert_eq!(scanner.finish(), find_empty_regions(&cov, 1e-6, 3));
    }

    #[test]
    fn test_transcribed_regions() {
        let empty = vec![(0, 9), (24, 29)];
        assert_eq!(transcribed_regions(&empty, 30), vec![(10, 23)]);
        assert_eq!(transcribed_regions(&[], 5), vec![(0, 4)]);
        assert!(transcribed_regions(&[(0, 4)], 5).is_empty());
    }

    #[test]
    fn test_cluster_regions_by_junction() {
        let regions = vec![(10, 50), (200, 300), (500, 600)];
        let junctions = vec![LocalJunction::new(51, 199, 4)];
        let clusters = cluster_regions(&regions, &junctions);

        assert_eq!(clusters, vec![vec![(10, 50), (200, 300)], vec![(500, 600)]]);
    }

    #[test]
    fn test_cluster_regions_skips_outside_junctions() {
        let regions = vec![(10, 50), (200, 300)];
        let junctions = vec![LocalJunction::new(60, 150, 4)];
        assert_eq!(cluster_regions(&regions, &junctions).len(), 2);
    }

    #[test]
    fn test_cluster_split_points() {
        // pieces: (0,99) (101,199) (201,299)
        let junctions = vec![LocalJunction::new(50, 250, 3)];
        let clusters = cluster_split_points(&[100, 200], 300, &junctions);

        assert_eq!(clusters, vec![vec![(0, 99), (201, 299)], vec![(101, 199)]]);
        assert_eq!(cluster_split_points(&[], 10, &[]), vec![vec![(0, 9)]]);
    }
}
