use config::{GraphParams, LocusOutcome};
use log::debug;
use packbed::{Bin, BinKind, Label};

use crate::segments::{LabeledSegments, LocusEvidence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// index into the labeled segments
    Segment(usize),
    /// cut position opening transcripts
    Tss(usize),
    /// cut position closing transcripts
    Tes(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Adjacency,
    Splice,
    Tss,
    Tes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
    pub bin: Option<Bin>,
}

/// candidate transcript as a walk over segments, local frame
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidatePath {
    pub tss: usize,
    pub tes: usize,
    pub segments: Vec<usize>,
}

/// DAG over dense node ids; edges always point downstream
#[derive(Debug, Clone)]
pub struct SpliceGraph {
    pub nodes: Vec<NodeKind>,
    pub edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
    segment_node: Vec<Option<usize>>,
}

/// segment passes the locus-wide expression floor
pub fn passes_floor(segments: &LabeledSegments, idx: usize, params: &GraphParams) -> bool {
    let bin = &segments.bins[idx];
    if segments.empty[idx] || bin.kind == BinKind::Intron {
        return false;
    }

    let mean = bin.expression.unwrap_or(0.0);
    if mean < params.min_exon_bpkm {
        return false;
    }

    if (bin.len() as usize) > params.min_ext_len_for_ratio {
        let neighbour = [idx.checked_sub(1), Some(idx + 1)]
            .into_iter()
            .flatten()
            .filter_map(|n| segments.bins.get(n))
            .filter(|n| n.kind != BinKind::Intron)
            .filter_map(|n| n.expression)
            .fold(0.0f64, f64::max);

        if mean < neighbour / params.exon_ext_cvg_ratio {
            return false;
        }
    }

    true
}

impl SpliceGraph {
    pub fn build(segments: &LabeledSegments, ev: &LocusEvidence, params: &GraphParams) -> Self {
        let mut graph = SpliceGraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            outgoing: Vec::new(),
            segment_node: vec![None; segments.len()],
        };

        for idx in 0..segments.len() {
            if passes_floor(segments, idx, params) {
                let node = graph.add_node(NodeKind::Segment(idx));
                graph.segment_node[idx] = Some(node);
            }
        }

        for idx in 1..segments.len() {
            if let (Some(a), Some(b)) = (graph.segment_node[idx - 1], graph.segment_node[idx]) {
                graph.add_edge(a, b, EdgeKind::Adjacency, None);
            }
        }

        for jn in ev.junctions {
            if jn.start == 0 {
                continue;
            }

            let donor = segments.ending_at(jn.start - 1).and_then(|i| graph.segment_node[i]);
            let acceptor = segments
                .starting_at(jn.stop + 1)
                .and_then(|i| graph.segment_node[i]);

            if let (Some(a), Some(b)) = (donor, acceptor) {
                let bin = Bin::new(BinKind::Intron, jn.start as u64, jn.stop as u64)
                    .with_score(jn.count)
                    .with_expression(jn.count as f64);
                graph.add_edge(a, b, EdgeKind::Splice, Some(bin));
            }
        }

        for (idx, bin) in segments.bins.iter().enumerate() {
            let Some(node) = graph.segment_node[idx] else {
                continue;
            };

            if bin.left_labels.iter().any(Label::is_tss) {
                let tss = graph.add_node(NodeKind::Tss(bin.start as usize));
                graph.add_edge(tss, node, EdgeKind::Tss, None);
            }
            if bin.right_labels.iter().any(Label::is_tes) {
                let tes = graph.add_node(NodeKind::Tes(bin.stop as usize));
                graph.add_edge(node, tes, EdgeKind::Tes, None);
            }
        }

        debug!(
            "Splice graph: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        graph
    }

    fn add_node(&mut self, kind: NodeKind) -> usize {
        self.nodes.push(kind);
        self.outgoing.push(Vec::new());
        self.nodes.len() - 1
    }

    fn add_edge(&mut self, from: usize, to: usize, kind: EdgeKind, bin: Option<Bin>) {
        self.outgoing[from].push(self.edges.len());
        self.edges.push(Edge {
            from,
            to,
            kind,
            bin,
        });
    }

    pub fn node_of_segment(&self, idx: usize) -> Option<usize> {
        self.segment_node.get(idx).copied().flatten()
    }

    pub fn successors(&self, node: usize) -> impl Iterator<Item = (usize, EdgeKind)> + '_ {
        self.outgoing[node]
            .iter()
            .map(move |e| (self.edges[*e].to, self.edges[*e].kind))
    }

    pub fn tss_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, NodeKind::Tss(_)))
            .map(|(i, _)| i)
    }

    /// every TSS to TES path, aborting once more than `ceiling` are found
    pub fn enumerate_paths(&self, ceiling: usize) -> Result<Vec<CandidatePath>, LocusOutcome> {
        let mut paths = Vec::new();

        for root in self.tss_nodes() {
            let NodeKind::Tss(tss) = self.nodes[root] else {
                continue;
            };

            // (node, depth of the live path when the node was pushed)
            let mut stack: Vec<(usize, usize)> = self.successors(root).map(|(n, _)| (n, 0)).collect();
            let mut path: Vec<usize> = Vec::new();

            while let Some((node, depth)) = stack.pop() {
                path.truncate(depth);

                match self.nodes[node] {
                    NodeKind::Segment(seg) => {
                        path.push(seg);
                        for (next, _) in self.successors(node) {
                            stack.push((next, path.len()));
                        }
                    }
                    NodeKind::Tes(tes) => {
                        paths.push(CandidatePath {
                            tss,
                            tes,
                            segments: path.clone(),
                        });

                        if paths.len() > ceiling {
                            return Err(LocusOutcome::TooManyCandidates(paths.len(), ceiling));
                        }
                    }
                    NodeKind::Tss(_) => continue,
                }
            }
        }

        paths.sort();
        Ok(paths)
    }
}

impl CandidatePath {
    /// exons in the local frame; consecutive segments merge, gaps are splices
    pub fn exons(&self, segments: &LabeledSegments) -> Vec<(usize, usize)> {
        let mut exons: Vec<(usize, usize)> = Vec::new();
        let mut prev: Option<usize> = None;

        for idx in self.segments.iter() {
            let bin = &segments.bins[*idx];
            let (start, stop) = (bin.start as usize, bin.stop as usize);

            match (prev, exons.last_mut()) {
                (Some(p), Some(last)) if *idx == p + 1 => last.1 = stop,
                _ => exons.push((start, stop)),
            }
            prev = Some(*idx);
        }

        exons
    }

    pub fn is_spliced(&self) -> bool {
        self.segments.windows(2).any(|w| w[1] != w[0] + 1)
    }
}
