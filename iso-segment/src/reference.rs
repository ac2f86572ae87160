use config::{flatten, SegmentParams, Strand};
use packbed::{GeneLocus, GenePredMap};

/// loci from annotated gene extents instead of coverage
///
/// Overlapping transcripts form one locus; neighbouring loci meet halfway
/// between them and the outermost ends are pushed out by
/// `max_gene_expansion`, clamped to the contig.
pub fn reference_loci(
    tracks: &GenePredMap,
    chrom: &str,
    strand: Strand,
    contig_len: u64,
    params: &SegmentParams,
) -> Vec<GeneLocus> {
    let extents = tracks
        .get(chrom)
        .map(|records| {
            records
                .iter()
                .filter(|tx| tx.strand == strand && tx.end < contig_len)
                .map(|tx| (tx.start, tx.end))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut genes = flatten(extents);
    if genes.is_empty() || contig_len == 0 {
        return Vec::new();
    }

    for idx in 0..genes.len() - 1 {
        let mid = (genes[idx].1 + genes[idx + 1].0) / 2;
        genes[idx].1 = mid;
        genes[idx + 1].0 = mid + 1;
    }

    let n = genes.len();
    genes[0].0 = genes[0].0.saturating_sub(params.max_gene_expansion);
    genes[n - 1].1 = (genes[n - 1].1 + params.max_gene_expansion).min(contig_len - 1);

    genes
        .into_iter()
        .map(|region| GeneLocus::new(chrom, strand, vec![region]))
        .collect()
}
