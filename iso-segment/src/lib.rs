//! Segmentation engine
//!
//! Splits contigs into candidate gene loci from coverage and splice
//! junctions, filters junctions, and refines loci after peak calling.

pub mod core;
pub mod junctions;
pub mod reference;
pub mod utils;

pub use crate::core::{intergenic_space, re_segment, segment_contig, segment_empty_regions};
pub use junctions::{filter_junctions, filter_locus_junctions};
pub use reference::reference_loci;
pub use utils::{
    cluster_regions, cluster_split_points, find_empty_regions, transcribed_regions, EmptyScanner,
};
