use indicatif::{ProgressBar, ProgressStyle};
use num_traits::{Num, NumCast};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::CliError;

pub const BED_EXTENSIONS: [&str; 1] = ["bed"];
pub const BIGWIG_EXTENSIONS: [&str; 2] = ["bw", "bigwig"];

// os
#[cfg(not(windows))]
const TICK_SETTINGS: (&str, u64) = ("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ", 80);
#[cfg(windows)]
const TICK_SETTINGS: (&str, u64) = (r"+-x| ", 200);

/// return a pre-configured progress bar
pub fn get_progress_bar(length: u64, msg: &str) -> ProgressBar {
    let progressbar_style = ProgressStyle::default_spinner()
        .tick_chars(TICK_SETTINGS.0)
        .template(" {spinner} {msg:<30} {wide_bar} ETA {eta_precise} ")
        .expect("no template error");

    let progress_bar = ProgressBar::new(length);

    progress_bar.set_style(progressbar_style);
    progress_bar.enable_steady_tick(Duration::from_millis(TICK_SETTINGS.1));
    progress_bar.set_message(msg.to_owned());

    progress_bar
}

/// write any collection of lines to a file
pub fn write_collection<P: AsRef<Path>>(data: &[String], fname: P) -> Result<(), CliError> {
    log::info!(
        "Records in {:?}: {:?}. Writing...",
        fname.as_ref(),
        data.len()
    );
    let f = File::create(fname)?;
    let mut writer = BufWriter::new(f);

    for line in data.iter() {
        writeln!(writer, "{}", line)?;
    }

    writer.flush()?;
    Ok(())
}

/// argument checker for all subcommands
pub trait ArgCheck {
    fn check(&self) -> Result<(), CliError> {
        self.validate_args()
    }

    fn validate_args(&self) -> Result<(), CliError> {
        self.check_signal()?;
        self.check_tracks()?;

        if self.reference_requested() {
            match self.get_reference() {
                Some(reference) => validate(reference, &BED_EXTENSIONS)?,
                None => {
                    return Err(CliError::MissingReference(
                        "reference elements were requested but --reference was not provided"
                            .to_string(),
                    ))
                }
            }
        } else if self.get_reference().is_some() {
            log::warn!("Reference provided but no reference element is used. Skipping...");
        }

        Ok(())
    }

    fn check_signal(&self) -> Result<(), CliError> {
        if self.get_signal().is_empty() {
            let err = "No coverage signal provided".to_string();
            return Err(CliError::InvalidInput(err));
        }
        for bw in self.get_signal() {
            validate(bw, &BIGWIG_EXTENSIONS)?;
        }

        Ok(())
    }

    fn check_tracks(&self) -> Result<(), CliError> {
        for track in self.get_tracks() {
            validate(track, &BED_EXTENSIONS)?;
        }
        Ok(())
    }

    fn get_signal(&self) -> Vec<&PathBuf>;
    fn get_tracks(&self) -> Vec<&PathBuf>;
    fn get_reference(&self) -> Option<&PathBuf>;
    fn reference_requested(&self) -> bool;
}

/// argument validation
pub fn validate(arg: &PathBuf, extensions: &[&str]) -> Result<(), CliError> {
    if !arg.exists() {
        return Err(CliError::InvalidInput(format!(
            "ERROR: {:?} does not exist",
            arg
        )));
    }

    if !arg.is_file() {
        return Err(CliError::InvalidInput(format!(
            "ERROR: {:?} is not a file",
            arg
        )));
    }

    match arg.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) => (),
        _ => {
            return Err(CliError::InvalidInput(format!(
                "ERROR: file {:?} is not one of {:?}",
                arg, extensions
            )))
        }
    }

    match std::fs::metadata(arg) {
        Ok(metadata) if metadata.len() == 0 => Err(CliError::InvalidInput(format!(
            "ERROR: file {:?} is empty",
            arg
        ))),
        Ok(_) => Ok(()),
        Err(e) => Err(CliError::IoError(e)),
    }
}

/// merge closed intervals that overlap or touch
///
/// # Arguments
///
/// * `regions` - unsorted closed intervals
///
/// # Returns
///
/// Sorted, disjoint, non-adjacent intervals
///
/// # Example
///
/// ```rust
/// use config::flatten;
///
/// let merged = flatten(vec![(10u64, 20u64), (5, 9), (30, 40)]);
/// assert_eq!(merged, vec![(5, 20), (30, 40)]);
/// ```
pub fn flatten<N>(mut regions: Vec<(N, N)>) -> Vec<(N, N)>
where
    N: Num + NumCast + Copy + PartialOrd + Ord,
{
    if regions.is_empty() {
        return regions;
    }

    regions.sort_unstable();
    let mut merged: Vec<(N, N)> = Vec::with_capacity(regions.len());

    for (start, stop) in regions {
        match merged.last_mut() {
            Some(last) if start <= last.1 + N::one() => {
                if stop > last.1 {
                    last.1 = stop;
                }
            }
            _ => merged.push((start, stop)),
        }
    }

    merged
}

/// index of the bin holding `value`, numpy `searchsorted(side=right) - 1`
#[inline(always)]
pub fn bin_of<N: PartialOrd + Copy>(boundaries: &[N], value: N) -> Option<usize> {
    let idx = boundaries.partition_point(|b| *b <= value);
    idx.checked_sub(1)
}

/// disjoint-set forest over dense ids
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        // path compression
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }

        root
    }

    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }

        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }

        true
    }

    /// connected components, each sorted, ordered by their smallest member
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut groups: hashbrown::HashMap<usize, Vec<usize>> = hashbrown::HashMap::new();
        for node in 0..self.parent.len() {
            let root = self.find(node);
            groups.entry(root).or_default().push(node);
        }

        let mut components: Vec<Vec<usize>> = groups.into_values().collect();
        components.sort_unstable_by_key(|c| c[0]);
        components
    }
}
