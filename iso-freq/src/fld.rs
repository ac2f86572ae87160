use config::DEFAULT_READ_GROUP;
use hashbrown::HashMap;
use statrs::distribution::{ContinuousCDF, Normal};

const NORMAL_SD_SPAN: f64 = 4.0;

/// discrete fragment length density over `[min_fl, max_fl]`
#[derive(Debug, Clone, PartialEq)]
pub struct FlDist {
    pub min_fl: usize,
    pub max_fl: usize,
    density: Vec<f64>,
}

impl FlDist {
    /// normal density truncated to `[max(0, mean - 4sd), mean + 4sd]`
    ///
    /// Each length takes the mass of `[fl - 0.5, fl + 0.5)`, the support is
    /// then renormalised to sum to one.
    pub fn from_normal(mean: f64, sd: f64) -> Self {
        let min_fl = (mean - NORMAL_SD_SPAN * sd).max(0.0).floor() as usize;
        let max_fl = (mean + NORMAL_SD_SPAN * sd).ceil().max(min_fl as f64) as usize;

        let density = match Normal::new(mean, sd.max(f64::EPSILON)) {
            Ok(normal) => (min_fl..=max_fl)
                .map(|fl| normal.cdf(fl as f64 + 0.5) - normal.cdf(fl as f64 - 0.5))
                .collect::<Vec<_>>(),
            Err(_) => vec![1.0; max_fl - min_fl + 1],
        };

        Self::normalized(min_fl, max_fl, density)
    }

    /// empirical density from observed fragment lengths
    pub fn from_lengths(lengths: &[usize]) -> Option<Self> {
        let min_fl = *lengths.iter().min()?;
        let max_fl = *lengths.iter().max()?;

        let mut density = vec![0.0; max_fl - min_fl + 1];
        for fl in lengths {
            density[fl - min_fl] += 1.0;
        }

        Some(Self::normalized(min_fl, max_fl, density))
    }

    fn normalized(min_fl: usize, max_fl: usize, mut density: Vec<f64>) -> Self {
        let total = density.iter().sum::<f64>();
        if total > 0.0 {
            density.iter_mut().for_each(|d| *d /= total);
        }

        Self {
            min_fl,
            max_fl,
            density,
        }
    }

    pub fn density(&self, fl: usize) -> f64 {
        if fl < self.min_fl || fl > self.max_fl {
            return 0.0;
        }
        self.density[fl - self.min_fl]
    }

    /// lengths with non-zero mass, paired with their density
    pub fn support(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.density
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > 0.0)
            .map(move |(idx, d)| (self.min_fl + idx, *d))
    }
}

/// fragment length distributions keyed by read group
#[derive(Debug, Clone)]
pub struct FlDists {
    dists: HashMap<String, FlDist>,
}

impl FlDists {
    /// only the default read group, from a normal density
    pub fn from_normal(mean: f64, sd: f64) -> Self {
        let mut dists = HashMap::new();
        dists.insert(DEFAULT_READ_GROUP.to_string(), FlDist::from_normal(mean, sd));
        Self { dists }
    }

    pub fn insert(&mut self, read_group: &str, dist: FlDist) {
        self.dists.insert(read_group.to_string(), dist);
    }

    /// distribution of `read_group`, falling back to the default group
    pub fn get(&self, read_group: &str) -> Option<&FlDist> {
        self.dists
            .get(read_group)
            .or_else(|| self.dists.get(DEFAULT_READ_GROUP))
    }
}
