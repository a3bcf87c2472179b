// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

const CASDATASETS_BASE: &str = "https://github.com/dutangc/CASdatasets/raw/master/data/";

/// The default datasets: the two French MTPL frequency/severity file pairs.
static DEFAULT_DATASETS: &[&str] = &["freMTPL2freq", "freMTPL2sev", "freMTPLfreq", "freMTPLsev"];

/// Top-level run configuration. Every field has a default, so an empty YAML
/// document (or no file at all) yields the stock four-dataset setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub raw_dir: PathBuf,
    pub store_dir: PathBuf,
    /// Ignore existing store files and rebuild everything.
    pub refresh: bool,
    pub max_concurrency: usize,
    pub http: HttpConfig,
    pub datasets: Vec<DatasetSpec>,
    pub pairs: Vec<PairSpec>,
    pub explore: ExploreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

/// A dataset as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatasetSpec {
    pub name: String,
    pub url: String,
    /// Name of the object to pick out of a multi-object workspace file.
    #[serde(default)]
    pub object: Option<String>,
}

/// A policy table and the claims table that references it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PairSpec {
    pub policies: String,
    pub claims: String,
    pub key: String,
    pub amount: String,
    /// Per-policy claim counter in the policy table, checked against the claims rows.
    #[serde(default)]
    pub claim_count: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExploreConfig {
    pub histogram: HistogramConfig,
    pub render: RenderConfig,
    pub seed: u64,
    /// Number of policies handed to the pricing model; `None` hands over all of them.
    pub sample_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HistogramConfig {
    pub bins: usize,
    pub bin_min: f64,
    pub bin_max: f64,
    pub out_of_range: OutOfRange,
}

/// What happens to values outside `[bin_min, bin_max]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutOfRange {
    /// Leave them out of every bin and count them as underflow / overflow.
    #[default]
    Exclude,
    /// Fold them into the first / last bin.
    Clamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Width of the longest bar, in characters.
    pub width: usize,
    pub bar: char,
    pub show_empty_bins: bool,
}

/// A fully resolved, immutable dataset descriptor. Identity is `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub name: String,
    pub url: String,
    pub object: Option<String>,
    pub raw_path: PathBuf,
    pub store_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            store_dir: PathBuf::from("data/parquet"),
            refresh: false,
            max_concurrency: 2,
            http: HttpConfig::default(),
            datasets: DEFAULT_DATASETS
                .iter()
                .map(|name| DatasetSpec {
                    name: name.to_string(),
                    url: format!("{CASDATASETS_BASE}{name}.rda"),
                    object: None,
                })
                .collect(),
            pairs: vec![
                PairSpec {
                    policies: "freMTPL2freq".into(),
                    claims: "freMTPL2sev".into(),
                    key: "IDpol".into(),
                    amount: "ClaimAmount".into(),
                    claim_count: Some("ClaimNb".into()),
                },
                PairSpec {
                    policies: "freMTPLfreq".into(),
                    claims: "freMTPLsev".into(),
                    key: "PolicyID".into(),
                    amount: "ClaimAmount".into(),
                    claim_count: Some("ClaimNb".into()),
                },
            ],
            explore: ExploreConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            connect_timeout_secs: 30,
            user_agent: concat!("freqsev/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            histogram: HistogramConfig::default(),
            render: RenderConfig::default(),
            seed: 42,
            sample_size: None,
        }
    }
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bins: 50,
            bin_min: 0.0,
            bin_max: 10_000.0,
            out_of_range: OutOfRange::Exclude,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 60,
            bar: '#',
            show_empty_bins: true,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load a YAML config file and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // serde_yaml rejects an empty document, treat it as "all defaults"
        let cfg: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text).context("parsing YAML")?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }

        let mut names = HashSet::new();
        for ds in &self.datasets {
            if ds.name.trim().is_empty() {
                bail!("dataset with url {} has an empty name", ds.url);
            }
            if ds.name.contains(['/', '\\']) || ds.name == "." || ds.name == ".." {
                bail!("dataset name `{}` must not contain path separators", ds.name);
            }
            if !names.insert(ds.name.as_str()) {
                bail!("dataset `{}` is listed twice", ds.name);
            }
            Url::parse(&ds.url)
                .with_context(|| format!("dataset `{}` has an invalid url {}", ds.name, ds.url))?;
        }

        for pair in &self.pairs {
            for side in [&pair.policies, &pair.claims] {
                if !names.contains(side.as_str()) {
                    bail!(
                        "pair {} / {} references unknown dataset `{}`",
                        pair.policies,
                        pair.claims,
                        side
                    );
                }
            }
        }

        let h = &self.explore.histogram;
        if h.bins == 0 || !(h.bin_min < h.bin_max) || !h.bin_min.is_finite() || !h.bin_max.is_finite()
        {
            bail!(
                "histogram domain [{}, {}] with {} bins is invalid",
                h.bin_min,
                h.bin_max,
                h.bins
            );
        }
        if self.explore.render.width == 0 {
            bail!("render width must be at least 1");
        }
        Ok(())
    }

    /// Resolve every dataset into a descriptor with its local paths.
    pub fn descriptors(&self) -> Vec<DatasetDescriptor> {
        self.datasets
            .iter()
            .map(|ds| DatasetDescriptor {
                name: ds.name.clone(),
                url: ds.url.clone(),
                object: ds.object.clone(),
                raw_path: self.raw_dir.join(format!("{}.{}", ds.name, raw_extension(&ds.url))),
                store_path: self.store_dir.join(format!("{}.parquet", ds.name)),
            })
            .collect()
    }
}

/// File extension of the remote resource, `rda` when it has none.
fn raw_extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|last| {
            Path::new(&last)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        })
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "rda".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.datasets.len(), 4);
        assert_eq!(cfg.pairs.len(), 2);
    }

    #[test]
    fn empty_yaml_means_defaults() {
        let cfg = Config::from_yaml("").unwrap();
        assert_eq!(cfg.datasets, Config::default().datasets);
    }

    #[test]
    fn descriptors_resolve_paths() {
        let yaml = r#"
raw_dir: /tmp/raw
store_dir: /tmp/store
datasets:
  - name: pol
    url: https://example.org/files/pol.RDS
  - name: clm
    url: https://example.org/files/clm
    object: claims
pairs:
  - policies: pol
    claims: clm
    key: id
    amount: amt
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        let d = cfg.descriptors();
        assert_eq!(d[0].raw_path, PathBuf::from("/tmp/raw/pol.rds"));
        assert_eq!(d[0].store_path, PathBuf::from("/tmp/store/pol.parquet"));
        assert_eq!(d[1].raw_path, PathBuf::from("/tmp/raw/clm.rda"));
        assert_eq!(d[1].object.as_deref(), Some("claims"));
        assert_eq!(cfg.pairs[0].claim_count, None);
        // untouched sections keep their defaults
        assert_eq!(cfg.explore.histogram.bins, 50);
    }

    #[test]
    fn rejects_bad_configs() {
        let dup = r#"
datasets:
  - { name: a, url: "https://x.org/a.rda" }
  - { name: a, url: "https://x.org/b.rda" }
pairs: []
"#;
        assert!(Config::from_yaml(dup).is_err());

        let unknown_pair = r#"
datasets:
  - { name: a, url: "https://x.org/a.rda" }
pairs:
  - { policies: a, claims: b, key: k, amount: v }
"#;
        let err = Config::from_yaml(unknown_pair).unwrap_err();
        assert!(format!("{err:#}").contains("unknown dataset `b`"));

        let bad_hist = "explore:\n  histogram:\n    bins: 10\n    bin_min: 5\n    bin_max: 5\n";
        assert!(Config::from_yaml(bad_hist).is_err());

        let slash = "datasets:\n  - { name: ../x, url: \"https://x.org/a.rda\" }\npairs: []\n";
        assert!(Config::from_yaml(slash).is_err());
    }

    #[test]
    fn out_of_range_parses_lowercase() {
        let cfg = Config::from_yaml("explore:\n  histogram:\n    out_of_range: clamp\n").unwrap();
        assert_eq!(cfg.explore.histogram.out_of_range, OutOfRange::Clamp);
    }
}
