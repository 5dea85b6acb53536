use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use ceres_core::config::CeresConfig;
use ceres_core::models::DatasetOrder;
use ceres_core::upsert::MergeStrategy;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "ceres")]
#[command(author, version, about = "Harvester and dashboard backend for CKAN open data catalogs")]
#[command(after_help = "Examples:
  ceres harvest --page-size 200
  ceres bootstrap
  ceres stats --top 5
  ceres list --search \"qualité de l'air\" --limit 20
  ceres show 7d7b4cb2-0e6c-4f8e-9d3b-1f2a3c4d5e6f")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Path to a TOML configuration file (default: <config dir>/ceres/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sweep the catalog and upsert every dataset
    #[command(after_help = "Examples:
  ceres harvest                                  # Use the configured catalog
  ceres harvest --base-url https://demo.ckan.org/api/3/action
  ceres harvest --max-pages 2 --merge-strategy merge
  ceres harvest --lease                          # Refuse to run alongside another harvest")]
    Harvest(HarvestArgs),

    /// Harvest only if no dataset has been stored yet
    Bootstrap(HarvestArgs),

    /// Show corpus statistics
    Stats {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Number of organizations in the top list
        #[arg(long, value_name = "N")]
        top: Option<usize>,
    },

    /// List stored datasets
    List {
        /// Case-insensitive match on title, notes, organization or tags
        #[arg(short, long)]
        search: Option<String>,
        /// Sort order: modified, -modified, title, -title
        #[arg(long, default_value = "-modified", allow_hyphen_values = true)]
        order: DatasetOrder,
        /// Maximum number of datasets to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one dataset with its resources, as JSON
    Show {
        /// CKAN package id
        #[arg(value_name = "CKAN_ID")]
        ckan_id: String,
    },
}

/// Options shared by `harvest` and `bootstrap`. Unset flags keep the value
/// from the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct HarvestArgs {
    /// Root of the CKAN action API
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Records requested per page
    #[arg(long, value_name = "N")]
    pub page_size: Option<u32>,

    /// Stop after this many pages
    #[arg(long, value_name = "N")]
    pub max_pages: Option<u32>,

    /// Delete stored resources missing from a dataset's new payload
    #[arg(long)]
    pub prune_resources: bool,

    /// How incoming values are combined with stored ones
    #[arg(long, value_enum)]
    pub merge_strategy: Option<MergeStrategyArg>,

    /// Do not retry transient catalog failures
    #[arg(long)]
    pub no_retry: bool,

    /// Take the database run lease before harvesting
    #[arg(long)]
    pub lease: bool,
}

impl HarvestArgs {
    /// Layers the flags on top of `config`.
    pub fn apply(&self, config: &mut CeresConfig) {
        if let Some(url) = &self.base_url {
            config.catalog.base_url = url.clone();
        }
        if let Some(page_size) = self.page_size {
            config.harvest.page_size = page_size;
        }
        if let Some(max_pages) = self.max_pages {
            config.harvest.max_pages = Some(max_pages);
        }
        if self.prune_resources {
            config.harvest.prune_missing_resources = true;
        }
        if let Some(strategy) = self.merge_strategy {
            config.harvest.merge_strategy = strategy.into();
        }
        if self.no_retry {
            config.catalog.max_retries = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MergeStrategyArg {
    /// Overwrite every attribute with the incoming value
    Replace,
    /// Keep stored values where the incoming one is null
    Merge,
}

impl From<MergeStrategyArg> for MergeStrategy {
    fn from(arg: MergeStrategyArg) -> Self {
        match arg {
            MergeStrategyArg::Replace => MergeStrategy::Replace,
            MergeStrategyArg::Merge => MergeStrategy::Merge,
        }
    }
}
