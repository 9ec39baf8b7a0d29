//! Command-line surface of the `harvester` binary.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use harvester_core::FileTypeFilter;

pub const DEFAULT_ORIGIN: &str = "https://github.com/Comfy-Org/workflow_templates";
pub const DEFAULT_OUTPUT_DIR: &str = "workflow_templates";
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Parser)]
#[command(name = "harvester")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Collect workflow JSON documents from repositories, web pages and image metadata", long_about = None)]
pub struct Cli {
    /// RON settings file (default: ./harvester.ron when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level and mirror the log to the terminal
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log file location
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Walk an origin and persist every workflow found
    Harvest(HarvestArgs),

    /// Stream one large file (e.g. model weights) straight to disk
    Download(DownloadArgs),

    /// GET a URL and pretty-print its JSON body
    GetJson {
        /// Endpoint to query
        url: String,
    },
}

#[derive(Debug, Args)]
pub struct HarvestArgs {
    /// Repository URL, web page URL or local folder
    #[arg(default_value = DEFAULT_ORIGIN)]
    pub origin: String,

    /// Directory receiving the workflow files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Which candidates to process
    #[arg(long = "file-type", value_enum)]
    pub file_type: Option<FileTypeArg>,

    /// Only look at the top level of the origin
    #[arg(long)]
    pub no_recursive: bool,

    /// Also keep the fetched images in this directory
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Candidates processed at once (1-8)
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Environment variable holding the hosting API token
    #[arg(long)]
    pub token_env: Option<String>,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    pub url: String,

    /// Target directory, created when missing
    #[arg(short, long, default_value = "models")]
    pub dir: PathBuf,

    /// File name; derived from the URL when omitted
    #[arg(short, long)]
    pub name: Option<String>,

    /// Environment variable holding a bearer token for the download
    #[arg(long)]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FileTypeArg {
    Json,
    Image,
}

impl From<FileTypeArg> for FileTypeFilter {
    fn from(arg: FileTypeArg) -> Self {
        match arg {
            FileTypeArg::Json => FileTypeFilter::Json,
            FileTypeArg::Image => FileTypeFilter::Image,
        }
    }
}
