//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Site used for `--show-limits` when no `--site` is given.
pub const DEFAULT_SITE: &str = "https://e-hentai.org/";

/// Download image galleries page by page.
///
/// Galleries are processed one at a time in the order given; pages of a
/// gallery download concurrently. Ctrl-C returns the active gallery to the
/// queue.
#[derive(Parser, Debug)]
#[command(name = "exdownloader")]
#[command(author, version, about)]
pub struct Args {
    /// Gallery addresses, e.g. https://e-hentai.org/g/123456/0123456789/
    #[arg(value_name = "GALLERY", required_unless_present = "show_limits")]
    pub galleries: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Simultaneous page downloads (1-5, default 3)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub concurrency: Option<u8>,

    /// Root directory for gallery folders (default: current directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Name files by page number instead of the server file name
    #[arg(long)]
    pub rename_by_index: bool,

    /// Replace files that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Save each gallery's cover image as well
    #[arg(long)]
    pub thumbnails: bool,

    /// Proxy for http:// requests
    #[arg(long, value_name = "URL")]
    pub http_proxy: Option<String>,

    /// Proxy for https:// requests
    #[arg(long, value_name = "URL")]
    pub https_proxy: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/exdownloader/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the account's image limits and exit when no gallery is given
    #[arg(long)]
    pub show_limits: bool,

    /// Site whose home page holds the account limits
    #[arg(long, value_name = "URL", default_value = DEFAULT_SITE)]
    pub site: Url,
}
