use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gowatch",
    version,
    about = "Watch a Go project, rebuild on change and restart the app",
    long_about = "gowatch watches a source tree for .go and .mod changes. On every change it \
                  runs the build, stops the previously running binary and starts the new one.",
    override_usage = "gowatch [OPTIONS] [-- <BUILD ARGS>... [-- <APP ARGS>...]]"
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the go executable
    #[arg(long = "go", value_name = "PATH")]
    pub go: Option<String>,

    /// Key to enter to rebuild, empty to disable [default: r]
    #[arg(long, value_name = "KEY")]
    pub rebuild_key: Option<String>,

    /// Extra directory name to ignore (node_modules, .git and dist are always ignored)
    #[arg(long = "ignore", value_name = "NAME")]
    pub ignore: Vec<String>,

    /// Build without running the binary
    #[arg(long)]
    pub no_run: bool,

    /// Run go test instead of go build
    #[arg(long)]
    pub test: bool,

    /// Run go clean before every build
    #[arg(long)]
    pub clean: bool,

    /// Command to run before every build
    #[arg(long, value_name = "COMMAND")]
    pub prebuild: Option<String>,

    /// Working directory for go and the app
    #[arg(short = 'C', long = "dir", value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Directory to watch [default: .]
    #[arg(short, long, value_name = "DIR")]
    pub watch: Option<PathBuf>,

    /// Extra file suffix to watch
    #[arg(long = "ext", value_name = "SUFFIX")]
    pub ext: Vec<String>,

    /// Output path of the built binary
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Poll for changes instead of using OS notifications, every MS milliseconds [default: 200]
    #[arg(long, value_name = "MS")]
    pub poll: Option<Option<u64>>,

    /// Build arguments, then app arguments after a second `--`
    #[arg(last = true, value_name = "ARGS")]
    pub passthrough: Vec<String>,
}
