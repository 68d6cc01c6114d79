//! Watch configuration
//!
//! [`WatchConfig`] is immutable once built. It is assembled through
//! [`WatchConfigBuilder`], optionally seeded from a TOML [`FileConfig`], and
//! then handed by value to the session.

use crate::error::{Result, WatchError};
use crate::paths::default_exec_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Suffix of the dependency manifest that triggers a tidy run.
pub const MANIFEST_SUFFIX: &str = ".mod";

/// Polling cadence of the reference watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const DEFAULT_BUILD_TOOL: &str = "go";

pub fn default_extensions() -> Vec<String> {
    vec![".go".to_string(), MANIFEST_SUFFIX.to_string()]
}

/// Whether a cycle builds (and runs) or only tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Build,
    Test,
}

/// How filesystem changes are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchBackend {
    /// OS change notifications.
    #[default]
    Native,
    /// Directory snapshots compared at a fixed interval.
    Poll { interval: Duration },
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    directory: PathBuf,
    output: Option<PathBuf>,
    build_tool: String,
    build_args: Vec<String>,
    app_args: Vec<String>,
    ignore_dirs: Vec<String>,
    extensions: Vec<String>,
    mode: BuildMode,
    no_run: bool,
    clean_first: bool,
    prebuild: Vec<String>,
    rebuild_key: Option<u8>,
    working_dir: Option<PathBuf>,
    backend: WatchBackend,
}

impl WatchConfig {
    pub fn builder() -> WatchConfigBuilder {
        WatchConfigBuilder::default()
    }

    /// Absolute directory being watched.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn build_tool(&self) -> &str {
        &self.build_tool
    }

    pub fn build_args(&self) -> &[String] {
        &self.build_args
    }

    pub fn app_args(&self) -> &[String] {
        &self.app_args
    }

    pub fn ignore_dirs(&self) -> &[String] {
        &self.ignore_dirs
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn is_test(&self) -> bool {
        self.mode == BuildMode::Test
    }

    pub fn no_run(&self) -> bool {
        self.no_run
    }

    pub fn clean_first(&self) -> bool {
        self.clean_first
    }

    /// Prebuild argv, empty when no prebuild step is configured.
    pub fn prebuild(&self) -> &[String] {
        &self.prebuild
    }

    pub fn rebuild_key(&self) -> Option<u8> {
        self.rebuild_key
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn backend(&self) -> WatchBackend {
        self.backend
    }

    /// Resolves the absolute path of the build artifact.
    ///
    /// An explicit output wins. Otherwise the module path reported by
    /// `<tool> list -m` names the artifact, falling back to the watched
    /// directory.
    pub async fn resolve_output(&self) -> Result<PathBuf> {
        let output = match &self.output {
            Some(output) => output.clone(),
            None => {
                let source = match self.module_path().await {
                    Some(module) => module,
                    None => self.directory.to_string_lossy().into_owned(),
                };
                PathBuf::from(default_exec_name(&source))
            }
        };

        if output.is_absolute() {
            return Ok(output);
        }
        let absolute = match &self.working_dir {
            Some(dir) => std::path::absolute(dir.join(&output)),
            None => std::path::absolute(&output),
        };
        absolute.map_err(|e| WatchError::io(output, e))
    }

    async fn module_path(&self) -> Option<String> {
        let mut cmd = Command::new(&self.build_tool);
        cmd.args(["list", "-m"]);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.ok()?;
        if !output.status.success() {
            debug!("{} list -m exited with {}", self.build_tool, output.status);
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let module = stdout.lines().next()?.trim();
        (!module.is_empty()).then(|| module.to_string())
    }
}

/// Assembles a [`WatchConfig`].
#[derive(Debug, Clone)]
pub struct WatchConfigBuilder {
    directory: PathBuf,
    output: Option<PathBuf>,
    build_tool: String,
    build_args: Vec<String>,
    app_args: Vec<String>,
    ignore_dirs: Vec<String>,
    extensions: Vec<String>,
    mode: BuildMode,
    no_run: bool,
    clean_first: bool,
    prebuild: Vec<String>,
    rebuild_key: Option<String>,
    working_dir: Option<PathBuf>,
    backend: WatchBackend,
}

impl Default for WatchConfigBuilder {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            output: None,
            build_tool: DEFAULT_BUILD_TOOL.to_string(),
            build_args: Vec::new(),
            app_args: Vec::new(),
            ignore_dirs: Vec::new(),
            extensions: default_extensions(),
            mode: BuildMode::Build,
            no_run: false,
            clean_first: false,
            prebuild: Vec::new(),
            rebuild_key: None,
            working_dir: None,
            backend: WatchBackend::Native,
        }
    }
}

impl WatchConfigBuilder {
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn build_tool(mut self, tool: impl Into<String>) -> Self {
        self.build_tool = tool.into();
        self
    }

    pub fn build_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn app_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.app_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds directory names to skip. Empty names and duplicates are dropped.
    pub fn ignore_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names.into_iter().map(Into::into) {
            if !name.is_empty() && !self.ignore_dirs.contains(&name) {
                self.ignore_dirs.push(name);
            }
        }
        self
    }

    /// Replaces the watched suffixes.
    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    /// Appends watched suffixes to the current list.
    pub fn add_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for ext in exts.into_iter().map(Into::into) {
            if !ext.is_empty() && !self.extensions.contains(&ext) {
                self.extensions.push(ext);
            }
        }
        self
    }

    pub fn mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn no_run(mut self, no_run: bool) -> Self {
        self.no_run = no_run;
        self
    }

    pub fn clean_first(mut self, clean: bool) -> Self {
        self.clean_first = clean;
        self
    }

    pub fn prebuild<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prebuild = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Tokenizes a shell-style command line into the prebuild argv.
    pub fn prebuild_line(self, line: &str) -> Result<Self> {
        let argv = shell_words::split(line).map_err(|e| {
            WatchError::Config(format!("invalid prebuild command {:?}: {}", line, e))
        })?;
        Ok(self.prebuild(argv))
    }

    /// Sets the rebuild key. An empty string disables it.
    pub fn rebuild_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.rebuild_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn backend(mut self, backend: WatchBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Overlays the values set in a config file.
    pub fn apply_file(mut self, file: FileConfig) -> Result<Self> {
        if let Some(directory) = file.directory {
            self.directory = directory;
        }
        if let Some(output) = file.output {
            self.output = Some(output);
        }
        if let Some(tool) = file.build_tool {
            self.build_tool = tool;
        }
        if let Some(args) = file.build_args {
            self.build_args = args;
        }
        if let Some(args) = file.app_args {
            self.app_args = args;
        }
        if let Some(exts) = file.extensions {
            self.extensions = exts;
        }
        if let Some(mode) = file.mode {
            self.mode = mode;
        }
        if let Some(no_run) = file.no_run {
            self.no_run = no_run;
        }
        if let Some(clean) = file.clean {
            self.clean_first = clean;
        }
        if let Some(key) = file.rebuild_key {
            self = self.rebuild_key(key);
        }
        if let Some(dir) = file.working_dir {
            self.working_dir = Some(dir);
        }
        if let Some(ms) = file.poll_interval_ms {
            self.backend = WatchBackend::Poll { interval: Duration::from_millis(ms) };
        }
        self = self.ignore_dirs(file.ignore);
        match file.prebuild {
            Some(line) => self.prebuild_line(&line),
            None => Ok(self),
        }
    }

    pub fn build(self) -> Result<WatchConfig> {
        let rebuild_key = match self.rebuild_key {
            None => None,
            Some(key) => match key.as_bytes() {
                [b] if b.is_ascii() => Some(*b),
                _ => {
                    return Err(WatchError::Config(format!(
                        "rebuild key must be a single ASCII character, got {:?}",
                        key
                    )));
                }
            },
        };

        if self.extensions.is_empty() {
            return Err(WatchError::Config("no file suffixes to watch".to_string()));
        }
        if self.build_tool.is_empty() {
            return Err(WatchError::Config("build tool path is empty".to_string()));
        }

        let directory = std::path::absolute(&self.directory)
            .map_err(|e| WatchError::io(&self.directory, e))?;
        if !directory.is_dir() {
            return Err(WatchError::Setup(format!("{} is not a directory", directory.display())));
        }

        Ok(WatchConfig {
            directory,
            output: self.output,
            build_tool: self.build_tool,
            build_args: self.build_args,
            app_args: self.app_args,
            ignore_dirs: self.ignore_dirs,
            extensions: self.extensions,
            mode: self.mode,
            no_run: self.no_run,
            clean_first: self.clean_first,
            prebuild: self.prebuild,
            rebuild_key,
            working_dir: self.working_dir,
            backend: self.backend,
        })
    }
}

/// Settings read from a TOML config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub directory: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub build_tool: Option<String>,
    pub build_args: Option<Vec<String>>,
    pub app_args: Option<Vec<String>>,
    pub ignore: Vec<String>,
    pub extensions: Option<Vec<String>>,
    pub mode: Option<BuildMode>,
    pub no_run: Option<bool>,
    pub clean: Option<bool>,
    pub prebuild: Option<String>,
    pub rebuild_key: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
}

impl FileConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| WatchError::Config(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content =
            tokio::fs::read_to_string(path).await.map_err(|e| WatchError::io(path, e))?;
        Self::from_toml(&content)
    }
}
