//! Coverage configuration: user options and their resolved form.
//!
//! Mirrors the split the host test-runner uses: a serializable options
//! struct the config loader hands over, and a resolved form with defaults
//! applied, the reports directory anchored to the project root, the "100"
//! shortcut expanded, and the provider name parsed. Resolution happens
//! once, before any test executes, so an unloadable provider fails the run
//! up front.

use crate::result::{CubrirError, CubrirResult};
use crate::threshold::ThresholdSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use wildmatch::WildMatch;

/// Which provider variant collects coverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Raw profiler payloads from the runtime, reconciled via source maps
    Native,
    /// Counters embedded into transformed code at instrumentation time
    Instrumentation,
}

impl FromStr for ProviderKind {
    type Err = CubrirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(ProviderKind::Native),
            "instrumentation" => Ok(ProviderKind::Instrumentation),
            other => Err(CubrirError::ProviderLoadFailure {
                name: other.to_string(),
                message: "unknown coverage provider".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Native => f.write_str("native"),
            ProviderKind::Instrumentation => f.write_str("instrumentation"),
        }
    }
}

/// Coverage options as loaded from the run's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageOptions {
    /// Enable coverage collection
    pub enabled: bool,
    /// Provider name (`native` or `instrumentation`)
    pub provider: Option<String>,
    /// Directory to write reports to, relative to the project root
    pub reports_directory: Option<PathBuf>,
    /// Report writer names
    pub reporter: Vec<String>,
    /// Glob patterns selecting files to cover
    pub include: Vec<String>,
    /// Glob patterns excluding files from coverage
    pub exclude: Vec<String>,
    /// Zero-fill files that match `include` but never executed
    pub all: bool,
    /// Remove the reports directory before a run
    pub clean: bool,
    /// Also clean between watch-mode reruns
    pub clean_on_rerun: bool,
    /// Omit fully covered files from textual reports
    pub skip_full: bool,
    /// Cover files outside the project root
    pub allow_external: bool,
    /// Drop coverage under vendored dependency directories
    pub exclude_vendored: bool,
    /// Shortcut setting every threshold to 100
    #[serde(rename = "100")]
    pub one_hundred: bool,
    /// Minimum statement percentage
    pub statements: Option<f64>,
    /// Minimum branch percentage
    pub branches: Option<f64>,
    /// Minimum function percentage
    pub functions: Option<f64>,
    /// Minimum line percentage
    pub lines: Option<f64>,
    /// Check thresholds per file as well as globally
    pub per_file: bool,
    /// Rewrite stored thresholds to observed values after full runs
    pub threshold_auto_update: bool,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            reports_directory: None,
            reporter: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            all: false,
            clean: true,
            clean_on_rerun: false,
            skip_full: false,
            allow_external: false,
            exclude_vendored: true,
            one_hundred: false,
            statements: None,
            branches: None,
            functions: None,
            lines: None,
            per_file: false,
            threshold_auto_update: false,
        }
    }
}

/// Options with defaults applied and paths anchored to the project root
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCoverageOptions {
    /// Selected provider variant
    pub provider: ProviderKind,
    /// Project root
    pub root: PathBuf,
    /// Absolute reports directory
    pub reports_directory: PathBuf,
    /// Report writer names, never empty
    pub reporter: Vec<String>,
    /// Include globs
    pub include: Vec<String>,
    /// Exclude globs
    pub exclude: Vec<String>,
    /// Zero-fill never-executed files
    pub all: bool,
    /// Remove the reports directory on `clean`
    pub clean: bool,
    /// Clean between watch-mode reruns
    pub clean_on_rerun: bool,
    /// Omit fully covered files from textual reports
    pub skip_full: bool,
    /// Cover files outside the project root
    pub allow_external: bool,
    /// Drop vendored-directory coverage
    pub exclude_vendored: bool,
    /// Resolved threshold minimums
    pub thresholds: ThresholdSpec,
    /// Rewrite stored thresholds after full runs
    pub threshold_auto_update: bool,
}

/// Apply defaults and resolve paths; fails fast on an unknown provider.
pub fn resolve_options(
    options: &CoverageOptions,
    root: &Path,
) -> CubrirResult<ResolvedCoverageOptions> {
    let provider_name = options
        .provider
        .as_deref()
        .ok_or_else(|| CubrirError::InvalidConfig {
            message: "coverage is enabled but no provider is configured".to_string(),
        })?;
    let provider = ProviderKind::from_str(provider_name)?;

    let reports_directory = root.join(
        options
            .reports_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("coverage")),
    );

    let reporter = if options.reporter.is_empty() {
        vec!["text".to_string()]
    } else {
        options.reporter.clone()
    };

    let thresholds = if options.one_hundred {
        ThresholdSpec {
            per_file: options.per_file,
            ..ThresholdSpec::one_hundred()
        }
    } else {
        ThresholdSpec {
            statements: options.statements,
            branches: options.branches,
            functions: options.functions,
            lines: options.lines,
            per_file: options.per_file,
        }
    };

    Ok(ResolvedCoverageOptions {
        provider,
        root: root.to_path_buf(),
        reports_directory,
        reporter,
        include: options.include.clone(),
        exclude: options.exclude.clone(),
        all: options.all,
        clean: options.clean,
        clean_on_rerun: options.clean_on_rerun,
        skip_full: options.skip_full,
        allow_external: options.allow_external,
        exclude_vendored: options.exclude_vendored,
        thresholds,
        threshold_auto_update: options.threshold_auto_update,
    })
}

/// Include/exclude matcher over original file paths
#[derive(Debug, Clone)]
pub struct FileMatcher {
    root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
    allow_external: bool,
}

impl FileMatcher {
    /// Matcher for a resolved option set
    #[must_use]
    pub fn new(options: &ResolvedCoverageOptions) -> Self {
        let mut exclude = options.exclude.clone();
        if options.exclude_vendored {
            exclude.push("*node_modules*".to_string());
        }
        Self {
            root: options.root.clone(),
            include: options.include.clone(),
            exclude,
            allow_external: options.allow_external,
        }
    }

    /// Decide whether a file belongs to the covered set
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let full = path.to_string_lossy();
        let relative = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => {
                if !self.allow_external {
                    return false;
                }
                full.clone().into_owned()
            }
        };

        if self
            .exclude
            .iter()
            .any(|p| WildMatch::new(p).matches(&relative) || WildMatch::new(p).matches(&full))
        {
            return false;
        }

        if self.include.is_empty() {
            return true;
        }
        self.include
            .iter()
            .any(|p| WildMatch::new(p).matches(&relative) || WildMatch::new(p).matches(&full))
    }
}
