use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Default number of staged documents per batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Canonical list of file extensions considered indexable.
/// The batch scanner and the file watcher both consult this single list so
/// they never diverge.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // JavaScript / TypeScript
    "ts", "tsx", "js", "jsx", "mjs", "cjs",
    // Systems / compiled
    "rs", "py", "go", "java", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala",
    // Web
    "html", "css", "scss", "less", "sass",
    // Data / config
    "json", "yaml", "yml", "toml", "xml",
    // Documentation
    "md", "mdx", "txt", "rst",
    // Query / schema
    "sql", "graphql", "gql",
    // Shell
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    // Frontend frameworks
    "vue", "svelte", "astro",
    // Misc languages
    "lua", "zig", "nim", "dart", "ex", "exs",
    "r", "jl", "clj", "erl", "hrl",
    // Infra / IPC
    "tf", "hcl", "proto",
    // Dotfiles / config
    "env", "ini", "cfg", "conf",
];

/// Check whether a file extension (without leading dot, lowercase) is in the
/// shared supported-extensions list.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Whether a file is eligible for indexing based on its extension or
/// well-known extensionless name.
pub fn is_indexable(path: &Path) -> bool {
    let ext = path
        .extension()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase();

    is_supported_extension(&ext)
        || path.file_name().is_some_and(|n| {
            let name = n.to_string_lossy().to_lowercase();
            matches!(
                name.as_str(),
                "dockerfile" | "makefile" | "cmakelists.txt" | "cargo.toml"
                    | "package.json" | "tsconfig.json" | "pyproject.toml"
                    | ".gitignore" | "readme" | "license" | "changelog"
            )
        })
}

/// Skip files inside build/output directories that should never be indexed.
/// Catches common build artifacts even when .gitignore is absent.
pub fn is_build_or_output_dir(path: &Path) -> bool {
    for component in path.components() {
        if let std::path::Component::Normal(name) = component {
            let name_str = name.to_string_lossy();
            let n = name_str.as_ref();

            if matches!(
                n,
                "node_modules"
                    | ".git"
                    | "target"
                    | "dist"
                    | "build"
                    | "out"
                    | ".next"
                    | ".output"
                    | ".vite"
                    | ".turbo"
                    | "__pycache__"
                    | ".tox"
                    | ".mypy_cache"
                    | ".pytest_cache"
                    | ".ruff_cache"
                    | "coverage"
                    | ".cache"
                    | "vendor"
                    | ".gradle"
                    | ".terraform"
                    | ".vscode"
                    | ".idea"
                    | ".cargo"
            ) {
                return true;
            }

            if n.ends_with(".egg-info") {
                return true;
            }
        }
    }
    false
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directories whose contents are indexed and watched.
    pub watched_roots: Vec<PathBuf>,
    /// Where the per-root index directories live.
    pub data_dir: PathBuf,
    pub max_file_size_bytes: usize,
    pub watcher_debounce_ms: u64,
    pub index_batch_size: usize,
    /// Extra user-supplied exclusion globs, applied on top of the built-in
    /// denylist (comma-separated in `CODEQUARRY_EXCLUDE`).
    pub exclude_globs: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CODEQUARRY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .map(|d| d.join("codequarry"))
                    .unwrap_or_else(|| PathBuf::from(".codequarry-data"))
            });

        let watched_roots = std::env::var("CODEQUARRY_ROOTS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let exclude_globs = std::env::var("CODEQUARRY_EXCLUDE")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            watched_roots,
            data_dir,
            max_file_size_bytes: std::env::var("CODEQUARRY_MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024), // 10MB
            watcher_debounce_ms: std::env::var("CODEQUARRY_WATCHER_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            index_batch_size: std::env::var("CODEQUARRY_INDEX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE),
            exclude_globs,
        }
    }

    /// Compile the user exclusion globs. Invalid patterns are logged and
    /// skipped rather than failing startup.
    pub fn exclude_set(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude_globs {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => warn!("Ignoring invalid exclude glob {pattern}: {e}"),
            }
        }
        builder.build().unwrap_or_else(|e| {
            warn!("Failed to compile exclude globs: {e}");
            GlobSet::empty()
        })
    }

    /// Combined file policy: indexable extension, outside build output, not
    /// user-excluded, under the size cap.
    pub fn should_index(&self, path: &Path, size: u64, excludes: &GlobSet) -> bool {
        size <= self.max_file_size_bytes as u64
            && is_indexable(path)
            && !is_build_or_output_dir(path)
            && !excludes.is_match(path)
    }
}
