//! Security policy: the single declarative source of truth for what
//! generated code may import, call, and consume.
//!
//! Every other component applies this module rather than carrying its
//! own lists: the static analyzer for pre-execution checks, the sandbox
//! driver for the dynamic import hook, the gateway for change limits.
//!
//! Two layers live here:
//!
//! - Compiled constants ([`FORBIDDEN_IMPORTS`], [`SAFE_BUILTINS`],
//!   [`FORBIDDEN_CALL_PATTERNS`], [`FORBIDDEN_PATH_CHARS`]) that never
//!   vary per deployment.
//! - [`PolicyProfile`] values loaded from declarative files at process
//!   start (TOML, YAML, or JSON by extension) with `MODFORGE_*`
//!   environment overrides, resolved by name through a [`ProfileStore`].
//!   Profiles handed to in-flight jobs are immutable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Import names (exact, or dotted prefixes) that enable arbitrary code
/// execution, filesystem escape, network bypass, or introspection-based
/// sandbox evasion. Defined here and nowhere else.
pub const FORBIDDEN_IMPORTS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "ctypes",
    "cffi",
    "importlib",
    "builtins",
    "inspect",
    "pickle",
    "marshal",
    "multiprocessing",
    "threading",
    "signal",
    "resource",
    "gc",
    "code",
    "codeop",
    "pty",
    "fcntl",
    "mmap",
];

/// Builtin callables generated code is allowed to rely on.
pub const SAFE_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "divmod", "enumerate", "filter", "float", "format",
    "frozenset", "hash", "int", "isinstance", "issubclass", "iter", "len", "list", "map", "max",
    "min", "next", "print", "range", "repr", "reversed", "round", "set", "slice", "sorted", "str",
    "sum", "tuple", "type", "zip",
];

/// Call patterns that indicate dynamic code evaluation, reflection, or
/// direct process/filesystem access. Matched textually on call sites.
pub const FORBIDDEN_CALL_PATTERNS: &[(&str, &str)] = &[
    ("eval(", "dynamic code evaluation"),
    ("exec(", "dynamic code evaluation"),
    ("compile(", "dynamic code compilation"),
    ("__import__(", "dynamic import"),
    ("globals(", "namespace introspection"),
    ("locals(", "namespace introspection"),
    ("vars(", "namespace introspection"),
    ("getattr(", "reflective attribute access"),
    ("setattr(", "reflective attribute mutation"),
    ("os.system(", "process spawning"),
    ("os.popen(", "process spawning"),
    ("os.fork(", "process spawning"),
    ("os.walk(", "raw filesystem traversal"),
    ("open(", "raw filesystem access"),
    ("glob.glob(", "raw filesystem traversal"),
];

/// Characters that must never appear in a bundle-relative path.
pub const FORBIDDEN_PATH_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Import prefixes allowed for every profile, before per-profile
/// additions. Standard-library data handling plus the blessed HTTP
/// client.
pub const BASELINE_IMPORT_PREFIXES: &[&str] = &[
    "abc",
    "base64",
    "collections",
    "csv",
    "dataclasses",
    "datetime",
    "decimal",
    "enum",
    "functools",
    "hashlib",
    "io",
    "itertools",
    "json",
    "math",
    "random",
    "re",
    "requests",
    "statistics",
    "string",
    "time",
    "typing",
    "unittest",
    "urllib.parse",
    "uuid",
];

/// Errors raised while loading or resolving policy profiles.
#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    /// Failed to read a profile file.
    #[error("failed to read profile file at {path}: {source}")]
    #[diagnostic(code(modforge::policy::file_read))]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a profile file.
    #[error("failed to parse {format} profile: {source}")]
    #[diagnostic(code(modforge::policy::parse))]
    Parse {
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unsupported or unrecognised profile file extension.
    #[error("unsupported profile file format: {message}")]
    #[diagnostic(
        code(modforge::policy::unsupported_format),
        help("Profile files must end in .toml, .yaml, .yml, or .json.")
    )]
    UnsupportedFormat { message: String },

    /// Profile field validation failed.
    #[error("profile validation failed: {0}")]
    #[diagnostic(code(modforge::policy::validation))]
    Validation(#[from] validator::ValidationErrors),

    /// Environment override could not be parsed.
    #[error("failed to parse environment override {key}: {message}")]
    #[diagnostic(code(modforge::policy::env_parse))]
    EnvParse { key: String, message: String },

    /// A profile name was requested that the store does not hold.
    #[error("unknown policy profile: {name}")]
    #[diagnostic(code(modforge::policy::unknown_profile))]
    UnknownProfile { name: String },
}

/// Network posture for sandbox execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkMode {
    /// No outbound connections at all. The default.
    None,
    /// Only destinations in `hosts` may be dialled; everything else is
    /// refused at connection initiation.
    Allowlist { hosts: Vec<String> },
}

impl Default for NetworkMode {
    fn default() -> Self {
        Self::None
    }
}

impl NetworkMode {
    #[must_use]
    pub fn allows(&self, host: &str) -> bool {
        match self {
            NetworkMode::None => false,
            NetworkMode::Allowlist { hosts } => hosts.iter().any(|h| h == host),
        }
    }
}

fn default_cpu_seconds() -> u64 {
    10
}
fn default_memory_bytes() -> u64 {
    256 * 1024 * 1024
}
fn default_wall_clock_seconds() -> u64 {
    60
}
fn default_max_processes() -> u64 {
    8
}
fn default_max_open_files() -> u64 {
    64
}
fn default_max_files() -> usize {
    16
}
fn default_max_changed_files() -> usize {
    10
}
fn default_max_bytes_per_file() -> usize {
    100 * 1024
}
fn default_max_repair_attempts() -> u32 {
    10
}
fn default_job_deadline_seconds() -> u64 {
    900
}
fn default_random_seed() -> u64 {
    7
}

/// Named bundle of security and resource limits applied to one build
/// job end-to-end.
///
/// Loaded once at startup; a job takes an `Arc<PolicyProfile>` at intake
/// and that value never changes underneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PolicyProfile {
    /// Profile name, referenced by build requests.
    #[validate(length(min = 1))]
    pub name: String,

    /// Network posture for sandboxed execution.
    #[serde(default)]
    pub network: NetworkMode,

    /// CPU-seconds cap for the sandbox process.
    #[serde(default = "default_cpu_seconds")]
    #[validate(range(min = 1))]
    pub cpu_seconds: u64,

    /// Memory cap in bytes for the sandbox process.
    #[serde(default = "default_memory_bytes")]
    #[validate(range(min = 1048576))]
    pub memory_bytes: u64,

    /// Wall-clock cap in seconds for one sandbox run.
    #[serde(default = "default_wall_clock_seconds")]
    #[validate(range(min = 1))]
    pub wall_clock_seconds: u64,

    /// Process-count cap inside the sandbox.
    #[serde(default = "default_max_processes")]
    pub max_processes: u64,

    /// Open-file cap inside the sandbox.
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u64,

    /// Maximum number of files a bundle may contain.
    #[serde(default = "default_max_files")]
    #[validate(range(min = 1))]
    pub max_files: usize,

    /// Maximum number of changed files per generator response.
    #[serde(default = "default_max_changed_files")]
    #[validate(range(min = 1))]
    pub max_changed_files: usize,

    /// Maximum size of any single generated file, in bytes.
    #[serde(default = "default_max_bytes_per_file")]
    #[validate(range(min = 1))]
    pub max_bytes_per_file: usize,

    /// Bound on IMPLEMENT+VALIDATE cycles within one job.
    #[serde(default = "default_max_repair_attempts")]
    #[validate(range(min = 1))]
    pub max_repair_attempts: u32,

    /// Whole-job deadline in seconds, measured from intake.
    #[serde(default = "default_job_deadline_seconds")]
    #[validate(range(min = 1))]
    pub job_deadline_seconds: u64,

    /// Import prefixes allowed beyond [`BASELINE_IMPORT_PREFIXES`].
    #[serde(default)]
    pub extra_import_prefixes: Vec<String>,

    /// Seed handed to the sandbox so generated-code randomness is fixed.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
}

impl Default for PolicyProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            network: NetworkMode::None,
            cpu_seconds: default_cpu_seconds(),
            memory_bytes: default_memory_bytes(),
            wall_clock_seconds: default_wall_clock_seconds(),
            max_processes: default_max_processes(),
            max_open_files: default_max_open_files(),
            max_files: default_max_files(),
            max_changed_files: default_max_changed_files(),
            max_bytes_per_file: default_max_bytes_per_file(),
            max_repair_attempts: default_max_repair_attempts(),
            job_deadline_seconds: default_job_deadline_seconds(),
            extra_import_prefixes: Vec::new(),
            random_seed: default_random_seed(),
        }
    }
}

impl PolicyProfile {
    /// Load a profile from a TOML, YAML, or JSON file (by extension).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let profile: PolicyProfile = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| PolicyError::Parse {
                format: "TOML",
                source: Box::new(e),
            })?,
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|e| PolicyError::Parse {
                    format: "YAML",
                    source: Box::new(e),
                })?
            }
            Some("json") => serde_json::from_str(&content).map_err(|e| PolicyError::Parse {
                format: "JSON",
                source: Box::new(e),
            })?,
            _ => {
                return Err(PolicyError::UnsupportedFormat {
                    message: "file extension must be .toml, .yaml, .yml, or .json".to_string(),
                });
            }
        };

        profile.validate()?;
        Ok(profile)
    }

    /// Apply `MODFORGE_*` environment overrides to this profile.
    ///
    /// A local `.env` file is loaded first so development overrides
    /// work without exporting anything. Recognised keys:
    /// `MODFORGE_MAX_REPAIR_ATTEMPTS`, `MODFORGE_JOB_DEADLINE_SECONDS`,
    /// `MODFORGE_WALL_CLOCK_SECONDS`.
    pub fn with_env(mut self) -> Result<Self, PolicyError> {
        dotenvy::dotenv().ok();

        fn parse_u64(key: &str) -> Result<Option<u64>, PolicyError> {
            match std::env::var(key) {
                Ok(raw) => raw
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| PolicyError::EnvParse {
                        key: key.to_string(),
                        message: e.to_string(),
                    }),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = parse_u64("MODFORGE_MAX_REPAIR_ATTEMPTS")? {
            self.max_repair_attempts = v as u32;
        }
        if let Some(v) = parse_u64("MODFORGE_JOB_DEADLINE_SECONDS")? {
            self.job_deadline_seconds = v;
        }
        if let Some(v) = parse_u64("MODFORGE_WALL_CLOCK_SECONDS")? {
            self.wall_clock_seconds = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Whether `name` may be imported under this profile.
    ///
    /// The forbidden set wins over every allowlist: a name is rejected
    /// if it equals a forbidden entry or lives under one as a dotted
    /// prefix, and accepted only if it then matches the baseline or the
    /// profile's extra prefixes the same way.
    #[must_use]
    pub fn import_allowed(&self, name: &str) -> bool {
        if import_is_forbidden(name) {
            return false;
        }
        let allowed = BASELINE_IMPORT_PREFIXES
            .iter()
            .map(|p| *p)
            .chain(self.extra_import_prefixes.iter().map(String::as_str));
        for prefix in allowed {
            if name == prefix || name.starts_with(&format!("{prefix}.")) {
                return true;
            }
        }
        false
    }

    /// Every import prefix this profile accepts, for the sandbox's
    /// dynamic import hook.
    #[must_use]
    pub fn allowed_import_prefixes(&self) -> Vec<String> {
        BASELINE_IMPORT_PREFIXES
            .iter()
            .map(|s| (*s).to_string())
            .chain(self.extra_import_prefixes.iter().cloned())
            .collect()
    }
}

/// Whether `name` matches the forbidden set exactly or as dotted prefix.
#[must_use]
pub fn import_is_forbidden(name: &str) -> bool {
    FORBIDDEN_IMPORTS
        .iter()
        .any(|f| name == *f || name.starts_with(&format!("{f}.")))
}

/// Whether a bundle-relative path is structurally safe: relative, free
/// of traversal segments and forbidden characters.
#[must_use]
pub fn path_is_safe(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('~') {
        return false;
    }
    if path.contains(FORBIDDEN_PATH_CHARS) {
        return false;
    }
    !path.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty())
}

/// Immutable, name-keyed collection of loaded profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: FxHashMap<String, Arc<PolicyProfile>>,
}

impl ProfileStore {
    /// Store holding only the built-in `default` profile.
    #[must_use]
    pub fn with_default() -> Self {
        let mut store = Self::default();
        store.insert(PolicyProfile::default());
        store
    }

    /// Register a profile, keyed by its name. Later inserts win.
    pub fn insert(&mut self, profile: PolicyProfile) {
        self.profiles
            .insert(profile.name.clone(), Arc::new(profile));
    }

    /// Load every profile file in a directory into the store.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, PolicyError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| PolicyError::FileRead {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut loaded = 0;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("toml" | "yaml" | "yml" | "json")
                )
            })
            .collect();
        paths.sort();
        for path in paths {
            self.insert(PolicyProfile::from_file(&path)?);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Resolve a profile by name.
    pub fn get(&self, name: &str) -> Result<Arc<PolicyProfile>, PolicyError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| PolicyError::UnknownProfile {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_wins_over_allowlist() {
        let profile = PolicyProfile {
            extra_import_prefixes: vec!["os".to_string()],
            ..Default::default()
        };
        assert!(!profile.import_allowed("os"));
        assert!(!profile.import_allowed("os.path"));
        assert!(import_is_forbidden("subprocess"));
        assert!(import_is_forbidden("ctypes.util"));
    }

    #[test]
    fn baseline_prefixes_allowed() {
        let profile = PolicyProfile::default();
        assert!(profile.import_allowed("json"));
        assert!(profile.import_allowed("urllib.parse"));
        assert!(profile.import_allowed("requests"));
        // Prefix matching is on dotted boundaries only.
        assert!(!profile.import_allowed("jsonpickle"));
        assert!(!profile.import_allowed("urllib.request"));
    }

    #[test]
    fn extra_prefixes_extend_baseline() {
        let profile = PolicyProfile {
            extra_import_prefixes: vec!["pandas".to_string()],
            ..Default::default()
        };
        assert!(profile.import_allowed("pandas"));
        assert!(profile.import_allowed("pandas.io"));
        assert!(!PolicyProfile::default().import_allowed("pandas"));
    }

    #[test]
    fn path_safety() {
        assert!(path_is_safe("modules/weather/openweather/adapter.py"));
        assert!(!path_is_safe("/etc/passwd"));
        assert!(!path_is_safe("modules/../escape.py"));
        assert!(!path_is_safe("modules//double.py"));
        assert!(!path_is_safe("modules/weather\\win.py"));
        assert!(!path_is_safe(""));
    }

    #[test]
    fn toml_profile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strict.toml");
        std::fs::write(
            &path,
            r#"
name = "strict"
cpu_seconds = 5
max_changed_files = 4

[network]
mode = "allowlist"
hosts = ["api.openweathermap.org"]
"#,
        )
        .unwrap();

        let profile = PolicyProfile::from_file(&path).unwrap();
        assert_eq!(profile.name, "strict");
        assert_eq!(profile.cpu_seconds, 5);
        assert_eq!(profile.max_changed_files, 4);
        assert!(profile.network.allows("api.openweathermap.org"));
        assert!(!profile.network.allows("example.com"));
        // Unspecified fields take defaults.
        assert_eq!(profile.max_repair_attempts, 10);
    }

    #[test]
    fn unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"name": "x", "surprise": true}"#).unwrap();
        assert!(matches!(
            PolicyProfile::from_file(&path),
            Err(PolicyError::Parse { .. })
        ));
    }

    #[test]
    fn store_resolution() {
        let store = ProfileStore::with_default();
        assert!(store.get("default").is_ok());
        assert!(matches!(
            store.get("nope"),
            Err(PolicyError::UnknownProfile { .. })
        ));
    }
}
