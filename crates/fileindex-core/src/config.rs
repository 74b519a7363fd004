use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;

/// Read throttle parameters tuned to the kind of medium being indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReadConfig {
    /// Concurrent reads of large files.
    pub max_parallel_reads_general: usize,
    /// Multiplier applied to `max_parallel_reads_general` for small files.
    pub max_parallel_reads_small_files_factor: usize,
    /// Files at or below this size count as small. 0 disables the small-file pool.
    pub small_file_threshold: u64,
}

impl ReadConfig {
    pub const HD: ReadConfig = ReadConfig {
        max_parallel_reads_general: 1,
        max_parallel_reads_small_files_factor: 2,
        small_file_threshold: 10_000,
    };
    pub const SSD: ReadConfig = ReadConfig {
        max_parallel_reads_general: 2,
        max_parallel_reads_small_files_factor: 2,
        small_file_threshold: 500_000,
    };
    pub const NETWORK: ReadConfig = ReadConfig {
        max_parallel_reads_general: 1,
        max_parallel_reads_small_files_factor: 2,
        small_file_threshold: 2_000_000,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadProfile {
    #[default]
    Hd,
    Ssd,
    Network,
}

impl ReadProfile {
    pub fn read_config(self) -> ReadConfig {
        match self {
            ReadProfile::Hd => ReadConfig::HD,
            ReadProfile::Ssd => ReadConfig::SSD,
            ReadProfile::Network => ReadConfig::NETWORK,
        }
    }
}

impl std::str::FromStr for ReadProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hd" => Ok(ReadProfile::Hd),
            "ssd" => Ok(ReadProfile::Ssd),
            "network" => Ok(ReadProfile::Network),
            other => Err(format!("unknown read profile '{}' (expected hd, ssd or network)", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub catalog_path: String,

    /// Substrings of `/<filename>/`. Use ".jpg/" to exclude by extension.
    pub excluded_files: Vec<String>,
    /// Substrings of `/<dir path>/`, or absolute prefixes when starting with `//`.
    pub excluded_paths: Vec<String>,
    pub always_check_hash_suffixes: Vec<String>,
    pub image_extensions: Vec<String>,
    pub archive_extensions: Vec<String>,
    /// Roots stripped from the full path by the REL_PATH match mode.
    pub relative_path_roots: Vec<String>,

    pub multithreading: bool,
    pub max_threads: usize,
    pub read_profile: ReadProfile,
    pub read_config: Option<ReadConfig>,

    /// Reuse content of unchanged files (same name, size, modified) without a full read.
    pub fast_mode: bool,
    pub ignore_hash_in_fast_mode: bool,
    pub hash_only_first_mb: bool,
    pub update_hardlinks_in_last_index: bool,
    pub expand_archives: bool,

    pub max_transaction_size: usize,
    pub max_transaction_duration_secs: u64,
    pub registry_capacity: usize,
    pub path_cache_capacity: usize,

    pub max_changed_files_warning_percent: u32,
    pub min_allowed_changes: usize,
    pub min_disk_free_space_percent: u32,
    pub min_disk_free_space_mb: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_path: "fileindex.db".to_string(),
            excluded_files: vec!["/thumbs.db/".to_string(), "/desktop.ini/".to_string()],
            excluded_paths: vec![
                "/$RECYCLE.BIN/".to_string(),
                "/System Volume Information/".to_string(),
            ],
            always_check_hash_suffixes: Vec::new(),
            image_extensions: ["bmp", "png", "gif", "jpg", "jpeg", "arw", "cr2", "pef"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            archive_extensions: ["zip", "tar", "7z", "gz", "rar"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            relative_path_roots: Vec::new(),
            multithreading: true,
            max_threads: 10,
            read_profile: ReadProfile::Hd,
            read_config: None,
            fast_mode: true,
            ignore_hash_in_fast_mode: false,
            hash_only_first_mb: false,
            update_hardlinks_in_last_index: false,
            expand_archives: false,
            max_transaction_size: 1000,
            max_transaction_duration_secs: 60,
            registry_capacity: 100_000,
            path_cache_capacity: 100_000,
            max_changed_files_warning_percent: 5,
            min_allowed_changes: 50,
            min_disk_free_space_percent: 10,
            min_disk_free_space_mb: 1000,
        }
    }
}

impl AppConfig {
    pub fn effective_read_config(&self) -> ReadConfig {
        self.read_config
            .unwrap_or_else(|| self.read_profile.read_config())
    }

    /// Worker pool size: min(available cores, max_threads), or 1 when multithreading is off.
    pub fn worker_count(&self) -> usize {
        if !self.multithreading {
            return 1;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(self.max_threads).max(1)
    }

    pub fn is_image(&self, extension: &str) -> bool {
        self.image_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn is_archive(&self, extension: &str) -> bool {
        self.archive_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn always_check_hash(&self, filename: &str) -> bool {
        self.always_check_hash_suffixes
            .iter()
            .any(|suffix| filename.ends_with(suffix.as_str()))
    }
}

/// Load `Config.toml` (optional) layered with `FILEINDEX_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("FILEINDEX").try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.fast_mode);
        assert_eq!(config.max_threads, 10);
        assert_eq!(config.effective_read_config(), ReadConfig::HD);
        assert!(config.is_image("JPG"));
        assert!(config.is_archive("zip"));
        assert!(!config.is_archive("txt"));
    }

    #[test]
    fn test_read_config_override() {
        let config = AppConfig {
            read_profile: ReadProfile::Network,
            ..AppConfig::default()
        };
        assert_eq!(config.effective_read_config().small_file_threshold, 2_000_000);

        let config = AppConfig {
            read_config: Some(ReadConfig {
                max_parallel_reads_general: 4,
                max_parallel_reads_small_files_factor: 1,
                small_file_threshold: 0,
            }),
            ..AppConfig::default()
        };
        assert_eq!(config.effective_read_config().max_parallel_reads_general, 4);
    }

    #[test]
    fn test_worker_count_single_threaded() {
        let config = AppConfig {
            multithreading: false,
            ..AppConfig::default()
        };
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn test_read_profile_from_str() {
        assert_eq!("SSD".parse::<ReadProfile>(), Ok(ReadProfile::Ssd));
        assert!("floppy".parse::<ReadProfile>().is_err());
    }

    #[test]
    fn test_always_check_hash() {
        let config = AppConfig {
            always_check_hash_suffixes: vec![".vhd".to_string()],
            ..AppConfig::default()
        };
        assert!(config.always_check_hash("disk.vhd"));
        assert!(!config.always_check_hash("disk.txt"));
    }
}
