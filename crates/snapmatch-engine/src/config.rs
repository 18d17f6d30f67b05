use std::path::PathBuf;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Identity store file.
    pub store_path: PathBuf,
    /// Optional TOML file with matching options.
    pub config_path: Option<PathBuf>,
    /// Successfully learned photos between store checkpoints.
    pub checkpoint_every: usize,
    /// Capacity of the learner's request queue.
    pub queue_depth: usize,
}

pub const DEFAULT_CHECKPOINT_EVERY: usize = 25;
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

impl EngineConfig {
    /// Load configuration from `SNAPMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("XDG_DATA_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("snapmatch");

        let store_path = lookup("SNAPMATCH_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("identities.json"));

        Self {
            store_path,
            config_path: lookup("SNAPMATCH_CONFIG").map(PathBuf::from),
            checkpoint_every: env_count(&lookup, "SNAPMATCH_CHECKPOINT_EVERY", DEFAULT_CHECKPOINT_EVERY),
            queue_depth: env_count(&lookup, "SNAPMATCH_QUEUE_DEPTH", DEFAULT_QUEUE_DEPTH),
        }
    }
}

/// A positive count; zero or garbage falls back to `default`.
fn env_count<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().parse::<usize>()) {
        None => default,
        Some(Ok(n)) if n >= 1 => n,
        Some(_) => {
            tracing::warn!(key, default, "invalid count in environment; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_follow_xdg() {
        let c = EngineConfig::from_lookup(lookup(&[("XDG_DATA_HOME", "/data")]));
        assert_eq!(c.store_path, PathBuf::from("/data/snapmatch/identities.json"));
        assert_eq!(c.config_path, None);
        assert_eq!(c.checkpoint_every, 25);
        assert_eq!(c.queue_depth, 16);
    }

    #[test]
    fn test_home_fallback() {
        let c = EngineConfig::from_lookup(lookup(&[("HOME", "/home/ana")]));
        assert_eq!(
            c.store_path,
            PathBuf::from("/home/ana/.local/share/snapmatch/identities.json")
        );
    }

    #[test]
    fn test_overrides() {
        let c = EngineConfig::from_lookup(lookup(&[
            ("SNAPMATCH_STORE_PATH", "/srv/ids.json"),
            ("SNAPMATCH_CONFIG", "/etc/snapmatch.toml"),
            ("SNAPMATCH_CHECKPOINT_EVERY", "5"),
            ("SNAPMATCH_QUEUE_DEPTH", "2"),
        ]));
        assert_eq!(c.store_path, PathBuf::from("/srv/ids.json"));
        assert_eq!(c.config_path, Some(PathBuf::from("/etc/snapmatch.toml")));
        assert_eq!(c.checkpoint_every, 5);
        assert_eq!(c.queue_depth, 2);
    }

    #[test]
    fn test_invalid_counts_use_defaults() {
        let c = EngineConfig::from_lookup(lookup(&[
            ("SNAPMATCH_CHECKPOINT_EVERY", "0"),
            ("SNAPMATCH_QUEUE_DEPTH", "lots"),
        ]));
        assert_eq!(c.checkpoint_every, DEFAULT_CHECKPOINT_EVERY);
        assert_eq!(c.queue_depth, DEFAULT_QUEUE_DEPTH);
    }
}
