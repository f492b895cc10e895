use anyhow::Context;
use facematch_core::MultiFacePolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration.
///
/// Resolved in three layers: built-in defaults, then an optional TOML file
/// named by `FACEMATCH_CONFIG`, then `FACEMATCH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server listens on (default: 0.0.0.0:3000).
    pub bind_addr: SocketAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding enrolled templates.
    pub template_dir: PathBuf,
    /// Embedding length produced by the recognizer.
    pub embedding_dim: usize,
    /// Upper bound on one embedding call, in seconds.
    pub embed_timeout_secs: u64,
    /// Upper bound on one decode or template read/write, in seconds.
    pub io_timeout_secs: u64,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Whether a photo with several faces uses the best one or is rejected.
    pub multi_face_policy: MultiFacePolicy,
    /// Pending embed requests allowed in front of the engine thread.
    pub engine_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facematch");

        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            model_dir: facematch_core::default_model_dir(),
            template_dir: data_dir.join("templates"),
            embedding_dim: facematch_core::ARCFACE_EMBEDDING_DIM,
            embed_timeout_secs: 10,
            io_timeout_secs: 5,
            max_body_bytes: 16 * 1024 * 1024,
            multi_face_policy: MultiFacePolicy::First,
            engine_queue_depth: 16,
        }
    }
}

impl Config {
    /// Load defaults, the optional config file, then environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var_os("FACEMATCH_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from `FACEMATCH_*` variables. Unparseable values are
    /// ignored with a warning.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEMATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEMATCH_TEMPLATE_DIR") {
            self.template_dir = PathBuf::from(v);
        }
        env_parse(&var, "FACEMATCH_BIND_ADDR", &mut self.bind_addr);
        env_parse(&var, "FACEMATCH_EMBEDDING_DIM", &mut self.embedding_dim);
        env_parse(&var, "FACEMATCH_EMBED_TIMEOUT_SECS", &mut self.embed_timeout_secs);
        env_parse(&var, "FACEMATCH_IO_TIMEOUT_SECS", &mut self.io_timeout_secs);
        env_parse(&var, "FACEMATCH_MAX_BODY_BYTES", &mut self.max_body_bytes);
        env_parse(&var, "FACEMATCH_MULTI_FACE_POLICY", &mut self.multi_face_policy);
        env_parse(&var, "FACEMATCH_ENGINE_QUEUE_DEPTH", &mut self.engine_queue_depth);
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(facematch_core::DETECTOR_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(facematch_core::RECOGNIZER_MODEL_FILE)
    }

    pub fn timeouts(&self) -> facematch_core::Timeouts {
        facematch_core::Timeouts {
            embed: Duration::from_secs(self.embed_timeout_secs),
            io: Duration::from_secs(self.io_timeout_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.bind_addr.port(), 3000);
        assert_eq!(c.embedding_dim, 512);
        assert_eq!(c.max_body_bytes, 16 * 1024 * 1024);
        assert_eq!(c.multi_face_policy, MultiFacePolicy::First);
        assert!(c.detector_model_path().ends_with("det_10g.onnx"));
        assert!(c.recognizer_model_path().ends_with("w600k_r50.onnx"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FACEMATCH_BIND_ADDR", "127.0.0.1:8080"),
            ("FACEMATCH_TEMPLATE_DIR", "/srv/templates"),
            ("FACEMATCH_MULTI_FACE_POLICY", "reject"),
            ("FACEMATCH_EMBED_TIMEOUT_SECS", "3"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(c.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(c.template_dir, PathBuf::from("/srv/templates"));
        assert_eq!(c.multi_face_policy, MultiFacePolicy::Reject);
        assert_eq!(c.timeouts().embed, Duration::from_secs(3));
    }

    #[test]
    fn test_bad_env_value_keeps_current() {
        let mut c = Config::default();
        c.apply_env(|k| (k == "FACEMATCH_IO_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert_eq!(c.io_timeout_secs, 5);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(
            &path,
            "template_dir = \"/var/lib/facematch\"\nmulti_face_policy = \"reject\"\n",
        )
        .unwrap();

        let c = Config::from_file(&path).unwrap();
        assert_eq!(c.template_dir, PathBuf::from("/var/lib/facematch"));
        assert_eq!(c.multi_face_policy, MultiFacePolicy::Reject);
        assert_eq!(c.embedding_dim, 512);
    }

    #[test]
    fn test_from_file_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(&path, "camera = \"/dev/video0\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
