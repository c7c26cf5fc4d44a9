//! Environment-driven configuration.
//!
//! The service deliberately has no CLI flags and no config file; every
//! knob is a `SQUADRON_*` environment variable read once at startup.
//! Unparseable values fall back to their default with a logged warning,
//! they never abort startup.

use std::path::PathBuf;
use std::str::FromStr;

use log::warn;

/// Default model: an ONNX export of an extractive-QA checkpoint hosted on
/// the Hugging Face hub. Point `SQUADRON_MODEL` at any repo that carries
/// `model.onnx`, `tokenizer.json` and `config.json` at its root.
pub const DEFAULT_MODEL: &str = "optimum/roberta-base-squad2";

/// Literal proxy the acquisition window points at unless overridden.
/// Set `SQUADRON_PROXY=` (empty) to disable the window entirely.
pub const DEFAULT_PROXY: &str = "http://127.0.0.1:7890";

/// Compute device the ONNX session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// CUDA device index. A bare integer is accepted for this variant,
    /// matching the plain `device=0` convention of pipeline front-ends.
    Cuda(i32),
}

impl Device {
    /// Accepts `cpu`, `cuda`, `cuda:N`, or a bare index `N`.
    pub fn parse(raw: &str) -> Option<Device> {
        let s = raw.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Some(Device::Cpu);
        }
        if s == "cuda" {
            return Some(Device::Cuda(0));
        }
        if let Some(index) = s.strip_prefix("cuda:") {
            return index.parse().ok().filter(|i| *i >= 0).map(Device::Cuda);
        }
        s.parse().ok().filter(|i| *i >= 0).map(Device::Cuda)
    }
}

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Hub repo id of the model to serve.
    pub model_id: String,
    /// Repo revision used when resolving artifact URLs.
    pub revision: String,
    pub device: Device,
    /// Listen port. 7860 is the customary demo-UI port.
    pub port: u16,
    /// `true` binds `0.0.0.0` so the form is reachable beyond localhost.
    pub share: bool,
    /// Proxy URL for the acquisition window; empty disables the window.
    pub proxy_url: String,
    /// Root directory for cached artifacts.
    pub cache_dir: PathBuf,
    /// Encoder sequence cap. Clamped by the model's own position limit.
    pub max_seq_len: usize,
    /// Answer span cap, in tokens.
    pub max_answer_len: usize,
    /// Per-request inference budget in seconds; 0 disables the timeout.
    pub timeout_secs: u64,
    /// ONNX Runtime intra-op thread count.
    pub intra_threads: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            model_id: String::from(DEFAULT_MODEL),
            revision: String::from("main"),
            device: Device::Cpu,
            port: 7860,
            share: true,
            proxy_url: String::from(DEFAULT_PROXY),
            cache_dir: default_cache_dir(),
            max_seq_len: 384,
            max_answer_len: 30,
            timeout_secs: 30,
            intra_threads: 1,
        }
    }
}

impl AppConfig {
    /// Read every `SQUADRON_*` variable on top of the defaults.
    pub fn from_env() -> AppConfig {
        let mut cfg = AppConfig::default();
        if let Some(v) = env_string("SQUADRON_MODEL") {
            cfg.model_id = v;
        }
        if let Some(v) = env_string("SQUADRON_REVISION") {
            cfg.revision = v;
        }
        if let Ok(raw) = std::env::var("SQUADRON_DEVICE") {
            match Device::parse(&raw) {
                Some(device) => cfg.device = device,
                None => warn!(
                    "SQUADRON_DEVICE {:?} not understood, staying on {:?}",
                    raw, cfg.device
                ),
            }
        }
        cfg.port = env_parsed("SQUADRON_PORT", cfg.port);
        cfg.share = env_bool("SQUADRON_SHARE", cfg.share);
        if let Ok(raw) = std::env::var("SQUADRON_PROXY") {
            // present-but-empty is meaningful: it disables the proxy window
            cfg.proxy_url = raw.trim().to_string();
        }
        if let Some(v) = env_string("SQUADRON_CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(v);
        }
        cfg.max_seq_len = env_parsed("SQUADRON_MAX_SEQ_LEN", cfg.max_seq_len);
        cfg.max_answer_len = env_parsed("SQUADRON_MAX_ANSWER_LEN", cfg.max_answer_len);
        cfg.timeout_secs = env_parsed("SQUADRON_TIMEOUT_SECS", cfg.timeout_secs);
        cfg.intra_threads = env_parsed("SQUADRON_INTRA_THREADS", cfg.intra_threads);
        cfg
    }

    /// Address the UI host binds; share mode opens it beyond loopback.
    pub fn bind_addr(&self) -> String {
        let host = if self.share { "0.0.0.0" } else { "127.0.0.1" };
        format!("{}:{}", host, self.port)
    }
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_parsed<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Err(_) => default,
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("{} {:?} not understood, defaulting to {}", key, raw, default);
                default
            }
        },
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Err(_) => default,
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                warn!("{} {:?} not understood, defaulting to {}", key, other, default);
                default
            }
        },
    }
}

fn default_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("squadron"),
        None => {
            warn!("no user cache directory, defaulting to ./squadron-cache");
            PathBuf::from("squadron-cache")
        }
    }
}

// Tests
//-------------------------------------------------------------------------------
#[cfg(test)]
mod tests {

    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 11] = [
        "SQUADRON_MODEL",
        "SQUADRON_REVISION",
        "SQUADRON_DEVICE",
        "SQUADRON_PORT",
        "SQUADRON_SHARE",
        "SQUADRON_PROXY",
        "SQUADRON_CACHE_DIR",
        "SQUADRON_MAX_SEQ_LEN",
        "SQUADRON_MAX_ANSWER_LEN",
        "SQUADRON_TIMEOUT_SECS",
        "SQUADRON_INTRA_THREADS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn device_parse_accepts_all_spellings() {
        assert_eq!(Device::parse("cpu"), Some(Device::Cpu));
        assert_eq!(Device::parse("CPU"), Some(Device::Cpu));
        assert_eq!(Device::parse("cuda"), Some(Device::Cuda(0)));
        assert_eq!(Device::parse("cuda:2"), Some(Device::Cuda(2)));
        assert_eq!(Device::parse("0"), Some(Device::Cuda(0)));
        assert_eq!(Device::parse(" 3 "), Some(Device::Cuda(3)));
        assert_eq!(Device::parse("tpu"), None);
        assert_eq!(Device::parse("cuda:x"), None);
        assert_eq!(Device::parse("-1"), None);
    }

    #[test]
    #[serial]
    fn defaults_without_environment() {
        clear_env();
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.model_id, DEFAULT_MODEL);
        assert_eq!(cfg.revision, "main");
        assert_eq!(cfg.device, Device::Cpu);
        assert_eq!(cfg.port, 7860);
        assert!(cfg.share);
        assert_eq!(cfg.proxy_url, DEFAULT_PROXY);
        assert_eq!(cfg.max_seq_len, 384);
        assert_eq!(cfg.max_answer_len, 30);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.intra_threads, 1);
    }

    #[test]
    #[serial]
    fn environment_overrides_apply() {
        clear_env();
        std::env::set_var("SQUADRON_MODEL", "uer/roberta-base-chinese-extractive-qa");
        std::env::set_var("SQUADRON_DEVICE", "cuda:1");
        std::env::set_var("SQUADRON_PORT", "8080");
        std::env::set_var("SQUADRON_SHARE", "false");
        std::env::set_var("SQUADRON_MAX_SEQ_LEN", "512");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.model_id, "uer/roberta-base-chinese-extractive-qa");
        assert_eq!(cfg.device, Device::Cuda(1));
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.share);
        assert_eq!(cfg.max_seq_len, 512);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        clear_env();
    }

    #[test]
    #[serial]
    fn empty_proxy_disables_the_window() {
        clear_env();
        std::env::set_var("SQUADRON_PROXY", "");
        let cfg = AppConfig::from_env();
        assert!(cfg.proxy_url.is_empty());
        clear_env();
    }

    #[test]
    #[serial]
    fn malformed_values_fall_back() {
        clear_env();
        std::env::set_var("SQUADRON_PORT", "not-a-port");
        std::env::set_var("SQUADRON_SHARE", "maybe");
        std::env::set_var("SQUADRON_DEVICE", "quantum");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.port, 7860);
        assert!(cfg.share);
        assert_eq!(cfg.device, Device::Cpu);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:7860");
        clear_env();
    }
}
