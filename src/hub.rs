//! Model artifact acquisition and on-disk cache.
//!
//! Artifacts are resolved straight off the Hugging Face hub with plain
//! HTTPS and cached under one directory per `(repo, revision)`. A cache
//! hit never touches the network. The download agent honors the
//! `HTTPS_PROXY`/`HTTP_PROXY` variables in effect at construction time,
//! which is what scopes it to the acquisition window.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info};
use regex::Regex;

use crate::config::AppConfig;
use crate::error::SquadronError;
use crate::proxy::{HTTPS_PROXY, HTTP_PROXY};

/// ONNX graph exported from the checkpoint.
pub const MODEL_FILE: &str = "model.onnx";
/// Serialized fast tokenizer.
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// Checkpoint metadata (sequence limits and friends).
pub const CONFIG_FILE: &str = "config.json";

const ARTIFACTS: [&str; 3] = [MODEL_FILE, TOKENIZER_FILE, CONFIG_FILE];

const HUB_URL: &str = "https://huggingface.co";

/// Reject anything that could not be a hub repo id before it reaches a
/// URL or a filesystem path. Modern ids are `owner/name`; bare legacy
/// ids are still accepted.
pub fn validate_repo_id(repo_id: &str) -> Result<(), SquadronError> {
    const REPO_ID_CHECK: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*(/[A-Za-z0-9][A-Za-z0-9._-]*)?$";
    let re = Regex::new(REPO_ID_CHECK).unwrap();
    if !re.is_match(repo_id) || repo_id.contains("..") {
        error!("model id {} is not a hub repo id", repo_id);
        return Err(SquadronError::validation(format!(
            "invalid model id: {}",
            repo_id
        )));
    }
    Ok(())
}

/// Revisions become one path component of the cache layout, so the same
/// character class applies, with no separator at all.
pub fn validate_revision(revision: &str) -> Result<(), SquadronError> {
    const REVISION_CHECK: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";
    let re = Regex::new(REVISION_CHECK).unwrap();
    if !re.is_match(revision) || revision.contains("..") {
        error!("revision {} is not a branch, tag, or commit name", revision);
        return Err(SquadronError::validation(format!(
            "invalid revision: {}",
            revision
        )));
    }
    Ok(())
}

/// `https://huggingface.co/{repo}/resolve/{revision}/{file}`
pub fn resolve_url(repo_id: &str, revision: &str, file: &str) -> String {
    format!("{}/{}/resolve/{}/{}", HUB_URL, repo_id, revision, file)
}

/// Cache directory for one `(repo, revision)` pair. The repo id's slash
/// is flattened so the layout stays a single directory level per model.
pub fn snapshot_dir(cache_dir: &Path, repo_id: &str, revision: &str) -> PathBuf {
    cache_dir.join(repo_id.replace('/', "--")).join(revision)
}

/// Download agent for artifact fetches.
///
/// Proxy selection reads `HTTPS_PROXY` first, then `HTTP_PROXY`, at the
/// moment of construction. Called inside the proxy window, the agent
/// routes through the forwarder; called outside, it connects direct.
pub fn agent() -> Result<ureq::Agent, SquadronError> {
    // read timeout bounds per-read stalls without capping the total
    // transfer time of a large model file
    let mut builder = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(30))
        .timeout_read(Duration::from_secs(30));
    let proxy_url = std::env::var(HTTPS_PROXY)
        .or_else(|_| std::env::var(HTTP_PROXY))
        .ok();
    if let Some(url) = proxy_url.filter(|u| !u.trim().is_empty()) {
        let proxy = ureq::Proxy::new(&url)
            .map_err(|e| SquadronError::fetch(format!("bad proxy url {}: {}", url, e)))?;
        builder = builder.proxy(proxy);
        info!("download agent routed through {}", url);
    }
    Ok(builder.build())
}

/// Fetch one artifact into `dir`, writing through a `.part` file so a
/// torn download never masquerades as a cached artifact.
pub fn fetch_file(
    agent: &ureq::Agent,
    repo_id: &str,
    revision: &str,
    file: &str,
    dir: &Path,
) -> Result<PathBuf, SquadronError> {
    let url = resolve_url(repo_id, revision, file);
    info!("fetching {}", url);
    let response = agent
        .get(&url)
        .call()
        .map_err(|e| SquadronError::fetch(format!("{}: {}", url, e)))?;
    let part = dir.join(format!("{}.part", file));
    let dest = dir.join(file);
    let mut reader = response.into_reader();
    let mut out = fs::File::create(&part)?;
    let bytes = std::io::copy(&mut reader, &mut out)?;
    drop(out);
    fs::rename(&part, &dest)?;
    info!("cached {} ({} bytes)", dest.display(), bytes);
    Ok(dest)
}

/// Make sure every artifact for the configured model is on disk and
/// return the snapshot directory holding them.
pub fn ensure_artifacts(cfg: &AppConfig) -> Result<PathBuf, SquadronError> {
    validate_repo_id(&cfg.model_id)?;
    validate_revision(&cfg.revision)?;
    let dir = snapshot_dir(&cfg.cache_dir, &cfg.model_id, &cfg.revision);
    let missing: Vec<&str> = ARTIFACTS
        .iter()
        .copied()
        .filter(|f| !dir.join(f).is_file())
        .collect();
    if missing.is_empty() {
        info!("cache hit for {} at {}", cfg.model_id, dir.display());
        return Ok(dir);
    }
    fs::create_dir_all(&dir)?;
    let agent = agent()?;
    for file in missing {
        fetch_file(&agent, &cfg.model_id, &cfg.revision, file, &dir)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {

    use super::*;
    use serial_test::serial;

    #[test]
    fn repo_ids_are_validated_before_use() {
        assert!(validate_repo_id("optimum/roberta-base-squad2").is_ok());
        assert!(validate_repo_id("uer/roberta-base-chinese-extractive-qa").is_ok());
        assert!(validate_repo_id("TinyLlama/TinyLlama-1.1B-Chat-v1.0").is_ok());
        assert!(validate_repo_id("bert-base-uncased").is_ok());
        assert!(validate_repo_id("a/b/c").is_err());
        assert!(validate_repo_id("../../etc/passwd").is_err());
        assert!(validate_repo_id("owner/..").is_err());
        assert!(validate_repo_id("").is_err());
        assert!(validate_repo_id("owner/name with spaces").is_err());
        assert!(validate_repo_id("/name").is_err());
    }

    #[test]
    fn revisions_are_validated_before_use() {
        assert!(validate_revision("main").is_ok());
        assert!(validate_revision("v1.0").is_ok());
        assert!(validate_revision("4b8b7a5a5cab871146b1f997c1b2e7e7a1f0e8e5").is_ok());
        assert!(validate_revision("../..").is_err());
        assert!(validate_revision("refs/pr/1").is_err());
        assert!(validate_revision("").is_err());
        assert!(validate_revision(".hidden").is_err());
    }

    #[test]
    fn traversal_revision_never_reaches_the_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            cache_dir: tmp.path().to_path_buf(),
            revision: String::from("../../outside"),
            ..AppConfig::default()
        };
        assert!(matches!(
            ensure_artifacts(&cfg),
            Err(SquadronError::Validation(_))
        ));
        // nothing may have been created under (or above) the cache root
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn resolve_url_matches_hub_layout() {
        assert_eq!(
            resolve_url("optimum/roberta-base-squad2", "main", "model.onnx"),
            "https://huggingface.co/optimum/roberta-base-squad2/resolve/main/model.onnx"
        );
    }

    #[test]
    fn snapshot_dir_flattens_the_repo_id() {
        let dir = snapshot_dir(
            Path::new("/tmp/cache"),
            "optimum/roberta-base-squad2",
            "main",
        );
        assert_eq!(
            dir,
            PathBuf::from("/tmp/cache/optimum--roberta-base-squad2/main")
        );
    }

    #[test]
    #[serial]
    fn cache_hit_skips_the_network() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            cache_dir: tmp.path().to_path_buf(),
            ..AppConfig::default()
        };
        let dir = snapshot_dir(&cfg.cache_dir, &cfg.model_id, &cfg.revision);
        fs::create_dir_all(&dir).unwrap();
        for file in ARTIFACTS {
            fs::write(dir.join(file), b"stub").unwrap();
        }
        // would error on any fetch attempt; the warm cache must not fetch
        let resolved = ensure_artifacts(&cfg).unwrap();
        assert_eq!(resolved, dir);
    }

    #[test]
    #[serial]
    fn agent_builds_inside_and_outside_the_window() {
        std::env::remove_var(HTTP_PROXY);
        std::env::remove_var(HTTPS_PROXY);
        assert!(agent().is_ok());
        std::env::set_var(HTTPS_PROXY, "http://127.0.0.1:7890");
        assert!(agent().is_ok());
        std::env::remove_var(HTTPS_PROXY);
    }
}
