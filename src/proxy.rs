//! Scoped `HTTP_PROXY`/`HTTPS_PROXY` window.
//!
//! Model artifacts are often only reachable through a local forwarder, so
//! both proxy variables are set right before acquisition and removed the
//! moment it finishes. The guard ties removal to `Drop`, which keeps the
//! window closed on the error path as well as the happy one.

use log::{debug, info};

pub const HTTP_PROXY: &str = "HTTP_PROXY";
pub const HTTPS_PROXY: &str = "HTTPS_PROXY";

/// Sets both proxy variables on construction and removes them on drop.
///
/// An empty or blank URL produces an inert guard that touches nothing,
/// which is how the window is disabled through configuration.
///
/// The process environment is global state: anything running on another
/// thread observes the window, so engage the guard only while startup
/// is still single threaded.
#[derive(Debug)]
pub struct ProxyGuard {
    active: bool,
}

impl ProxyGuard {
    pub fn engage(proxy_url: &str) -> ProxyGuard {
        let url = proxy_url.trim();
        if url.is_empty() {
            debug!("proxy window disabled");
            return ProxyGuard { active: false };
        }
        std::env::set_var(HTTP_PROXY, url);
        std::env::set_var(HTTPS_PROXY, url);
        info!("proxy window open ({})", url);
        ProxyGuard { active: true }
    }
}

impl Drop for ProxyGuard {
    fn drop(&mut self) {
        if self.active {
            // remove_var tolerates an already-absent variable
            std::env::remove_var(HTTP_PROXY);
            std::env::remove_var(HTTPS_PROXY);
            info!("proxy window closed");
        }
    }
}
