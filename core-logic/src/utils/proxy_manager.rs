use crate::config::ProxyConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub struct ProxyManager;

impl ProxyManager {
    /// Format expected: one proxy per line, either
    /// `ip:port`, `ip:port:username:password`, or a full
    /// `http://` / `socks5://` URL (credentials may be embedded in the URL).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Vec<ProxyConfig>> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found. Running without proxies.", path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let proxies: Vec<ProxyConfig> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let parsed = Self::parse_line(line);
                if parsed.is_none() {
                    warn!("Skipping invalid proxy line: {}", line);
                }
                parsed
            })
            .collect();

        info!("Loaded {} proxies from {}", proxies.len(), path.display());
        Ok(proxies)
    }

    pub fn parse_line(line: &str) -> Option<ProxyConfig> {
        if line.contains("://") {
            return Some(ProxyConfig {
                url: line.to_string(),
                username: None,
                password: None,
            });
        }

        // ip:port:user:pass -> 4 parts, ip:port -> 2 parts
        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            [host, port] if !host.is_empty() && port.parse::<u16>().is_ok() => Some(ProxyConfig {
                url: format!("http://{}:{}", host, port),
                username: None,
                password: None,
            }),
            [host, port, user, pass] if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Some(ProxyConfig {
                    url: format!("http://{}:{}", host, port),
                    username: Some(user.to_string()),
                    password: Some(pass.to_string()),
                })
            }
            _ => None,
        }
    }
}
