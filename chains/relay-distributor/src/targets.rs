//! Recipient list loader: one address per line, `#` comments allowed.

use anyhow::{Context, Result};
use ethers::types::Address;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub fn load_targets(path: impl AsRef<Path>) -> Result<Vec<Address>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read target file: {}", path.display()))?;

    let targets = parse_targets(&content, &path.display().to_string());
    if targets.is_empty() {
        anyhow::bail!("No valid addresses found in {}", path.display());
    }

    info!("Loaded {} target wallets from {}", targets.len(), path.display());
    Ok(targets)
}

pub fn parse_targets(content: &str, source: &str) -> Vec<Address> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            // allow "address,anything" exports
            let field = trimmed.split(',').next().unwrap_or(trimmed).trim();
            match field.parse::<Address>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!(
                        "Invalid address at line {} in {}: '{}' - {}",
                        i + 1,
                        source,
                        field,
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_skips_comments_and_garbage() {
        let content = "# recipients\n0x1111111111111111111111111111111111111111\n\nnot-an-address\n0x2222222222222222222222222222222222222222,label\n";
        let targets = parse_targets(content, "inline");

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1], Address::from([0x22; 20]));
    }

    #[test]
    fn test_load_empty_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# nothing here").unwrap();
        assert!(load_targets(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load_targets("/definitely/not/here.txt").is_err());
    }
}
