//! Key material handed to the engine, plus the temp-wallet audit trail.

use core_logic::WalletError;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use rand::rngs::OsRng;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// `{address, private_key}`. The key is wiped on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Wallet {
    #[zeroize(skip)]
    address: Address,
    private_key: String,
}

impl Wallet {
    pub fn from_private_key(key: &str) -> Result<Self, WalletError> {
        let trimmed = key.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletError::InvalidKeyFormat);
        }
        if body.len() != 64 {
            return Err(WalletError::InvalidKeyLength { length: body.len() });
        }

        let signer: LocalWallet = body.parse().map_err(|_| WalletError::InvalidKeyFormat)?;

        Ok(Self {
            address: signer.address(),
            private_key: body.to_lowercase(),
        })
    }

    pub fn generate() -> Self {
        let signer = LocalWallet::new(&mut OsRng);
        Self {
            address: signer.address(),
            private_key: hex::encode(signer.signer().to_bytes()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// 0x-prefixed key, for the audit file only.
    pub fn private_key_hex(&self) -> String {
        format!("0x{}", self.private_key)
    }

    pub fn signer(&self, chain_id: u64) -> Result<LocalWallet, WalletError> {
        let signer: LocalWallet = self
            .private_key
            .parse()
            .map_err(|_| WalletError::InvalidKeyFormat)?;

        if signer.address() != self.address {
            return Err(WalletError::AddressMismatch {
                expected: format!("{:?}", self.address),
                actual: format!("{:?}", signer.address()),
            });
        }

        Ok(signer.with_chain_id(chain_id))
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletRole {
    Temp,
    Owner,
}

impl fmt::Display for WalletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletRole::Temp => write!(f, "temp"),
            WalletRole::Owner => write!(f, "owner"),
        }
    }
}

/// Append-only `timestamp,address,private_key,role` lines, so leftover
/// balances on temp wallets can be swept later.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, wallet: &Wallet, role: WalletRole) -> Result<(), WalletError> {
        let fail = |e: std::io::Error| WalletError::AuditWriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(fail)?;

        writeln!(
            file,
            "{},{:?},{},{}",
            chrono::Local::now().to_rfc3339(),
            wallet.address(),
            wallet.private_key_hex(),
            role
        )
        .map_err(fail)
    }
}
