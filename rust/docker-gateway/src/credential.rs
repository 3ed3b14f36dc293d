//! Shared-secret provisioning and verification.
//!
//! The gateway is guarded by a single API key. It is generated once
//! (`docker-gateway keygen`), stored in a plain file, and loaded at startup.
//! The loaded value is immutable for the process lifetime; rotating the key
//! requires a restart.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Number of random bytes in a generated key (hex-encoded to twice as many chars).
pub const KEY_BYTES: usize = 32;

/// Errors while provisioning or loading the credential.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Failed to access API key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("API key file {path} is empty")]
    Empty { path: PathBuf },

    #[error("API key file {path} already exists (use --force to overwrite)")]
    AlreadyExists { path: PathBuf },
}

/// The provisioned shared secret.
///
/// Only a SHA-256 digest is kept for comparisons; the plaintext is retained
/// solely so a freshly generated key can be persisted and shown once.
#[derive(Clone)]
pub struct Credential {
    secret: String,
    digest: [u8; 32],
}

impl Credential {
    /// Wrap an existing secret.
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let digest = Sha256::digest(secret.as_bytes()).into();
        Self { secret, digest }
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self::new(hex::encode(bytes))
    }

    /// Load the key from `path`, trimming surrounding whitespace.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let secret = raw.trim();
        if secret.is_empty() {
            return Err(CredentialError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(Self::new(secret))
    }

    /// Write the key to `path`. On Unix the file is created with mode 0600.
    pub fn persist(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<(), CredentialError> {
        let path = path.as_ref();
        let io_err = |source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut options = std::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                CredentialError::AlreadyExists {
                    path: path.to_path_buf(),
                }
            } else {
                io_err(source)
            }
        })?;
        file.write_all(self.secret.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(())
    }

    /// Compare a caller-supplied key against the secret in constant time.
    ///
    /// Both values are hashed first so the comparison is independent of the
    /// secret's length as well as its content.
    pub fn verify(&self, candidate: &[u8]) -> bool {
        let candidate: [u8; 32] = Sha256::digest(candidate).into();
        bool::from(candidate.as_slice().ct_eq(self.digest.as_slice()))
    }

    /// Plaintext secret. Only used by `keygen` to display the new key once.
    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .finish()
    }
}
