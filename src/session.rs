//! Session credentials for the authenticated portal
//!
//! The portal gates its API behind a CAPTCHA solved in a real browser. The
//! resulting cookies (and the fingerprint header derived alongside them) are
//! exported to a JSON file, which this module loads:
//! - Current format: `{"cookies": [...], "fingerprint": "..."}`
//! - Legacy format: a bare JSON array of cookies (no fingerprint)
//!
//! Cookie objects follow the browser-export shape; fields the engine does
//! not interpret are preserved so a save/load round trip is lossless.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Session-credential errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Credential file not found: {path} (export cookies from an authenticated browser session first)")]
    NotFound { path: PathBuf },

    #[error("Failed to read credential file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse credential file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One cookie as exported by the browser
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,

    #[serde(default)]
    pub domain: String,

    #[serde(default = "default_cookie_path")]
    pub path: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// The authentication material for one portal session.
///
/// Immutable once constructed; refreshing an expired session means producing
/// a new credential file, not mutating this one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionCredential {
    pub cookies: Vec<Cookie>,

    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// The two on-disk credential layouts
#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialFile {
    Wrapped(SessionCredential),
    Legacy(Vec<Cookie>),
}

impl SessionCredential {
    /// Creates a credential from bare cookies, without a fingerprint
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self {
            cookies,
            fingerprint: None,
        }
    }

    /// Returns true if the credential carries no cookies at all
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Loads a credential file, accepting both the current wrapped format
    /// and the legacy bare-array format
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SessionError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SessionError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let file: CredentialFile =
            serde_json::from_str(&content).map_err(|source| SessionError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(match file {
            CredentialFile::Wrapped(credential) => credential,
            CredentialFile::Legacy(cookies) => Self::new(cookies),
        })
    }

    /// Writes the credential in the current wrapped format
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let content = serde_json::to_string_pretty(self).map_err(|source| SessionError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_credentials(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_wrapped_format() {
        let file = create_temp_credentials(
            r#"{
                "cookies": [
                    {"name": "portal_sessao", "value": "abc123", "domain": ".cnj.jus.br", "path": "/"}
                ],
                "fingerprint": "fp-value"
            }"#,
        );

        let credential = SessionCredential::load(file.path()).unwrap();
        assert_eq!(credential.cookies.len(), 1);
        assert_eq!(credential.cookies[0].name, "portal_sessao");
        assert_eq!(credential.cookies[0].domain, ".cnj.jus.br");
        assert_eq!(credential.fingerprint.as_deref(), Some("fp-value"));
    }

    #[test]
    fn test_load_legacy_bare_array() {
        let file = create_temp_credentials(
            r#"[{"name": "portal_sessao", "value": "abc123"}]"#,
        );

        let credential = SessionCredential::load(file.path()).unwrap();
        assert_eq!(credential.cookies.len(), 1);
        assert_eq!(credential.cookies[0].path, "/");
        assert!(credential.cookies[0].domain.is_empty());
        assert!(credential.fingerprint.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let result = SessionCredential::load(Path::new("/nonexistent/cookies.json"));
        assert!(matches!(result, Err(SessionError::NotFound { .. })));
    }

    #[test]
    fn test_load_invalid_json() {
        let file = create_temp_credentials("not json {{{");
        let result = SessionCredential::load(file.path());
        assert!(matches!(result, Err(SessionError::Parse { .. })));
    }

    #[test]
    fn test_save_load_round_trip_preserves_extras() {
        let file = create_temp_credentials(
            r#"{
                "cookies": [
                    {"name": "a", "value": "1", "httpOnly": true, "expires": 1893456000}
                ],
                "fingerprint": "fp"
            }"#,
        );

        let credential = SessionCredential::load(file.path()).unwrap();
        let out = NamedTempFile::new().unwrap();
        credential.save(out.path()).unwrap();

        let reloaded = SessionCredential::load(out.path()).unwrap();
        assert_eq!(reloaded.cookies.len(), 1);
        assert_eq!(
            reloaded.cookies[0].extra.get("httpOnly"),
            Some(&serde_json::Value::Bool(true))
        );
        assert_eq!(reloaded.fingerprint.as_deref(), Some("fp"));
    }

    #[test]
    fn test_is_empty() {
        assert!(SessionCredential::new(vec![]).is_empty());
    }
}
