use std::path::PathBuf;

use log::debug;

use crate::error::{CiPulseError, Result};

/// Bearer credential for code-hosting API calls.
///
/// Debug output is redacted so tokens never leak into logs.
#[derive(Clone)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(***)")
    }
}

fn token_file() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| CiPulseError::Config("No config directory found".into()))?
        .join("cipulse");
    Ok(dir.join("token"))
}

/// Resolves a credential: explicit value first, then the long-lived token
/// file under the config directory. `None` means the caller runs
/// unauthenticated; only credential-gated views treat that as blocking.
pub fn load_token(explicit: Option<&str>) -> Option<Token> {
    if let Some(value) = explicit {
        return Some(Token::from(value));
    }

    let path = token_file().ok()?;
    let contents = std::fs::read_to_string(&path).ok()?;
    if contents.trim().is_empty() {
        return None;
    }
    debug!("Loaded credential from: {}", path.display());
    Some(Token::from(contents.as_str()))
}

/// Persists the credential to the long-lived token file.
pub fn save_token(token: &Token) -> Result<()> {
    let path = token_file()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, token.as_str())?;
    Ok(())
}
