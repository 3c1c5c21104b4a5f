use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};

/// How the client authenticates against GitHub.
#[derive(Clone)]
pub enum Credentials {
    Token(String),
    App {
        app_id: u64,
        private_key_path: PathBuf,
        installation_id: u64,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token([REDACTED])"),
            Credentials::App {
                app_id,
                installation_id,
                ..
            } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .finish(),
        }
    }
}

impl Credentials {
    /// Pick credentials from config. A token wins over App settings.
    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(Credentials::Token(token.clone()));
        }

        match (config.app_id, &config.private_key_path, config.installation_id) {
            (Some(app_id), Some(path), Some(installation_id)) => {
                if !path.exists() {
                    return Err(AppError::Config(format!(
                        "GitHub App private key not found at: {}",
                        path.display()
                    )));
                }
                Ok(Credentials::App {
                    app_id,
                    private_key_path: path.clone(),
                    installation_id,
                })
            }
            _ => Err(AppError::Config(
                "github.token or github.app_id + private_key_path + installation_id is required"
                    .to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct JwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Generate a JWT for GitHub App authentication.
pub fn generate_app_jwt(app_id: u64, private_key_path: &Path) -> Result<String> {
    let key_pem = std::fs::read(private_key_path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read private key at {}: {e}",
            private_key_path.display()
        ))
    })?;

    let encoding_key = EncodingKey::from_rsa_pem(&key_pem)
        .map_err(|e| AppError::Config(format!("Invalid RSA private key: {e}")))?;

    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        iat: now - 60, // clock drift
        exp: now + 10 * 60,
        iss: app_id.to_string(),
    };

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| AppError::Config(format!("Failed to generate JWT: {e}")))
}
