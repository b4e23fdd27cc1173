use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SPOONACULAR_BASE_URL: &str = "https://api.spoonacular.com";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// `NUTRISENSE_DATA_DIR` overrides the platform data directory.
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("NUTRISENSE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "nutrisense")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        Self::from_data_dir(data_dir)
    }

    pub fn from_data_dir(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("nutrisense.db");

        Ok(Config { db_path, data_dir })
    }

    fn session_path(&self) -> PathBuf {
        self.data_dir.join("session")
    }

    /// User id of the signed-in local session, if any.
    pub fn current_user(&self) -> Result<Option<String>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let user = raw.trim();
        Ok((!user.is_empty()).then(|| user.to_string()))
    }

    pub fn save_session(&self, user_id: &str) -> Result<()> {
        std::fs::write(self.session_path(), user_id).context("Failed to write session file")
    }

    /// Returns whether a session existed.
    pub fn clear_session(&self) -> Result<bool> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).context("Failed to remove session file")?;
        Ok(true)
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

/// Credentials and endpoints of the third-party APIs the functions call.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub spoonacular_api_key: Option<String>,
    pub spoonacular_base_url: String,
}

impl UpstreamConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_model: get("OPENAI_MODEL")
                .unwrap_or_else(|| nutrisense_core::openai::DEFAULT_MODEL.to_string()),
            spoonacular_api_key: get("SPOONACULAR_API_KEY"),
            spoonacular_base_url: get("SPOONACULAR_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SPOONACULAR_BASE_URL.to_string()),
        }
    }
}
