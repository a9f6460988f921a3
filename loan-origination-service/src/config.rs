use std::path::PathBuf;
use std::time::Duration;

use crate::services::extraction::DEFAULT_OCR_SPACE_URL;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// PostgreSQL records when set, in-memory otherwise
    pub database_url: Option<String>,
    /// OCR.space key; without it uploads go through the simulated extractor
    pub ocr_space_api_key: Option<String>,
    pub ocr_space_url: String,
    pub sanction_letter_dir: PathBuf,
    pub external_call_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            port: get("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            database_url: get("DATABASE_URL")
                .map(|url| {
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })
                .transpose()?,
            ocr_space_api_key: get("OCR_SPACE_API_KEY"),
            ocr_space_url: get("OCR_SPACE_URL")
                .map(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("OCR_SPACE_URL must start with http:// or https://");
                    }
                    Ok(url)
                })
                .transpose()?
                .unwrap_or_else(|| DEFAULT_OCR_SPACE_URL.to_string()),
            sanction_letter_dir: get("SANCTION_LETTER_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("generated_pdfs")),
            external_call_timeout_secs: get("EXTERNAL_CALL_TIMEOUT_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("EXTERNAL_CALL_TIMEOUT_SECS must be a whole number of seconds")
                })
                .and_then(|secs: u64| {
                    if secs == 0 {
                        anyhow::bail!("EXTERNAL_CALL_TIMEOUT_SECS must be greater than zero");
                    }
                    Ok(secs)
                })?,
        };

        Ok(config)
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: None,
            ocr_space_api_key: None,
            ocr_space_url: DEFAULT_OCR_SPACE_URL.to_string(),
            sanction_letter_dir: PathBuf::from("generated_pdfs"),
            external_call_timeout_secs: 30,
        }
    }
}
