use once_cell::sync::Lazy;
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STAGING_FOLDER: &str = ".run-crates";

static HTTP_TIMEOUT: Lazy<Duration> = Lazy::new(|| {
    std::env::var("RUNCRATE_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
});

pub fn http_timeout() -> Duration {
    *HTTP_TIMEOUT
}

#[derive(Debug, Clone)]
pub struct RdmConfig {
    pub web_url: String,
    pub api_url: String,
    pub files_url: String,
    pub service_id: String,
    pub staging_folder_name: String,
}

impl RdmConfig {
    pub fn from_env() -> Self {
        Self {
            web_url: env_or("RUNCRATE_RDM_WEB_URL", "https://rdm.nii.ac.jp"),
            api_url: env_or("RUNCRATE_RDM_API_URL", "https://api.rdm.nii.ac.jp/v2"),
            files_url: env_or("RUNCRATE_RDM_FILES_URL", "https://files.rdm.nii.ac.jp/v1"),
            service_id: env_or("RUNCRATE_RDM_SERVICE_ID", "rdm.nii.ac.jp"),
            staging_folder_name: env_or("RUNCRATE_STAGING_FOLDER", DEFAULT_STAGING_FOLDER),
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}
