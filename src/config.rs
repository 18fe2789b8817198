//! Service configuration loaded from the environment

use std::path::PathBuf;

/// S3-compatible remote used by the dataset versioning channel
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
}

impl S3Config {
    /// Environment forwarded to child processes that talk to the remote,
    /// under both the `S3_*` names and the AWS SDK names.
    pub fn child_env(&self) -> Vec<(&'static str, String)> {
        let pairs = [
            (&self.endpoint, "S3_ENDPOINT", "AWS_ENDPOINT_URL"),
            (&self.access_key, "S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"),
            (&self.secret_key, "S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"),
            (&self.region, "S3_REGION", "AWS_DEFAULT_REGION"),
        ];
        let mut env = Vec::new();
        for (value, s3_name, aws_name) in pairs {
            if let Some(value) = value {
                env.push((s3_name, value.clone()));
                env.push((aws_name, value.clone()));
            }
        }
        env
    }
}

/// Credentials and endpoints of the experiment-tracking server
#[derive(Debug, Clone)]
pub struct ClearMlConfig {
    pub api_host: Option<String>,
    pub web_host: Option<String>,
    pub files_host: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub project: String,
}

impl Default for ClearMlConfig {
    fn default() -> Self {
        Self {
            api_host: None,
            web_host: None,
            files_host: None,
            access_key: None,
            secret_key: None,
            project: "MLOps".to_string(),
        }
    }
}

impl ClearMlConfig {
    /// Tracking is only attempted with a complete credential set.
    pub fn is_complete(&self) -> bool {
        self.api_host.is_some() && self.access_key.is_some() && self.secret_key.is_some()
    }
}

/// Top-level settings for both transport surfaces and the lifecycle core
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_host: String,
    pub api_port: u16,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub base_dir: PathBuf,
    pub models_dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub max_upload_size: usize,
    pub s3: S3Config,
    pub clearml: ClearMlConfig,
    pub dvc_remote: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    /// Load settings from process environment, reading `.env` first when present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let port = |key: &str, default: u16| {
            get(key).and_then(|p| p.parse().ok()).unwrap_or(default)
        };

        let base_dir = get("BASE_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let models_dir = get("MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("models"));
        let datasets_dir = get("DATASETS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("datasets"));

        Self {
            api_host: get("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: port("API_PORT", 8000),
            rpc_host: get("GRPC_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            rpc_port: port("GRPC_PORT", 50051),
            base_dir,
            models_dir,
            datasets_dir,
            max_upload_size: get("MAX_UPLOAD_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(100 * 1024 * 1024), // 100MB
            s3: S3Config {
                endpoint: get("S3_ENDPOINT"),
                access_key: get("S3_ACCESS_KEY"),
                secret_key: get("S3_SECRET_KEY"),
                bucket: get("S3_BUCKET"),
                region: get("S3_REGION"),
            },
            clearml: ClearMlConfig {
                api_host: get("CLEARML_API_HOST"),
                web_host: get("CLEARML_WEB_HOST"),
                files_host: get("CLEARML_FILES_HOST"),
                access_key: get("CLEARML_ACCESS_KEY"),
                secret_key: get("CLEARML_SECRET_KEY"),
                project: get("CLEARML_PROJECT").unwrap_or_else(|| "MLOps".to_string()),
            },
            dvc_remote: get("DVC_REMOTE").unwrap_or_else(|| "s3storage".to_string()),
        }
    }

    /// Create the model and dataset directories if they are missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.models_dir)?;
        std::fs::create_dir_all(&self.datasets_dir)?;
        Ok(())
    }
}
