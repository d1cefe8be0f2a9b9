//! Fetching dataset documents from disk or over HTTP.
//!
//! The fetch is the only suspend point of a session. [`Session::load`] tags
//! it with a [`LoadTicket`](crate::session::LoadTicket) so a slow response
//! can never replace a dataset requested after it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::config::AttnConfig;
use crate::dataset::{DataKind, Dataset};
use crate::error::{AttnError, Result};
use crate::session::{LoadOutcome, Session};

/// Where a dataset document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Path(PathBuf),
    Url(String),
}

impl LoadSource {
    /// `http://` and `https://` strings are URLs; anything else is a path.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }

    /// Short name used as the dataset label.
    pub fn label(&self) -> String {
        match self {
            Self::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            Self::Url(u) => u
                .rsplit('/')
                .find(|s| !s.is_empty())
                .unwrap_or(u)
                .to_string(),
        }
    }
}

impl FromStr for LoadSource {
    type Err = AttnError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(AttnError::config("empty dataset source"));
        }
        Ok(Self::parse(s))
    }
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Url(u) => f.write_str(u),
        }
    }
}

/// Read the raw document text.
pub async fn fetch_text(source: &LoadSource) -> Result<String> {
    let start = Instant::now();
    let text = match source {
        LoadSource::Path(path) => tokio::fs::read_to_string(path).await?,
        LoadSource::Url(url) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .connect_timeout(Duration::from_secs(10))
                .build()?;
            client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?
        }
    };
    tracing::info!(
        source = %source,
        bytes = text.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Download finished"
    );
    Ok(text)
}

/// Fetch and parse one dataset.
pub async fn load_dataset(
    source: &LoadSource,
    kind: Option<DataKind>,
    config: &AttnConfig,
) -> Result<Dataset> {
    let text = fetch_text(source).await?;
    let start = Instant::now();
    let dataset = Dataset::from_json_str(&text, kind, config)?.with_label(source.label());
    tracing::info!(
        source = %source,
        kind = %dataset.kind,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Parse finished"
    );
    Ok(dataset)
}

impl Session {
    /// Fetch, parse and install a dataset.
    pub async fn load(&mut self, source: &LoadSource, kind: Option<DataKind>) -> LoadOutcome {
        let ticket = self.begin_load();
        let result = load_dataset(source, kind, self.config()).await;
        self.complete_load(ticket, result)
    }
}
