use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const PROVIDER_FILENAME: &str = "provider.json";
const HISTORY_FILENAME: &str = "history.txt";

/// Payment provider credentials kept between sessions
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct ProviderCredentials {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
}

pub(crate) struct CliPersistence {
    pub(crate) data_dir: PathBuf,
}

impl CliPersistence {
    /// Returns the credentials to use for this session
    ///
    /// Credentials given on the command line replace the stored ones.
    pub(crate) fn resolve_credentials(
        &self,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<ProviderCredentials> {
        let path = self.data_dir.join(PROVIDER_FILENAME);

        if let (Some(client_id), Some(client_secret)) = (client_id, client_secret) {
            let credentials = ProviderCredentials {
                client_id,
                client_secret,
            };
            fs::write(&path, serde_json::to_string_pretty(&credentials)?)?;
            return Ok(credentials);
        }

        if !path.exists() {
            return Err(anyhow!(
                "No provider credentials found. Pass --client-id and --client-secret once to store them in {}",
                path.display()
            ));
        }

        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub(crate) fn history_file(&self) -> String {
        let history_file = self.data_dir.join(HISTORY_FILENAME);
        history_file.to_string_lossy().to_string()
    }
}
