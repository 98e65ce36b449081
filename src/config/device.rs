//! Registered device identity and first-run registration

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Client type reported when registering a device instance
const CLIENT_TYPE: &str = "SDK_SERVICE";

/// Identity the service knows this device by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device instance id
    pub id: String,
    /// Device model id
    pub model_id: String,
}

/// Shape of `device_config.json`; either field may be missing
#[derive(Debug, Default, Deserialize)]
struct DeviceConfigFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model_id: Option<String>,
}

/// Body of a registration request, also written back as the identity file
#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    id: &'a str,
    model_id: &'a str,
    client_type: &'a str,
}

/// Where the device identity comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSetup {
    /// Identity given explicitly or read from the identity file
    Registered(DeviceIdentity),
    /// No instance id yet; a new instance of `model_id` is registered under
    /// `project_id` and saved to `path`
    Unregistered {
        model_id: String,
        project_id: String,
        path: PathBuf,
    },
}

impl DeviceSetup {
    /// Resolve the identity from explicit values and the identity file
    ///
    /// Explicit values win field by field; the file at `path` fills the gaps.
    /// When no instance id can be found the device needs registering, which
    /// requires a model id and a project id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if registration is needed but the model id or
    /// project id is missing, or the file exists but cannot be parsed
    pub fn resolve(
        device_id: Option<String>,
        model_id: Option<String>,
        project_id: Option<String>,
        path: &Path,
    ) -> Result<Self> {
        let stored = if device_id.is_some() && model_id.is_some() {
            DeviceConfigFile::default()
        } else if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("invalid device config {}: {e}", path.display()))
            })?
        } else {
            tracing::warn!(path = %path.display(), "device config not found");
            DeviceConfigFile::default()
        };

        let id = device_id.or(stored.id).filter(|s| !s.is_empty());
        let model_id = model_id.or(stored.model_id).filter(|s| !s.is_empty());

        match (id, model_id) {
            (Some(id), Some(model_id)) => {
                tracing::info!(device_id = %id, device_model_id = %model_id, "using device identity");
                Ok(Self::Registered(DeviceIdentity { id, model_id }))
            }
            (_, None) => Err(Error::Config(
                "--device-model-id is required when registering a device instance".to_string(),
            )),
            (None, Some(model_id)) => {
                let project_id = project_id.filter(|s| !s.is_empty()).ok_or_else(|| {
                    Error::Config(
                        "--project-id is required when registering a device instance".to_string(),
                    )
                })?;
                Ok(Self::Unregistered {
                    model_id,
                    project_id,
                    path: path.to_path_buf(),
                })
            }
        }
    }

    /// Finish resolution, registering the device first if needed
    ///
    /// # Errors
    ///
    /// Returns the registration error for an unregistered device
    pub async fn into_identity(
        self,
        registrar: &DeviceRegistrar,
        token: &SecretString,
    ) -> Result<DeviceIdentity> {
        match self {
            Self::Registered(identity) => Ok(identity),
            Self::Unregistered {
                model_id,
                project_id,
                path,
            } => registrar.register(token, &project_id, &model_id, &path).await,
        }
    }
}

/// Registers new device instances with the service's device API
pub struct DeviceRegistrar {
    client: reqwest::Client,
    endpoint: String,
}

impl DeviceRegistrar {
    /// Create a registrar for the API rooted at `endpoint`
    /// (e.g. `https://embeddedassistant.googleapis.com/v1alpha2`)
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Register a new instance of `model_id` and save its identity to `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registration`] if the service rejects the request, or
    /// the IO error if the identity file cannot be written
    pub async fn register(
        &self,
        token: &SecretString,
        project_id: &str,
        model_id: &str,
        path: &Path,
    ) -> Result<DeviceIdentity> {
        let id = uuid::Uuid::new_v4().to_string();
        let request = RegistrationRequest {
            id: &id,
            model_id,
            client_type: CLIENT_TYPE,
        };
        let url = format!("{}/projects/{project_id}/devices", self.endpoint);

        tracing::info!(url = %url, device_model_id = %model_id, "registering device");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registration(format!("{status}: {body}")));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&request)?)?;

        tracing::info!(device_id = %id, path = %path.display(), "device registered");
        Ok(DeviceIdentity {
            id,
            model_id: model_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_values_skip_file() {
        let setup = DeviceSetup::resolve(
            Some("dev".to_string()),
            Some("model".to_string()),
            None,
            Path::new("/nonexistent/device_config.json"),
        )
        .unwrap();
        assert_eq!(
            setup,
            DeviceSetup::Registered(DeviceIdentity {
                id: "dev".to_string(),
                model_id: "model".to_string(),
            })
        );
    }

    #[test]
    fn file_fills_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_config.json");
        std::fs::write(
            &path,
            r#"{"id": "from-file", "model_id": "model-file", "client_type": "SDK_SERVICE"}"#,
        )
        .unwrap();

        let setup = DeviceSetup::resolve(Some("cli".to_string()), None, None, &path).unwrap();
        let DeviceSetup::Registered(identity) = setup else {
            panic!("expected a registered identity");
        };
        assert_eq!(identity.id, "cli");
        assert_eq!(identity.model_id, "model-file");
    }

    #[test]
    fn missing_file_with_project_needs_registration() {
        let path = Path::new("/nonexistent/device_config.json");
        let setup = DeviceSetup::resolve(
            None,
            Some("model".to_string()),
            Some("my-project".to_string()),
            path,
        )
        .unwrap();
        assert_eq!(
            setup,
            DeviceSetup::Unregistered {
                model_id: "model".to_string(),
                project_id: "my-project".to_string(),
                path: path.to_path_buf(),
            }
        );
    }

    #[test]
    fn registration_without_project_is_config_error() {
        let err = DeviceSetup::resolve(
            None,
            Some("model".to_string()),
            None,
            Path::new("/nonexistent/x.json"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("--project-id")));
    }

    #[test]
    fn registration_without_model_is_config_error() {
        let err = DeviceSetup::resolve(
            None,
            None,
            Some("my-project".to_string()),
            Path::new("/nonexistent/x.json"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("--device-model-id")));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_config.json");
        std::fs::write(&path, "not json").unwrap();

        let err = DeviceSetup::resolve(None, None, Some("p".to_string()), &path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
