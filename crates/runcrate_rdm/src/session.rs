use crate::{RdmConfig, RdmError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

#[derive(Clone, Serialize, Deserialize)]
pub struct RdmToken {
    pub token: String,
    pub service_id: String,
}

impl fmt::Debug for RdmToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdmToken")
            .field("token", &"******")
            .field("service_id", &self.service_id)
            .finish()
    }
}

/// One user's authenticated view of the RDM store. Every endpoint accessor
/// verifies that the token was issued for the configured service before
/// handing out a URL.
#[derive(Debug, Clone)]
pub struct RdmSession {
    config: RdmConfig,
    token: Option<RdmToken>,
}

impl RdmSession {
    pub fn new(config: RdmConfig, token: Option<RdmToken>) -> Self {
        Self { config, token }
    }

    pub fn config(&self) -> &RdmConfig {
        &self.config
    }

    pub fn staging_folder_name(&self) -> &str {
        &self.config.staging_folder_name
    }

    fn token(&self) -> Result<&RdmToken, RdmError> {
        self.token.as_ref().ok_or(RdmError::MissingToken)
    }

    fn checked(&self) -> Result<&RdmConfig, RdmError> {
        let token = self.token()?;
        if token.service_id != self.config.service_id {
            return Err(RdmError::ServiceMismatch {
                expected: self.config.service_id.clone(),
                actual: token.service_id.clone(),
            });
        }
        Ok(&self.config)
    }

    pub fn access_token(&self) -> Result<&str, RdmError> {
        Ok(&self.token()?.token)
    }

    pub fn api_url(&self) -> Result<&str, RdmError> {
        Ok(&self.checked()?.api_url)
    }

    pub fn files_url(&self) -> Result<&str, RdmError> {
        Ok(&self.checked()?.files_url)
    }

    pub fn web_url(&self) -> Result<&str, RdmError> {
        Ok(&self.checked()?.web_url)
    }

    /// Host configuration handed to the image builder as `RDM_HOSTS_JSON` so
    /// the build tool can fetch repository content from the store.
    pub fn builder_hosts_json(&self) -> Result<String, RdmError> {
        let config = json!([{
            "hostname": [self.web_url()?],
            "api": self.api_url()?,
            "token": self.access_token()?,
        }]);
        Ok(config.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RdmConfig {
        RdmConfig {
            web_url: "https://rdm.example".into(),
            api_url: "https://api.rdm.example/v2".into(),
            files_url: "https://files.rdm.example/v1".into(),
            service_id: "rdm.example".into(),
            staging_folder_name: ".run-crates".into(),
        }
    }

    #[test]
    fn mismatched_service_is_rejected() {
        let session = RdmSession::new(
            config(),
            Some(RdmToken {
                token: "t".into(),
                service_id: "other.example".into(),
            }),
        );
        assert!(matches!(
            session.web_url(),
            Err(RdmError::ServiceMismatch { .. })
        ));
        // the raw token itself is not service-gated
        assert_eq!(session.access_token().unwrap(), "t");
    }

    #[test]
    fn missing_token_is_an_error() {
        let session = RdmSession::new(config(), None);
        assert!(matches!(session.files_url(), Err(RdmError::MissingToken)));
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = RdmToken {
            token: "secret".into(),
            service_id: "rdm.example".into(),
        };
        let printed = format!("{:?}", token);
        assert!(!printed.contains("secret"));
    }
}
