use std::collections::BTreeMap;

use crate::{
    fingerprint, RequestError, RequestKind, ACCESS_TOKEN_DATA_KEY_ANNOTATION,
    ACCESS_TOKEN_NAME_ANNOTATION, ACCESS_TOKEN_SCHEMA, ACCESS_TOKEN_SCOPES_ANNOTATION,
    DEFAULT_ACCESS_TOKEN_DATA_KEY, OAUTH2_APP_CLIENT_ID_DATA_KEY_ANNOTATION,
    OAUTH2_APP_CLIENT_SECRET_DATA_KEY_ANNOTATION, OAUTH2_APP_NAME_ANNOTATION,
    OAUTH2_APP_REDIRECT_URL_ANNOTATION, OAUTH2_APP_SCHEMA,
};

/// Validated, in-memory view of a request `Secret` for one [`RequestKind`].
pub trait CredentialRequest: Sized {
    const KIND: RequestKind;

    fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, RequestError>;

    /// Name of the credential in Gitea, used to reclaim existing credentials.
    fn name(&self) -> &str;

    /// The semantically relevant parameters, in persisted order.
    fn fingerprint_fields(&self) -> Vec<&str>;

    fn fingerprint(&self) -> String {
        fingerprint(&self.fingerprint_fields())
    }
}

/// Request for a Gitea access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRequest {
    pub name: String,
    /// The scopes annotation as written by the requester.
    pub scopes_annotation: String,
    pub scopes: Vec<String>,
    /// `Secret` data key receiving the token value.
    pub secret_data_key: String,
}

impl CredentialRequest for AccessTokenRequest {
    const KIND: RequestKind = RequestKind::AccessToken;

    fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, RequestError> {
        let resolved = ACCESS_TOKEN_SCHEMA.resolve(annotations)?;
        let scopes_annotation = resolved.get(ACCESS_TOKEN_SCOPES_ANNOTATION).to_string();
        let scopes = scopes_annotation
            .split(',')
            .map(|scope| scope.trim())
            .filter(|scope| !scope.is_empty())
            .map(|scope| scope.to_string())
            .collect();
        Ok(Self {
            name: resolved.get(ACCESS_TOKEN_NAME_ANNOTATION).to_string(),
            scopes_annotation,
            scopes,
            secret_data_key: resolved.get(ACCESS_TOKEN_DATA_KEY_ANNOTATION).to_string(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name.as_str(), self.scopes_annotation.as_str()];
        // Only overridden data keys take part, so requests relying on the default keep
        // their fingerprint.
        if self.secret_data_key != DEFAULT_ACCESS_TOKEN_DATA_KEY {
            fields.push(self.secret_data_key.as_str());
        }
        fields
    }
}

/// Request for a confidential Gitea OAuth2 application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2AppRequest {
    pub name: String,
    pub redirect_url: String,
    pub client_id_data_key: String,
    pub client_secret_data_key: String,
}

impl CredentialRequest for OAuth2AppRequest {
    const KIND: RequestKind = RequestKind::OAuth2App;

    fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, RequestError> {
        let resolved = OAUTH2_APP_SCHEMA.resolve(annotations)?;
        Ok(Self {
            name: resolved.get(OAUTH2_APP_NAME_ANNOTATION).to_string(),
            redirect_url: resolved.get(OAUTH2_APP_REDIRECT_URL_ANNOTATION).to_string(),
            client_id_data_key: resolved
                .get(OAUTH2_APP_CLIENT_ID_DATA_KEY_ANNOTATION)
                .to_string(),
            client_secret_data_key: resolved
                .get(OAUTH2_APP_CLIENT_SECRET_DATA_KEY_ANNOTATION)
                .to_string(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.redirect_url.as_str(),
            self.client_id_data_key.as_str(),
            self.client_secret_data_key.as_str(),
        ]
    }
}
