use crate::{
    gitea::{AccessToken, CredentialService, GiteaError, OAuth2App},
    utils::Page,
};
use async_trait::async_trait;
use rustrial_k8s_credential_janitor_apis::{
    AccessTokenRequest, CredentialRequest, OAuth2AppRequest,
};
use std::sync::Arc;

/// The credential-service side of one request kind: how existing credentials are
/// listed and removed, how a new one is created and which `Secret` data it yields.
#[async_trait]
pub(crate) trait CredentialHandler: Send + Sync + 'static {
    type Request: CredentialRequest + Send + Sync;
    type Credential: Send + Sync;

    fn credential_name(credential: &Self::Credential) -> &str;

    async fn list(&self, page: u32) -> Result<Page<Self::Credential>, GiteaError>;

    async fn delete(&self, credential: &Self::Credential) -> Result<(), GiteaError>;

    async fn create(&self, request: &Self::Request) -> Result<Self::Credential, GiteaError>;

    /// `Secret` data entries (key, value) carrying the credential's secret material.
    fn secret_data(request: &Self::Request, credential: Self::Credential) -> Vec<(String, String)>;
}

/// Provisions Gitea access tokens.
pub(crate) struct AccessTokenHandler {
    gitea: Arc<dyn CredentialService>,
}

impl AccessTokenHandler {
    pub fn new(gitea: Arc<dyn CredentialService>) -> Self {
        Self { gitea }
    }
}

#[async_trait]
impl CredentialHandler for AccessTokenHandler {
    type Request = AccessTokenRequest;
    type Credential = AccessToken;

    fn credential_name(credential: &AccessToken) -> &str {
        &credential.name
    }

    async fn list(&self, page: u32) -> Result<Page<AccessToken>, GiteaError> {
        self.gitea.list_access_tokens(page).await
    }

    async fn delete(&self, credential: &AccessToken) -> Result<(), GiteaError> {
        self.gitea.delete_access_token(credential.id).await
    }

    async fn create(&self, request: &AccessTokenRequest) -> Result<AccessToken, GiteaError> {
        self.gitea
            .create_access_token(&request.name, &request.scopes)
            .await
    }

    fn secret_data(request: &AccessTokenRequest, credential: AccessToken) -> Vec<(String, String)> {
        vec![(request.secret_data_key.clone(), credential.token)]
    }
}

/// Provisions confidential Gitea OAuth2 applications.
pub(crate) struct OAuth2AppHandler {
    gitea: Arc<dyn CredentialService>,
}

impl OAuth2AppHandler {
    pub fn new(gitea: Arc<dyn CredentialService>) -> Self {
        Self { gitea }
    }
}

#[async_trait]
impl CredentialHandler for OAuth2AppHandler {
    type Request = OAuth2AppRequest;
    type Credential = OAuth2App;

    fn credential_name(credential: &OAuth2App) -> &str {
        &credential.name
    }

    async fn list(&self, page: u32) -> Result<Page<OAuth2App>, GiteaError> {
        self.gitea.list_oauth2_apps(page).await
    }

    async fn delete(&self, credential: &OAuth2App) -> Result<(), GiteaError> {
        self.gitea.delete_oauth2_app(credential.id).await
    }

    async fn create(&self, request: &OAuth2AppRequest) -> Result<OAuth2App, GiteaError> {
        self.gitea
            .create_oauth2_app(&request.name, &[request.redirect_url.clone()])
            .await
    }

    fn secret_data(request: &OAuth2AppRequest, credential: OAuth2App) -> Vec<(String, String)> {
        vec![
            (request.client_id_data_key.clone(), credential.client_id),
            (request.client_secret_data_key.clone(), credential.client_secret),
        ]
    }
}
