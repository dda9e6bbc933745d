use async_trait::async_trait;
use log::debug;
use reqwest::{
    header::{HeaderMap, LINK},
    Response, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::utils::Page;

/// Gitea's default maximum page size.
const PAGE_SIZE: u32 = 50;

#[derive(thiserror::Error, Debug)]
pub(crate) enum GiteaError {
    #[error("invalid Gitea URL {0}")]
    InvalidUrl(String),
    #[error("Gitea request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gitea API responded with {status}: {message}")]
    Api { status: StatusCode, message: String },
}

/// Access token of the Gitea administrator account.
#[derive(Clone, Deserialize)]
pub(crate) struct AccessToken {
    pub id: i64,
    pub name: String,
    /// The token value, only returned once on creation.
    #[serde(rename = "sha1", default)]
    pub token: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// OAuth2 application of the Gitea administrator account.
#[derive(Clone, Deserialize)]
pub(crate) struct OAuth2App {
    pub id: i64,
    pub name: String,
    pub client_id: String,
    /// Only returned on creation.
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// The account-management operations the reconcilers depend on.
#[async_trait]
pub(crate) trait CredentialService: Send + Sync {
    async fn list_access_tokens(&self, page: u32) -> Result<Page<AccessToken>, GiteaError>;
    async fn create_access_token(
        &self,
        name: &str,
        scopes: &[String],
    ) -> Result<AccessToken, GiteaError>;
    async fn delete_access_token(&self, id: i64) -> Result<(), GiteaError>;
    async fn list_oauth2_apps(&self, page: u32) -> Result<Page<OAuth2App>, GiteaError>;
    async fn create_oauth2_app(
        &self,
        name: &str,
        redirect_uris: &[String],
    ) -> Result<OAuth2App, GiteaError>;
    async fn delete_oauth2_app(&self, id: i64) -> Result<(), GiteaError>;
}

/// Gitea REST API client authenticating as the administrator with basic auth.
pub(crate) struct GiteaClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

impl GiteaClient {
    pub fn new(host: &str, username: &str, password: &str) -> Result<Self, GiteaError> {
        let base_url =
            Url::parse(host).map_err(|e| GiteaError::InvalidUrl(format!("{}: {}", host, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GiteaError::InvalidUrl(host.to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self {
            http,
            base_url,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }
        url
    }

    fn tokens_endpoint(&self) -> Url {
        self.endpoint(&["users", self.username.as_str(), "tokens"])
    }

    fn oauth2_endpoint(&self) -> Url {
        self.endpoint(&["user", "applications", "oauth2"])
    }

    async fn checked(response: Response) -> Result<Response, GiteaError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(GiteaError::Api { status, message })
        }
    }

    async fn list<T: DeserializeOwned>(&self, url: Url, page: u32) -> Result<Page<T>, GiteaError> {
        debug!("GET {} page {}", url, page);
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("page", page), ("limit", PAGE_SIZE)])
            .send()
            .await?;
        let response = Self::checked(response).await?;
        let next_page = next_page(response.headers());
        let items = response.json::<Vec<T>>().await?;
        Ok(Page { items, next_page })
    }

    async fn create<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<T, GiteaError> {
        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json::<T>().await?)
    }

    async fn delete(&self, url: Url) -> Result<(), GiteaError> {
        debug!("DELETE {}", url);
        let response = self
            .http
            .delete(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialService for GiteaClient {
    async fn list_access_tokens(&self, page: u32) -> Result<Page<AccessToken>, GiteaError> {
        self.list(self.tokens_endpoint(), page).await
    }

    async fn create_access_token(
        &self,
        name: &str,
        scopes: &[String],
    ) -> Result<AccessToken, GiteaError> {
        let body = json!({ "name": name, "scopes": scopes });
        self.create(self.tokens_endpoint(), &body).await
    }

    async fn delete_access_token(&self, id: i64) -> Result<(), GiteaError> {
        let id = id.to_string();
        let url = self.endpoint(&["users", self.username.as_str(), "tokens", id.as_str()]);
        self.delete(url).await
    }

    async fn list_oauth2_apps(&self, page: u32) -> Result<Page<OAuth2App>, GiteaError> {
        self.list(self.oauth2_endpoint(), page).await
    }

    async fn create_oauth2_app(
        &self,
        name: &str,
        redirect_uris: &[String],
    ) -> Result<OAuth2App, GiteaError> {
        let body = json!({
            "name": name,
            "redirect_uris": redirect_uris,
            "confidential_client": true,
        });
        self.create(self.oauth2_endpoint(), &body).await
    }

    async fn delete_oauth2_app(&self, id: i64) -> Result<(), GiteaError> {
        let id = id.to_string();
        let url = self.endpoint(&["user", "applications", "oauth2", id.as_str()]);
        self.delete(url).await
    }
}

/// Extract the `page` parameter of the `rel="next"` entry of a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<u32> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|entry| {
            let (target, params) = entry.split_once(';')?;
            if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
                return None;
            }
            let target = target.trim().trim_start_matches('<').trim_end_matches('>');
            let url = Url::parse(target).ok()?;
            url.query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse().ok())
        })
}
