//! In-memory stand-ins for Gitea and the Kubernetes API.

use crate::{
    gitea::{AccessToken, CredentialService, GiteaError, OAuth2App},
    secret_modifications::SecretStore,
    utils::{Page, SecretRef},
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::core::ErrorResponse;
use reqwest::StatusCode;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(Default)]
struct GiteaState {
    next_id: i64,
    tokens: Vec<AccessToken>,
    apps: Vec<OAuth2App>,
    calls: Vec<String>,
}

/// Fake Gitea account recording every call, paginating with a configurable page size.
pub(crate) struct FakeGitea {
    state: Mutex<GiteaState>,
    page_size: usize,
    pub fail_create: AtomicBool,
}

impl FakeGitea {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Default::default(),
            page_size,
            fail_create: AtomicBool::new(false),
        }
    }

    /// Seed tokens given as `(name, comma separated scopes)`.
    pub fn with_tokens(self, tokens: &[(&str, &str)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for (name, scopes) in tokens {
                state.next_id += 1;
                let id = state.next_id;
                state.tokens.push(AccessToken {
                    id,
                    name: name.to_string(),
                    token: String::new(),
                    scopes: scopes.split(',').map(|s| s.to_string()).collect(),
                });
            }
        }
        self
    }

    pub fn with_apps(self, apps: &[(&str, &str)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for (name, redirect_uri) in apps {
                state.next_id += 1;
                let id = state.next_id;
                state.apps.push(OAuth2App {
                    id,
                    name: name.to_string(),
                    client_id: format!("client-{}", id),
                    client_secret: String::new(),
                    redirect_uris: vec![redirect_uri.to_string()],
                });
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// `(name, scopes)` of all existing tokens.
    pub fn tokens(&self) -> Vec<(String, Vec<String>)> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .iter()
            .map(|t| (t.name.clone(), t.scopes.clone()))
            .collect()
    }

    /// `(name, redirect_uris)` of all existing applications.
    pub fn apps(&self) -> Vec<(String, Vec<String>)> {
        self.state
            .lock()
            .unwrap()
            .apps
            .iter()
            .map(|a| (a.name.clone(), a.redirect_uris.clone()))
            .collect()
    }

    fn page<T: Clone>(&self, items: &[T], page: u32) -> Page<T> {
        let start = (page as usize - 1) * self.page_size;
        let end = items.len().min(start + self.page_size);
        Page {
            items: items.get(start..end).map(|v| v.to_vec()).unwrap_or_default(),
            next_page: if end < items.len() {
                Some(page + 1)
            } else {
                None
            },
        }
    }

    fn create_failure(&self) -> Result<(), GiteaError> {
        if self.fail_create.load(Ordering::SeqCst) {
            Err(GiteaError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialService for FakeGitea {
    async fn list_access_tokens(&self, page: u32) -> Result<Page<AccessToken>, GiteaError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_access_tokens:{}", page));
        Ok(self.page(&state.tokens, page))
    }

    async fn create_access_token(
        &self,
        name: &str,
        scopes: &[String],
    ) -> Result<AccessToken, GiteaError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_access_token:{}", name));
        self.create_failure()?;
        state.next_id += 1;
        let token = AccessToken {
            id: state.next_id,
            name: name.to_string(),
            token: format!("token-{}", state.next_id),
            scopes: scopes.to_vec(),
        };
        let mut listed = token.clone();
        listed.token = String::new();
        state.tokens.push(listed);
        Ok(token)
    }

    async fn delete_access_token(&self, id: i64) -> Result<(), GiteaError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_access_token:{}", id));
        state.tokens.retain(|t| t.id != id);
        Ok(())
    }

    async fn list_oauth2_apps(&self, page: u32) -> Result<Page<OAuth2App>, GiteaError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_oauth2_apps:{}", page));
        Ok(self.page(&state.apps, page))
    }

    async fn create_oauth2_app(
        &self,
        name: &str,
        redirect_uris: &[String],
    ) -> Result<OAuth2App, GiteaError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_oauth2_app:{}", name));
        self.create_failure()?;
        state.next_id += 1;
        let app = OAuth2App {
            id: state.next_id,
            name: name.to_string(),
            client_id: format!("client-{}", state.next_id),
            client_secret: format!("secret-{}", state.next_id),
            redirect_uris: redirect_uris.to_vec(),
        };
        let mut listed = app.clone();
        listed.client_secret = String::new();
        state.apps.push(listed);
        Ok(app)
    }

    async fn delete_oauth2_app(&self, id: i64) -> Result<(), GiteaError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_oauth2_app:{}", id));
        state.apps.retain(|a| a.id != id);
        Ok(())
    }
}

/// Fake cluster keeping the current version of every `Secret`. Writes carry optimistic
/// concurrency like the API server: the `resourceVersion` must match the stored one and
/// is bumped on every successful write.
#[derive(Default)]
pub(crate) struct FakeSecretStore {
    secrets: Mutex<HashMap<SecretRef, Secret>>,
    writes: Mutex<usize>,
    pub fail_writes: AtomicBool,
    /// Another writer updates the object right before the next write.
    pub concurrent_edit: AtomicBool,
}

impl FakeSecretStore {
    /// Create or overwrite `secret` the way a user would, returning the stored version.
    pub fn apply(&self, secret: &Secret) -> Secret {
        let id = SecretRef::from(secret);
        let mut secrets = self.secrets.lock().unwrap();
        let version = next_version(secrets.get(&id));
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(version);
        secrets.insert(id, stored.clone());
        stored
    }

    pub fn stored(&self, secret: &Secret) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&SecretRef::from(secret))
            .cloned()
    }

    /// Number of write attempts made by the controller.
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

fn next_version(current: Option<&Secret>) -> String {
    let version = current
        .and_then(|s| s.metadata.resource_version.as_deref())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    (version + 1).to_string()
}

fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: reason.to_string(),
        code,
    })
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get(&self, id: &SecretRef) -> Result<Option<Secret>, kube::Error> {
        Ok(self.secrets.lock().unwrap().get(id).cloned())
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        *self.writes.lock().unwrap() += 1;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError"));
        }
        let id = SecretRef::from(secret);
        let mut secrets = self.secrets.lock().unwrap();
        if self.concurrent_edit.swap(false, Ordering::SeqCst) {
            if let Some(current) = secrets.get_mut(&id) {
                let version = next_version(Some(&*current));
                current.metadata.resource_version = Some(version);
            }
        }
        let current_version = match secrets.get(&id) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(api_error(404, "NotFound")),
        };
        if secret.metadata.resource_version != current_version {
            return Err(api_error(409, "Conflict"));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(next_version(Some(secret)));
        secrets.insert(id, stored.clone());
        Ok(stored)
    }
}

/// A request `Secret` in namespace `ci` with the given annotations.
pub(crate) fn request_secret(name: &str, annotations: &[(&str, &str)]) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some("ci".to_string());
    secret.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    );
    secret
}

pub(crate) fn data(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|v| String::from_utf8_lossy(&v.0).to_string())
}
