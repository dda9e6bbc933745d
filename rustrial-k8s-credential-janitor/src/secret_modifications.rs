use crate::{MANAGER, errors::ControllerError, utils::SecretRef};
use async_trait::async_trait;
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{
    Api, Client, ResourceExt,
    api::PostParams,
};
use rustrial_k8s_credential_janitor_apis::PROCESSED_HASH_ANNOTATION;

/// Read and write access to request `Secret`s.
#[async_trait]
pub(crate) trait SecretStore: Send + Sync {
    /// The current version of the object, `None` if it no longer exists.
    async fn get(&self, id: &SecretRef) -> Result<Option<Secret>, kube::Error>;

    /// Replace the object, failing with a conflict if it changed since it was read.
    async fn replace(&self, secret: &Secret) -> Result<Secret, kube::Error>;
}

#[async_trait]
impl SecretStore for Client {
    async fn get(&self, id: &SecretRef) -> Result<Option<Secret>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.clone(), id.namespace.as_str());
        api.get_opt(id.name.as_str()).await
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        let namespace = secret.namespace().unwrap_or_else(|| "".to_string());
        let api: Api<Secret> = Api::namespaced(self.clone(), namespace.as_str());
        let mut pp = PostParams::default();
        pp.field_manager = Some(MANAGER.to_string());
        api.replace(secret.name_any().as_str(), &pp, secret).await
    }
}

/// Helper construct to collect the modifications of a request [`Secret`] and write them
/// back in one update.
///
/// The delivered object is never touched, so a failed write leaves the locally mirrored
/// state (including its processed hash) exactly as observed.
pub(crate) struct SecretModifications {
    original: Secret,
    modified: Secret,
}

impl std::ops::Deref for SecretModifications {
    type Target = Secret;

    fn deref(&self) -> &Self::Target {
        &self.modified
    }
}

impl SecretModifications {
    pub(crate) fn new(original: Secret) -> Self {
        let modified = original.clone();
        Self { original, modified }
    }

    /// The fingerprint of the last successful provisioning as observed.
    pub fn processed_hash(&self) -> Option<&str> {
        self.original
            .annotations()
            .get(PROCESSED_HASH_ANNOTATION)
            .map(|v| v.as_str())
    }

    pub fn insert_data(&mut self, key: String, value: String) {
        self.modified
            .data
            .get_or_insert_with(Default::default)
            .insert(key, ByteString(value.into_bytes()));
    }

    pub fn set_processed_hash(&mut self, fingerprint: String) {
        self.modified
            .annotations_mut()
            .insert(PROCESSED_HASH_ANNOTATION.to_string(), fingerprint);
    }

    /// Write the modified object back in one update.
    pub(crate) async fn replace(&self, store: &dyn SecretStore) -> Result<(), ControllerError> {
        store.replace(&self.modified).await?;
        Ok(())
    }
}
