use std::{collections::BTreeMap, fmt, str::FromStr};

mod fingerprint;
mod requests;

pub use fingerprint::{fingerprint, FINGERPRINT_LENGTH, FINGERPRINT_SEPARATOR};
pub use requests::{AccessTokenRequest, CredentialRequest, OAuth2AppRequest};

pub const API_GROUP: &'static str = "git.yona.works";

/// Label marking a `Secret` as credential request, its value selects the [`RequestKind`].
pub const REQUEST_LABEL: &'static str = "git.yona.works/request";

/// Fingerprint of the last successfully provisioned request parameters. Remove it from a
/// request `Secret` to rotate the credential.
pub const PROCESSED_HASH_ANNOTATION: &'static str = "git.yona.works/processed-hash";

pub const ACCESS_TOKEN_NAME_ANNOTATION: &'static str = "git.yona.works/request-access-token-name";
pub const ACCESS_TOKEN_SCOPES_ANNOTATION: &'static str =
    "git.yona.works/request-access-token-scopes";
pub const ACCESS_TOKEN_DATA_KEY_ANNOTATION: &'static str =
    "git.yona.works/request-access-token-secret-data-key";
pub const DEFAULT_ACCESS_TOKEN_DATA_KEY: &'static str = "token";

pub const OAUTH2_APP_NAME_ANNOTATION: &'static str = "git.yona.works/request-oauth2-app-name";
pub const OAUTH2_APP_REDIRECT_URL_ANNOTATION: &'static str =
    "git.yona.works/request-oauth2-app-redirect-url";
pub const OAUTH2_APP_CLIENT_ID_DATA_KEY_ANNOTATION: &'static str =
    "git.yona.works/request-oauth2-app-client-id-data-key";
pub const OAUTH2_APP_CLIENT_SECRET_DATA_KEY_ANNOTATION: &'static str =
    "git.yona.works/request-oauth2-app-client-secret-data-key";
pub const DEFAULT_OAUTH2_APP_CLIENT_ID_DATA_KEY: &'static str = "clientId";
pub const DEFAULT_OAUTH2_APP_CLIENT_SECRET_DATA_KEY: &'static str = "clientSecret";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// A required request annotation is absent or blank.
    #[error("missing required annotation '{0}'")]
    MissingAnnotation(&'static str),
    #[error("unknown request kind '{0}'")]
    UnknownKind(String),
}

/// The kinds of credentials which can be requested by labeling a `Secret`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    /// Personal access token of the Gitea administrator account.
    AccessToken,
    /// Confidential OAuth2 application owned by the Gitea administrator account.
    OAuth2App,
}

impl RequestKind {
    pub const ALL: [RequestKind; 2] = [RequestKind::AccessToken, RequestKind::OAuth2App];

    /// Value of the [`REQUEST_LABEL`] selecting this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::AccessToken => "access-token",
            RequestKind::OAuth2App => "oauth2-app",
        }
    }

    /// Label selector narrowing a watch to the request `Secret`s of this kind.
    pub fn label_selector(&self) -> String {
        format!("{}={}", REQUEST_LABEL, self.as_str())
    }

    pub fn schema(&self) -> &'static RequestSchema {
        match self {
            RequestKind::AccessToken => &ACCESS_TOKEN_SCHEMA,
            RequestKind::OAuth2App => &OAUTH2_APP_SCHEMA,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s.trim())
            .copied()
            .ok_or_else(|| RequestError::UnknownKind(s.to_string()))
    }
}

/// Annotation contract of a [`RequestKind`].
#[derive(Debug, PartialEq, Eq)]
pub struct RequestSchema {
    pub kind: RequestKind,
    /// Annotations which must be present and non-blank.
    pub required: &'static [&'static str],
    /// Optional annotations with the default used if they are absent or blank.
    pub optional: &'static [(&'static str, &'static str)],
}

pub static ACCESS_TOKEN_SCHEMA: RequestSchema = RequestSchema {
    kind: RequestKind::AccessToken,
    required: &[ACCESS_TOKEN_NAME_ANNOTATION, ACCESS_TOKEN_SCOPES_ANNOTATION],
    optional: &[(ACCESS_TOKEN_DATA_KEY_ANNOTATION, DEFAULT_ACCESS_TOKEN_DATA_KEY)],
};

pub static OAUTH2_APP_SCHEMA: RequestSchema = RequestSchema {
    kind: RequestKind::OAuth2App,
    required: &[OAUTH2_APP_NAME_ANNOTATION, OAUTH2_APP_REDIRECT_URL_ANNOTATION],
    optional: &[
        (
            OAUTH2_APP_CLIENT_ID_DATA_KEY_ANNOTATION,
            DEFAULT_OAUTH2_APP_CLIENT_ID_DATA_KEY,
        ),
        (
            OAUTH2_APP_CLIENT_SECRET_DATA_KEY_ANNOTATION,
            DEFAULT_OAUTH2_APP_CLIENT_SECRET_DATA_KEY,
        ),
    ],
};

impl RequestSchema {
    /// Validate `annotations` against this schema, filling in defaults for absent
    /// optional annotations.
    pub fn resolve(
        &self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<ResolvedAnnotations, RequestError> {
        let mut values: BTreeMap<&'static str, String> = Default::default();
        for key in self.required {
            match non_blank(annotations, key) {
                Some(value) => values.insert(*key, value.to_string()),
                None => return Err(RequestError::MissingAnnotation(*key)),
            };
        }
        for (key, default) in self.optional {
            let value = non_blank(annotations, key).unwrap_or(*default);
            values.insert(*key, value.to_string());
        }
        Ok(ResolvedAnnotations { values })
    }
}

fn non_blank<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Request annotations validated by a [`RequestSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAnnotations {
    values: BTreeMap<&'static str, String>,
}

impl ResolvedAnnotations {
    /// Resolved value of `key`, empty if `key` is not part of the schema.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(|v| v.as_str()).unwrap_or("")
    }
}
