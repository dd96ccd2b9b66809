//! Image reference parsing and validation.
//!
//! A reference is always expanded to its four components. Omitted parts
//! fall back to Docker Hub defaults: `nginx` becomes
//! `docker.io/library/nginx:latest`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Registry host assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Namespace reserved for official images on the default registry.
pub const LIBRARY_NAMESPACE: &str = "library";

/// Tag assumed when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// A fully expanded container image reference.
///
/// Values are only produced by [`ImageReference::parse`] (or by the
/// rewriter from already-parsed parts), so `repository` is never empty and
/// `tag` never contains a `/`. Serializes as its full string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference {
    registry: String,
    namespace: String,
    repository: String,
    tag: String,
}

/// Where an image comes from, as far as the rewriter is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    /// Official image on the default registry (`library` namespace).
    Official,
    /// User-namespaced image on the default registry.
    User,
    /// Any other registry.
    ThirdParty,
}

impl ImageReference {
    /// Parse a raw reference string.
    ///
    /// The tag is split off at the last `:` unless the text after it
    /// contains a `/`, which keeps `host:5000/app` from being read as a tag.
    /// A two-segment name whose first segment contains `.` or `:` is taken
    /// as `registry/repository`. That heuristic misreads dotted namespaces
    /// such as `my.app/tool`, which parses with `my.app` as the registry.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let (image, tag) = match trimmed.rsplit_once(':') {
            Some((image, tag)) if !tag.contains('/') => (image, tag),
            _ => (trimmed, DEFAULT_TAG),
        };
        if tag.is_empty() {
            return Err(ParseError::InvalidFormat(format!(
                "empty tag in '{trimmed}'"
            )));
        }

        let parts: Vec<&str> = image.split('/').collect();
        let (registry, namespace, repository) = match parts.as_slice() {
            [repository] => (DEFAULT_REGISTRY, LIBRARY_NAMESPACE.to_string(), *repository),
            [host, repository] if is_registry_host(host) => {
                (*host, LIBRARY_NAMESPACE.to_string(), *repository)
            }
            [namespace, repository] => (DEFAULT_REGISTRY, (*namespace).to_string(), *repository),
            [registry, namespace @ .., repository] => (*registry, namespace.join("/"), *repository),
            [] => {
                return Err(ParseError::InvalidFormat(format!(
                    "no repository in '{trimmed}'"
                )))
            }
        };

        if repository.is_empty() {
            return Err(ParseError::InvalidFormat(format!(
                "repository name is empty in '{trimmed}'"
            )));
        }

        Ok(Self {
            registry: registry.to_string(),
            namespace,
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Validate operator input, then parse it.
    ///
    /// Rejects any character outside `[A-Za-z0-9._-/:]` before handing the
    /// string to [`ImageReference::parse`].
    pub fn validate(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }
        if let Some(c) = trimmed.chars().find(|c| !is_reference_char(*c)) {
            return Err(ParseError::IllegalCharacter(c));
        }
        Self::parse(trimmed)
    }

    /// Build a reference from parts that are already known to be valid.
    pub(crate) fn from_parts(
        registry: impl Into<String>,
        namespace: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            namespace: namespace.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Registry host, e.g. `docker.io` or `localhost:5000`.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Namespace path; may contain `/` for multi-level namespaces.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Repository name (last path segment).
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Classify the reference by registry and namespace.
    pub fn origin(&self) -> ImageOrigin {
        if self.registry != DEFAULT_REGISTRY {
            ImageOrigin::ThirdParty
        } else if self.namespace == LIBRARY_NAMESPACE {
            ImageOrigin::Official
        } else {
            ImageOrigin::User
        }
    }

    /// Shortest unambiguous form, the way operators usually type it.
    pub fn short_name(&self) -> String {
        match self.origin() {
            ImageOrigin::Official => format!("{}:{}", self.repository, self.tag),
            ImageOrigin::User => format!("{}/{}:{}", self.namespace, self.repository, self.tag),
            ImageOrigin::ThirdParty => self.to_string(),
        }
    }

    /// One-line description for display next to an input field.
    pub fn describe(&self) -> String {
        let origin = match self.origin() {
            ImageOrigin::Official => "Docker Hub official image".to_string(),
            ImageOrigin::User => format!("Docker Hub user image ({})", self.namespace),
            ImageOrigin::ThirdParty => format!("third-party registry ({})", self.registry),
        };
        format!("{} - {}:{}", origin, self.repository, self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.registry, self.namespace, self.repository, self.tag
        )
    }
}

impl FromStr for ImageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageReference> for String {
    fn from(reference: ImageReference) -> Self {
        reference.to_string()
    }
}

/// Extract the registry host from a (possibly short) image name.
///
/// The first path segment counts as a host only if it contains `.` or `:`;
/// everything else lives on the default registry.
pub fn registry_host_of(image: &str) -> &str {
    match image.trim().split_once('/') {
        Some((first, _)) if is_registry_host(first) => first,
        _ => DEFAULT_REGISTRY,
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':')
}

fn is_reference_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':')
}
