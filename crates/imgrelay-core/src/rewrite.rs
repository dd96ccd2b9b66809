//! Destination rewriting of parsed image references.
//!
//! Rules are tried in order; the identity rule comes first so rewriting an
//! already rewritten reference against the same destination is a no-op.

use serde::{Deserialize, Serialize};

use crate::reference::{ImageOrigin, ImageReference, LIBRARY_NAMESPACE};

/// The rewrite rule that produced a target reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteRule {
    /// Source already lives under the destination; returned unchanged.
    Identity,
    /// Official default-registry image, placed under `library`.
    OfficialImage,
    /// Default-registry user image, namespace kept.
    UserImage,
    /// Any other registry; the source registry becomes a path segment.
    ThirdParty,
}

impl RewriteRule {
    /// Short explanation of the rule.
    pub fn explanation(&self) -> &'static str {
        match self {
            Self::Identity => "already targets destination",
            Self::OfficialImage => "official image, namespaced under library",
            Self::UserImage => "user image, namespace preserved",
            Self::ThirdParty => "third-party image, full source path preserved",
        }
    }

    /// Operator-facing note naming the parts of `source` the rule keeps.
    pub fn detail(&self, source: &ImageReference) -> String {
        match self {
            Self::Identity => format!("{} is already under the destination registry", source),
            Self::OfficialImage => {
                format!("Docker Hub official image, adds the \"{LIBRARY_NAMESPACE}\" namespace")
            }
            Self::UserImage => format!(
                "Docker Hub user image, keeps the \"{}\" namespace",
                source.namespace()
            ),
            Self::ThirdParty => format!(
                "third-party registry image, keeps the full path \"{}/{}\"",
                source.registry(),
                source.namespace()
            ),
        }
    }
}

/// Outcome of rewriting a reference against a destination registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteResult {
    /// Canonical destination-qualified reference.
    pub target_reference: ImageReference,

    /// Rule that fired.
    pub rule: RewriteRule,
}

impl RewriteResult {
    /// Explanation of the rule that fired.
    pub fn explanation(&self) -> &'static str {
        self.rule.explanation()
    }
}

/// Rewrite `source` so it lives under `destination`.
///
/// Returns `None` when the destination is empty or has no host. Trailing `/` are stripped
/// from the destination; anything after its first segment is treated as a
/// path prefix that is prepended to the target namespace.
pub fn rewrite(source: &ImageReference, destination: &str) -> Option<RewriteResult> {
    let destination = destination.trim().trim_end_matches('/');
    if destination.is_empty() {
        return None;
    }

    let (host, prefix) = match destination.split_once('/') {
        Some((host, prefix)) => (host, Some(prefix)),
        None => (destination, None),
    };
    if host.is_empty() {
        return None;
    }

    if already_targets(source, host, prefix) {
        return Some(RewriteResult {
            target_reference: source.clone(),
            rule: RewriteRule::Identity,
        });
    }

    let under_prefix = |path: String| match prefix {
        Some(prefix) => format!("{prefix}/{path}"),
        None => path,
    };

    let (rule, namespace) = match source.origin() {
        ImageOrigin::Official => (
            RewriteRule::OfficialImage,
            under_prefix(LIBRARY_NAMESPACE.to_string()),
        ),
        ImageOrigin::User => (
            RewriteRule::UserImage,
            under_prefix(source.namespace().to_string()),
        ),
        ImageOrigin::ThirdParty => (
            RewriteRule::ThirdParty,
            under_prefix(format!("{}/{}", source.registry(), source.namespace())),
        ),
    };

    Some(RewriteResult {
        target_reference: ImageReference::from_parts(
            host,
            namespace,
            source.repository(),
            source.tag(),
        ),
        rule,
    })
}

fn already_targets(source: &ImageReference, host: &str, prefix: Option<&str>) -> bool {
    if source.registry() != host {
        return false;
    }
    match prefix {
        None => true,
        Some(prefix) => {
            let namespace = source.namespace();
            namespace == prefix
                || namespace
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
    }
}
