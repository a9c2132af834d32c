//! Deployment image resolution.
//!
//! Callers may send redundant or stale fields across a multi-step flow, so the
//! sources are tried in a fixed order and the most specific one wins.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use stratus_core::ImageSource;
use tracing::{debug, warn};

use crate::config::ProvisionConfig;
use crate::error::ResolveError;

/// Which input produced the image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTier {
    /// Explicit owner and image name.
    ExplicitName,
    /// Parsed from a container package URL.
    PackageUrl,
    /// Derived from owner and repository name.
    LegacyRepository,
    /// Public placeholder used when nothing else resolved.
    Placeholder,
}

impl ImageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageTier::ExplicitName => "explicit-name",
            ImageTier::PackageUrl => "package-url",
            ImageTier::LegacyRepository => "legacy-repository",
            ImageTier::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for ImageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image reference ready to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub reference: String,
    pub tier: ImageTier,
}

impl ResolvedImage {
    pub fn new(reference: impl Into<String>, tier: ImageTier) -> Self {
        Self {
            reference: reference.into(),
            tier,
        }
    }

    pub fn placeholder(config: &ProvisionConfig) -> Self {
        Self::new(config.placeholder_image.clone(), ImageTier::Placeholder)
    }

    /// True for images built from the caller's own application.
    pub fn is_recognized(&self) -> bool {
        self.tier != ImageTier::Placeholder
    }

    /// Ingress port for this image. A policy choice, not read from the image.
    pub fn target_port(&self, config: &ProvisionConfig) -> u16 {
        if self.is_recognized() {
            config.app_target_port
        } else {
            config.fallback_target_port
        }
    }
}

fn package_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^https?://[^/]+/([^/]+)/([^/]+)/pkgs/container/([^/?#]+)").ok())
        .as_ref()
}

fn with_default_tag(reference: String) -> String {
    let last = reference.rsplit('/').next().unwrap_or(&reference);
    if last.contains(':') || last.contains('@') {
        reference
    } else {
        format!("{}:latest", reference)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Pick the image to deploy from `source`.
///
/// Order: explicit owner and image name, then the package URL, then owner and
/// repository name. A malformed package URL is skipped in favor of the next
/// source. Returns [`ResolveError`] when nothing applies; callers degrade to
/// [`ResolvedImage::placeholder`].
pub fn resolve_image(source: &ImageSource, registry: &str) -> Result<ResolvedImage, ResolveError> {
    let owner = non_empty(&source.owner);

    if let (Some(owner), Some(name)) = (owner, non_empty(&source.container_image_name)) {
        let reference = if name.contains('/') {
            with_default_tag(name.to_string())
        } else {
            with_default_tag(format!(
                "{}/{}/{}",
                registry,
                owner.to_lowercase(),
                name.to_lowercase()
            ))
        };
        debug!(%reference, "image resolved from explicit name");
        return Ok(ResolvedImage::new(reference, ImageTier::ExplicitName));
    }

    let mut malformed = None;
    if let Some(url) = non_empty(&source.github_container_url) {
        match package_url_pattern().and_then(|re| re.captures(url)) {
            Some(caps) => {
                let reference = format!(
                    "{}/{}/{}:latest",
                    registry,
                    caps[1].to_lowercase(),
                    caps[3].to_lowercase()
                );
                debug!(%reference, "image resolved from package url");
                return Ok(ResolvedImage::new(reference, ImageTier::PackageUrl));
            }
            None => {
                warn!(%url, "package url does not match the expected pattern");
                malformed = Some(url.to_string());
            }
        }
    }

    if let (Some(owner), Some(repo)) = (owner, non_empty(&source.repo)) {
        let reference = format!(
            "{}/{}/{}:latest",
            registry,
            owner.to_lowercase(),
            repo.to_lowercase()
        );
        debug!(%reference, "image resolved from repository");
        return Ok(ResolvedImage::new(reference, ImageTier::LegacyRepository));
    }

    Err(match malformed {
        Some(url) => ResolveError::MalformedPackageUrl(url),
        None => ResolveError::NoSource,
    })
}
