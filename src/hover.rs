use crate::config::ServerConfig;
use crate::document::{Document, DocumentStore};
use crate::locate::{locate, DependencyKind};
use crate::registry::{NpmRegistry, RegistryError, VersionCache};
use crate::version::{compare, Relation, UnknownReason};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_lsp::lsp_types::{Hover, HoverContents, HoverParams, MarkupContent, MarkupKind, Url};
use tracing::debug;

/// Everything shown for one hovered dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverResult {
    pub package: String,
    pub kind: DependencyKind,
    pub declared: Option<String>,
    pub latest: Option<String>,
    pub relation: Relation,
    /// Set when `latest` came from the cache because the refresh failed.
    pub refresh_error: Option<RegistryError>,
    /// Byte range of the hovered key.
    pub range: Range<usize>,
}

impl HoverResult {
    pub fn to_markdown(&self) -> String {
        let mut parts = vec![format!(
            "**{}** ({})",
            escape_markdown(&self.package),
            self.kind
        )];

        if let Some(declared) = &self.declared {
            parts.push(format!("**Declared:** `{declared}`"));
        }

        if let Some(latest) = &self.latest {
            let mut line = format!("**Latest:** `{latest}`");
            if let Some(err) = &self.refresh_error {
                line.push_str(&format!(" (cached, refresh failed: {err})"));
            }
            parts.push(line);
        }

        parts.push(self.note());
        parts.join("\n\n")
    }

    fn note(&self) -> String {
        match &self.relation {
            Relation::Satisfied => "The declared range includes the latest version.".into(),
            Relation::NewerAvailable => {
                "A newer version is available outside the declared range.".into()
            }
            Relation::Unknown(reason) => match reason {
                UnknownReason::NoDeclaredRange => "No version range is declared.".into(),
                UnknownReason::UnsupportedSpecifier => {
                    "The declared specifier is not a semver range.".into()
                }
                UnknownReason::MalformedRange => "The declared range could not be parsed.".into(),
                UnknownReason::InvalidLatest => {
                    "The registry reported a version that could not be parsed.".into()
                }
                UnknownReason::AheadOfLatest => {
                    "The declared range is ahead of the latest published version.".into()
                }
                UnknownReason::NotFound => {
                    format!("Package `{}` was not found in the registry.", self.package)
                }
                UnknownReason::InvalidName(reason) => format!("Not a valid package name: {reason}."),
                UnknownReason::Unavailable(message) => {
                    format!("Latest version unavailable: {message}")
                }
            },
        }
    }
}

/// Maps a cursor offset in a `package.json` to version information.
pub struct HoverResolver {
    cache: VersionCache,
    accepting: AtomicBool,
}

impl HoverResolver {
    pub fn new(config: &ServerConfig) -> Result<Self, RegistryError> {
        let registry = NpmRegistry::new(config)?;
        Ok(Self::with_cache(VersionCache::new(Arc::new(registry), config)))
    }

    pub fn with_cache(cache: VersionCache) -> Self {
        Self {
            cache,
            accepting: AtomicBool::new(true),
        }
    }

    /// `None` means there is nothing to show at `offset`. Registry failures still
    /// produce a result so the editor can explain what went wrong.
    pub async fn resolve_hover(&self, document: &Document, offset: usize) -> Option<HoverResult> {
        if !self.accepting.load(Ordering::Acquire) {
            debug!("Hover rejected after shutdown");
            return None;
        }

        let key = locate(document.spans(), offset)?;
        debug!(
            "Hover on {} in {} (declared {:?})",
            key.name, key.kind, key.declared
        );

        let (latest, relation, refresh_error) = match self.cache.resolve(&key.name).await {
            Ok(resolved) => (
                Some(resolved.version.to_string()),
                compare(key.declared.as_deref(), &resolved.version),
                resolved.refresh_error,
            ),
            Err(err) => {
                debug!("Version lookup for {} failed: {err}", key.name);
                (None, Relation::Unknown(unknown_reason(&err)), None)
            }
        };

        Some(HoverResult {
            package: key.name,
            kind: key.kind,
            declared: key.declared,
            latest,
            relation,
            refresh_error,
            range: key.range,
        })
    }

    /// Stop answering new hovers. Lookups already in flight run to completion.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}

/// Backslash-escape characters that would start inline Markdown formatting.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '~') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn unknown_reason(err: &RegistryError) -> UnknownReason {
    match err {
        RegistryError::NotFound(_) => UnknownReason::NotFound,
        RegistryError::InvalidName { reason, .. } => UnknownReason::InvalidName((*reason).to_owned()),
        other => UnknownReason::Unavailable(other.to_string()),
    }
}

pub fn is_package_manifest(uri: &Url) -> bool {
    uri.path_segments()
        .and_then(|segments| segments.last())
        .is_some_and(|name| name == "package.json")
}

pub async fn handle_hover(
    documents: &Arc<DocumentStore>,
    resolver: &HoverResolver,
    params: HoverParams,
) -> Option<Hover> {
    let uri = &params.text_document_position_params.text_document.uri;
    let pos = params.text_document_position_params.position;

    if !is_package_manifest(uri) {
        return None;
    }

    let document = documents.snapshot(uri)?;
    let offset = document.offset_at(pos)?;
    let result = resolver.resolve_hover(&document, offset).await?;
    debug!("Hover result: {result:?}");

    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: result.to_markdown(),
        }),
        range: Some(document.range_of(&result.range)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::cache::testing::{FakeRegistry, ManualClock};
    use std::time::Duration;

    const MANIFEST: &str = r#"{
  "name": "demo",
  "version": "1.0.0",
  "scripts": { "build": "tsc" },
  "dependencies": {
    "left-pad": "^1.0.0"
  },
  "devDependencies": {
    "typescript": "~5.4.0"
  }
}"#;

    fn resolver_with(registry: &Arc<FakeRegistry>) -> HoverResolver {
        let cache = VersionCache::with_clock(
            registry.clone(),
            Arc::new(ManualClock::new()),
            &ServerConfig::default(),
        );
        HoverResolver::with_cache(cache)
    }

    fn offset_in(text: &str, needle: &str) -> usize {
        text.find(needle).expect("needle present") + 2
    }

    #[tokio::test]
    async fn test_hover_satisfied_range() {
        let registry = Arc::new(FakeRegistry::default());
        registry.set("left-pad", Ok("1.0.1"));
        let resolver = resolver_with(&registry);
        let doc = Document::new(MANIFEST);

        let result = resolver
            .resolve_hover(&doc, offset_in(MANIFEST, "\"left-pad\""))
            .await
            .unwrap();

        assert_eq!(result.package, "left-pad");
        assert_eq!(result.kind, DependencyKind::Dependencies);
        assert_eq!(result.declared.as_deref(), Some("^1.0.0"));
        assert_eq!(result.latest.as_deref(), Some("1.0.1"));
        assert_eq!(result.relation, Relation::Satisfied);
        assert_eq!(result.refresh_error, None);
    }

    #[tokio::test]
    async fn test_hover_newer_available() {
        let registry = Arc::new(FakeRegistry::default());
        registry.set("left-pad", Ok("2.0.0"));
        let resolver = resolver_with(&registry);
        let doc = Document::new(MANIFEST);

        let result = resolver
            .resolve_hover(&doc, offset_in(MANIFEST, "\"left-pad\""))
            .await
            .unwrap();

        assert_eq!(result.relation, Relation::NewerAvailable);
        assert!(result.to_markdown().contains("`2.0.0`"));
    }

    #[tokio::test]
    async fn test_hover_not_found_still_renders() {
        let registry = Arc::new(FakeRegistry::default());
        let resolver = resolver_with(&registry);
        let doc = Document::new(MANIFEST);

        let result = resolver
            .resolve_hover(&doc, offset_in(MANIFEST, "\"typescript\""))
            .await
            .unwrap();

        assert_eq!(result.relation, Relation::Unknown(UnknownReason::NotFound));
        assert_eq!(result.latest, None);
        let markdown = result.to_markdown();
        assert!(markdown.contains("not found"), "{markdown}");
        assert!(markdown.contains("`~5.4.0`"), "{markdown}");
        assert!(!resolver.cache.contains("typescript"));
    }

    #[tokio::test]
    async fn test_only_dependency_keys_produce_hovers() {
        let registry = Arc::new(FakeRegistry::default());
        registry.set("left-pad", Ok("1.0.1"));
        registry.set("typescript", Ok("5.4.5"));
        let resolver = resolver_with(&registry);
        let doc = Document::new(MANIFEST);

        // From the opening quote of each dependency key up to its value
        let hoverable: Vec<Range<usize>> = ["\"left-pad\"", "\"typescript\""]
            .iter()
            .map(|key| {
                let start = MANIFEST.find(key).unwrap();
                let value = start + MANIFEST[start..].find(": \"").unwrap() + 2;
                start..value
            })
            .collect();

        for offset in 0..=MANIFEST.len() {
            let expected = hoverable.iter().any(|r| r.contains(&offset));
            let result = resolver.resolve_hover(&doc, offset).await;
            assert_eq!(
                result.is_some(),
                expected,
                "offset {offset} ({:?})",
                &MANIFEST[offset.saturating_sub(3)..(offset + 3).min(MANIFEST.len())]
            );
        }
    }

    #[tokio::test]
    async fn test_repeat_hover_within_ttl_uses_cache() {
        let registry = Arc::new(FakeRegistry::default());
        registry.set("left-pad", Ok("1.0.1"));
        let resolver = resolver_with(&registry);
        let doc = Document::new(MANIFEST);
        let offset = offset_in(MANIFEST, "\"left-pad\"");

        let first = resolver.resolve_hover(&doc, offset).await;
        let second = resolver.resolve_hover(&doc, offset).await;

        assert_eq!(first, second);
        assert_eq!(registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_hovers_share_one_fetch() {
        let registry = Arc::new(FakeRegistry::with_delay(Duration::from_millis(40)));
        registry.set("left-pad", Ok("1.0.1"));
        let resolver = resolver_with(&registry);
        let doc = Document::new(MANIFEST);
        let offset = offset_in(MANIFEST, "\"left-pad\"");

        let hovers = (0..8).map(|_| resolver.resolve_hover(&doc, offset));
        let results = futures::future::join_all(hovers).await;

        assert_eq!(registry.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().latest.as_deref(), Some("1.0.1"));
        }
    }

    #[tokio::test]
    async fn test_malformed_document_before_break() {
        let registry = Arc::new(FakeRegistry::default());
        registry.set("left-pad", Ok("1.0.1"));
        let resolver = resolver_with(&registry);
        let text = "{\n  \"dependencies\": {\n    \"left-pad\": \"^1.0.0\",\n    \"re";
        let doc = Document::new(text);

        let result = resolver
            .resolve_hover(&doc, offset_in(text, "\"left-pad\""))
            .await
            .unwrap();

        assert_eq!(result.declared.as_deref(), Some("^1.0.0"));
        assert_eq!(result.relation, Relation::Satisfied);
    }

    #[tokio::test]
    async fn test_invalid_name_is_explained() {
        let registry = Arc::new(FakeRegistry::default());
        registry.set(
            "bad name",
            Err(RegistryError::InvalidName {
                name: "bad name".into(),
                reason: "name contains whitespace or control characters",
            }),
        );
        let resolver = resolver_with(&registry);
        let text = r#"{"dependencies": {"bad name": "1.0.0"}}"#;
        let doc = Document::new(text);

        let result = resolver
            .resolve_hover(&doc, offset_in(text, "\"bad name\""))
            .await
            .unwrap();

        assert!(matches!(
            result.relation,
            Relation::Unknown(UnknownReason::InvalidName(_))
        ));
        assert!(result.to_markdown().contains("Not a valid package name"));
    }

    #[tokio::test]
    async fn test_shutdown_finishes_in_flight_hover() {
        let registry = Arc::new(FakeRegistry::with_delay(Duration::from_millis(30)));
        registry.set("left-pad", Ok("1.0.1"));
        let resolver = Arc::new(resolver_with(&registry));
        let doc = Arc::new(Document::new(MANIFEST));
        let offset = offset_in(MANIFEST, "\"left-pad\"");

        let in_flight = {
            let resolver = resolver.clone();
            let doc = doc.clone();
            tokio::spawn(async move { resolver.resolve_hover(&doc, offset).await })
        };
        tokio::task::yield_now().await;
        resolver.shutdown();

        let finished = in_flight.await.unwrap();
        assert_eq!(finished.unwrap().latest.as_deref(), Some("1.0.1"));
        assert!(resolver.resolve_hover(&doc, offset).await.is_none());
    }

    #[test]
    fn test_markdown_stale_note() {
        let result = HoverResult {
            package: "react".into(),
            kind: DependencyKind::PeerDependencies,
            declared: Some(">=17".into()),
            latest: Some("18.3.1".into()),
            relation: Relation::Satisfied,
            refresh_error: Some(RegistryError::Transient {
                package: "react".into(),
                message: "connection reset".into(),
            }),
            range: 0..7,
        };
        assert_eq!(
            result.to_markdown(),
            "**react** (peerDependencies)\n\n**Declared:** `>=17`\n\n**Latest:** `18.3.1` (cached, refresh failed: registry request for react failed: connection reset)\n\nThe declared range includes the latest version."
        );
    }

    #[tokio::test]
    async fn test_stale_note_names_definitive_failure() {
        let registry = Arc::new(FakeRegistry::default());
        registry.set("left-pad", Ok("1.0.1"));
        let clock = Arc::new(ManualClock::new());
        let config = ServerConfig::default();
        let resolver = HoverResolver::with_cache(VersionCache::with_clock(
            registry.clone(),
            clock.clone(),
            &config,
        ));
        let doc = Document::new(MANIFEST);
        let offset = offset_in(MANIFEST, "\"left-pad\"");

        resolver.resolve_hover(&doc, offset).await.unwrap();
        registry.set("left-pad", Err(RegistryError::NotFound("left-pad".into())));
        clock.advance(config.cache_ttl());

        let result = resolver.resolve_hover(&doc, offset).await.unwrap();
        assert_eq!(result.latest.as_deref(), Some("1.0.1"));
        assert_eq!(
            result.refresh_error,
            Some(RegistryError::NotFound("left-pad".into()))
        );
        let markdown = result.to_markdown();
        assert!(markdown.contains("refresh failed: package left-pad not found"), "{markdown}");
        assert!(!markdown.contains("unreachable"), "{markdown}");
    }

    #[test]
    fn test_package_name_is_escaped() {
        let result = HoverResult {
            package: "__x__".into(),
            kind: DependencyKind::Dependencies,
            declared: None,
            latest: None,
            relation: Relation::Unknown(UnknownReason::NotFound),
            refresh_error: None,
            range: 0..7,
        };
        let markdown = result.to_markdown();
        assert!(markdown.starts_with(r"**\_\_x\_\_** (dependencies)"), "{markdown}");
        assert_eq!(escape_markdown("@scope/left-pad"), "@scope/left-pad");
        assert_eq!(escape_markdown("a*b`c"), r"a\*b\`c");
    }

    #[test]
    fn test_is_package_manifest() {
        let yes = Url::parse("file:///home/me/app/package.json").unwrap();
        let lockfile = Url::parse("file:///home/me/app/package-lock.json").unwrap();
        let other = Url::parse("file:///home/me/app/tsconfig.json").unwrap();
        assert!(is_package_manifest(&yes));
        assert!(!is_package_manifest(&lockfile));
        assert!(!is_package_manifest(&other));
    }
}
