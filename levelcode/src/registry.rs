//! Agent id grammar and template resolution.
//!
//! Agent ids follow `[publisher/]name[@version]` where `name` (and the
//! publisher) match `^[a-z0-9]+(-[a-z0-9]+)*$` at 1–64 characters and the
//! version is a semver triple. Resolution precedence is local overrides,
//! then bundled templates, then a remote fetch through [`AgentStore`]; the
//! `levelcode` publisher is privileged and remote templates cannot claim it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use crate::client::AgentStore;
use crate::error::{Error, Result};
use crate::template::AgentTemplate;

/// The publisher whose templates ship with the runtime.
pub const PRIVILEGED_PUBLISHER: &str = "levelcode";

/// Maximum length of an agent id name or publisher segment.
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum length of a skill name.
pub const MAX_SKILL_NAME_LENGTH: usize = 64;

/// Maximum length of a skill description.
pub const MAX_SKILL_DESCRIPTION_LENGTH: usize = 1024;

/// Errors from the id grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IdParseError {
    /// The id (or a segment of it) is empty.
    #[error("agent id is empty")]
    Empty,

    /// A name or publisher segment exceeds [`MAX_NAME_LENGTH`].
    #[error("`{0}` exceeds {MAX_NAME_LENGTH} characters")]
    TooLong(String),

    /// A name or publisher segment breaks the grammar.
    #[error("`{0}` is not a valid id (lowercase alphanumerics and single hyphens)")]
    InvalidName(String),

    /// More than one `/` separator.
    #[error("agent id `{0}` has more than one publisher separator")]
    ExtraSlash(String),

    /// The `@version` suffix is not a semver triple.
    #[error("`{0}` is not a valid semver version")]
    InvalidVersion(String),

    /// A skill description exceeds [`MAX_SKILL_DESCRIPTION_LENGTH`].
    #[error("skill description exceeds {MAX_SKILL_DESCRIPTION_LENGTH} characters")]
    DescriptionTooLong,
}

/// A parsed agent id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentId {
    /// Optional publisher prefix.
    pub publisher: Option<String>,
    /// The agent name.
    pub name: String,
    /// Optional pinned version.
    pub version: Option<String>,
}

impl AgentId {
    /// The publisher-qualified name, without the version.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.publisher {
            Some(publisher) => format!("{publisher}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Returns `true` if the id claims the privileged publisher, or no
    /// publisher at all (the bundled namespace).
    #[must_use]
    pub fn in_privileged_namespace(&self) -> bool {
        match &self.publisher {
            Some(publisher) => publisher == PRIVILEGED_PUBLISHER,
            None => true,
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

/// Parse an agent id string strictly.
pub fn parse_agent_id(id: &str) -> std::result::Result<AgentId, IdParseError> {
    if id.is_empty() {
        return Err(IdParseError::Empty);
    }

    let (head, version) = match id.split_once('@') {
        Some((head, version)) => {
            validate_version(version)?;
            (head, Some(version.to_owned()))
        }
        None => (id, None),
    };

    let (publisher, name) = match head.split_once('/') {
        Some((publisher, name)) => {
            if name.contains('/') {
                return Err(IdParseError::ExtraSlash(id.to_owned()));
            }
            validate_name(publisher)?;
            (Some(publisher.to_owned()), name)
        }
        None => (None, head),
    };

    validate_name(name)?;
    Ok(AgentId {
        publisher,
        name: name.to_owned(),
        version,
    })
}

/// Validate a bare name segment against the id grammar.
pub fn validate_name(name: &str) -> std::result::Result<(), IdParseError> {
    if name.is_empty() {
        return Err(IdParseError::Empty);
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(IdParseError::TooLong(name.to_owned()));
    }
    let well_formed = name
        .split('-')
        .all(|run| !run.is_empty() && run.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    if well_formed {
        Ok(())
    } else {
        Err(IdParseError::InvalidName(name.to_owned()))
    }
}

/// Validate a skill name (identical grammar to agent names).
pub fn validate_skill_name(name: &str) -> std::result::Result<(), IdParseError> {
    if name.len() > MAX_SKILL_NAME_LENGTH {
        return Err(IdParseError::TooLong(name.to_owned()));
    }
    validate_name(name)
}

/// Validate a skill description length.
pub fn validate_skill_description(description: &str) -> std::result::Result<(), IdParseError> {
    if description.len() > MAX_SKILL_DESCRIPTION_LENGTH {
        Err(IdParseError::DescriptionTooLong)
    } else {
        Ok(())
    }
}

fn validate_version(version: &str) -> std::result::Result<(), IdParseError> {
    let bad = || IdParseError::InvalidVersion(version.to_owned());
    let (core, _prerelease) = version.split_once('-').unwrap_or((version, ""));
    let mut parts = 0usize;
    for part in core.split('.') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        parts += 1;
    }
    if parts == 3 { Ok(()) } else { Err(bad()) }
}

/// Resolves agent ids to templates.
///
/// Local overrides win over bundled templates, which win over remote
/// fetches. Remote results are cached; cache writes are idempotent.
#[derive(Default)]
pub struct AgentRegistry {
    local: RwLock<HashMap<String, Arc<AgentTemplate>>>,
    bundled: HashMap<String, Arc<AgentTemplate>>,
    remote: Mutex<HashMap<String, Arc<AgentTemplate>>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the given bundled templates.
    ///
    /// Bundled templates live in the privileged namespace and are keyed by
    /// bare name.
    #[must_use]
    pub fn with_bundled(templates: impl IntoIterator<Item = AgentTemplate>) -> Self {
        let bundled = templates
            .into_iter()
            .map(|template| {
                let key = parse_agent_id(&template.id)
                    .map(|id| id.name)
                    .unwrap_or_else(|_| template.id.clone());
                (key, Arc::new(template))
            })
            .collect();
        Self {
            local: RwLock::new(HashMap::new()),
            bundled,
            remote: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) a locally defined template.
    pub fn register_local(&self, template: AgentTemplate) {
        let key = parse_agent_id(&template.id)
            .map(|id| id.qualified_name())
            .unwrap_or_else(|_| template.id.clone());
        self.local
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, Arc::new(template));
    }

    /// Returns `true` if a bundled template exists under the bare name.
    #[must_use]
    pub fn is_bundled(&self, name: &str) -> bool {
        self.bundled.contains_key(name)
    }

    /// Resolve an id to a template: local, then bundled, then remote.
    pub async fn resolve(&self, id: &str, store: &dyn AgentStore) -> Result<Arc<AgentTemplate>> {
        let parsed = parse_agent_id(id)?;
        let key = parsed.qualified_name();

        if let Some(template) = self
            .local
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(template));
        }

        if parsed.in_privileged_namespace()
            && let Some(template) = self.bundled.get(&parsed.name)
        {
            return Ok(Arc::clone(template));
        }

        if let Some(template) = self
            .remote
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(template));
        }

        let fetched = store
            .fetch_agent(id)
            .await
            .map_err(Error::Internal)?
            .ok_or_else(|| Error::UnknownAgent(id.to_owned()))?;

        let fetched_id = parse_agent_id(&fetched.id)?;
        // A remote template cannot claim the bundled namespace.
        if fetched_id.in_privileged_namespace() {
            return Err(Error::UnknownAgent(id.to_owned()));
        }
        if fetched_id.qualified_name() != key {
            return Err(Error::internal(format!(
                "remote template id `{}` does not match requested `{key}`",
                fetched.id
            )));
        }

        let template = Arc::new(fetched);
        self.remote
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| Arc::clone(&template));
        Ok(template)
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bundled: Vec<&str> = self.bundled.keys().map(String::as_str).collect();
        bundled.sort_unstable();
        f.debug_struct("AgentRegistry")
            .field("bundled", &bundled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    mod grammar {
        use super::*;

        #[test]
        fn parses_bare_name() {
            let id = parse_agent_id("base-agent").unwrap();
            assert_eq!(id.name, "base-agent");
            assert!(id.publisher.is_none());
            assert!(id.version.is_none());
        }

        #[test]
        fn parses_publisher_and_version() {
            let id = parse_agent_id("acme/helper-2@1.0.3").unwrap();
            assert_eq!(id.publisher.as_deref(), Some("acme"));
            assert_eq!(id.name, "helper-2");
            assert_eq!(id.version.as_deref(), Some("1.0.3"));
            assert_eq!(id.to_string(), "acme/helper-2@1.0.3");
        }

        #[test]
        fn rejects_uppercase_and_underscores() {
            assert!(parse_agent_id("Base").is_err());
            assert!(parse_agent_id("base_agent").is_err());
        }

        #[test]
        fn rejects_hyphen_misuse() {
            assert!(parse_agent_id("-base").is_err());
            assert!(parse_agent_id("base-").is_err());
            assert!(parse_agent_id("ba--se").is_err());
        }

        #[test]
        fn rejects_empty_and_overlong() {
            assert_eq!(parse_agent_id(""), Err(IdParseError::Empty));
            let long = "a".repeat(MAX_NAME_LENGTH + 1);
            assert!(matches!(
                parse_agent_id(&long),
                Err(IdParseError::TooLong(_))
            ));
            let max = "a".repeat(MAX_NAME_LENGTH);
            assert!(parse_agent_id(&max).is_ok());
        }

        #[test]
        fn rejects_double_slash() {
            assert!(parse_agent_id("a/b/c").is_err());
        }

        #[test]
        fn rejects_bad_versions() {
            assert!(parse_agent_id("agent@1").is_err());
            assert!(parse_agent_id("agent@1.2").is_err());
            assert!(parse_agent_id("agent@1.2.x").is_err());
            assert!(parse_agent_id("agent@1.2.3").is_ok());
            assert!(parse_agent_id("agent@1.2.3-beta.1").is_ok());
        }

        #[test]
        fn privileged_namespace() {
            assert!(parse_agent_id("base").unwrap().in_privileged_namespace());
            assert!(
                parse_agent_id("levelcode/base")
                    .unwrap()
                    .in_privileged_namespace()
            );
            assert!(
                !parse_agent_id("acme/base")
                    .unwrap()
                    .in_privileged_namespace()
            );
        }

        #[test]
        fn skill_grammar_shares_rules() {
            assert!(validate_skill_name("my-skill").is_ok());
            assert!(validate_skill_name("My_Skill").is_err());
            assert!(validate_skill_description(&"d".repeat(1024)).is_ok());
            assert!(validate_skill_description(&"d".repeat(1025)).is_err());
        }
    }

    mod resolution {
        use super::*;

        fn template(id: &str) -> AgentTemplate {
            AgentTemplate::builder(id, "sonnet-4").build().unwrap()
        }

        struct FixedStore(Option<AgentTemplate>);

        #[async_trait]
        impl AgentStore for FixedStore {
            async fn fetch_agent(
                &self,
                _full_id: &str,
            ) -> std::result::Result<Option<AgentTemplate>, String> {
                Ok(self.0.clone())
            }
        }

        #[tokio::test]
        async fn local_overrides_bundled() {
            let registry = AgentRegistry::with_bundled([template("base-agent")]);
            let mut local = template("base-agent");
            local.display_name = "patched".to_owned();
            registry.register_local(local);

            let resolved = registry
                .resolve("base-agent", &FixedStore(None))
                .await
                .unwrap();
            assert_eq!(resolved.display_name, "patched");
        }

        #[tokio::test]
        async fn bundled_resolves_with_and_without_publisher() {
            let registry = AgentRegistry::with_bundled([template("base-agent")]);
            let store = FixedStore(None);
            assert!(registry.resolve("base-agent", &store).await.is_ok());
            assert!(
                registry
                    .resolve("levelcode/base-agent", &store)
                    .await
                    .is_ok()
            );
        }

        #[tokio::test]
        async fn foreign_publisher_does_not_reach_bundled() {
            let registry = AgentRegistry::with_bundled([template("base-agent")]);
            let err = registry
                .resolve("acme/base-agent", &FixedStore(None))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::UnknownAgent(_)));
        }

        #[tokio::test]
        async fn remote_fetch_is_cached() {
            let registry = AgentRegistry::new();
            let resolved = registry
                .resolve("acme/helper", &FixedStore(Some(template("acme/helper"))))
                .await
                .unwrap();
            assert_eq!(resolved.id, "acme/helper");

            // Second resolution hits the cache even with an empty store.
            assert!(registry.resolve("acme/helper", &FixedStore(None)).await.is_ok());
        }

        #[tokio::test]
        async fn remote_cannot_claim_privileged_namespace() {
            let registry = AgentRegistry::new();
            let err = registry
                .resolve(
                    "levelcode/sneaky",
                    &FixedStore(Some(template("levelcode/sneaky"))),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::UnknownAgent(_)));
        }

        #[tokio::test]
        async fn unknown_everywhere_is_an_error() {
            let registry = AgentRegistry::new();
            let err = registry
                .resolve("nowhere", &FixedStore(None))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::UnknownAgent(_)));
        }
    }
}
