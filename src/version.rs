use node_semver::{Range, Version};

/// How the declared range relates to the published latest version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Satisfied,
    NewerAvailable,
    Unknown(UnknownReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownReason {
    NoDeclaredRange,
    /// git URLs, `file:` paths, `npm:` aliases, `workspace:` ranges.
    UnsupportedSpecifier,
    MalformedRange,
    InvalidLatest,
    /// The declared range only admits versions above the published latest.
    AheadOfLatest,
    NotFound,
    InvalidName(String),
    Unavailable(String),
}

/// Compare a declared range against the latest version using npm semver rules.
pub fn compare(declared: Option<&str>, latest: &str) -> Relation {
    let Some(declared) = declared.map(str::trim) else {
        return Relation::Unknown(UnknownReason::NoDeclaredRange);
    };
    // npm treats an empty specifier as "*"
    let declared = if declared.is_empty() { "*" } else { declared };

    if declared.contains(':') || declared.contains('/') {
        return Relation::Unknown(UnknownReason::UnsupportedSpecifier);
    }

    let Ok(range) = Range::parse(declared) else {
        return Relation::Unknown(UnknownReason::MalformedRange);
    };
    let Ok(latest) = Version::parse(latest.trim()) else {
        return Relation::Unknown(UnknownReason::InvalidLatest);
    };

    if range.satisfies(&latest) {
        return Relation::Satisfied;
    }

    // Unsatisfied: either latest sits below everything the range admits, or above it
    match range.min_version() {
        Some(min) if latest < min => Relation::Unknown(UnknownReason::AheadOfLatest),
        Some(_) => Relation::NewerAvailable,
        None => Relation::Unknown(UnknownReason::MalformedRange),
    }
}
