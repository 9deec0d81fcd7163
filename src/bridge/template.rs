//! Template Resolution
//!
//! Turns a narrative string carrying `{s{pseudonym}}` / `{t{pseudonym}}`
//! markers into the human-readable final answer. The algorithm is an
//! explicit two-stage pipeline: collect resolves every marker's lookup in
//! left-to-right order, then substitute walks the original string again and
//! consumes the resolved names in that same order. A marker whose pseudonym
//! has no registry entry keeps its literal text rather than failing the
//! whole narrative or stealing a later marker's name.

use crate::error::Result;
use crate::store::registry::KeyRegistry;
use crate::types::IdentityClass;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Wire-exact marker syntax: `{<d>{<pseudonym>}}` with `d` in `{s, t}` and
/// no `}` inside the pseudonym
static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([st])\{([^}]*)\}\}").expect("marker regex is valid"));

/// One marker as parsed from a narrative string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub class: IdentityClass,
    pub pseudonym: String,
}

/// Parse every marker in appearance order
pub fn scan_markers(text: &str) -> Vec<Marker> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let class = IdentityClass::from_discriminator(caps[1].chars().next()?)?;
            Some(Marker {
                class,
                pseudonym: caps[2].to_string(),
            })
        })
        .collect()
}

/// Stage one: issue a registry lookup per marker, preserving marker order
///
/// Misses are recorded as `None` so stage two can leave those markers
/// verbatim without shifting later names out of position.
pub fn collect(text: &str, registry: &KeyRegistry) -> Result<Vec<Option<String>>> {
    let mut resolved = Vec::new();
    for marker in scan_markers(text) {
        let name = registry.resolve(marker.class, &marker.pseudonym)?;
        if name.is_none() {
            warn!(
                "No registry entry for {} pseudonym {}; marker left unresolved",
                marker.class, marker.pseudonym
            );
        }
        resolved.push(name);
    }
    Ok(resolved)
}

/// Stage two: replace markers left to right with the collected names
pub fn substitute(text: &str, resolved: &[Option<String>]) -> String {
    let mut index = 0usize;
    MARKER_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let replacement = match resolved.get(index) {
                Some(Some(name)) => name.clone(),
                _ => caps[0].to_string(),
            };
            index += 1;
            replacement
        })
        .into_owned()
}

/// Full pipeline: collect, then substitute
pub fn resolve_template(text: &str, registry: &KeyRegistry) -> Result<String> {
    let resolved = collect(text, registry)?;
    Ok(substitute(text, &resolved))
}
