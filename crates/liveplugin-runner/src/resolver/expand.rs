//! Expansion of classpath tokens into concrete paths.

use std::fs;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::AnError;

use super::EnvironmentSnapshot;

/// Matches `${NAME}`, `$NAME` and `%NAME%` references.
static VARIABLE_PATTERN: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)|%([A-Za-z_][A-Za-z0-9_]*)%")
});

/// Replaces environment references with their values.
///
/// Unknown variables are left untouched so the failure message later names
/// the token as written.
pub fn expand_variables(token: &str, environment: &EnvironmentSnapshot) -> Result<String, AnError> {
    let pattern = VARIABLE_PATTERN.as_ref().map_err(|error| {
        AnError::loading_with_source("Invalid environment variable pattern", error.clone())
    })?;
    let expanded = pattern.replace_all(token, |captures: &Captures<'_>| {
        let whole = captures.get(0).map_or("", |found| found.as_str());
        captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
            .and_then(|name| environment.get(name.as_str()))
            .unwrap_or(whole)
            .to_owned()
    });
    Ok(expanded.into_owned())
}

/// Expands a raw classpath token into the files and directories it names.
///
/// Relative results are anchored at `base`. `*` and `?` may appear in any
/// path component; matches are returned sorted by name. An empty result means
/// nothing on disk matched.
pub fn expand_classpath_token(
    token: &str,
    environment: &EnvironmentSnapshot,
    base: &Path,
) -> Result<Vec<PathBuf>, AnError> {
    let expanded = expand_variables(token, environment)?;
    let path = Path::new(&expanded);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    if !has_wildcard(&expanded) {
        return Ok(if absolute.exists() {
            vec![absolute]
        } else {
            Vec::new()
        });
    }

    let mut candidates = vec![PathBuf::new()];
    for component in absolute.components() {
        let Component::Normal(raw_part) = component else {
            for candidate in &mut candidates {
                candidate.push(component.as_os_str());
            }
            continue;
        };
        let part = raw_part.to_string_lossy();
        if has_wildcard(&part) {
            let matcher = wildcard_regex(&part)?;
            candidates = candidates
                .iter()
                .flat_map(|directory| matching_children(directory, &matcher))
                .collect();
        } else {
            for candidate in &mut candidates {
                candidate.push(part.as_ref());
            }
        }
    }
    candidates.retain(|candidate| candidate.exists());
    Ok(candidates)
}

fn has_wildcard(text: &str) -> bool {
    text.contains(['*', '?'])
}

fn wildcard_regex(pattern: &str) -> Result<Regex, AnError> {
    let mut source = String::from("^");
    for character in pattern.chars() {
        match character {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|error| {
        AnError::loading_with_source(format!("Invalid wildcard '{pattern}'"), error)
    })
}

fn matching_children(directory: &Path, matcher: &Regex) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(directory) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| matcher.is_match(name))
        .collect();
    names.sort();
    names.into_iter().map(|name| directory.join(name)).collect()
}
