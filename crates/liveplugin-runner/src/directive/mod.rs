//! Lexical scan of entry-script directives.
//!
//! Directives are comment lines that start with a fixed marker, one per line,
//! anywhere in the script:
//!
//! ```text
//! // add-to-classpath $PLUGIN_PATH/lib/*.rhai
//! // depends-on-plugin shared-helpers
//! ```
//!
//! No parsing beyond the marker match is performed, so a script that does
//! not compile still yields its directives.

/// One declaration found in an entry script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Raw classpath token (path, wildcard, or environment reference).
    ClasspathAddition(String),
    /// Id of another live plugin this one depends on.
    PluginDependency(String),
}

/// Line markers recognised for one scripting backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectiveSyntax {
    classpath_marker: &'static str,
    dependency_marker: &'static str,
}

impl DirectiveSyntax {
    /// Markers for scripts using `//` line comments.
    pub const SLASH_COMMENT: Self = Self::new("// add-to-classpath ", "// depends-on-plugin ");

    /// Markers for scripts using `--` line comments.
    pub const DASH_COMMENT: Self = Self::new("-- add-to-classpath ", "-- depends-on-plugin ");

    /// Creates a syntax from explicit markers.
    #[must_use]
    pub const fn new(classpath_marker: &'static str, dependency_marker: &'static str) -> Self {
        Self {
            classpath_marker,
            dependency_marker,
        }
    }

    /// Marker introducing a classpath addition.
    #[must_use]
    pub const fn classpath_marker(&self) -> &'static str {
        self.classpath_marker
    }

    /// Marker introducing a plugin dependency.
    #[must_use]
    pub const fn dependency_marker(&self) -> &'static str {
        self.dependency_marker
    }

    /// Extracts the directives from script text in declaration order.
    #[must_use]
    pub fn scan(&self, script: &str) -> Vec<Directive> {
        script
            .lines()
            .filter_map(|line| self.parse_line(line))
            .collect()
    }

    fn parse_line(&self, raw_line: &str) -> Option<Directive> {
        let line = raw_line.trim_start();
        if let Some(rest) = line.strip_prefix(self.classpath_marker) {
            return non_empty(rest).map(Directive::ClasspathAddition);
        }
        if let Some(rest) = line.strip_prefix(self.dependency_marker) {
            return non_empty(rest).map(Directive::PluginDependency);
        }
        None
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let token = raw.trim();
    (!token.is_empty()).then(|| token.to_owned())
}
