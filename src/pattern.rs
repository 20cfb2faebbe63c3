// src/pattern.rs

//! Input matching and `{placeholder}` templates.
//!
//! - [`Template`] renders strings such as `"{sample}.trimmed.fastq.gz"` or
//!   `"trim_galore {input} -o {output}"` against a lookup function.
//! - [`capture_input`] turns one matched input path into the capture map a
//!   transform's output templates are rendered with.
//! - [`expand_glob`] lists files matching a glob through a [`FileSystem`].
//! - [`template_matches_glob`] decides, at registry level, whether a task's
//!   output template can feed another task's glob input.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobMatcher};
use regex::Regex;
use tracing::debug;

use crate::errors::{PipedagError, Result};
use crate::fs::{normalize, FileSystem};

/// Capture groups and derived names for one matched input.
pub type Captures = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Placeholder(String),
}

/// A parsed `{placeholder}` template. `{{` and `}}` render literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    pieces: Vec<Piece>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(PipedagError::Template(format!(
                                    "unclosed placeholder in {raw:?}"
                                )));
                            }
                            Some(k) => key.push(k),
                        }
                    }
                    let key = key.trim().to_string();
                    if key.is_empty() {
                        return Err(PipedagError::Template(format!(
                            "empty placeholder in {raw:?}"
                        )));
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Placeholder(key));
                }
                '}' => {
                    return Err(PipedagError::Template(format!(
                        "unmatched '}}' in {raw:?}"
                    )));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            pieces,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Placeholder(k) => Some(k.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Render the template; unknown placeholders are an error.
    pub fn render<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Placeholder(key) => match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        return Err(PipedagError::Template(format!(
                            "unknown placeholder {{{key}}} in {:?}",
                            self.raw
                        )));
                    }
                },
            }
        }
        Ok(out)
    }

    fn to_regex(&self) -> Result<Regex> {
        let mut re = String::from("^");
        for (i, piece) in self.pieces.iter().enumerate() {
            match piece {
                Piece::Literal(s) => {
                    let s = if i == 0 { s.trim_start_matches("./") } else { s.as_str() };
                    re.push_str(&regex::escape(s));
                }
                Piece::Placeholder(_) => re.push_str(".+"),
            }
        }
        re.push('$');
        Ok(Regex::new(&re)?)
    }

    /// Render with every placeholder replaced by `stand_in`.
    fn render_opaque(&self, stand_in: &str) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Placeholder(_) => out.push_str(stand_in),
            }
        }
        out
    }
}

/// Compile an input glob. `*` does not cross `/`; use `**` for that.
pub fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    let pattern = normalize(Path::new(pattern));
    let glob = GlobBuilder::new(&pattern.to_string_lossy())
        .literal_separator(true)
        .build()?;
    Ok(glob.compile_matcher())
}

fn has_glob_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Files matching `pattern`, sorted.
///
/// The walk starts at the longest literal directory prefix of the pattern
/// and descends only as deep as the pattern can match (unbounded for `**`).
/// Hidden entries (`.pipedag`, staged outputs) are skipped.
pub fn expand_glob(fs: &dyn FileSystem, pattern: &str) -> Result<Vec<PathBuf>> {
    let normalized = normalize(Path::new(pattern));
    let components: Vec<String> = normalized
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let literal_len = components
        .iter()
        .take_while(|c| !has_glob_meta(c))
        .count();

    if literal_len == components.len() {
        return Ok(if fs.is_file(&normalized) {
            vec![normalized]
        } else {
            Vec::new()
        });
    }

    let base: PathBuf = if literal_len == 0 {
        PathBuf::from(".")
    } else {
        components[..literal_len].iter().collect()
    };
    if !fs.is_dir(&base) {
        return Ok(Vec::new());
    }

    let max_depth = if components[literal_len..].iter().any(|c| c == "**") {
        usize::MAX
    } else {
        components.len() - literal_len
    };

    let matcher = compile_glob(pattern)?;
    let mut found = Vec::new();
    let mut stack = vec![(base, 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        for entry in fs.read_dir(&dir)? {
            let hidden = entry
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            if fs.is_dir(&entry) {
                if depth + 1 < max_depth {
                    stack.push((entry, depth + 1));
                }
            } else if matcher.is_match(&entry) {
                found.push(entry);
            }
        }
    }

    found.sort();
    debug!(pattern, matches = found.len(), "expanded input glob");
    Ok(found)
}

/// Whether an output template could produce a path matched by `pattern`.
///
/// For a glob, placeholders are rendered as opaque single path segments and
/// the result is tested against the glob. For a literal path, the template
/// is turned into a regex where each placeholder matches any non-empty text.
pub fn template_matches_glob(template: &Template, pattern: &str) -> Result<bool> {
    let normalized = normalize(Path::new(pattern));
    let literal = !normalized
        .components()
        .any(|c| has_glob_meta(&c.as_os_str().to_string_lossy()));

    if literal {
        let re = template.to_regex()?;
        return Ok(re.is_match(&normalized.to_string_lossy()));
    }

    let glob = compile_glob(pattern)?;
    let candidate = template.render_opaque("_");
    Ok(glob.is_match(normalize(Path::new(&candidate))))
}

/// Build the capture map for one matched input path.
///
/// Always provides `path`, `dir`, `filename` and `basename`; `basename` is
/// the file name with `suffix` removed when given, otherwise the file stem.
/// When `filter` is given it must match the path (as a string) or `None` is
/// returned; its numbered and named groups are added (`{0}` is the whole
/// match).
pub fn capture_input(path: &Path, filter: Option<&Regex>, suffix: Option<&str>) -> Option<Captures> {
    let path_str = path.to_string_lossy().into_owned();
    let mut captures = Captures::new();

    if let Some(re) = filter {
        let caps = re.captures(&path_str)?;
        for (idx, group) in caps.iter().enumerate() {
            if let Some(m) = group {
                captures.insert(idx.to_string(), m.as_str().to_string());
            }
        }
        for name in re.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                captures.insert(name.to_string(), m.as_str().to_string());
            }
        }
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let basename = match suffix {
        Some(sfx) => match filename.strip_suffix(sfx) {
            Some(stripped) => stripped.to_string(),
            None => return None,
        },
        None => path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    };

    captures.entry("path".into()).or_insert(path_str);
    captures.entry("dir".into()).or_insert(dir);
    captures.entry("filename".into()).or_insert(filename);
    captures.entry("basename".into()).or_insert(basename);
    Some(captures)
}

/// Cheap validity check for a glob without compiling a matcher.
pub fn validate_glob(pattern: &str) -> Result<()> {
    Glob::new(pattern)?;
    Ok(())
}
