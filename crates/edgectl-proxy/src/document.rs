//! The managed Caddyfile
//!
//! The document is a sequence of marker-delimited blocks: at most one global
//! block and one block per subdomain. Merging or removing a subdomain only
//! touches the lines between that subdomain's markers.

use std::fmt;

use crate::errors::RenderError;

const HEADER: &str = "# Managed by edgectl. Content outside the marked blocks is discarded.";
const MARKER_OPEN: &str = "# >>> edgectl";
const MARKER_CLOSE: &str = "# <<< edgectl";
const GLOBAL_OPEN: &str = "# >>> edgectl global";
const GLOBAL_CLOSE: &str = "# <<< edgectl global";
const SITE_OPEN: &str = "# >>> edgectl site: ";
const SITE_CLOSE: &str = "# <<< edgectl site: ";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SiteBlock {
    subdomain: String,
    body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyDocument {
    global: Option<String>,
    sites: Vec<SiteBlock>,
}

enum Block {
    Global,
    Site(String),
}

impl ProxyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document previously produced by [`ProxyDocument::render`].
    ///
    /// Comments and blank lines between blocks are dropped. Any other text
    /// outside a block, or markers that do not pair up, make the document
    /// malformed.
    pub fn parse(text: &str) -> Result<Self, RenderError> {
        let mut doc = Self::new();
        let mut open: Option<(Block, usize, Vec<&str>)> = None;

        for (index, line) in text.lines().enumerate() {
            let number = index + 1;
            let marker = line.trim_end();

            match open.take() {
                None => {
                    if marker == GLOBAL_OPEN {
                        open = Some((Block::Global, number, Vec::new()));
                    } else if let Some(sub) = marker.strip_prefix(SITE_OPEN) {
                        open = Some((Block::Site(sub.trim().to_string()), number, Vec::new()));
                    } else if marker.starts_with(MARKER_CLOSE) {
                        return Err(malformed(number, "end marker without a matching start"));
                    } else if !(marker.trim().is_empty() || marker.trim_start().starts_with('#')) {
                        return Err(malformed(number, "content outside a managed block"));
                    }
                }
                Some((block, start, mut lines)) => {
                    if marker.starts_with(MARKER_OPEN) {
                        return Err(malformed(number, "nested start marker"));
                    }
                    if !marker.starts_with(MARKER_CLOSE) {
                        lines.push(line);
                        open = Some((block, start, lines));
                        continue;
                    }

                    let body = lines.join("\n");
                    match block {
                        Block::Global if marker == GLOBAL_CLOSE => {
                            if doc.global.is_some() {
                                return Err(malformed(start, "duplicate global block"));
                            }
                            doc.global = Some(body);
                        }
                        Block::Site(sub)
                            if marker.strip_prefix(SITE_CLOSE).map(str::trim)
                                == Some(sub.as_str()) =>
                        {
                            if doc.contains(&sub) {
                                return Err(malformed(
                                    start,
                                    &format!("duplicate block for '{}'", sub),
                                ));
                            }
                            doc.sites.push(SiteBlock { subdomain: sub, body });
                        }
                        _ => return Err(malformed(number, "end marker does not match start")),
                    }
                }
            }
        }

        if let Some((_, start, _)) = open {
            return Err(malformed(start, "block is never closed"));
        }
        Ok(doc)
    }

    pub fn global(&self) -> Option<&str> {
        self.global.as_deref()
    }

    /// Replace the global block.
    pub fn set_global(mut self, fragment: &str) -> Result<Self, RenderError> {
        self.global = Some(clean_fragment(fragment)?);
        Ok(self)
    }

    /// Insert or replace the block for `subdomain`. A replaced block keeps
    /// its position.
    pub fn merge(mut self, subdomain: &str, fragment: &str) -> Result<Self, RenderError> {
        validate_subdomain(subdomain)?;
        let body = clean_fragment(fragment)?;
        match self.sites.iter_mut().find(|s| s.subdomain == subdomain) {
            Some(site) => site.body = body,
            None => self.sites.push(SiteBlock {
                subdomain: subdomain.to_string(),
                body,
            }),
        }
        Ok(self)
    }

    /// Drop the block for `subdomain`; absent blocks are a no-op.
    pub fn remove(mut self, subdomain: &str) -> Self {
        self.sites.retain(|s| s.subdomain != subdomain);
        self
    }

    pub fn contains(&self, subdomain: &str) -> bool {
        self.sites.iter().any(|s| s.subdomain == subdomain)
    }

    pub fn site(&self, subdomain: &str) -> Option<&str> {
        self.sites
            .iter()
            .find(|s| s.subdomain == subdomain)
            .map(|s| s.body.as_str())
    }

    pub fn subdomains(&self) -> impl Iterator<Item = &str> {
        self.sites.iter().map(|s| s.subdomain.as_str())
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProxyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", HEADER)?;
        if let Some(global) = &self.global {
            writeln!(f)?;
            writeln!(f, "{}", GLOBAL_OPEN)?;
            writeln!(f, "{}", global)?;
            writeln!(f, "{}", GLOBAL_CLOSE)?;
        }
        for site in &self.sites {
            writeln!(f)?;
            writeln!(f, "{}{}", SITE_OPEN, site.subdomain)?;
            writeln!(f, "{}", site.body)?;
            writeln!(f, "{}{}", SITE_CLOSE, site.subdomain)?;
        }
        Ok(())
    }
}

fn malformed(line: usize, reason: &str) -> RenderError {
    RenderError::Malformed(format!("line {}: {}", line, reason))
}

fn validate_subdomain(subdomain: &str) -> Result<(), RenderError> {
    if subdomain.is_empty() || subdomain.chars().any(|c| c.is_whitespace() || c == ':') {
        return Err(RenderError::Malformed(format!(
            "'{}' cannot be used as a block name",
            subdomain
        )));
    }
    Ok(())
}

fn clean_fragment(fragment: &str) -> Result<String, RenderError> {
    if fragment.lines().any(|l| {
        let l = l.trim_start();
        l.starts_with(MARKER_OPEN) || l.starts_with(MARKER_CLOSE)
    }) {
        return Err(RenderError::Malformed(
            "fragment contains block markers".to_string(),
        ));
    }
    Ok(fragment.trim_end_matches(['\n', '\r']).to_string())
}
