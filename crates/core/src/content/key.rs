/// Search document key utilities.
///
/// Published pages are indexed under `{siteSlug}:{path}`:
/// - `marketing:/pricing`
/// - `docs:/`

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey {
    pub site_slug: String,
    pub path: String,
}

impl SearchKey {
    /// Build a key, normalizing the path to start with a single `/`.
    pub fn new(site_slug: &str, path: &str) -> Self {
        let trimmed = path.trim_start_matches('/');
        Self {
            site_slug: site_slug.to_string(),
            path: format!("/{trimmed}"),
        }
    }

    /// Full key with the slug prefix.
    pub fn full_key(&self) -> String {
        format!("{}{SEPARATOR}{}", self.site_slug, self.path)
    }
}

impl std::fmt::Display for SearchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_key())
    }
}
