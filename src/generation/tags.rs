//! XML-style tag extraction from generation output.

use regex::Regex;
use std::collections::BTreeMap;

/// Trimmed contents of the first `<tag>...</tag>` for each requested tag that appears.
pub fn extract_tags(text: &str, tags: &[String]) -> BTreeMap<String, String> {
    let mut found = BTreeMap::new();
    for tag in tags {
        let escaped = regex::escape(tag);
        let Ok(pattern) = Regex::new(&format!(r"(?is)<{escaped}>(.*?)</{escaped}>")) else {
            continue;
        };
        if let Some(body) = pattern.captures(text).and_then(|caps| caps.get(1)) {
            found.insert(tag.clone(), body.as_str().trim().to_string());
        }
    }
    found
}
