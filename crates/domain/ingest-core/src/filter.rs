use serde::{Deserialize, Serialize};

/// Glob over entry names. Only `*` is special; matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilenameFilter {
    pattern: String,
}

impl FilenameFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        let mut parts = self.pattern.split('*');
        // split always yields at least one element
        let head = parts.next().unwrap_or_default();
        let Some(mut rest) = name.strip_prefix(head) else {
            return false;
        };

        let tail: Vec<&str> = parts.collect();
        let Some((last, middle)) = tail.split_last() else {
            // no wildcard at all
            return rest.is_empty();
        };

        for part in middle {
            if part.is_empty() {
                continue;
            }
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
        rest.ends_with(last)
    }
}
