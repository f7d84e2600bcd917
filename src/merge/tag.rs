//! Tag requests written as MR comments
//!
//! ```text
//! tag: v1.2.3
//! - fixed bug
//! * added feature
//! ```

use crate::error::{Error, Result};
use crate::types::TagRequest;
use regex::Regex;
use std::sync::LazyLock;

/// Prefix marking a comment as a tag request
pub const TAG_PREFIX: &str = "tag";

static TAG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?[0-9.]+$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Whether a comment body asks for a tag
pub fn is_tag_request(body: &str) -> bool {
    body.starts_with(TAG_PREFIX)
}

/// Parse a tag comment (PURE)
///
/// The first line must read `tag: <name>` with exactly one colon and a name
/// matching `v?[0-9.]+`. Remaining lines become release notes with bullet
/// markers and blank lines removed.
pub fn parse_tag_request(body: &str) -> Result<TagRequest> {
    let mut lines = body.split(['\r', '\n']);
    let first = lines.next().unwrap_or_default();

    let parts: Vec<&str> = first.split(':').collect();
    if parts.len() != 2 || parts[0].trim() != TAG_PREFIX {
        return Err(Error::MalformedTagRequest(format!(
            "I expect first line of a tag comment be splited by single \":\" but it wasnt. current len: {}",
            parts.len()
        )));
    }

    let tag_name = parts[1].trim();
    if !TAG_NAME.is_match(tag_name) {
        return Err(Error::MalformedTagRequest(format!(
            "I expect tag name in form of v?[\\d\\.]+ but its: {tag_name}"
        )));
    }

    let release_notes = lines
        .map(|line| {
            line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '+' | '-'))
                .trim_end()
        })
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect();

    Ok(TagRequest {
        tag_name: tag_name.to_string(),
        release_notes,
    })
}
