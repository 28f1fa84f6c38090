//! Marker-delimited partial edits.
//!
//! A single linear scan: the first begin marker, then the first end marker
//! after it. Markers that occur more than once are not disambiguated; callers
//! must pick markers unique enough for the file.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerError {
    #[error("begin marker '{marker}' not found")]
    BeginNotFound { marker: String },
    #[error("end marker '{marker}' not found after the begin marker")]
    EndNotFound { marker: String },
}

/// Replace the text strictly between `begin` and the next `end` with `new_content`.
///
/// The inserted content is wrapped in a leading and trailing line break. Both
/// markers and everything outside the span are kept verbatim.
pub fn replace_between(
    text: &str,
    begin: &str,
    end: &str,
    new_content: &str,
) -> Result<String, MarkerError> {
    let begin_start = text.find(begin).ok_or_else(|| MarkerError::BeginNotFound {
        marker: begin.to_string(),
    })?;
    let span_start = begin_start + begin.len();
    let end_start = text[span_start..]
        .find(end)
        .map(|offset| span_start + offset)
        .ok_or_else(|| MarkerError::EndNotFound {
            marker: end.to_string(),
        })?;

    let mut updated = String::with_capacity(text.len() + new_content.len() + 2);
    updated.push_str(&text[..span_start]);
    updated.push('\n');
    updated.push_str(new_content);
    updated.push('\n');
    updated.push_str(&text[end_start..]);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "header\n// BEGIN config\nold = 1\n// END config\nfooter\n";

    #[test]
    fn replaces_span_and_keeps_markers() {
        let updated = replace_between(FILE, "// BEGIN config", "// END config", "new = 2")
            .expect("edit");
        assert_eq!(
            updated,
            "header\n// BEGIN config\nnew = 2\n// END config\nfooter\n"
        );
    }

    #[test]
    fn text_outside_span_is_unchanged() {
        let updated =
            replace_between(FILE, "// BEGIN config", "// END config", "x").expect("edit");
        assert!(updated.starts_with("header\n// BEGIN config"));
        assert!(updated.ends_with("// END config\nfooter\n"));
    }

    #[test]
    fn missing_begin_marker_fails() {
        let err = replace_between(FILE, "// BEGIN nope", "// END config", "x").unwrap_err();
        assert_eq!(
            err,
            MarkerError::BeginNotFound {
                marker: "// BEGIN nope".to_string()
            }
        );
    }

    #[test]
    fn end_marker_must_follow_begin_marker() {
        let text = "END\nBEGIN\nbody\n";
        let err = replace_between(text, "BEGIN", "END", "x").unwrap_err();
        assert!(matches!(err, MarkerError::EndNotFound { .. }));
    }

    #[test]
    fn end_marker_search_starts_after_begin_match() {
        // The end marker is a suffix of the begin marker; it must not match inside it.
        let text = "<<tag>>body<<tag>>";
        let updated = replace_between(text, "<<tag>>", "tag>>", "new").expect("edit");
        assert_eq!(updated, "<<tag>>\nnew\ntag>>");
    }

    #[test]
    fn first_occurrences_win() {
        let text = "[a]1[b]2[a]3[b]";
        let updated = replace_between(text, "[a]", "[b]", "x").expect("edit");
        assert_eq!(updated, "[a]\nx\n[b]2[a]3[b]");
    }
}
