//! Removal of SQL text from HTML AWR reports.
//!
//! Tables whose `summary` mentions top SQL or SQL statements and `<pre>`
//! blocks holding the ADDM report are replaced with a placeholder heading.
//! AWR reports never nest tables, so sections are matched without a full
//! HTML parser.

use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{CollectError, Result};

/// Replacement for each removed section.
pub const REMOVED: &str = "<h3>Section removed by awrstrip</h3>";

static TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<table\b([^>]*)>.*?</table\s*>").expect("static regex")
});

static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bsummary\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

static SQL_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)top sql|sql statements").expect("static regex"));

static PRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<pre\b[^>]*>(.*?)</pre\s*>").expect("static regex"));

static HTML_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<html\b").expect("static regex"));

/// Result of stripping one document.
#[derive(Debug)]
pub struct Stripped<'a> {
    pub html: Cow<'a, str>,
    /// Number of sections replaced.
    pub removed: usize,
}

fn is_sql_table(attrs: &str) -> bool {
    SUMMARY
        .captures(attrs)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .is_some_and(|summary| SQL_SUMMARY.is_match(summary.as_str()))
}

/// Strip SQL sections from `html`.
pub fn strip_sql(html: &str) -> Stripped<'_> {
    let mut removed = 0;

    let tables = TABLE.replace_all(html, |caps: &Captures<'_>| {
        if is_sql_table(&caps[1]) {
            removed += 1;
            REMOVED.to_string()
        } else {
            caps[0].to_string()
        }
    });

    let result = match PRE.replace_all(&tables, |caps: &Captures<'_>| {
        if caps[1].trim_start().starts_with("ADDM") {
            removed += 1;
            REMOVED.to_string()
        } else {
            caps[0].to_string()
        }
    }) {
        Cow::Borrowed(_) => tables.clone(),
        Cow::Owned(s) => Cow::Owned(s),
    };

    Stripped {
        html: result,
        removed,
    }
}

/// Strip an HTML report in place. Returns the number of sections removed.
///
/// Files that are not HTML documents are left untouched and reported as
/// a redaction error.
pub fn strip_file(path: &Path) -> Result<usize> {
    let bad = |reason: String| CollectError::Redaction {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| bad(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|_| bad("not valid UTF-8".into()))?;
    if !HTML_ROOT.is_match(&text) {
        return Err(bad("not an HTML document".into()));
    }

    let stripped = strip_sql(&text);
    if stripped.removed > 0 {
        std::fs::write(path, stripped.html.as_bytes()).map_err(|e| bad(e.to_string()))?;
    }
    Ok(stripped.removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<html><body>
<h2>Load Profile</h2>
<table border="0" summary="This table displays load profile"><tr><td>DB Time</td></tr></table>
<h3>SQL ordered by Elapsed Time</h3>
<table border="0" summary="This table displays top SQL by elapsed time"><tr><td>select secret from t</td></tr></table>
<table summary='This table displays the text of the SQL statements which have been referred to in the report'>
<tr><td>update payroll set</td></tr>
</table>
<pre>
  ADDM Report for Task 'TASK_123'
  select * from hidden
</pre>
<pre>Other preformatted</pre>
</body></html>"#;

    #[test]
    fn test_strips_sql_sections_only() {
        let stripped = strip_sql(REPORT);
        assert_eq!(stripped.removed, 3);
        assert!(stripped.html.contains("This table displays load profile"));
        assert!(stripped.html.contains("Other preformatted"));
        assert!(!stripped.html.contains("select secret"));
        assert!(!stripped.html.contains("update payroll"));
        assert!(!stripped.html.contains("select * from hidden"));
        assert_eq!(stripped.html.matches(REMOVED).count(), 3);
    }

    #[test]
    fn test_document_without_sql_is_unchanged() {
        let html = "<html><table summary=\"wait events\"></table></html>";
        let stripped = strip_sql(html);
        assert_eq!(stripped.removed, 0);
        assert_eq!(stripped.html, html);
    }

    #[test]
    fn test_strip_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DB1_1_1_awr_1_2_x.html");
        std::fs::write(&path, REPORT).unwrap();
        assert_eq!(strip_file(&path).unwrap(), 3);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(REMOVED));
    }

    #[test]
    fn test_non_html_is_rejected_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.html");
        std::fs::write(&path, "ORA-00600: internal error").unwrap();
        let err = strip_file(&path).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::E017);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "ORA-00600: internal error"
        );
    }
}
