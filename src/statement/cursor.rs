//! Cursor-backed execution of single SELECT statements.

use crate::housekeeper::CleanupKey;
use crate::result::ResultField;

/// Server-side cursor owned by a [`super::PreparedQuery`].
#[derive(Debug)]
pub(crate) struct Cursor {
    pub(crate) name: String,
    /// Result columns of the underlying SELECT, with execution formats.
    pub(crate) fields: Vec<ResultField>,
    pub(crate) declared: bool,
    pub(crate) cleanup: Option<CleanupKey>,
}

impl Cursor {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            fields: Vec::new(),
            declared: false,
            cleanup: None,
        }
    }

    pub(crate) fn declare_sql(&self, select: &str) -> String {
        format!(
            "DECLARE {} NO SCROLL CURSOR WITH HOLD FOR {}",
            self.name,
            strip_terminator(select)
        )
    }

    pub(crate) fn fetch_sql(&self, count: u32) -> String {
        format!("FETCH FORWARD {} FROM {}", count, self.name)
    }

    pub(crate) fn close_sql(&self) -> String {
        format!("CLOSE {}", self.name)
    }
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// True for one statement starting with the `SELECT` keyword.
///
/// A `;` followed by anything else means several statements. Semicolons
/// inside literals are not told apart, which errs on the side of refusing.
pub fn is_bare_select(sql: &str) -> bool {
    let body = strip_terminator(sql);
    if body.contains(';') {
        return false;
    }
    let keyword: String = body
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    keyword.eq_ignore_ascii_case("select")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_selects() {
        assert!(is_bare_select("SELECT * FROM t"));
        assert!(is_bare_select("  select id from t where id > $1;  "));
        assert!(!is_bare_select("SELECT 1; SELECT 2"));
        assert!(!is_bare_select("INSERT INTO t VALUES (1) RETURNING id"));
        assert!(!is_bare_select("SELECTED"));
        assert!(!is_bare_select("WITH x AS (SELECT 1) SELECT * FROM x"));
    }

    #[test]
    fn cursor_statements() {
        let cursor = Cursor::new("pgcore_cursor_1".into());
        assert_eq!(
            cursor.declare_sql("SELECT * FROM t;"),
            "DECLARE pgcore_cursor_1 NO SCROLL CURSOR WITH HOLD FOR SELECT * FROM t"
        );
        assert_eq!(cursor.fetch_sql(50), "FETCH FORWARD 50 FROM pgcore_cursor_1");
        assert_eq!(cursor.close_sql(), "CLOSE pgcore_cursor_1");
    }
}
