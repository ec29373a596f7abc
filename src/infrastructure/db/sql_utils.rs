use std::collections::BTreeSet;

// ─────────────────────────────────────────────────────────────────────────────
// Placeholder counting
// ─────────────────────────────────────────────────────────────────────────────

/// Number of parameters a statement binds.
///
/// Understands `?` (each occurrence is one parameter), `$1`/`:1` (numbered,
/// counted once per distinct number) and `:name` (counted once per distinct
/// name). String literals, quoted identifiers, comments and `::` casts are
/// skipped.
pub fn count_placeholders(sql: &str) -> usize {
    let chars: Vec<char> = sql.chars().collect();
    let mut positional = 0;
    let mut numbered = BTreeSet::new();
    let mut named = BTreeSet::new();

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            quote @ ('\'' | '"') => {
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                i += 1;
            }
            '?' => positional += 1,
            sigil @ (':' | '$') => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let token: String = chars[start..end].iter().collect();
                if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
                    numbered.insert(token);
                } else if sigil == ':' && token.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
                    named.insert(token);
                }
                i = end.max(start) - 1;
            }
            _ => {}
        }
        i += 1;
    }

    positional + numbered.len() + named.len()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_marks_count_each_occurrence() {
        assert_eq!(count_placeholders("INSERT INTO t (a, b, c) VALUES (?, ?, ?)"), 3);
    }

    #[test]
    fn dollar_placeholders_count_distinct_numbers() {
        let sql = "INSERT INTO canvas_courses (id, name) VALUES ($1, $2) \
                   ON CONFLICT (id) DO UPDATE SET name = $2";
        assert_eq!(count_placeholders(sql), 2);
    }

    #[test]
    fn oracle_style_merge() {
        let sql = "MERGE INTO canvas_courses c \
                   USING (SELECT :1 AS id, :2 AS name, :3 AS ts FROM dual) s \
                   ON (c.id = s.id) \
                   WHEN MATCHED THEN UPDATE SET c.name = s.name, c.ts = s.ts \
                   WHEN NOT MATCHED THEN INSERT (id, name, ts) VALUES (s.id, s.name, s.ts)";
        assert_eq!(count_placeholders(sql), 3);
    }

    #[test]
    fn named_placeholders_count_distinct_names() {
        assert_eq!(
            count_placeholders("UPDATE t SET a = :name WHERE id = :id AND b = :name"),
            2
        );
    }

    #[test]
    fn literals_casts_and_comments_are_skipped() {
        let sql = "-- uses ? here\n\
                   INSERT INTO t (a, b) VALUES ($1::text, '?:x') /* :y */ RETURNING \"a?\"";
        assert_eq!(count_placeholders(sql), 1);
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(count_placeholders("SELECT 1"), 0);
        assert_eq!(count_placeholders(""), 0);
    }
}
