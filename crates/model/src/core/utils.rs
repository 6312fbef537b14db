/// NULL marker of the COPY text format.
pub const COPY_NULL: &str = r"\N";

/// Escapes a value per the PostgreSQL COPY text format rules.
pub fn escape_copy_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\n' => escaped.push_str(r"\n"),
            '\r' => escaped.push_str(r"\r"),
            '\t' => escaped.push_str(r"\t"),
            '\\' => escaped.push_str(r"\\"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Encodes one row as a COPY text line (tab separated, newline terminated).
pub fn encode_copy_line<'a, I>(cells: I, out: &mut String)
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    for (i, cell) in cells.into_iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        match cell {
            Some(value) => out.push_str(&escape_copy_text(value)),
            None => out.push_str(COPY_NULL),
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_copy_text("a\tb\nc\\d\re"), r"a\tb\nc\\d\re");
        assert_eq!(escape_copy_text("plain"), "plain");
    }

    #[test]
    fn encodes_nulls_and_separators() {
        let mut line = String::new();
        encode_copy_line([Some("1"), None, Some("x\ty")], &mut line);
        assert_eq!(line, "1\t\\N\tx\\ty\n");
    }

    #[test]
    fn empty_string_is_not_null() {
        let mut line = String::new();
        encode_copy_line([Some(""), None], &mut line);
        assert_eq!(line, "\t\\N\n");
    }
}
