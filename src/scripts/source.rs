//! Locates guest function definitions in raw source text.
//!
//! Hot reload compares the text of the entry point between versions of a unit, so this
//! only has to find `fn name(...) { ... }` reliably; it skips string literals, character
//! literals and comments while matching braces but is not a parser.

/// Returns the full definition of `fn name`, from the `fn` keyword to its closing brace.
pub fn function_definition<'a>(source: &'a str, name: &str) -> Option<&'a str> {
    let bytes = source.as_bytes();
    let mut cursor = 0;
    while cursor < bytes.len() {
        match bytes[cursor] {
            b'"' | b'`' | b'\'' => cursor = skip_quoted(bytes, cursor),
            b'/' if bytes.get(cursor + 1) == Some(&b'/') => cursor = skip_line_comment(bytes, cursor),
            b'/' if bytes.get(cursor + 1) == Some(&b'*') => cursor = skip_block_comment(bytes, cursor),
            b'f' if starts_definition(bytes, cursor, name) => {
                let end = definition_end(bytes, cursor)?;
                return Some(&source[cursor..end]);
            }
            _ => cursor += 1,
        }
    }
    None
}

fn starts_definition(bytes: &[u8], at: usize, name: &str) -> bool {
    if !is_keyword_at(bytes, at, b"fn") {
        return false;
    }
    let start = skip_whitespace(bytes, at + 2);
    if start == at + 2 {
        return false;
    }
    let end = ident_end(bytes, start);
    if &bytes[start..end] != name.as_bytes() {
        return false;
    }
    bytes.get(skip_whitespace(bytes, end)) == Some(&b'(')
}

fn is_keyword_at(bytes: &[u8], at: usize, keyword: &[u8]) -> bool {
    bytes[at..].starts_with(keyword)
        && (at == 0 || !is_ident_byte(bytes[at - 1]))
        && bytes.get(at + keyword.len()).map_or(true, |next| !is_ident_byte(*next))
}

fn definition_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut cursor = from;
    let mut depth = 0usize;
    while cursor < bytes.len() {
        match bytes[cursor] {
            b'"' | b'`' | b'\'' => {
                cursor = skip_quoted(bytes, cursor);
                continue;
            }
            b'/' if bytes.get(cursor + 1) == Some(&b'/') => {
                cursor = skip_line_comment(bytes, cursor);
                continue;
            }
            b'/' if bytes.get(cursor + 1) == Some(&b'*') => {
                cursor = skip_block_comment(bytes, cursor);
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(cursor + 1);
                }
            }
            _ => {}
        }
        cursor += 1;
    }
    None
}

fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut cursor = open + 1;
    while cursor < bytes.len() {
        match bytes[cursor] {
            b'\\' => cursor += 2,
            byte if byte == quote => return cursor + 1,
            _ => cursor += 1,
        }
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], from: usize) -> usize {
    bytes[from..].iter().position(|byte| *byte == b'\n').map_or(bytes.len(), |offset| from + offset + 1)
}

fn skip_block_comment(bytes: &[u8], from: usize) -> usize {
    // Rhai block comments nest.
    let mut depth = 0usize;
    let mut cursor = from;
    while cursor + 1 < bytes.len() {
        match (bytes[cursor], bytes[cursor + 1]) {
            (b'/', b'*') => {
                depth += 1;
                cursor += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                cursor += 2;
                if depth == 0 {
                    return cursor;
                }
            }
            _ => cursor += 1,
        }
    }
    bytes.len()
}

fn skip_whitespace(bytes: &[u8], from: usize) -> usize {
    let mut cursor = from;
    while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
        cursor += 1;
    }
    cursor
}

fn ident_end(bytes: &[u8], from: usize) -> usize {
    let mut cursor = from;
    while cursor < bytes.len() && is_ident_byte(bytes[cursor]) {
        cursor += 1;
    }
    cursor
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_whole_definition() {
        let source = "let x = 1;\nfn init() {\n    if x > 0 { x = 0; }\n}\nfn update(dt) { }\n";
        assert_eq!(function_definition(source, "init"), Some("fn init() {\n    if x > 0 { x = 0; }\n}"));
        assert_eq!(function_definition(source, "update"), Some("fn update(dt) { }"));
    }

    #[test]
    fn ignores_prefix_matches_and_calls() {
        let source = "fn init_state() { 1 }\nfn reinit() { init(); }\nfn init (a) { a }";
        assert_eq!(function_definition(source, "init"), Some("fn init (a) { a }"));
    }

    #[test]
    fn braces_inside_strings_and_comments_do_not_count() {
        let source = "fn init() {\n  let s = \"}\"; // }\n  /* { */ print(`{`);\n}\nfn after() {}";
        assert_eq!(function_definition(source, "init"), Some("fn init() {\n  let s = \"}\"; // }\n  /* { */ print(`{`);\n}"));
    }

    #[test]
    fn definitions_in_comments_are_skipped() {
        let source = "// fn init() { old }\n/* fn init() { older } */\nfn init() { new }";
        assert_eq!(function_definition(source, "init"), Some("fn init() { new }"));
    }

    #[test]
    fn missing_or_unterminated_definition() {
        assert_eq!(function_definition("fn update() {}", "init"), None);
        assert_eq!(function_definition("fn init() { let a = 1;", "init"), None);
    }
}
