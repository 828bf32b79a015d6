//! Formula reference extraction via a small hand-written lexer, not a
//! regex: string literals are skipped outright, bare words are classified
//! as cell-reference-shaped (`[A-Z]+[0-9]+`, optionally `Sheet!`-qualified
//! or `:`-ranged) or left as identifiers, and identifiers immediately
//! followed by `(` are checked against the dynamic-reference function
//! names (`INDIRECT`, `OFFSET`) spec.md calls out as producing edges whose
//! target can't be resolved statically.

use sheet_common::A1Range;

const DYNAMIC_REFERENCE_FUNCTIONS: &[&str] = &["INDIRECT", "OFFSET"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    RefCandidate(String),
    Punct(char),
}

fn looks_like_cell_ref(word: &str) -> bool {
    let col_len = word.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    if col_len == 0 || col_len == word.len() {
        return false;
    }
    word[col_len..].bytes().all(|b| b.is_ascii_digit())
}

fn tokenize(formula: &str) -> Vec<Token> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                i += 1;
            }
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' {
            // Quoted sheet name: 'My Sheet'!A1
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                i += 1;
            }
            i += 1;
            if i < chars.len() && chars[i] == '!' {
                i += 1;
                let ref_start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == ':' || chars[i] == '$') {
                    i += 1;
                }
                if i > ref_start {
                    let text: String = chars[start..i].iter().collect();
                    tokens.push(Token::RefCandidate(text));
                    continue;
                }
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && chars[i] == '!' {
                i += 1;
                let ref_start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == ':' || chars[i] == '$') {
                    i += 1;
                }
                if i > ref_start {
                    let text: String = chars[start..i].iter().collect();
                    tokens.push(Token::RefCandidate(text));
                    continue;
                }
            }
            let word: String = chars[start..i].iter().collect();
            if i < chars.len() && chars[i] == ':' && looks_like_cell_ref(&word) {
                let save = i;
                i += 1;
                let range_start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '$') {
                    i += 1;
                }
                if i > range_start {
                    let text: String = chars[start..i].iter().collect();
                    tokens.push(Token::RefCandidate(text));
                    continue;
                }
                i = save;
            }
            if looks_like_cell_ref(&word) {
                tokens.push(Token::RefCandidate(word));
            } else {
                tokens.push(Token::Ident(word));
            }
            continue;
        }
        tokens.push(Token::Punct(c));
        i += 1;
    }
    tokens
}

#[derive(Debug, Clone, Default)]
pub struct FormulaReferences {
    pub ranges: Vec<A1Range>,
    /// True when the formula calls a function whose referenced cell can't
    /// be determined without evaluating it (`INDIRECT`, `OFFSET`).
    pub dynamic: bool,
}

pub fn extract_references(formula: &str, default_sheet: &str) -> FormulaReferences {
    let tokens = tokenize(formula.trim_start_matches('='));
    let mut out = FormulaReferences::default();
    for (idx, tok) in tokens.iter().enumerate() {
        match tok {
            Token::RefCandidate(text) => {
                if let Ok(range) = A1Range::parse(default_sheet, text.trim_matches('\'')) {
                    out.ranges.push(range);
                }
            },
            Token::Ident(name) => {
                let upper = name.to_ascii_uppercase();
                if DYNAMIC_REFERENCE_FUNCTIONS.contains(&upper.as_str())
                    && matches!(tokens.get(idx + 1), Some(Token::Punct('(')))
                {
                    out.dynamic = true;
                }
            },
            Token::Punct(_) => {},
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_cell_and_range_references() {
        let refs = extract_references("=SUM(A2:A10)+B1", "Sheet1");
        assert_eq!(refs.ranges.len(), 2);
        assert!(!refs.dynamic);
    }

    #[test]
    fn extracts_sheet_qualified_references() {
        let refs = extract_references("=Sheet2!C3*2", "Sheet1");
        assert_eq!(refs.ranges.len(), 1);
        assert_eq!(refs.ranges[0].sheet_name, "Sheet2");
    }

    #[test]
    fn flags_indirect_and_offset_as_dynamic() {
        assert!(extract_references("=INDIRECT(\"A1\")", "Sheet1").dynamic);
        assert!(extract_references("=OFFSET(A1,1,1)", "Sheet1").dynamic);
        assert!(!extract_references("=SUM(A1:A2)", "Sheet1").dynamic);
    }

    #[test]
    fn string_literals_are_not_scanned_for_references() {
        let refs = extract_references("=CONCATENATE(\"A1:A2\",B1)", "Sheet1");
        assert_eq!(refs.ranges.len(), 1);
        assert_eq!(refs.ranges[0].start_row, 0);
    }

    #[test]
    fn function_names_are_not_mistaken_for_references() {
        let refs = extract_references("=SUM(A1)", "Sheet1");
        assert_eq!(refs.ranges.len(), 1);
    }
}
