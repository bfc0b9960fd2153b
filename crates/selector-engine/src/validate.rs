//! Lightweight syntax validation for generated selectors. Candidates that
//! fail here are discarded before they are ever offered to a caller.

use page_adapter::is_xpath;

pub fn validate(selector: &str) -> bool {
    if is_xpath(selector) {
        is_valid_xpath(selector)
    } else {
        is_valid_css(selector)
    }
}

pub fn is_valid_css(selector: &str) -> bool {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return false;
    }
    // A bare combinator cannot open a selector.
    if matches!(trimmed.chars().next(), Some('>') | Some('+') | Some('~') | Some(',')) {
        return false;
    }
    if trimmed.contains("##") || trimmed.contains("..") {
        return false;
    }
    if !balanced(trimmed) {
        return false;
    }
    // `#` and `.` must be followed by an identifier character.
    let chars: Vec<char> = trimmed.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c == '#' || *c == '.' {
            match chars.get(i + 1) {
                Some(next) if next.is_alphanumeric() || *next == '_' || *next == '-' => {}
                _ => return false,
            }
        }
    }
    true
}

pub fn is_valid_xpath(selector: &str) -> bool {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return false;
    }
    if !(trimmed.starts_with('/') || trimmed.starts_with('(')) {
        return false;
    }
    balanced(trimmed)
}

/// Brackets, parens and quotes must pair up.
fn balanced(s: &str) -> bool {
    let mut brackets = 0i32;
    let mut parens = 0i32;
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' => brackets += 1,
                ']' => brackets -= 1,
                '(' => parens += 1,
                ')' => parens -= 1,
                _ => {}
            },
        }
        if brackets < 0 || parens < 0 {
            return false;
        }
    }
    brackets == 0 && parens == 0 && quote.is_none()
}
