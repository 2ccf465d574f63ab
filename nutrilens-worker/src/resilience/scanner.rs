//! String-literal-aware JSON character scanner.
//!
//! Every healing step that must tell structural characters apart from
//! string content feeds its input through [`JsonScanner`] one char at a time.

/// Where a character sits relative to JSON string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CharClass {
    /// Outside any string literal.
    Structural,
    /// The quote that opens a string literal.
    OpenQuote,
    /// Content of a string literal, including escape sequences.
    StringContent,
    /// The quote that closes a string literal.
    CloseQuote,
}

impl CharClass {
    pub(crate) fn in_literal(self) -> bool {
        !matches!(self, CharClass::Structural)
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct JsonScanner {
    in_string: bool,
    escaped: bool,
}

impl JsonScanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Classify `c` and advance the state.
    pub(crate) fn step(&mut self, c: char) -> CharClass {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
                CharClass::StringContent
            } else if c == '\\' {
                self.escaped = true;
                CharClass::StringContent
            } else if c == '"' {
                self.in_string = false;
                CharClass::CloseQuote
            } else {
                CharClass::StringContent
            }
        } else if c == '"' {
            self.in_string = true;
            CharClass::OpenQuote
        } else {
            CharClass::Structural
        }
    }

    pub(crate) fn in_string(&self) -> bool {
        self.in_string
    }

    /// True when the previous char was an unconsumed backslash.
    pub(crate) fn escaped(&self) -> bool {
        self.escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(input: &str) -> Vec<CharClass> {
        let mut scanner = JsonScanner::new();
        input.chars().map(|c| scanner.step(c)).collect()
    }

    #[test]
    fn escaped_quote_stays_in_string() {
        use CharClass::*;
        assert_eq!(
            classes(r#"{"a\"b"}"#),
            vec![
                Structural,
                OpenQuote,
                StringContent,
                StringContent,
                StringContent,
                StringContent,
                CloseQuote,
                Structural
            ]
        );
    }

    #[test]
    fn braces_inside_strings_are_content() {
        let mut scanner = JsonScanner::new();
        let structural: String = r#"{"x":"{[}"}"#
            .chars()
            .filter(|c| !scanner.step(*c).in_literal())
            .collect();
        assert_eq!(structural, "{:}");
    }

    #[test]
    fn reports_unterminated_state() {
        let mut scanner = JsonScanner::new();
        for c in r#"{"a":"abc\"#.chars() {
            scanner.step(c);
        }
        assert!(scanner.in_string());
        assert!(scanner.escaped());
    }
}
