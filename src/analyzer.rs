//! Code-oriented tokenization shared by ingest and query parsing.
//!
//! A token is a maximal run of Unicode letters, digits, or code punctuation
//! (the symbol set below). Whitespace and every other character delimit
//! tokens and are discarded. Tokens keep their original case; fields that
//! need case-insensitive lookup index a separate lowercased value instead.

use tantivy::Index;
use tantivy::query::QueryParser;
use tantivy::schema::Field;
use tantivy::tokenizer::{TextAnalyzer, Token, TokenStream, Tokenizer};

/// Name under which the code tokenizer is registered on every index.
pub const CODE_TOKENIZER: &str = "code";

/// Punctuation that is semantically meaningful in source code and therefore
/// part of tokens rather than a delimiter.
pub fn is_code_symbol(c: char) -> bool {
    matches!(
        c,
        '_' | '.' | '@' | '#' | '$' | '&' | '+' | '-' | '*' | '/' | '\\'
            | '<' | '>' | '=' | '!' | '?' | ':' | ';' | ',' | '(' | ')'
            | '[' | ']' | '{' | '}' | '|' | '~' | '^' | '"' | '\''
    )
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || is_code_symbol(c)
}

/// Iterator over the byte spans of tokens in `text`.
///
/// This is the single source of truth for token boundaries; the tantivy
/// tokenizer below and the hint-word segmenter both run on it so ingest,
/// query parsing, and hint extraction can never disagree.
pub struct TokenSpans<'a> {
    text: &'a str,
    offset: usize,
}

impl<'a> TokenSpans<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, offset: 0 }
    }
}

impl<'a> Iterator for TokenSpans<'a> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        let rest = &self.text[self.offset..];
        let start_rel = rest.char_indices().find(|(_, c)| is_token_char(*c))?.0;
        let start = self.offset + start_rel;

        let after = &self.text[start..];
        let len = after
            .char_indices()
            .find(|(_, c)| !is_token_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(after.len());

        let end = start + len;
        self.offset = end;
        Some((start, end))
    }
}

/// Tokenize into string slices. Convenience view over [`TokenSpans`].
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    TokenSpans::new(text).map(|(start, end)| &text[start..end])
}

/// The tantivy-facing tokenizer. Case-sensitive, no stemming, no stop words.
#[derive(Clone, Default)]
pub struct CodeTokenizer {
    token: Token,
}

impl Tokenizer for CodeTokenizer {
    type TokenStream<'a> = CodeTokenStream<'a>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        self.token.reset();
        CodeTokenStream {
            text,
            spans: TokenSpans::new(text),
            token: &mut self.token,
        }
    }
}

pub struct CodeTokenStream<'a> {
    text: &'a str,
    spans: TokenSpans<'a>,
    token: &'a mut Token,
}

impl TokenStream for CodeTokenStream<'_> {
    fn advance(&mut self) -> bool {
        let Some((start, end)) = self.spans.next() else {
            return false;
        };

        self.token.text.clear();
        self.token.text.push_str(&self.text[start..end]);
        self.token.offset_from = start;
        self.token.offset_to = end;
        self.token.position = self.token.position.wrapping_add(1);
        true
    }

    fn token(&self) -> &Token {
        self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        self.token
    }
}

/// Register the code tokenizer on an index. Must run on every open, before
/// the first write or search touches a tokenized field.
pub fn register_code_tokenizer(index: &Index) {
    let analyzer = TextAnalyzer::builder(CodeTokenizer::default()).build();
    index.tokenizers().register(CODE_TOKENIZER, analyzer);
}

/// Fresh query parser over the given default fields.
///
/// Parsers are built per call; they are not shared across threads. Bare
/// whitespace between terms means AND.
pub fn query_parser(index: &Index, default_fields: Vec<Field>) -> QueryParser {
    let mut parser = QueryParser::for_index(index, default_fields);
    parser.set_conjunction_by_default();
    parser
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<&str> {
        tokenize(text).collect()
    }

    #[test]
    fn whitespace_splits_and_is_never_emitted() {
        assert_eq!(tokens("foo bar\tbaz\nqux"), vec!["foo", "bar", "baz", "qux"]);
        for token in tokens("  a  b\r\n c ") {
            assert!(!token.chars().any(char::is_whitespace));
        }
    }

    #[test]
    fn code_punctuation_stays_inside_tokens() {
        // Every character of the run is in the token class, so the whole
        // expression is one maximal token.
        assert_eq!(tokens("foo.bar+baz"), vec!["foo.bar+baz"]);
        assert_eq!(tokens("a->b c::d"), vec!["a->b", "c::d"]);
        assert_eq!(tokens("vec[i] = x;"), vec!["vec[i]", "=", "x;"]);
    }

    #[test]
    fn non_class_characters_delimit() {
        // '%' and '`' are not code symbols.
        assert_eq!(tokens("a%b"), vec!["a", "b"]);
        assert_eq!(tokens("`code`"), vec!["code"]);
        assert_eq!(tokens("100%"), vec!["100"]);
    }

    #[test]
    fn case_is_preserved() {
        assert_eq!(tokens("ReadFile READFILE readfile"), vec![
            "ReadFile", "READFILE", "readfile"
        ]);
    }

    #[test]
    fn unicode_letters_are_token_chars() {
        assert_eq!(tokens("café naïve_überMode"), vec!["café", "naïve_überMode"]);
    }

    #[test]
    fn tantivy_stream_matches_span_iterator() {
        let text = "fn main() { println!(\"hi\"); }";
        let expected = tokens(text);

        let mut tokenizer = CodeTokenizer::default();
        let mut stream = tokenizer.token_stream(text);
        let mut emitted = Vec::new();
        while stream.advance() {
            let token = stream.token();
            assert_eq!(&text[token.offset_from..token.offset_to], token.text);
            emitted.push(token.text.clone());
        }
        assert_eq!(emitted, expected);
    }
}
