//! Boolean query dialect.
//!
//! Queries use bracketed terms joined by upper-case connectors:
//! `[AI] AND (["machine learning"] OR [deep learning]) AND NOT [survey]`.
//! Text with no brackets at all is taken as a single term. Each database
//! adapter renders the parsed expression into its provider's own syntax.

use crate::error::{PaperError, Result};
use std::path::Path;
use tracing::debug;

/// Directory searched first for saved query files
pub const QUERIES_DIR: &str = "queries";

/// Parsed boolean query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Term(String),
    And(Box<QueryExpr>, Box<QueryExpr>),
    Or(Box<QueryExpr>, Box<QueryExpr>),
    AndNot(Box<QueryExpr>, Box<QueryExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Term(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

/// Parse query text into an expression tree.
///
/// # Errors
///
/// Returns `PaperError::Query` for empty input, unbalanced brackets or
/// parentheses, empty terms, text outside brackets and dangling operators.
pub fn parse(text: &str) -> Result<QueryExpr> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PaperError::Query("query is empty".to_string()));
    }

    if !text.contains('[') && !text.contains(']') {
        return Ok(QueryExpr::Term(unquote(text).to_string()));
    }

    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(PaperError::Query(format!("unexpected {:?} after end of expression", tok)));
    }
    Ok(expr)
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
        .trim()
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(idx, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '[' => {
                chars.next();
                let mut term = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    match ch {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '[' => return Err(PaperError::Query("nested '[' inside a term".to_string())),
                        _ => term.push(ch),
                    }
                }
                if !closed {
                    return Err(PaperError::Query(format!("unclosed '[' at position {}", idx)));
                }
                let term = unquote(&term);
                if term.is_empty() {
                    return Err(PaperError::Query(format!("empty term at position {}", idx)));
                }
                tokens.push(Token::Term(term.to_string()));
            }
            ']' => return Err(PaperError::Query(format!("unmatched ']' at position {}", idx))),
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '[' | ']' | '(' | ')') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    other => {
                        return Err(PaperError::Query(format!(
                            "unexpected '{}' outside brackets (terms go in [..], connectors are AND, OR, AND NOT)",
                            other
                        )))
                    }
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Result<QueryExpr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = QueryExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<QueryExpr> {
        let mut left = self.parse_primary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let negated = if self.peek() == Some(&Token::Not) {
                self.next();
                true
            } else {
                false
            };
            let right = self.parse_primary()?;
            left = if negated {
                QueryExpr::AndNot(Box::new(left), Box::new(right))
            } else {
                QueryExpr::And(Box::new(left), Box::new(right))
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<QueryExpr> {
        match self.next() {
            Some(Token::Term(t)) => Ok(QueryExpr::Term(t)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(PaperError::Query("unclosed '('".to_string())),
                }
            }
            Some(Token::Not) => Err(PaperError::Query(
                "NOT must follow AND (use 'AND NOT')".to_string(),
            )),
            Some(tok) => Err(PaperError::Query(format!("expected a term, found {:?}", tok))),
            None => Err(PaperError::Query("query ends with a dangling operator".to_string())),
        }
    }
}

impl QueryExpr {
    /// Terms that are not under an `AND NOT`
    pub fn positive_terms(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_positive(&mut out);
        out
    }

    fn collect_positive<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            QueryExpr::Term(t) => out.push(t),
            QueryExpr::And(l, r) | QueryExpr::Or(l, r) => {
                l.collect_positive(out);
                r.collect_positive(out);
            }
            QueryExpr::AndNot(l, _) => l.collect_positive(out),
        }
    }

    /// PubMed Entrez syntax: `"term"[All Fields] AND ...`
    pub fn to_pubmed(&self) -> String {
        self.render(&|t: &str| format!("\"{}\"[All Fields]", t), "AND", "OR", "NOT")
    }

    /// arXiv API `search_query` syntax: `all:"term" AND ...`
    pub fn to_arxiv(&self) -> String {
        self.render(
            &|t: &str| {
                if t.contains(char::is_whitespace) {
                    format!("all:\"{}\"", t)
                } else {
                    format!("all:{}", t)
                }
            },
            "AND",
            "OR",
            "ANDNOT",
        )
    }

    /// Free-text form for providers without boolean support
    pub fn to_free_text(&self) -> String {
        self.positive_terms().join(" ")
    }

    fn render(&self, term: &dyn Fn(&str) -> String, and: &str, or: &str, not: &str) -> String {
        let wrap = |e: &QueryExpr| -> String {
            match e {
                QueryExpr::Term(_) => e.render(term, and, or, not),
                _ => format!("({})", e.render(term, and, or, not)),
            }
        };
        match self {
            QueryExpr::Term(t) => term(t),
            QueryExpr::And(l, r) => format!("{} {} {}", wrap(l), and, wrap(r)),
            QueryExpr::Or(l, r) => format!("{} {} {}", wrap(l), or, wrap(r)),
            QueryExpr::AndNot(l, r) => format!("{} {} {}", wrap(l), not, wrap(r)),
        }
    }
}

/// Read a saved query.
///
/// # Arguments
///
/// * `name` - File name under `queries_dir`, or a path
/// * `queries_dir` - Directory tried before `name` itself
pub fn read_query_file(name: &Path, queries_dir: &Path) -> Result<String> {
    let saved = queries_dir.join(name);
    let path = [saved.as_path(), name]
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| PaperError::Query(format!("query file not found: {}", name.display())))?;

    let text = std::fs::read_to_string(path)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(PaperError::Query(format!("query file is empty: {}", path.display())));
    }
    debug!(path = %path.display(), "Read query file");
    Ok(text.to_string())
}
