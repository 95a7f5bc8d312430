use std::fmt;
use std::str::FromStr;

use rosapi_transport::Transport;
use rosapi_word::Communicator;

use crate::error::{MessageError, Result};
use crate::message::{send_value, verify_value, verify_word, RequestValue};

/// Comparison applied by a query predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryOp {
    /// The property is present.
    #[default]
    Exists,
    /// The property is absent.
    NotExists,
    /// The property equals the value.
    Equals,
    /// The property is less than the value.
    LessThan,
    /// The property is greater than the value.
    GreaterThan,
}

impl QueryOp {
    /// Operator code as written after `?` on the wire.
    pub fn code(self) -> &'static str {
        match self {
            QueryOp::Exists => "",
            QueryOp::NotExists => "-",
            QueryOp::Equals => "=",
            QueryOp::LessThan => "<",
            QueryOp::GreaterThan => ">",
        }
    }

    /// Parse an operator code.
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "" => Ok(QueryOp::Exists),
            "-" => Ok(QueryOp::NotExists),
            "=" => Ok(QueryOp::Equals),
            "<" => Ok(QueryOp::LessThan),
            ">" => Ok(QueryOp::GreaterThan),
            other => Err(MessageError::UnknownQueryAction(other.to_string())),
        }
    }
}

impl FromStr for QueryOp {
    type Err = MessageError;

    fn from_str(code: &str) -> Result<Self> {
        QueryOp::from_code(code)
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug)]
enum QueryWord {
    Predicate {
        op: QueryOp,
        name: String,
        value: Option<RequestValue>,
    },
    Not,
    Or,
    And,
}

impl QueryWord {
    fn combinator(&self) -> Option<&'static str> {
        match self {
            QueryWord::Predicate { .. } => None,
            QueryWord::Not => Some("?#!"),
            QueryWord::Or => Some("?#|"),
            QueryWord::And => Some("?#&"),
        }
    }
}

/// Filter attached to a print-like request.
///
/// Built left to right; combinators apply to the words before them, so
/// `where_(a).or_where(b).and_where(c)` means `(a or b) and c`.
#[derive(Debug)]
pub struct Query {
    words: Vec<QueryWord>,
}

impl Query {
    /// Start a query with one predicate.
    pub fn where_(name: impl Into<String>, value: Option<RequestValue>, op: QueryOp) -> Self {
        let mut query = Self { words: Vec::new() };
        query.push_predicate(name.into(), value, op);
        query
    }

    /// Append a predicate and AND it with what came before.
    pub fn and_where(mut self, name: impl Into<String>, value: Option<RequestValue>, op: QueryOp) -> Self {
        self.push_predicate(name.into(), value, op);
        self.words.push(QueryWord::And);
        self
    }

    /// Append a predicate and OR it with what came before.
    pub fn or_where(mut self, name: impl Into<String>, value: Option<RequestValue>, op: QueryOp) -> Self {
        self.push_predicate(name.into(), value, op);
        self.words.push(QueryWord::Or);
        self
    }

    /// Negate the last expression.
    pub fn not(mut self) -> Self {
        self.words.push(QueryWord::Not);
        self
    }

    /// Number of words the query sends.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the query holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Check every query word against the word ceiling.
    pub fn verify<T: Transport>(&mut self, com: &Communicator<T>) -> Result<()> {
        for word in &mut self.words {
            match word {
                QueryWord::Predicate { op, name, value } => {
                    let prefix = format!("?{}{name}", op.code());
                    match value {
                        Some(value) => verify_value(com, &format!("{prefix}="), value)?,
                        None => verify_word(com, &prefix)?,
                    }
                }
                other => {
                    if let Some(combinator) = other.combinator() {
                        verify_word(com, combinator)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Send the query words. Returns the number of bytes written.
    pub fn send<T: Transport>(&mut self, com: &mut Communicator<T>) -> Result<usize> {
        let mut sent = 0;
        for word in &mut self.words {
            sent += match word {
                QueryWord::Predicate { op, name, value } => {
                    let prefix = format!("?{}{name}", op.code());
                    match value {
                        Some(value) => send_value(com, &format!("{prefix}="), value)?,
                        None => com.send_word(&prefix)?,
                    }
                }
                other => match other.combinator() {
                    Some(combinator) => com.send_word(combinator)?,
                    None => 0,
                },
            };
        }
        Ok(sent)
    }

    fn push_predicate(&mut self, name: String, value: Option<RequestValue>, op: QueryOp) {
        self.words.push(QueryWord::Predicate { op, name, value });
    }
}
