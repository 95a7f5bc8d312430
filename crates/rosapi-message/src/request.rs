use rosapi_transport::Transport;
use rosapi_word::{Communicator, WordError};
use tracing::trace;

use crate::error::{MessageError, Result};
use crate::message::{send_value, verify_value, verify_word, Message, RequestValue};
use crate::query::Query;

/// A command sent to the device.
///
/// Wire form: the command word, `.tag=<tag>` when tagged, one
/// `=<name>=<value>` word per argument, the query words, then an empty word.
#[derive(Debug)]
pub struct Request {
    command: String,
    message: Message<RequestValue>,
    query: Option<Query>,
}

impl Request {
    /// Create a request for an absolute command path.
    ///
    /// `"/ip arp print"` and `"/ip/arp/print"` are equivalent.
    pub fn new(command: &str) -> Result<Self> {
        let mut request = Self {
            command: String::new(),
            message: Message::new(),
            query: None,
        };
        request.set_command(command)?;
        Ok(request)
    }

    /// Attach a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.message.set_tag(Some(tag.into()));
        self
    }

    /// Attach a query.
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    /// Add an argument.
    pub fn with_argument(mut self, name: &str, value: impl Into<RequestValue>) -> Result<Self> {
        self.set_argument(name, value)?;
        Ok(self)
    }

    /// Normalized command path.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Replace the command, normalizing the space-separated form.
    pub fn set_command(&mut self, command: &str) -> Result<()> {
        self.command = normalize_command(command)?;
        Ok(())
    }

    /// Correlation tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.message.tag()
    }

    /// Replace the correlation tag.
    pub fn set_tag(&mut self, tag: Option<String>) {
        self.message.set_tag(tag);
    }

    /// Set an argument after validating its name.
    pub fn set_argument(&mut self, name: &str, value: impl Into<RequestValue>) -> Result<()> {
        self.message.set_argument(name, value.into())
    }

    /// Value of the argument `name`.
    pub fn argument(&self, name: &str) -> Option<&RequestValue> {
        self.message.argument(name)
    }

    /// Remove an argument, returning its value.
    pub fn remove_argument(&mut self, name: &str) -> Option<RequestValue> {
        self.message.remove_argument(name)
    }

    /// Arguments in insertion order.
    pub fn arguments(&self) -> impl Iterator<Item = (&str, &RequestValue)> {
        self.message.arguments()
    }

    /// Attached query, if any.
    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// Replace or remove the attached query.
    pub fn set_query(&mut self, query: Option<Query>) {
        self.query = query;
    }

    /// Check every word this request would emit against the word ceiling.
    ///
    /// Nothing is written, so an oversized argument is caught before the
    /// sentence is half-sent.
    pub fn verify<T: Transport>(&mut self, com: &Communicator<T>) -> Result<()> {
        verify_word(com, &self.command)?;
        if let Some(tag) = self.message.tag() {
            verify_word(com, &format!(".tag={tag}"))?;
        }
        for (name, value) in self.message.arguments_mut() {
            verify_value(com, &format!("={name}="), value)?;
        }
        if let Some(query) = &mut self.query {
            query.verify(com)?;
        }
        Ok(())
    }

    /// Send the whole sentence. Returns the number of bytes written.
    pub fn send<T: Transport>(&mut self, com: &mut Communicator<T>) -> Result<usize> {
        if !com.is_accepting_data() {
            return Err(WordError::NotAcceptingData.into());
        }
        self.verify(com)?;

        let mut sent = com.send_word(&self.command)?;
        if let Some(tag) = self.message.tag() {
            sent += com.send_word(format!(".tag={tag}"))?;
        }
        for (name, value) in self.message.arguments_mut() {
            sent += send_value(com, &format!("={name}="), value)?;
        }
        if let Some(query) = &mut self.query {
            sent += query.send(com)?;
        }
        sent += com.send_word("")?;

        trace!(command = %self.command, tag = ?self.message.tag(), sent, "sent request");
        Ok(sent)
    }
}

/// Normalize an absolute command path.
///
/// A path with a single `/` is read as space-separated menu segments where
/// `..` steps back one level.
pub fn normalize_command(command: &str) -> Result<String> {
    if !command.starts_with('/') {
        return Err(MessageError::AbsoluteCommandRequired(command.to_string()));
    }

    let normalized = if command.matches('/').count() == 1 {
        let mut segments: Vec<&str> = Vec::new();
        for segment in command
            .split(|c: char| c == '/' || c.is_whitespace())
            .filter(|segment| !segment.is_empty())
        {
            if segment == ".." {
                if segments.pop().is_none() {
                    return Err(MessageError::UnresolvableCommand(command.to_string()));
                }
            } else {
                segments.push(segment);
            }
        }
        format!("/{}", segments.join("/"))
    } else {
        command.to_string()
    };

    if normalized.len() < 2 || normalized.chars().any(char::is_whitespace) {
        return Err(MessageError::InvalidCommand(normalized));
    }
    Ok(normalized)
}
