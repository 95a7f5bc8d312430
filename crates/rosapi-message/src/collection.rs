use std::collections::BTreeMap;
use std::ops::Index;

use crate::response::{Response, ResponseType};

/// Ordered responses returned by synchronous session calls.
#[derive(Debug, Clone, Default)]
pub struct ResponseCollection {
    responses: Vec<Response>,
}

impl ResponseCollection {
    /// Wrap responses in wire order.
    pub fn new(responses: Vec<Response>) -> Self {
        Self { responses }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Response> {
        self.responses.get(index)
    }

    pub fn first(&self) -> Option<&Response> {
        self.responses.first()
    }

    pub fn last(&self) -> Option<&Response> {
        self.responses.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Response> {
        self.responses.iter()
    }

    /// Append one response.
    pub fn push(&mut self, response: Response) {
        self.responses.push(response);
    }

    /// Append every response of `other`.
    pub fn append(&mut self, other: ResponseCollection) {
        self.responses.extend(other.responses);
    }

    /// Responses of one type, in order.
    pub fn all_of_type(&self, response_type: ResponseType) -> ResponseCollection {
        self.filtered(|response| response.is(response_type))
    }

    /// Responses carrying `tag`, in order.
    pub fn all_tagged(&self, tag: &str) -> ResponseCollection {
        self.filtered(|response| response.tag() == Some(tag))
    }

    /// Every argument name seen across the collection, in first-seen order.
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, _) in self.responses.iter().flat_map(Response::arguments) {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Responses keyed by the text value of `argument`.
    ///
    /// Responses without the argument are skipped; on duplicate values the
    /// later response wins.
    pub fn index_by(&self, argument: &str) -> BTreeMap<String, &Response> {
        self.responses
            .iter()
            .filter_map(|response| {
                response
                    .argument_str(argument)
                    .map(|value| (value.into_owned(), response))
            })
            .collect()
    }

    /// Cursor positioned at the first response.
    pub fn cursor(&self) -> ResponseCursor<'_> {
        ResponseCursor {
            collection: self,
            position: 0,
        }
    }

    /// Consume the collection, returning the responses.
    pub fn into_vec(self) -> Vec<Response> {
        self.responses
    }

    fn filtered(&self, keep: impl Fn(&Response) -> bool) -> ResponseCollection {
        ResponseCollection::new(
            self.responses
                .iter()
                .filter(|response| keep(response))
                .cloned()
                .collect(),
        )
    }
}

impl Index<usize> for ResponseCollection {
    type Output = Response;

    fn index(&self, index: usize) -> &Response {
        &self.responses[index]
    }
}

impl IntoIterator for ResponseCollection {
    type Item = Response;
    type IntoIter = std::vec::IntoIter<Response>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResponseCollection {
    type Item = &'a Response;
    type IntoIter = std::slice::Iter<'a, Response>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.iter()
    }
}

impl FromIterator<Response> for ResponseCollection {
    fn from_iter<I: IntoIterator<Item = Response>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Extend<Response> for ResponseCollection {
    fn extend<I: IntoIterator<Item = Response>>(&mut self, iter: I) {
        self.responses.extend(iter);
    }
}

/// Explicit position over a [`ResponseCollection`].
///
/// The position may move past the end, where [`ResponseCursor::current`]
/// returns `None`.
#[derive(Debug, Clone, Copy)]
pub struct ResponseCursor<'a> {
    collection: &'a ResponseCollection,
    position: usize,
}

impl<'a> ResponseCursor<'a> {
    /// Response at the current position.
    pub fn current(&self) -> Option<&'a Response> {
        self.collection.get(self.position)
    }

    /// Current position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move forward one response and return it.
    pub fn advance(&mut self) -> Option<&'a Response> {
        if self.position < self.collection.len() {
            self.position += 1;
        }
        self.current()
    }

    /// Move to `index` and return the response there.
    pub fn seek(&mut self, index: usize) -> Option<&'a Response> {
        self.position = index.min(self.collection.len());
        self.current()
    }

    /// Move to the first response at or after the current position with `tag`.
    ///
    /// Leaves the cursor past the end when no such response exists.
    pub fn seek_tag(&mut self, tag: &str) -> Option<&'a Response> {
        let found = self.collection.responses[self.position..]
            .iter()
            .position(|response| response.tag() == Some(tag));
        self.position = match found {
            Some(offset) => self.position + offset,
            None => self.collection.len(),
        };
        self.current()
    }

    /// Move back to the first response.
    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl<'a> Iterator for ResponseCursor<'a> {
    type Item = &'a Response;

    fn next(&mut self) -> Option<&'a Response> {
        let current = self.current()?;
        self.position += 1;
        Some(current)
    }
}
