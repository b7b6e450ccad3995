//! Topic names
//!
//! Topics are compared by exact string equality. `+` and `#` are ordinary
//! characters here, there is no wildcard matching.

use alloc::string::String;

use crate::protocol::ProtocolError;

/// Topic name
/// A non-empty UTF-8 topic, used for publications and subscriptions alike.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicName(String);

impl TopicName {
    pub fn new(name: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ProtocolError::TopicEmpty);
        }
        Ok(TopicName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&str> for TopicName {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        TopicName::new(value)
    }
}

impl core::borrow::Borrow<str> for TopicName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl core::ops::Deref for TopicName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::fmt::Display for TopicName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_topic_rejected() {
        assert_eq!(TopicName::new(""), Err(ProtocolError::TopicEmpty));
    }

    #[test]
    fn test_wildcards_are_literal() {
        let topic = TopicName::try_from("a/+").unwrap();
        assert_eq!(topic.as_str(), "a/+");
        assert_ne!(topic, TopicName::try_from("a/b").unwrap());
    }

    #[test]
    fn test_exact_comparison() {
        let ab = TopicName::try_from("a/b").unwrap();
        assert_ne!(ab, TopicName::try_from("a/b/c").unwrap());
        assert_ne!(ab, TopicName::try_from("a").unwrap());
        assert_eq!(ab, TopicName::try_from("a/b").unwrap());
    }
}
