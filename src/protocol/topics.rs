//! MQTT topic name and topic filter validation
//!
//! Publish topics must be concrete names; subscription filters may use the
//! `+` and `#` wildcards in the positions MQTT allows.

use thiserror::Error;

/// Maximum encoded length of an MQTT topic string
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Validate a topic used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;

    if let Some(ch) = topic.chars().find(|c| *c == '+' || *c == '#') {
        return Err(TopicError::WildcardInTopicName(ch));
    }

    Ok(())
}

/// Validate a topic filter used for subscribing
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
    }

    Ok(())
}

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(topic.len()));
    }
    if topic.contains('\0') {
        return Err(TopicError::NullCharacter);
    }
    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic is {0} bytes, exceeding the 65535 byte limit")]
    TooLong(usize),
    #[error("Topic cannot contain a NUL character")]
    NullCharacter,
    #[error("Topic name cannot contain wildcard '{0}'")]
    WildcardInTopicName(char),
    #[error("Wildcard must occupy an entire topic level: {0}")]
    MisplacedWildcard(String),
}
