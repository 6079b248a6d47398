//! Translation between the MQTT topic tree (`channels/{id}/messages[/…]`)
//! and the internal bus subject tree (`channel.{id}[.…]`), per spec §4.1.
//!
//! Parsing produces a typed `(ChannelId, Subtopic)` immediately; everything
//! downstream consumes the typed form only (spec §9, "dynamic topic
//! parsing").

use std::fmt;

use bytestring::ByteString;

/// Opaque channel identifier: non-empty, no `/` or `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(ByteString);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dot-separated extension below a channel. May be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subtopic(String);

impl Subtopic {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rejection for any topic/filter that does not match the accepted shape.
/// Maps to MQTT reason code 0x87 (or v3.1.1 "not authorized") by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTopic;

impl fmt::Display for InvalidTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid MQTT topic")
    }
}

impl std::error::Error for InvalidTopic {}

fn valid_segment(seg: &str) -> bool {
    !seg.is_empty() && !seg.contains('*') && !seg.contains('>')
}

fn valid_channel(seg: &str) -> bool {
    !seg.is_empty() && !seg.contains('/') && !seg.contains('.')
}

/// Parse a concrete PUBLISH/device-originated topic: `channels/{id}/messages`
/// or `channels/{id}/messages/{seg1}/{seg2}/…`. Leading, trailing and
/// doubled slashes are tolerated by filtering empty path elements; no
/// segment in the subtopic tail may be or contain a wildcard character.
pub fn parse_publish_topic(topic: &str) -> Result<(ChannelId, Subtopic), InvalidTopic> {
    parse(topic, false)
}

/// Parse a SUBSCRIBE filter. Identical to [`parse_publish_topic`] except the
/// final subtopic segment may be the wildcard `#` or `+` (spec §4.1 — the
/// no-wildcard restriction binds device PUBLISHes, not SUBSCRIBE filters).
/// `CanAccess` is only ever checked against the channel segment, so the
/// wildcard tail itself is not further interpreted here.
pub fn parse_filter(topic: &str) -> Result<ChannelId, InvalidTopic> {
    let (channel, _) = parse(topic, true)?;
    Ok(channel)
}

fn parse(topic: &str, allow_wildcard_tail: bool) -> Result<(ChannelId, Subtopic), InvalidTopic> {
    let mut parts = topic.split('/').filter(|s| !s.is_empty());

    if parts.next() != Some("channels") {
        return Err(InvalidTopic);
    }
    let channel = parts.next().ok_or(InvalidTopic)?;
    if !valid_channel(channel) {
        return Err(InvalidTopic);
    }
    if parts.next() != Some("messages") {
        return Err(InvalidTopic);
    }

    let tail: Vec<&str> = parts.collect();
    if allow_wildcard_tail {
        for (i, seg) in tail.iter().enumerate() {
            let last = i + 1 == tail.len();
            let wildcard_ok = last && (*seg == "#" || *seg == "+");
            if !wildcard_ok && !valid_segment(seg) {
                return Err(InvalidTopic);
            }
        }
    } else {
        for seg in &tail {
            if !valid_segment(seg) {
                return Err(InvalidTopic);
            }
        }
    }

    Ok((
        ChannelId(ByteString::from(channel)),
        Subtopic(tail.join(".")),
    ))
}

/// Render `channels/{channel}/messages[/…]` from a channel and subtopic,
/// replacing the subtopic's dot separators with slashes.
pub fn render_topic(channel: &str, subtopic: &str) -> String {
    if subtopic.is_empty() {
        format!("channels/{channel}/messages")
    } else {
        format!("channels/{channel}/messages/{}", subtopic.replace('.', "/"))
    }
}
