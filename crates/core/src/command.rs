//! Classifies what the user typed before anything is sent.

use crate::protocol::FrameKind;

pub const WEATHER_PREFIX: &str = "@天气";
pub const AI_PREFIX: &str = "@川小农 ";
pub const MOVIE_PREFIX: &str = "@电影 ";
pub const NEWS_COMMAND: &str = "@新闻";

/// Features handled locally instead of being sent as a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureCommand<'a> {
    /// `@天气 <city>`. The city is the first word after the prefix.
    Weather { city: Option<&'a str> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound<'a> {
    /// Nothing but whitespace. Never sent.
    Empty,
    Feature(FeatureCommand<'a>),
    /// Send `content` tagged as `kind`. Feature frames keep their prefix.
    Frame { kind: FrameKind, content: &'a str },
}

pub fn classify(input: &str) -> Outbound<'_> {
    let content = input.trim();
    if content.is_empty() {
        return Outbound::Empty;
    }

    if content.starts_with(WEATHER_PREFIX) {
        let city = content.split_whitespace().nth(1);
        return Outbound::Feature(FeatureCommand::Weather { city });
    }

    let kind = if content.starts_with(AI_PREFIX) {
        FrameKind::Ai
    } else if content.starts_with(MOVIE_PREFIX) {
        FrameKind::Movie
    } else if content == NEWS_COMMAND {
        FrameKind::News
    } else if content.starts_with('/') {
        FrameKind::Command
    } else {
        FrameKind::Chat
    };
    Outbound::Frame { kind, content }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_a_no_op() {
        assert_eq!(classify(""), Outbound::Empty);
        assert_eq!(classify("  \n\t"), Outbound::Empty);
    }

    #[test]
    fn test_slash_is_a_command() {
        assert_eq!(
            classify("/help"),
            Outbound::Frame {
                kind: FrameKind::Command,
                content: "/help"
            }
        );
    }

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(
            classify("  hello  "),
            Outbound::Frame {
                kind: FrameKind::Chat,
                content: "hello"
            }
        );
    }

    #[test]
    fn test_weather_is_intercepted() {
        assert_eq!(
            classify("@天气 北京"),
            Outbound::Feature(FeatureCommand::Weather { city: Some("北京") })
        );
        assert_eq!(
            classify("@天气"),
            Outbound::Feature(FeatureCommand::Weather { city: None })
        );
    }

    #[test]
    fn test_feature_frames_keep_the_prefix() {
        assert_eq!(
            classify("@川小农 今天吃什么"),
            Outbound::Frame {
                kind: FrameKind::Ai,
                content: "@川小农 今天吃什么"
            }
        );
        assert_eq!(
            classify("@电影 https://v.example/1.m3u8"),
            Outbound::Frame {
                kind: FrameKind::Movie,
                content: "@电影 https://v.example/1.m3u8"
            }
        );
        assert_eq!(
            classify("@新闻"),
            Outbound::Frame {
                kind: FrameKind::News,
                content: "@新闻"
            }
        );
    }

    #[test]
    fn test_near_miss_prefixes_are_chat() {
        for input in ["@川小农", "@新闻 今天", "@电影"] {
            match classify(input) {
                Outbound::Frame { kind, .. } => assert_eq!(kind, FrameKind::Chat, "{input}"),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
