//! Turns inbound events into presentation-neutral render actions.
//!
//! The router owns the streaming state of AI replies: every `ai_chat` gets a
//! render target and a placeholder, and each later `ai_stream_update` with
//! the same id is appended to that target in arrival order. The presentation
//! layer never has to look anything up by markup id.

use crate::markup::{escape_html, format_chat_body};
use crate::protocol::{ConversationId, InboundEvent, MusicAction};
use crate::weather::{EFFECT_DURATION, WeatherCategory};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const THINKING_PLACEHOLDER: &str = "🤖 AI 正在思考中...";
pub const MOVIE_RESOLVER_PREFIX: &str = "https://jx.m3u8.tv/jiexi/?url=";
pub const UNKNOWN_SONG: &str = "未知歌曲";
pub const UNKNOWN_ARTIST: &str = "未知歌手";

/// Maximum distance from the bottom that still counts as "following".
pub const NEAR_BOTTOM_SLACK: u32 = 16;

/// Opaque handle for a rendered streaming reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTarget(u64);

impl RenderTarget {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// How streamed AI fragments are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentPolicy {
    /// Fragments are escaped and newlines become `<br>`.
    #[default]
    Escape,
    /// Fragments are appended as the server sent them.
    TrustedHtml,
}

/// Scroll geometry of the message view, as last reported by the presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub scroll_top: u32,
    pub client_height: u32,
    pub scroll_height: u32,
}

impl Viewport {
    pub fn is_near_bottom(&self) -> bool {
        let visible_bottom = self.scroll_top.saturating_add(self.client_height);
        self.scroll_height.saturating_sub(visible_bottom) <= NEAR_BOTTOM_SLACK
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderAction {
    SystemNotice {
        text: String,
    },
    UpdateRoster(Vec<String>),
    ChatMessage {
        sender: String,
        body_html: String,
        is_self: bool,
        timestamp: Option<String>,
    },
    CreatePlaceholder {
        target: RenderTarget,
        conversation: ConversationId,
        sender: String,
        placeholder: String,
    },
    ClearPlaceholder {
        target: RenderTarget,
    },
    AppendFragment {
        target: RenderTarget,
        html: String,
    },
    MovieEmbed {
        sender: String,
        player_url: String,
        source: String,
    },
    MusicEmbed {
        sender: String,
        song_name: String,
        artist: String,
        source_url: String,
    },
    /// Advisory only; the local player stays authoritative.
    TransportControl {
        action: MusicAction,
        song_id: String,
    },
    ImageEmbed {
        sender: String,
        url: String,
    },
    WeatherEffect {
        category: WeatherCategory,
        duration: Duration,
    },
    ScrollToBottom,
}

#[derive(Debug, Clone)]
struct StreamingReply {
    target: RenderTarget,
    started: bool,
    html: String,
}

#[derive(Debug, Default)]
pub struct MessageRouter {
    replies: HashMap<ConversationId, StreamingReply>,
    viewport: Viewport,
    policy: ContentPolicy,
    next_target: u64,
}

impl MessageRouter {
    pub fn new(policy: ContentPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Handles one inbound event. Events must be fed in arrival order.
    pub fn dispatch(
        &mut self,
        event: &InboundEvent,
        current_identity: &str,
    ) -> Vec<RenderAction> {
        // Decided before anything renders and grows the view.
        let follow = self.viewport.is_near_bottom();

        let mut actions = match event {
            InboundEvent::System(system) => {
                let mut actions = vec![RenderAction::SystemNotice {
                    text: system.content.clone(),
                }];
                if let Some(users) = &system.online_users {
                    actions.push(RenderAction::UpdateRoster(users.clone()));
                }
                actions
            }
            InboundEvent::Chat(chat) => {
                let mut actions = vec![RenderAction::ChatMessage {
                    sender: chat.sender.clone(),
                    body_html: format_chat_body(&chat.content),
                    is_self: chat.sender == current_identity,
                    timestamp: chat.timestamp.clone(),
                }];
                if let Some(description) = &chat.weather_description {
                    actions.push(RenderAction::WeatherEffect {
                        category: WeatherCategory::from_description(description),
                        duration: EFFECT_DURATION,
                    });
                }
                actions
            }
            InboundEvent::AiChat(open) => {
                let target = self.allocate_target();
                self.replies.insert(
                    open.id.clone(),
                    StreamingReply {
                        target,
                        started: false,
                        html: THINKING_PLACEHOLDER.to_string(),
                    },
                );
                vec![RenderAction::CreatePlaceholder {
                    target,
                    conversation: open.id.clone(),
                    sender: open.sender.clone(),
                    placeholder: THINKING_PLACEHOLDER.to_string(),
                }]
            }
            InboundEvent::AiStreamUpdate(update) => {
                let policy = self.policy;
                let Some(reply) = self.replies.get_mut(&update.id) else {
                    debug!(id = %update.id, "Dropping stream update for unknown reply");
                    return Vec::new();
                };

                let mut actions = Vec::with_capacity(3);
                if !reply.started {
                    reply.started = true;
                    reply.html.clear();
                    actions.push(RenderAction::ClearPlaceholder {
                        target: reply.target,
                    });
                }
                let html = match policy {
                    ContentPolicy::Escape => escape_html(&update.content).replace('\n', "<br>"),
                    ContentPolicy::TrustedHtml => update.content.clone(),
                };
                reply.html.push_str(&html);
                actions.push(RenderAction::AppendFragment {
                    target: reply.target,
                    html,
                });
                actions
            }
            InboundEvent::Movie(movie) => vec![RenderAction::MovieEmbed {
                sender: movie.sender.clone(),
                player_url: format!("{MOVIE_RESOLVER_PREFIX}{}", movie.content),
                source: movie.content.clone(),
            }],
            InboundEvent::Music(music) => vec![RenderAction::MusicEmbed {
                sender: music.sender.clone(),
                song_name: non_empty_or(&music.song_name, UNKNOWN_SONG),
                artist: non_empty_or(&music.artist, UNKNOWN_ARTIST),
                source_url: music.song_url.clone().unwrap_or_default(),
            }],
            InboundEvent::MusicControl(control) => vec![RenderAction::TransportControl {
                action: control.action,
                song_id: control.song_id.clone(),
            }],
            InboundEvent::NewsImage(image) => vec![RenderAction::ImageEmbed {
                sender: image.sender.clone(),
                url: image.content.clone(),
            }],
        };

        if follow && !actions.is_empty() {
            actions.push(RenderAction::ScrollToBottom);
        }
        actions
    }

    /// Accumulated markup of a streaming reply.
    pub fn reply_html(&self, id: &ConversationId) -> Option<&str> {
        self.replies.get(id).map(|reply| reply.html.as_str())
    }

    /// Whether the reply has received its first fragment.
    pub fn is_streaming(&self, id: &ConversationId) -> bool {
        self.replies.get(id).is_some_and(|reply| reply.started)
    }

    /// Forgets all replies and the viewport. Targets are never reused.
    pub fn reset(&mut self) {
        self.replies.clear();
        self.viewport = Viewport::default();
    }

    fn allocate_target(&mut self) -> RenderTarget {
        self.next_target += 1;
        RenderTarget(self.next_target)
    }
}

fn non_empty_or(value: &Option<String>, fallback: &str) -> String {
    match value.as_deref() {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => fallback.to_string(),
    }
}
