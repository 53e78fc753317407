//! Line-oriented rendering of controller updates.
//!
//! Streamed AI replies are written inline as fragments arrive, so a reply
//! grows on one line until anything else needs the terminal.

use crate::controller::ControllerUpdate;
use chatroom_core::markup::unescape_html;
use chatroom_core::protocol::MusicAction;
use chatroom_core::router::{RenderAction, RenderTarget};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::io::{self, Write};

/// Converts router markup back to plain text.
pub fn html_to_text(html: &str) -> String {
    let html = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("&nbsp;", " ");

    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    unescape_html(&text)
}

fn clock_time(timestamp: Option<&str>) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(timestamp?).ok()?;
    Some(parsed.with_timezone(&Local).format("%H:%M:%S").to_string())
}

pub struct TerminalView<W: Write> {
    out: W,
    senders: HashMap<RenderTarget, String>,
    /// Reply whose line is still open.
    inline: Option<RenderTarget>,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            senders: HashMap::new(),
            inline: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Prints a locally generated notice.
    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        self.line(&format!("! {text}"))
    }

    pub fn render(&mut self, update: &ControllerUpdate) -> io::Result<()> {
        match update {
            ControllerUpdate::Render(action) => self.render_action(action),
            ControllerUpdate::Status(text) => self.line(&format!("! {text}")),
            ControllerUpdate::Alert(text) => self.line(&format!("!! {text}")),
            ControllerUpdate::EnteredChat { identity } => {
                self.senders.clear();
                self.line(&format!("== 已进入聊天室 ({identity}) =="))
            }
            ControllerUpdate::LeftChat => {
                self.senders.clear();
                self.line("== 已离开聊天室 ==")
            }
            ControllerUpdate::Reconnecting { attempt, delay } => self.line(&format!(
                "... 正在重新连接 (第{attempt}次, {}ms后)",
                delay.as_millis()
            )),
        }
    }

    fn render_action(&mut self, action: &RenderAction) -> io::Result<()> {
        match action {
            RenderAction::SystemNotice { text } => self.line(&format!("* {text}")),
            RenderAction::UpdateRoster(users) => {
                self.line(&format!("在线用户 ({}): {}", users.len(), users.join(", ")))
            }
            RenderAction::ChatMessage {
                sender,
                body_html,
                is_self,
                timestamp,
            } => {
                let mut header = String::new();
                if let Some(time) = clock_time(timestamp.as_deref()) {
                    header.push_str(&format!("[{time}] "));
                }
                header.push_str(sender);
                if *is_self {
                    header.push_str(" (我)");
                }
                let body = html_to_text(body_html).replace('\n', "\n    ");
                self.line(&format!("{header}: {body}"))
            }
            RenderAction::CreatePlaceholder {
                target,
                sender,
                placeholder,
                ..
            } => {
                self.senders.insert(*target, sender.clone());
                self.line(&format!("{sender}: {placeholder}"))
            }
            RenderAction::ClearPlaceholder { target } => self.open_inline(*target),
            RenderAction::AppendFragment { target, html } => {
                if self.inline != Some(*target) {
                    self.open_inline(*target)?;
                }
                write!(self.out, "{}", html_to_text(html))?;
                self.out.flush()
            }
            RenderAction::MovieEmbed {
                sender,
                player_url,
                source,
            } => self.line(&format!("{sender}: [电影] {player_url} (来源: {source})")),
            RenderAction::MusicEmbed {
                sender,
                song_name,
                artist,
                source_url,
            } => self.line(&format!("{sender}: [音乐] {song_name} - {artist} {source_url}")),
            RenderAction::TransportControl { action, song_id } => {
                let verb = match action {
                    MusicAction::Play => "播放",
                    MusicAction::Pause => "暂停",
                };
                self.line(&format!("[音乐] {song_id} 已{verb}"))
            }
            RenderAction::ImageEmbed { sender, url } => {
                self.line(&format!("{sender}: [图片] {url}"))
            }
            RenderAction::WeatherEffect { category, duration } => self.line(&format!(
                "~ 天气特效: {category} ({}s)",
                duration.as_secs()
            )),
            RenderAction::ScrollToBottom => Ok(()),
        }
    }

    fn open_inline(&mut self, target: RenderTarget) -> io::Result<()> {
        self.close_inline()?;
        let sender = self.senders.get(&target).map(String::as_str).unwrap_or("AI");
        write!(self.out, "{sender}: ")?;
        self.inline = Some(target);
        self.out.flush()
    }

    fn close_inline(&mut self) -> io::Result<()> {
        if self.inline.take().is_some() {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn line(&mut self, text: &str) -> io::Result<()> {
        self.close_inline()?;
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }
}
