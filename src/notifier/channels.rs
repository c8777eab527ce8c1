//! Bus channel naming.
//!
//! Channel names are a cross-process contract; the formats here are
//! bit-exact and shared by every publisher and subscriber.

use crate::protocol::{ConversationId, RoomId, UserId};

pub const USER_CHANNEL_PREFIX: &str = "notifications:user:";
pub const BROADCAST_CHANNEL: &str = "notifications:broadcast";
pub const CHAT_CHANNEL_PREFIX: &str = "chat:conv:";
pub const TYPING_CHANNEL_PREFIX: &str = "typing:conv:";
pub const PRESENCE_CHANNEL_PREFIX: &str = "presence:conv:";
pub const GAME_CHANNEL_PREFIX: &str = "game:room:";
pub const VIDEO_CHAT_CHANNEL_PREFIX: &str = "videochat:room:";

pub fn user_channel(user_id: UserId) -> String {
    format!("{USER_CHANNEL_PREFIX}{user_id}")
}

pub fn chat_channel(conversation_id: ConversationId) -> String {
    format!("{CHAT_CHANNEL_PREFIX}{conversation_id}")
}

pub fn typing_channel(conversation_id: ConversationId) -> String {
    format!("{TYPING_CHANNEL_PREFIX}{conversation_id}")
}

pub fn presence_channel(conversation_id: ConversationId) -> String {
    format!("{PRESENCE_CHANNEL_PREFIX}{conversation_id}")
}

pub fn game_channel(room_id: RoomId) -> String {
    format!("{GAME_CHANNEL_PREFIX}{room_id}")
}

pub fn video_chat_channel(room_id: &str) -> String {
    format!("{VIDEO_CHAT_CHANNEL_PREFIX}{room_id}")
}

/// Which conversation-scoped stream a chat channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatChannelKind {
    Message,
    Typing,
    Presence,
}

impl ChatChannelKind {
    /// The default envelope `type` implied by the channel prefix.
    pub fn default_message_kind(&self) -> &'static str {
        match self {
            ChatChannelKind::Message => crate::protocol::chat::kind::MESSAGE,
            ChatChannelKind::Typing => crate::protocol::chat::kind::TYPING,
            ChatChannelKind::Presence => crate::protocol::chat::kind::PRESENCE,
        }
    }
}

pub fn parse_user_channel(channel: &str) -> Option<UserId> {
    channel.strip_prefix(USER_CHANNEL_PREFIX)?.parse().ok()
}

pub fn parse_chat_channel(channel: &str) -> Option<(ChatChannelKind, ConversationId)> {
    for (prefix, kind) in [
        (CHAT_CHANNEL_PREFIX, ChatChannelKind::Message),
        (TYPING_CHANNEL_PREFIX, ChatChannelKind::Typing),
        (PRESENCE_CHANNEL_PREFIX, ChatChannelKind::Presence),
    ] {
        if let Some(rest) = channel.strip_prefix(prefix) {
            return rest.parse().ok().map(|conv| (kind, conv));
        }
    }
    None
}

pub fn parse_game_channel(channel: &str) -> Option<RoomId> {
    channel.strip_prefix(GAME_CHANNEL_PREFIX)?.parse().ok()
}

pub fn parse_video_chat_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix(VIDEO_CHAT_CHANNEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_formats_are_bit_exact() {
        assert_eq!(user_channel(UserId(7)), "notifications:user:7");
        assert_eq!(chat_channel(ConversationId(12)), "chat:conv:12");
        assert_eq!(typing_channel(ConversationId(12)), "typing:conv:12");
        assert_eq!(presence_channel(ConversationId(12)), "presence:conv:12");
        assert_eq!(game_channel(RoomId(3)), "game:room:3");
        assert_eq!(video_chat_channel("lobby-9"), "videochat:room:lobby-9");
    }

    #[test]
    fn parse_round_trips() {
        assert_eq!(
            parse_user_channel("notifications:user:44"),
            Some(UserId(44))
        );
        assert_eq!(parse_user_channel("notifications:broadcast"), None);
        assert_eq!(
            parse_chat_channel("typing:conv:5"),
            Some((ChatChannelKind::Typing, ConversationId(5)))
        );
        assert_eq!(parse_chat_channel("chat:conv:abc"), None);
        assert_eq!(parse_game_channel("game:room:19"), Some(RoomId(19)));
        assert_eq!(parse_video_chat_channel("videochat:room:x"), Some("x"));
    }
}
