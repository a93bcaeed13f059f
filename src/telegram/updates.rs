//! Conversion of raw Telegram updates and messages.

use grammers_tl_types as tl;

use super::peers::{ChatRef, peer_to_chat_id};
use crate::events::{MediaInfo, MessageUpdate, ProviderUpdate};

/// Classifies a raw update; kinds nobody listens to yield `None`.
#[must_use]
pub fn from_raw_update(update: &tl::enums::Update) -> Option<ProviderUpdate> {
    use tl::enums::Update;

    match update {
        Update::NewMessage(u) => new_message(&u.message, false),
        Update::NewChannelMessage(u) => new_message(&u.message, false),
        Update::EditMessage(u) => new_message(&u.message, true),
        Update::EditChannelMessage(u) => new_message(&u.message, true),
        Update::DeleteMessages(u) => Some(ProviderUpdate::DeleteMessages {
            message_ids: u.messages.clone(),
        }),
        Update::DeleteChannelMessages(u) => Some(ProviderUpdate::DeleteChannelMessages {
            chat_id: ChatRef::Channel(u.channel_id).to_string(),
            message_ids: u.messages.clone(),
        }),
        Update::UserStatus(u) => {
            let was_online = match &u.status {
                tl::enums::UserStatus::Offline(offline) => Some(i64::from(offline.was_online)),
                _ => None,
            };
            Some(ProviderUpdate::UserStatus {
                user_id: u.user_id.to_string(),
                status: variant_name(&u.status, ""),
                was_online,
            })
        }
        Update::UserTyping(u) => Some(ProviderUpdate::UserTyping {
            user_id: u.user_id.to_string(),
            action: action_name(&u.action),
        }),
        Update::ChatUserTyping(u) => Some(ProviderUpdate::ChatUserTyping {
            chat_id: ChatRef::Chat(u.chat_id).to_string(),
            user_id: Some(peer_to_chat_id(&u.from_id)),
            action: action_name(&u.action),
        }),
        Update::ChannelUserTyping(u) => Some(ProviderUpdate::ChatUserTyping {
            chat_id: ChatRef::Channel(u.channel_id).to_string(),
            user_id: Some(peer_to_chat_id(&u.from_id)),
            action: action_name(&u.action),
        }),
        _ => None,
    }
}

/// Classifies a new (or edited) message by the kind of chat it belongs to.
#[must_use]
pub fn new_message(message: &tl::enums::Message, edited: bool) -> Option<ProviderUpdate> {
    let tl::enums::Message::Message(raw) = message else {
        return None;
    };
    let in_channel = matches!(raw.peer_id, tl::enums::Peer::Channel(_));
    let update = message_update(raw);

    Some(match (edited, in_channel) {
        (false, false) => ProviderUpdate::NewMessage(update),
        (false, true) => ProviderUpdate::NewChannelMessage(update),
        (true, false) => ProviderUpdate::EditMessage(update),
        (true, true) => ProviderUpdate::EditChannelMessage(update),
    })
}

/// Extracts the fields the rest of the bot works with.
#[must_use]
pub fn message_update(raw: &tl::types::Message) -> MessageUpdate {
    // Private incoming messages carry no `from_id`; the sender is the chat itself.
    let sender_id = match (&raw.from_id, &raw.peer_id) {
        (Some(from), _) => Some(peer_to_chat_id(from)),
        (None, tl::enums::Peer::User(_)) if !raw.out => Some(peer_to_chat_id(&raw.peer_id)),
        _ => None,
    };

    MessageUpdate {
        chat_id: peer_to_chat_id(&raw.peer_id),
        message_id: raw.id,
        sender_id,
        text: raw.message.clone(),
        date: i64::from(raw.date),
        media: raw.media.as_ref().and_then(media_info),
        outgoing: raw.out,
    }
}

/// Describes attached media; `None` when there is none.
#[must_use]
pub fn media_info(media: &tl::enums::MessageMedia) -> Option<MediaInfo> {
    use tl::enums::MessageMedia;

    let info = match media {
        MessageMedia::Empty => return None,
        MessageMedia::Photo(p) => MediaInfo::Photo {
            photo_id: p.photo.as_ref().map(|photo| match photo {
                tl::enums::Photo::Photo(ph) => ph.id.to_string(),
                tl::enums::Photo::Empty(ph) => ph.id.to_string(),
            }),
        },
        MessageMedia::Document(d) => match &d.document {
            Some(tl::enums::Document::Document(doc)) => MediaInfo::Document {
                document_id: Some(doc.id.to_string()),
                mime_type: Some(doc.mime_type.clone()),
                file_name: doc.attributes.iter().find_map(|attr| match attr {
                    tl::enums::DocumentAttribute::Filename(f) => Some(f.file_name.clone()),
                    _ => None,
                }),
            },
            _ => MediaInfo::Document {
                document_id: None,
                mime_type: None,
                file_name: None,
            },
        },
        MessageMedia::Geo(g) => match &g.geo {
            tl::enums::GeoPoint::Point(p) => MediaInfo::Geo {
                latitude: p.lat,
                longitude: p.long,
            },
            tl::enums::GeoPoint::Empty => MediaInfo::Other {
                kind: "geo".to_owned(),
            },
        },
        MessageMedia::Contact(c) => MediaInfo::Contact {
            phone: c.phone_number.clone(),
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
        },
        other => MediaInfo::Other {
            kind: media_kind(other),
        },
    };
    Some(info)
}

/// Short snake_case name of a media kind, e.g. `photo` or `web_page`.
#[must_use]
pub fn media_kind(media: &tl::enums::MessageMedia) -> String {
    variant_name(media, "")
}

fn action_name(action: &tl::enums::SendMessageAction) -> String {
    let name = variant_name(action, "send_message_");
    name.strip_suffix("_action").map_or_else(|| name.clone(), ToOwned::to_owned)
}

/// Snake_case name of an enum variant taken from its `Debug` output,
/// with `prefix` removed.
fn variant_name<T: std::fmt::Debug>(value: &T, prefix: &str) -> String {
    let debug = format!("{value:?}");
    let name = debug
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or_default();
    let snake = snake_case(name);
    snake
        .strip_prefix(prefix)
        .map_or_else(|| snake.clone(), ToOwned::to_owned)
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("LastWeek"), "last_week");
        assert_eq!(snake_case("Photo"), "photo");
        assert_eq!(snake_case("WebPage"), "web_page");
    }

    #[test]
    fn test_typing_action_name() {
        assert_eq!(
            action_name(&tl::enums::SendMessageAction::SendMessageTypingAction),
            "typing"
        );
        assert_eq!(
            action_name(&tl::enums::SendMessageAction::SendMessageCancelAction),
            "cancel"
        );
    }

    #[test]
    fn test_empty_media_is_none() {
        assert!(media_info(&tl::enums::MessageMedia::Empty).is_none());
    }

    #[test]
    fn test_geo_media() {
        let media = tl::enums::MessageMedia::Geo(tl::types::MessageMediaGeo {
            geo: tl::enums::GeoPoint::Empty,
        });
        assert_eq!(
            media_info(&media),
            Some(MediaInfo::Other {
                kind: "geo".to_owned()
            })
        );
    }

    #[test]
    fn test_delete_channel_messages() {
        let update = tl::enums::Update::DeleteChannelMessages(tl::types::UpdateDeleteChannelMessages {
            channel_id: 5,
            messages: vec![1, 2],
            pts: 10,
            pts_count: 2,
        });
        assert_eq!(
            from_raw_update(&update),
            Some(ProviderUpdate::DeleteChannelMessages {
                chat_id: "-1005".to_owned(),
                message_ids: vec![1, 2],
            })
        );
    }

    #[test]
    fn test_user_typing() {
        let update = tl::enums::Update::ChatUserTyping(tl::types::UpdateChatUserTyping {
            chat_id: 77,
            from_id: tl::enums::Peer::User(tl::types::PeerUser { user_id: 9 }),
            action: tl::enums::SendMessageAction::SendMessageTypingAction,
        });
        assert_eq!(
            from_raw_update(&update),
            Some(ProviderUpdate::ChatUserTyping {
                chat_id: "-77".to_owned(),
                user_id: Some("9".to_owned()),
                action: "typing".to_owned(),
            })
        );
    }
}
