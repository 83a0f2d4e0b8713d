//! Inbound events and reply markup.

use clickmine_core::types::PeerRef;
use serde::{Deserialize, Serialize};

/// One inline button attached to a bot reply. Link buttons carry a
/// `url`; clickable buttons carry `callback_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub label: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub callback_data: Option<String>,
}

/// Button grid attached to a bot reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMarkup {
    pub rows: Vec<Vec<InlineButton>>,
}

impl ReplyMarkup {
    /// First button in reading order; on task messages this is the
    /// actionable control.
    pub fn first_button(&self) -> Option<&InlineButton> {
        self.rows.iter().flatten().next()
    }

    /// First button whose label contains `needle`, case-insensitively.
    pub fn find_button(&self, needle: &str) -> Option<&InlineButton> {
        let needle = needle.to_lowercase();
        self.buttons().find(|b| b.label.to_lowercase().contains(&needle))
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// One inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Chat the message arrived in.
    pub peer: PeerRef,
    pub message_id: i64,
    /// Handle of the sender, e.g. `@Litecoin_click_bot`.
    pub sender: String,
    pub text: String,
    #[serde(default)]
    pub markup: Option<ReplyMarkup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markup() -> ReplyMarkup {
        ReplyMarkup {
            rows: vec![
                vec![InlineButton {
                    label: "Go to website".to_string(),
                    url: Some("https://ad.example".to_string()),
                    callback_data: None,
                }],
                vec![
                    InlineButton {
                        label: "Skip".to_string(),
                        url: None,
                        callback_data: Some("skip".to_string()),
                    },
                    InlineButton {
                        label: "Report".to_string(),
                        url: None,
                        callback_data: Some("report".to_string()),
                    },
                ],
            ],
        }
    }

    #[test]
    fn first_button_is_reading_order() {
        assert_eq!(markup().first_button().unwrap().label, "Go to website");
    }

    #[test]
    fn find_button_is_case_insensitive_contains() {
        let markup = markup();
        assert_eq!(markup.find_button("skip").unwrap().label, "Skip");
        assert_eq!(markup.find_button("WEBSITE").unwrap().label, "Go to website");
        assert!(markup.find_button("confirm").is_none());
    }

    #[test]
    fn empty_markup_has_no_buttons() {
        let markup = ReplyMarkup::default();
        assert!(markup.first_button().is_none());
        assert!(markup.find_button("skip").is_none());
    }
}
