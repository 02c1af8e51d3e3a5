//! Rule-based chat that fills structured estimate inputs from free text.
//!
//! The parser is a pure function over `(state, message)`; the HTTP layer
//! owns no conversation state — the client round-trips it.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatState {
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub cleaning_type: Option<String>,
    pub zip: Option<String>,
}

impl ChatState {
    pub fn is_complete(&self) -> bool {
        self.bedrooms.is_some() && self.bathrooms.is_some() && self.cleaning_type.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatTurn {
    pub state: ChatState,
    pub reply: String,
    pub complete: bool,
}

/// One conversational turn. Extracts whatever the message offers, then asks
/// for the next missing field.
pub fn turn(mut state: ChatState, message: &str) -> ChatTurn {
    let lower = message.to_lowercase();

    if state.cleaning_type.is_none() {
        if lower.contains("deep") {
            state.cleaning_type = Some("deep".to_string());
        } else if lower.contains("move") {
            state.cleaning_type = Some("move_out_empty".to_string());
        } else if lower.contains("standard") || lower.contains("regular") {
            state.cleaning_type = Some("standard".to_string());
        }
    }

    let numbers = extract_numbers(&lower);

    // "3 bed 2 bath" resolves positionally; single numbers answer whichever
    // field was asked for first.
    if let Some(beds) = number_near(&lower, &numbers, &["bed", "bedroom", "br"]) {
        state.bedrooms.get_or_insert(beds);
    }
    if let Some(baths) = number_near(&lower, &numbers, &["bath", "bathroom", "ba"]) {
        state.bathrooms.get_or_insert(baths);
    }
    if state.bedrooms.is_none() && numbers.len() == 1 && !mentions_rooms(&lower) {
        state.bedrooms = Some(numbers[0].1);
    } else if state.bedrooms.is_some()
        && state.bathrooms.is_none()
        && numbers.len() == 1
        && !mentions_rooms(&lower)
    {
        state.bathrooms = Some(numbers[0].1);
    }

    if state.zip.is_none() {
        if let Some(zip) = extract_zip(message) {
            state.zip = Some(zip);
        }
    }

    let reply = if state.bedrooms.is_none() {
        "How many bedrooms does your home have?".to_string()
    } else if state.bathrooms.is_none() {
        "And how many bathrooms?".to_string()
    } else if state.cleaning_type.is_none() {
        "Would you like a standard clean, a deep clean, or a move-out clean?".to_string()
    } else {
        "Great, I have everything I need for your estimate.".to_string()
    };

    let complete = state.is_complete();
    ChatTurn {
        state,
        reply,
        complete,
    }
}

fn extract_numbers(text: &str) -> Vec<(usize, i32)> {
    let mut out = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c.is_ascii_digit() {
            let mut value = c.to_digit(10).unwrap_or(0) as i32;
            let mut digits = 1;
            while let Some((_, next)) = chars.peek() {
                if next.is_ascii_digit() && digits < 2 {
                    value = value * 10 + next.to_digit(10).unwrap_or(0) as i32;
                    digits += 1;
                    chars.next();
                } else {
                    break;
                }
            }
            if value <= 20 {
                out.push((idx, value));
            }
        }
    }
    out
}

fn mentions_rooms(text: &str) -> bool {
    ["bed", "bath"].iter().any(|w| text.contains(w))
}

fn number_near(text: &str, numbers: &[(usize, i32)], keywords: &[&str]) -> Option<i32> {
    for keyword in keywords {
        if let Some(pos) = text.find(keyword) {
            // Closest number before the keyword within a short window.
            let candidate = numbers
                .iter()
                .filter(|(idx, _)| *idx < pos && pos - idx < 12)
                .max_by_key(|(idx, _)| *idx);
            if let Some((_, value)) = candidate {
                return Some(*value);
            }
        }
    }
    None
}

fn extract_zip(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut run = 0;
    let mut start = 0;
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            if run == 0 {
                start = i;
            }
            run += 1;
            if run == 5 {
                let before_ok = start == 0 || !bytes[start - 1].is_ascii_digit();
                let after_ok = i + 1 >= bytes.len() || !bytes[i + 1].is_ascii_digit();
                if before_ok && after_ok {
                    return Some(text[start..=i].to_string());
                }
            }
        } else {
            run = 0;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_message_fills_everything() {
        let result = turn(ChatState::default(), "deep clean for a 3 bed 2 bath");
        assert_eq!(result.state.bedrooms, Some(3));
        assert_eq!(result.state.bathrooms, Some(2));
        assert_eq!(result.state.cleaning_type.as_deref(), Some("deep"));
        assert!(result.complete);
    }

    #[test]
    fn test_incremental_conversation() {
        let t1 = turn(ChatState::default(), "hi, I need a cleaning");
        assert!(!t1.complete);
        assert!(t1.reply.contains("bedrooms"));

        let t2 = turn(t1.state, "3");
        assert_eq!(t2.state.bedrooms, Some(3));
        assert!(t2.reply.contains("bathrooms"));

        let t3 = turn(t2.state, "2");
        assert_eq!(t3.state.bathrooms, Some(2));
        assert!(t3.reply.contains("standard"));

        let t4 = turn(t3.state, "deep please");
        assert!(t4.complete);
    }

    #[test]
    fn test_move_out_detection() {
        let result = turn(ChatState::default(), "it's a move out clean, 2br 1ba");
        assert_eq!(result.state.cleaning_type.as_deref(), Some("move_out_empty"));
        assert_eq!(result.state.bedrooms, Some(2));
        assert_eq!(result.state.bathrooms, Some(1));
    }

    #[test]
    fn test_zip_extraction() {
        let result = turn(ChatState::default(), "I'm in 94110");
        assert_eq!(result.state.zip.as_deref(), Some("94110"));
    }

    #[test]
    fn test_existing_state_not_overwritten() {
        let state = ChatState {
            bedrooms: Some(4),
            ..Default::default()
        };
        let result = turn(state, "2 bath");
        assert_eq!(result.state.bedrooms, Some(4));
        assert_eq!(result.state.bathrooms, Some(2));
    }

    #[test]
    fn test_is_pure_over_inputs() {
        let a = turn(ChatState::default(), "3 bed 2 bath deep");
        let b = turn(ChatState::default(), "3 bed 2 bath deep");
        assert_eq!(a.state.bedrooms, b.state.bedrooms);
        assert_eq!(a.reply, b.reply);
    }
}
