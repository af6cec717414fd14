//! Text renditions of the popup: the settings form and the status line.

use booster_protocol::{ExtensionConfig, ExtensionStatus, Limit};

/// Reads a form field the way the popup does: leading integer, anything
/// unparsable becomes `limit.min`, then clamped.
pub fn clamp_input(raw: &str, limit: Limit) -> u32 {
    parse_leading_int(raw).map_or(limit.min, |value| limit.clamp_int(value))
}

fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits: &str = &digits[..digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len())];
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits.bytes().fold(0i64, |acc, b| {
        acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
    });
    Some(if negative { -magnitude } else { magnitude })
}

pub fn status_line(status: Option<&ExtensionStatus>) -> String {
    match status {
        Some(status) => {
            let mut line = format!(
                "{}/{} messages visible",
                status.visible_messages, status.total_messages
            );
            if status.hidden_messages > 0 {
                line.push_str(&format!(" · {} hidden", status.hidden_messages));
            }
            line
        }
        None => "Open a ChatGPT conversation to see status".to_string(),
    }
}

pub fn render_config(config: &ExtensionConfig) -> String {
    format!(
        "enabled: {}\nvisible message limit: {}\nload more batch size: {}",
        config.enabled, config.visible_message_limit, config.load_more_batch_size
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use booster_protocol::config::{LOAD_MORE_BATCH_SIZE, VISIBLE_MESSAGE_LIMIT};
    use pretty_assertions::assert_eq;

    #[test]
    fn form_inputs_are_clamped() {
        assert_eq!(clamp_input("25", VISIBLE_MESSAGE_LIMIT), 25);
        assert_eq!(clamp_input("999", VISIBLE_MESSAGE_LIMIT), 200);
        assert_eq!(clamp_input("0", VISIBLE_MESSAGE_LIMIT), 1);
        assert_eq!(clamp_input("-7", LOAD_MORE_BATCH_SIZE), 1);
        assert_eq!(clamp_input("99999999999999999999999", LOAD_MORE_BATCH_SIZE), 50);
    }

    #[test]
    fn form_inputs_take_leading_integer() {
        assert_eq!(clamp_input(" 12px", VISIBLE_MESSAGE_LIMIT), 12);
        assert_eq!(clamp_input("3.9", LOAD_MORE_BATCH_SIZE), 3);
        assert_eq!(clamp_input("abc", LOAD_MORE_BATCH_SIZE), 1);
        assert_eq!(clamp_input("", VISIBLE_MESSAGE_LIMIT), 1);
        assert_eq!(clamp_input("-", VISIBLE_MESSAGE_LIMIT), 1);
    }

    #[test]
    fn status_line_variants() {
        assert_eq!(
            status_line(Some(&ExtensionStatus::new(true, 15, 10))),
            "10/15 messages visible · 5 hidden"
        );
        assert_eq!(
            status_line(Some(&ExtensionStatus::new(true, 4, 4))),
            "4/4 messages visible"
        );
        assert_eq!(status_line(None), "Open a ChatGPT conversation to see status");
    }
}
