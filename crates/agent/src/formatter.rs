//! Formatter stage: channel presentation rules from configuration. Strips or
//! reduces markup and splits plain text at sentence boundaries with ordinal
//! markers, never mid-sentence.

use async_trait::async_trait;

use tally_core::config::{ChannelsConfig, MarkupPolicy};
use tally_core::{Channel, StageError, StageTag};

use crate::stage::{Stage, StageContext};

/// Room kept for the " (i/n)" suffix when packing parts.
const ORDINAL_RESERVE: usize = 8;

pub struct Formatter {
    channels: ChannelsConfig,
}

impl Formatter {
    pub fn new(channels: ChannelsConfig) -> Self {
        Self { channels }
    }

    pub fn format(&self, draft: &str, channel: Channel) -> Vec<String> {
        let rule = self.channels.rule_for(channel);
        let text = match rule.markup {
            MarkupPolicy::Strip => strip_markup(draft),
            MarkupPolicy::Reduced => reduce_markup(draft),
            MarkupPolicy::Preserve => draft.trim().to_string(),
        };

        match rule.max_chars {
            Some(ceiling) if char_len(&text) > ceiling => split_with_ordinals(&text, ceiling),
            _ => vec![text],
        }
    }
}

#[async_trait]
impl Stage for Formatter {
    type Input = (String, Channel);
    type Output = Vec<String>;

    fn tag(&self) -> StageTag {
        StageTag::Formatter
    }

    async fn execute(
        &self,
        (draft, channel): (String, Channel),
        _ctx: &StageContext,
    ) -> Result<Vec<String>, StageError> {
        Ok(self.format(&draft, channel))
    }
}

/// Remove all markup for plain-text channels.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim_start_matches('#').trim_start_matches('>').trim();
        if line.starts_with("```") || line.starts_with("---") {
            continue;
        }
        let line = replace_links(line);
        let line = line.replace("**", "").replace("__", "");
        let line = line.replace(['*', '_', '`', '|'], "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
    }
    out
}

/// Keep simple emphasis, drop everything structural.
fn reduce_markup(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let line = line.trim_start_matches('#').trim_start_matches('>').trim();
        if line.starts_with("```") || line.starts_with("---") || line.starts_with('|') {
            continue;
        }
        let line = replace_links(line);
        let line = line.replace("**", "*").replace("__", "_").replace('`', "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

/// `[label](url)` becomes `label`.
fn replace_links(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        let Some(open) = rest.find('[') else {
            out.push_str(rest);
            return out;
        };
        let Some(mid) = rest[open..].find("](").map(|index| open + index) else {
            out.push_str(rest);
            return out;
        };
        let Some(close) = rest[mid..].find(')').map(|index| mid + index) else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..open]);
        out.push_str(&rest[open + 1..mid]);
        rest = &rest[close + 1..];
    }
}

/// Sentence-boundary split with `(i/n)` ordinals. A single sentence longer
/// than the ceiling is kept intact; the ceiling is best-effort there.
fn split_with_ordinals(text: &str, ceiling: usize) -> Vec<String> {
    let budget = ceiling.saturating_sub(ORDINAL_RESERVE).max(1);
    let sentences = split_sentences(text);

    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    for sentence in sentences {
        if current.is_empty() {
            current = sentence;
            continue;
        }
        if char_len(&current) + 1 + char_len(&sentence) <= budget {
            current.push(' ');
            current.push_str(&sentence);
        } else {
            parts.push(current);
            current = sentence;
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    let total = parts.len();
    if total <= 1 {
        return parts;
    }
    parts
        .into_iter()
        .enumerate()
        .map(|(index, part)| format!("{part} ({}/{total})", index + 1))
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = collapsed.chars().peekable();

    while let Some(character) = chars.next() {
        current.push(character);
        if matches!(character, '.' | '!' | '?') {
            let at_boundary = chars.peek().map(|next| next.is_whitespace()).unwrap_or(true);
            if at_boundary {
                sentences.push(current.trim().to_string());
                current.clear();
                // Consume the separating space.
                if chars.peek().map(|next| next.is_whitespace()).unwrap_or(false) {
                    chars.next();
                }
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::{char_len, split_with_ordinals, strip_markup, Formatter};
    use tally_core::config::ChannelsConfig;
    use tally_core::Channel;

    fn formatter() -> Formatter {
        Formatter::new(ChannelsConfig::default())
    }

    #[test]
    fn sms_output_is_markup_free() {
        let parts = formatter().format(
            "## Weekly summary\nYou logged **35 hours** across [5 entries](https://x.test).",
            Channel::Sms,
        );
        assert_eq!(parts, vec!["Weekly summary You logged 35 hours across 5 entries."]);
    }

    #[test]
    fn email_markup_is_preserved() {
        let draft = "## Weekly summary\n| day | hours |\n|---|---|\n| Mon | 7 |";
        let parts = formatter().format(draft, Channel::Email);
        assert_eq!(parts, vec![draft.to_string()]);
    }

    #[test]
    fn chat_keeps_emphasis_but_drops_structure() {
        let parts = formatter()
            .format("# Summary\nYou logged **35 hours** this week.", Channel::Chat);
        assert_eq!(parts, vec!["Summary\nYou logged *35 hours* this week."]);
    }

    #[test]
    fn long_sms_splits_at_sentence_boundaries_with_ordinals() {
        let draft = "You logged 35 hours this week across five entries. \
             Monday and Tuesday were your longest days at eight hours each. \
             Wednesday through Friday came in between five and seven hours. \
             Let me know if you want a per-project breakdown.";
        let parts = formatter().format(draft, Channel::Sms);

        assert!(parts.len() > 1);
        for (index, part) in parts.iter().enumerate() {
            assert!(char_len(part) <= 160, "part {index} over ceiling: {part}");
            assert!(part.ends_with(&format!("({}/{})", index + 1, parts.len())));
        }
        // No mid-sentence break: each part minus its ordinal ends a sentence.
        for part in &parts {
            let body = part.rsplit_once(" (").map(|(body, _)| body).unwrap_or(part);
            assert!(body.ends_with(['.', '!', '?']), "mid-sentence break: {part}");
        }
    }

    #[test]
    fn oversize_single_sentence_is_kept_intact() {
        let sentence = format!("This is one very long sentence {}.", "with padding ".repeat(20));
        assert!(char_len(&sentence) > 160);
        let parts = split_with_ordinals(&sentence, 160);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].contains("very long sentence"));
    }
}
