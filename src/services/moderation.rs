use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

const SENSITIVE_TERMS: &[&str] = &["annu", "anu", "mahbuba mufti"];

const BLOCKED_WORDS: &[&str] = &[
    "idiot", "stupid", "hate", "kill", "fuck", "shit", "bitch", "asshole", "crap",
];

pub const REFUSALS: [&str; 3] = [
    "I'm sorry, but I cannot provide information on this topic as it may be sensitive or against my guidelines. Could we talk about something else?",
    "This query touches on subjects I'm not equipped to discuss due to their sensitive nature. Perhaps I can help with a different question?",
    "I must politely decline to answer questions of this nature as they fall outside my operational policies. Is there another way I can assist you?",
];

pub const ADMONISHMENTS: [&str; 5] = [
    "Please let's keep our conversation respectful. Using such language isn't helpful.",
    "I understand you might be frustrated, but let's try to use more appropriate language.",
    "That kind of language isn't very nice. Could we try discussing this more politely?",
    "For a productive conversation, please avoid using offensive words. How else can I help you?",
    "Using respectful language helps us understand each other better. Please rephrase your query.",
];

/// Picks which canned reply to use. Must return an index below `len`.
pub trait ReplySelector {
    fn pick(&mut self, len: usize) -> usize;
}

/// Uniform selection from the thread-local rng.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl ReplySelector for RandomSelector {
    fn pick(&mut self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    Refusal,
    Admonishment,
}

impl VerdictKind {
    /// Suffix used for the id of the canned bot message.
    pub fn id_suffix(self) -> &'static str {
        match self {
            VerdictKind::Refusal => "bot-refusal",
            VerdictKind::Admonishment => "bot-admonish",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub reply: &'static str,
}

fn standalone_and() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // ASCII word boundaries: accented letters do not count as word characters
    PATTERN.get_or_init(|| {
        Regex::new(r"(?-u:\b)(and)(?-u:\b)").expect("static pattern is valid")
    })
}

fn is_sensitive(text: &str, lowered: &str) -> bool {
    SENSITIVE_TERMS.iter().any(|term| lowered.contains(term)) || standalone_and().is_match(text)
}

fn is_abusive(lowered: &str) -> bool {
    BLOCKED_WORDS.iter().any(|word| lowered.contains(word))
}

/// Classify outgoing text. `None` means the text may go to the model.
pub fn moderate(text: &str, selector: &mut dyn ReplySelector) -> Option<Verdict> {
    let lowered = text.to_lowercase();

    let (kind, replies): (VerdictKind, &[&'static str]) = if is_sensitive(text, &lowered) {
        (VerdictKind::Refusal, &REFUSALS)
    } else if is_abusive(&lowered) {
        (VerdictKind::Admonishment, &ADMONISHMENTS)
    } else {
        return None;
    };

    let index = selector.pick(replies.len()).min(replies.len() - 1);
    Some(Verdict {
        kind,
        reply: replies[index],
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Always picks the same slot.
    pub(crate) struct FixedSelector(pub usize);

    impl ReplySelector for FixedSelector {
        fn pick(&mut self, _len: usize) -> usize {
            self.0
        }
    }

    #[test]
    fn test_clean_text_passes() {
        assert!(moderate("What is the capital of France?", &mut FixedSelector(0)).is_none());
        assert!(moderate("Tell me about pandas", &mut FixedSelector(0)).is_none());
    }

    #[test]
    fn test_sensitive_term_any_case() {
        let verdict = moderate("Who is ANNU?", &mut FixedSelector(1)).unwrap();
        assert_eq!(verdict.kind, VerdictKind::Refusal);
        assert_eq!(verdict.reply, REFUSALS[1]);

        let verdict = moderate("tell me about Mahbuba Mufti", &mut FixedSelector(2)).unwrap();
        assert_eq!(verdict.reply, REFUSALS[2]);
    }

    #[test]
    fn test_standalone_and_is_refused() {
        let verdict = moderate("salt and pepper", &mut FixedSelector(0)).unwrap();
        assert_eq!(verdict.kind, VerdictKind::Refusal);
        // part of a longer word does not count
        assert!(moderate("the band played", &mut FixedSelector(0)).is_none());
    }

    #[test]
    fn test_and_boundary_ignores_non_ascii_letters() {
        assert!(moderate("çand", &mut FixedSelector(0)).is_some());
        assert!(moderate("andé", &mut FixedSelector(0)).is_some());
        assert!(moderate("sandy", &mut FixedSelector(0)).is_none());
    }

    #[test]
    fn test_profanity_admonished() {
        let verdict = moderate("You are an IDIOT", &mut FixedSelector(4)).unwrap();
        assert_eq!(verdict.kind, VerdictKind::Admonishment);
        assert_eq!(verdict.reply, ADMONISHMENTS[4]);
    }

    #[test]
    fn test_sensitive_check_runs_first() {
        let verdict = moderate("stupid anu", &mut FixedSelector(0)).unwrap();
        assert_eq!(verdict.kind, VerdictKind::Refusal);
    }

    #[test]
    fn test_random_selector_stays_in_range() {
        let mut selector = RandomSelector;
        for _ in 0..50 {
            let verdict = moderate("idiot", &mut selector).unwrap();
            assert!(ADMONISHMENTS.contains(&verdict.reply));
        }
    }
}
