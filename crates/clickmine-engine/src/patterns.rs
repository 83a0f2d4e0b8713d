//! Reply classification.
//!
//! An ordered table of regexes evaluated top to bottom; the first match
//! decides which workflow step a reply triggers. Order IS priority:
//! the consent gate must shadow everything else, and specific replies
//! must win over the generic ones below them. A reply matching nothing
//! falls through to the main task handler.

use once_cell::sync::Lazy;
use regex::Regex;

/// What a recognized bot reply asks the miner to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Terms gate that must be acknowledged before tasks resume.
    ConsentGate,
    /// The current category has no tasks left.
    NoAds,
    /// Bot refusal ("We cannot ...").
    Refusal,
    /// The submitted task is no longer valid on the platform side.
    InvalidTask,
    /// Reward credited.
    Earned,
    /// Balance report.
    Balance,
    /// Withdrawal flow: address prompt.
    WithdrawAddress,
    /// Withdrawal flow: amount prompt.
    WithdrawAmount,
    /// Withdrawal flow: confirmation prompt.
    WithdrawConfirm,
}

static PATTERNS: Lazy<Vec<(Regex, ReplyKind)>> = Lazy::new(|| {
    [
        (r"(?i)accept our (terms|rules)|terms of service", ReplyKind::ConsentGate),
        (r"(?i)no new ads available", ReplyKind::NoAds),
        (r"(?i)we cannot", ReplyKind::Refusal),
        (r"(?i)sorry, that task", ReplyKind::InvalidTask),
        (r"(?i)you earned", ReplyKind::Earned),
        (r"(?i)available balance", ReplyKind::Balance),
        (r"(?i)to withdraw, enter", ReplyKind::WithdrawAddress),
        (r"(?i)enter the amount|amount to withdraw", ReplyKind::WithdrawAmount),
        (r"(?i)confirm your withdrawal", ReplyKind::WithdrawConfirm),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).expect("valid reply pattern"), kind))
    .collect()
});

/// First matching kind, or `None` for the fallback main handler.
pub fn classify(text: &str) -> Option<ReplyKind> {
    PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_real_bot_replies() {
        let cases = [
            (
                "You must accept our Terms of Service to continue.",
                ReplyKind::ConsentGate,
            ),
            ("Sorry, there are no new ads available.", ReplyKind::NoAds),
            ("We cannot check this task.", ReplyKind::Refusal),
            ("Sorry, that task is no longer valid", ReplyKind::InvalidTask),
            ("✅ You earned 0.00015 LTC!", ReplyKind::Earned),
            ("Available balance: 0.0042 LTC", ReplyKind::Balance),
            ("To withdraw, enter your LTC address.", ReplyKind::WithdrawAddress),
            ("Enter the amount to withdraw.", ReplyKind::WithdrawAmount),
            ("Please confirm your withdrawal:", ReplyKind::WithdrawConfirm),
        ];
        for (text, kind) in cases {
            assert_eq!(classify(text), Some(kind), "text: {text}");
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(classify("AVAILABLE BALANCE: 3"), Some(ReplyKind::Balance));
    }

    #[test]
    fn unmatched_text_falls_through() {
        assert_eq!(classify("Press the button below to start working."), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn earlier_entries_shadow_later_ones() {
        // Carries both the consent gate and a balance line; the gate is
        // listed first and must win.
        let text = "Please accept our terms of service. Available balance: 1 LTC";
        assert_eq!(classify(text), Some(ReplyKind::ConsentGate));
    }
}
