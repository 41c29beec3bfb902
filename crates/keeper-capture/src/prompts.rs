//! User-facing dialog copy.
//!
//! Every failure message keeps the invalid-input / system-failure split: a
//! validation message tells the contact what to change, a write-failure
//! message tells them the system fumbled and a retry is fine as-is. A write
//! conflict is neither; it asks for manual cleanup and never invites a retry.

use crate::name_validation::NameRejection;

pub const WELCOME_PROMPT: &str = "Hi! I don't have you saved yet. \
Reply with the name you'd like me to save you as: one or two words, \
letters only (hyphens and apostrophes are fine).";

pub const REPEAT_NAME_PROMPT: &str =
    "No problem. What name should I save you as? One or two words, letters only.";

const CONFIRM_TEMPLATES: &[&str] = &[
    "Got it, should I save you as \"{name}\"? (yes/no)",
    "Just to confirm: save you as \"{name}\"? (yes/no)",
    "\"{name}\", did I get that right? (yes/no)",
    "I'll save you as \"{name}\". Okay? (yes/no)",
];

/// Confirmation prompt, template picked by `seed` (callers pass a
/// timestamp) so repeated dialogs don't read canned.
pub fn confirmation_prompt(name: &str, seed: u64) -> String {
    let template = CONFIRM_TEMPLATES[(seed as usize) % CONFIRM_TEMPLATES.len()];
    template.replace("{name}", name)
}

pub fn saved_message(name: &str) -> String {
    format!("Done, saved you as \"{name}\". Nice to meet you!")
}

/// Retry copy for a validation failure. Always an input problem, never a
/// system one.
pub fn rejection_message(rejection: &NameRejection) -> String {
    let hint = match rejection {
        NameRejection::Empty => "I didn't catch a name there.".to_string(),
        NameRejection::TooManyWords(count) => {
            format!("That's {count} words, I can only save one or two.")
        }
        NameRejection::ForbiddenCharacter(c) => {
            format!("Names can't contain '{c}': letters, hyphens and apostrophes only.")
        }
        NameRejection::SentenceOpener(_) | NameRejection::JunkToken(_) => {
            "That doesn't look like a name.".to_string()
        }
        NameRejection::FirstTokenTooShort(_) => {
            "The first word is too short, three letters minimum.".to_string()
        }
        NameRejection::TooLong(_) => "That's a bit long, twelve letters at most.".to_string(),
    };
    format!("{hint} Please send just the name you'd like saved.")
}

/// Copy for a failed save. The contact's input was fine; invite a plain
/// retry instead of re-asking for the name.
pub fn write_failure_message(error: &str) -> String {
    format!(
        "Sorry, I couldn't save that just now ({error}). \
Your name is fine; reply \"yes\" again in a moment and I'll retry."
    )
}

/// Copy for a conflicting write. Someone else changed the record, so a
/// blind retry could clobber their change; the duplicate needs a human.
pub fn write_conflict_message(detail: &str) -> String {
    format!(
        "Sorry, your contact entry changed while I was saving it ({detail}). \
I won't retry on my own; please have the duplicate resolved manually and \
message me again."
    )
}
