// Messages for the short paths: minor changes and fallback

use chrono::{Datelike, NaiveDate};

const TIPS: [&str; 8] = [
    "Write the test first: a failing test pins down what 'done' means",
    "Prefer small pure functions; they are easy to test and easy to move",
    "Log with context: say what was being done, not just that it failed",
    "Review your own diff before committing, as if someone else wrote it",
    "Automate the boring checks with a CI pipeline",
    "Name things after what they do, not how they do it",
    "Delete dead code; version control remembers it for you",
    "Handle errors where you can act on them, and propagate the rest",
];

/// Tip for `date`; rotates daily
pub fn tip_of_the_day(date: NaiveDate) -> &'static str {
    TIPS[date.ordinal0() as usize % TIPS.len()]
}

/// Advice when the change set is too small for a full review
pub fn minor_change_message(habit_profile: &str, changed_lines: usize, date: NaiveDate) -> String {
    let habits = habit_profile.trim();
    let head = format!(
        "Only {} changed line{} detected, so today's full analysis is skipped.",
        changed_lines,
        if changed_lines == 1 { "" } else { "s" }
    );
    if habits.is_empty() {
        format!(
            "{}\n\nTopic of the day: {}\n\nTry it out and start a new habit!",
            head,
            tip_of_the_day(date)
        )
    } else {
        format!(
            "{}\n\nAdvice based on your habits:\n\n{}\n\n\
             To keep improving, try spending 15 minutes a day refactoring or reviewing code.",
            head, habits
        )
    }
}

/// Terminal message for a cycle that fell back.
///
/// An already integrated report wins, then an apology if a step failed,
/// then advice from the habit profile, then the tip of the day.
pub fn fallback_message(
    integrated: Option<&str>,
    error: Option<&str>,
    habit_profile: &str,
    date: NaiveDate,
) -> String {
    if let Some(report) = integrated.filter(|r| !r.trim().is_empty()) {
        return report.to_string();
    }
    if error.is_some() {
        return "Something went wrong during today's analysis. Please try again later.\n\
                If the problem persists, check the logs or contact the maintainer."
            .to_string();
    }
    let habits = habit_profile.trim();
    if !habits.is_empty() {
        return format!(
            "No fresh topic was found in today's changes, so here is a look back at your habits:\n\n{}",
            habits
        );
    }
    format!(
        "No fresh topic was found in today's changes.\n\
         Take a break or look over your habits; the next change will get a fuller analysis.\n\n\
         Tip of the day: {}",
        tip_of_the_day(date)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(ordinal: u32) -> NaiveDate {
        NaiveDate::from_yo_opt(2025, ordinal).unwrap()
    }

    #[test]
    fn test_tip_rotates_daily() {
        assert_ne!(tip_of_the_day(day(1)), tip_of_the_day(day(2)));
        assert_eq!(tip_of_the_day(day(1)), tip_of_the_day(day(1 + TIPS.len() as u32)));
    }

    #[test]
    fn test_minor_change_uses_habits_when_present() {
        let text = minor_change_message("The author tends to unwrap.", 2, day(10));
        assert!(text.contains("Only 2 changed lines"));
        assert!(text.contains("The author tends to unwrap."));

        let text = minor_change_message("  ", 1, day(10));
        assert!(text.contains("Only 1 changed line detected"));
        assert!(text.contains(tip_of_the_day(day(10))));
    }

    #[test]
    fn test_fallback_priority() {
        let date = day(5);
        assert_eq!(fallback_message(Some("report"), Some("boom"), "habits", date), "report");
        assert!(fallback_message(Some(" "), Some("boom"), "habits", date).contains("went wrong"));
        assert!(fallback_message(None, None, "tends to unwrap", date).contains("tends to unwrap"));
        assert!(fallback_message(None, None, "", date).contains(tip_of_the_day(date)));
    }
}
