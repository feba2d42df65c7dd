// Report integration

use std::collections::BTreeMap;

use crate::memory::Report;
use crate::personas::PersonaKind;

const SEPARATOR: &str = "\n\n---\n\n";

/// Assemble the final report. Sections follow persona order, whatever
/// order the reports finished in.
pub fn integrate(reports: &BTreeMap<PersonaKind, Report>, deep_analysis: Option<&str>) -> String {
    let mut parts = vec![
        "# 📊 Daily code review".to_string(),
        String::new(),
        "Hello! Here is what stood out in today's changes.".to_string(),
        String::new(),
    ];

    if reports.is_empty() {
        parts.extend(
            [
                "Nothing meaningful to analyse yet! 🎯",
                "",
                "💡 A few things to try meanwhile:",
                "1. Batch up a few more changes and analyse them together",
                "2. Revisit the suggestions from earlier reports",
                "3. Start on the next feature or refactor",
                "",
                "See you next time with a fuller report! 😊",
            ]
            .map(String::from),
        );
    } else {
        let mut sections: Vec<String> = reports
            .iter()
            .map(|(persona, report)| {
                format!(
                    "{}\n\n{}",
                    section_header(persona.emoji(), persona.label(), &report.topic_text),
                    report.content.trim()
                )
            })
            .collect();

        if let Some(deep) = deep_analysis.map(str::trim).filter(|d| !d.is_empty()) {
            let topic = deep_analysis_subject(reports).unwrap_or("today's changes");
            sections.push(format!(
                "{}\n\n{}",
                section_header("🔍", "Deep dive", topic),
                deep
            ));
        }
        parts.push(sections.join(SEPARATOR));
    }

    parts.extend(
        [
            "",
            "---",
            "",
            "### 💝 Word of the day",
            "Small changes add up to big progress. Nice work today!",
            "",
            "This report was generated by CodeCast.",
        ]
        .map(String::from),
    );
    parts.join("\n")
}

/// Topic the deep dive expands on: the critical one when present
pub fn deep_analysis_subject(reports: &BTreeMap<PersonaKind, Report>) -> Option<&str> {
    reports
        .get(&PersonaKind::Critical)
        .or_else(|| reports.values().next())
        .map(|r| r.topic_text.as_str())
}

fn section_header(emoji: &str, label: &str, topic: &str) -> String {
    format!("## {} [{}] {}", emoji, label, topic)
}
