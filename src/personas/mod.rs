// Analysis personas
//
// A closed set of review roles applied to the same change set. Everything
// persona-specific is an exhaustive match here, so adding a persona is a
// compile error everywhere it has to be handled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaKind {
    /// Finds weaknesses and risky patterns
    Critical,
    /// Highlights what was done well
    Appreciative,
    /// Suggests new techniques worth exploring
    Exploratory,
}

impl PersonaKind {
    /// All personas in report order
    pub const ALL: [PersonaKind; 3] = [
        PersonaKind::Critical,
        PersonaKind::Appreciative,
        PersonaKind::Exploratory,
    ];

    /// Stable key used in storage and structured output
    pub fn key(self) -> &'static str {
        match self {
            PersonaKind::Critical => "critical",
            PersonaKind::Appreciative => "appreciative",
            PersonaKind::Exploratory => "exploratory",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PersonaKind::Critical => "Critical review",
            PersonaKind::Appreciative => "What went well",
            PersonaKind::Exploratory => "Something new to try",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            PersonaKind::Critical => "🔧",
            PersonaKind::Appreciative => "👏",
            PersonaKind::Exploratory => "💡",
        }
    }

    pub fn temperature(self) -> f32 {
        match self {
            PersonaKind::Critical => 0.4,
            PersonaKind::Appreciative => 0.5,
            PersonaKind::Exploratory => 0.6,
        }
    }

    /// What this persona should pick as its topic (used in the selection prompt)
    pub fn topic_brief(self) -> &'static str {
        match self {
            PersonaKind::Critical => {
                "a concrete weakness, bug risk or bad habit visible in the changes"
            }
            PersonaKind::Appreciative => {
                "a good decision or improvement in the changes worth reinforcing"
            }
            PersonaKind::Exploratory => {
                "a technique, library or idea the author has not used yet that fits these changes"
            }
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            PersonaKind::Critical => {
                "You are a strict senior reviewer. Point out the most important problem in the \
                 code under discussion, explain why it matters, and show a corrected version. \
                 Be direct, specific and brief."
            }
            PersonaKind::Appreciative => {
                "You are an encouraging mentor. Explain what the author did well in the code \
                 under discussion and why it is good practice, so the author keeps doing it."
            }
            PersonaKind::Exploratory => {
                "You are a curious engineer. Introduce one technique the author has not used \
                 that would improve the code under discussion, with a short example."
            }
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(PersonaKind::Critical),
            "appreciative" => Some(PersonaKind::Appreciative),
            "exploratory" => Some(PersonaKind::Exploratory),
            _ => None,
        }
    }
}

impl fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for PersonaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PersonaKind::from_key(s).ok_or_else(|| anyhow::anyhow!("Unknown persona: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_round_trip() {
        for persona in PersonaKind::ALL {
            assert_eq!(persona.key().parse::<PersonaKind>().unwrap(), persona);
        }
        assert!("villain".parse::<PersonaKind>().is_err());
        assert_eq!(PersonaKind::from_key(" Critical "), Some(PersonaKind::Critical));
    }

    #[test]
    fn test_order_matches_report_order() {
        let mut sorted = PersonaKind::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, PersonaKind::ALL.to_vec());
    }

    #[test]
    fn test_serde_uses_keys() {
        let json = serde_json::to_string(&PersonaKind::Exploratory).unwrap();
        assert_eq!(json, "\"exploratory\"");
    }
}
