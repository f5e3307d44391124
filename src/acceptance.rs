use serde::Serialize;

use crate::heuristics::Heuristics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "flag", content = "detail", rename_all = "snake_case")]
pub enum ComplianceFlag {
    BracketLeak,
    LeakTerm(String),
    MissingKeywords(Vec<String>),
}

impl ComplianceFlag {
    pub fn label(&self) -> String {
        match self {
            ComplianceFlag::BracketLeak => "bracket_leak".to_owned(),
            ComplianceFlag::LeakTerm(term) => format!("leak_term:{term}"),
            ComplianceFlag::MissingKeywords(_) => "missing_keywords".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub flags: Vec<ComplianceFlag>,
}

impl Verdict {
    pub fn accepted(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.flags.iter().map(ComplianceFlag::label).collect()
    }
}

/// Salient words from the directives: alphabetic, long enough, not stop-words.
pub fn keywords(directives: &[String], heuristics: &Heuristics) -> Vec<String> {
    let mut words = Vec::new();
    for directive in directives {
        for word in directive.split(|character: char| !character.is_alphabetic()) {
            let word = word.to_lowercase();
            if word.chars().count() < heuristics.min_keyword_len || heuristics.is_stop_word(&word) {
                continue;
            }
            if !words.contains(&word) {
                words.push(word);
            }
        }
    }
    words
}

pub fn check(reply: &str, directives: &[String], heuristics: &Heuristics) -> Verdict {
    let lowered = reply.to_lowercase();
    let mut flags = Vec::new();

    if reply.contains('[') || reply.contains(']') {
        flags.push(ComplianceFlag::BracketLeak);
    }

    for term in &heuristics.leak_terms {
        if lowered.contains(&term.to_lowercase()) {
            flags.push(ComplianceFlag::LeakTerm(term.clone()));
        }
    }

    let keywords = keywords(directives, heuristics);
    if !keywords.is_empty() && !keywords.iter().any(|keyword| lowered.contains(keyword.as_str())) {
        flags.push(ComplianceFlag::MissingKeywords(keywords));
    }

    Verdict { flags }
}
