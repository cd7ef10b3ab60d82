//! Cue phrases and stopwords used by the query classifier.

pub(crate) const CONTRADICTION_CUES: &[&str] = &[
    "contradict",
    "contradicts",
    "contradiction",
    "inconsistent",
    "inconsistency",
    "continuity",
    "plot hole",
    "conflicts with",
    "doesn't match",
    "does not match",
    "retcon",
];

pub(crate) const RELATIONAL_CUES: &[&str] = &[
    "feel about",
    "feels about",
    "feel toward",
    "feels toward",
    "relationship",
    "between",
    "think of",
    "thinks of",
    "trust",
    "trusts",
    "love",
    "loves",
    "hate",
    "hates",
    "related to",
    "know each other",
    "get along",
    "rival",
    "rivals",
    "ally",
    "allies",
    "how do they",
];

pub(crate) const DEEP_CUES: &[&str] = &[
    "fatal flaw",
    "flaw",
    "why does",
    "why did",
    "why is",
    "motivation",
    "motive",
    "weakness",
    "arc",
    "backstory",
    "believe",
    "believes",
    "belief",
    "fear",
    "fears",
    "wound",
    "really want",
    "psychology",
];

pub(crate) const CRAFT_CUES: &[&str] = &[
    "pacing",
    "dialogue",
    "show don't tell",
    "point of view",
    "pov",
    "prose",
    "narrative voice",
    "tense",
    "how do i write",
    "how should i write",
    "how to write",
    "writing tip",
    "technique",
    "chapter length",
    "opening line",
    "hook",
];

pub(crate) const SCENE_CUES: &[&str] = &[
    "this scene",
    "current scene",
    "next scene",
    "the scene",
    "scene",
    "this chapter",
];

pub(crate) const PLOT_CUES: &[&str] = &[
    "plot",
    "what happened",
    "so far",
    "status",
    "timeline",
    "storyline",
    "subplot",
    "where are we",
    "beat",
    "beats",
    "climax",
    "thread",
    "threads",
];

pub(crate) const WORLD_CUES: &[&str] = &[
    "magic",
    "rule",
    "rules",
    "world",
    "law",
    "laws",
    "lore",
    "how does the",
    "system",
    "religion",
    "politics",
    "economy",
    "technology",
    "history of",
];

pub(crate) const LOOKUP_CUES: &[&str] = &[
    "who is",
    "who's",
    "tell me about",
    "describe",
    "what is",
    "what's",
    "remind me",
];

pub(crate) const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "out", "over", "own", "same", "she", "should", "so",
    "some", "such", "than", "that", "the", "their", "theirs", "them", "then", "there", "these",
    "they", "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we",
    "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "would", "you", "your", "yours", "tell", "feel", "feels", "know", "think", "really", "don",
    "doesn", "didn", "isn", "wasn",
];

/// Whether `phrase` occurs in `text` on word boundaries. Both must already be
/// lower-cased.
pub(crate) fn contains_phrase(text: &str, phrase: &str) -> bool {
    phrase_positions(text, phrase).next().is_some()
}

/// Byte offsets of every word-bounded occurrence of `phrase` in `text`.
pub(crate) fn phrase_positions<'a>(
    text: &'a str,
    phrase: &'a str,
) -> impl Iterator<Item = usize> + 'a {
    text.match_indices(phrase)
        .map(|(start, _)| start)
        .filter(move |&start| {
            let before = text[..start].chars().next_back();
            let after = text[start + phrase.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
}

/// Cues from `cues` found in `text`.
pub(crate) fn matching_cues<'c>(text: &str, cues: &[&'c str]) -> Vec<&'c str> {
    cues.iter()
        .copied()
        .filter(|cue| contains_phrase(text, cue))
        .collect()
}
