use cabbot_core::domain::session::{Filter, FilterKey, SessionAction};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Paging {
    #[default]
    Keep,
    Next,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedIntent {
    pub action: SessionAction,
    pub filters: Vec<Filter>,
    /// Filters the user asked to drop, e.g. "any language".
    pub cleared: Vec<FilterKey>,
    pub paging: Paging,
}

impl ExtractedIntent {
    fn unknown() -> Self {
        Self {
            action: SessionAction::Unknown,
            filters: Vec::new(),
            cleared: Vec::new(),
            paging: Paging::Keep,
        }
    }

    fn reset() -> Self {
        Self {
            action: SessionAction::Reset,
            filters: Vec::new(),
            cleared: Vec::new(),
            paging: Paging::Keep,
        }
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }
}

/// Keyword and phrase based classifier for driver search messages.
#[derive(Clone, Debug, Default)]
pub struct IntentExtractor;

impl IntentExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> ExtractedIntent {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);

        if is_reset(&tokens) {
            return ExtractedIntent::reset();
        }

        // Unlisted names after a marker only count when the message is about drivers.
        let free_words =
            mentions_search(&tokens) || mentions_people(&tokens) || names_language(&tokens);

        let mut filters = Vec::new();
        if let Some(city) = extract_city(&tokens, free_words) {
            filters.extend(Filter::city(&city));
        }
        if let Some(language) = extract_language(&tokens, free_words) {
            filters.extend(Filter::language(&language));
        }

        let mut cleared = Vec::new();
        let asks_language = filters.iter().any(|filter| filter.key == FilterKey::Language);
        if clears_language(&tokens) && !asks_language {
            cleared.push(FilterKey::Language);
        }

        let paging = if is_paging_request(&tokens) { Paging::Next } else { Paging::Keep };

        if !filters.is_empty()
            || !cleared.is_empty()
            || paging == Paging::Next
            || mentions_search(&tokens)
        {
            ExtractedIntent { action: SessionAction::Query, filters, cleared, paging }
        } else {
            ExtractedIntent::unknown()
        }
    }
}

const RESET_FORMS: &[&[&str]] = &[
    &["reset"],
    &["reset", "please"],
    &["please", "reset"],
    &["start", "over"],
    &["start", "again"],
    &["reset", "search"],
];

const CITIES: &[&str] = &[
    "agra",
    "ahmedabad",
    "ajmer",
    "amritsar",
    "bangalore",
    "bengaluru",
    "bhopal",
    "bhubaneswar",
    "chandigarh",
    "chennai",
    "coimbatore",
    "dehradun",
    "delhi",
    "goa",
    "gurgaon",
    "gurugram",
    "guwahati",
    "haridwar",
    "hyderabad",
    "indore",
    "jaipur",
    "jaisalmer",
    "jodhpur",
    "kanpur",
    "kochi",
    "kolkata",
    "lucknow",
    "madurai",
    "manali",
    "mathura",
    "mumbai",
    "mysore",
    "mysuru",
    "nagpur",
    "nashik",
    "navi mumbai",
    "new delhi",
    "noida",
    "patna",
    "pune",
    "pushkar",
    "raipur",
    "rajkot",
    "ranchi",
    "rishikesh",
    "shimla",
    "surat",
    "thiruvananthapuram",
    "udaipur",
    "vadodara",
    "varanasi",
    "visakhapatnam",
];

const LANGUAGES: &[&str] = &[
    "arabic",
    "assamese",
    "bengali",
    "bhojpuri",
    "english",
    "french",
    "german",
    "gujarati",
    "haryanvi",
    "hindi",
    "kannada",
    "konkani",
    "malayalam",
    "marathi",
    "marwari",
    "nepali",
    "odia",
    "punjabi",
    "rajasthani",
    "sindhi",
    "spanish",
    "tamil",
    "telugu",
    "urdu",
];

const CITY_MARKERS: &[&str] = &["in", "from", "at", "near", "around"];

const LANGUAGE_MARKERS: &[&str] = &["speak", "speaks", "speaking", "knows", "know", "fluent"];

const SEARCH_WORDS: &[&str] = &[
    "driver",
    "drivers",
    "cab",
    "cabs",
    "taxi",
    "taxis",
    "chauffeur",
    "chauffeurs",
    "ride",
    "car",
    "cars",
];

/// Words that, just before "language", ask for the language filter to go.
const LANGUAGE_CLEARERS: &[&str] = &["any", "without", "no", "drop", "remove", "clear", "ignore"];

const PEOPLE_WORDS: &[&str] = &["anyone", "anybody", "someone", "somebody"];

const PAGING_FILLER: &[&str] =
    &["show", "me", "some", "the", "please", "give", "drivers", "results", "options", "cabs"];

/// Words that can follow a marker but are never a place or language name.
const STOP_WORDS: &[&str] = &[
    "a",
    "an",
    "and",
    "any",
    "area",
    "cab",
    "cabs",
    "city",
    "driver",
    "drivers",
    "evening",
    "here",
    "hour",
    "hours",
    "language",
    "languages",
    "me",
    "morning",
    "my",
    "night",
    "or",
    "our",
    "please",
    "some",
    "speak",
    "speaking",
    "that",
    "the",
    "there",
    "this",
    "to",
    "today",
    "tomorrow",
    "town",
    "us",
    "well",
    "which",
    "who",
    "with",
];

fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_reset(tokens: &[String]) -> bool {
    RESET_FORMS.iter().any(|form| {
        form.len() == tokens.len()
            && form.iter().zip(tokens).all(|(word, token)| *word == token.as_str())
    })
}

fn is_paging_request(tokens: &[String]) -> bool {
    let remaining: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|token| !PAGING_FILLER.contains(token))
        .collect();
    matches!(remaining.as_slice(), ["more"] | ["next"] | ["next", "page"] | ["more", "please"])
}

fn mentions_search(tokens: &[String]) -> bool {
    tokens.iter().any(|token| SEARCH_WORDS.contains(&token.as_str()))
}

fn mentions_people(tokens: &[String]) -> bool {
    tokens.iter().any(|token| PEOPLE_WORDS.contains(&token.as_str()))
}

fn names_language(tokens: &[String]) -> bool {
    tokens.iter().any(|token| LANGUAGES.contains(&token.as_str()))
}

/// "any language", "without language", "drop the language filter", "language doesn't matter".
fn clears_language(tokens: &[String]) -> bool {
    tokens.iter().enumerate().any(|(index, token)| {
        if token != "language" && token != "languages" {
            return false;
        }
        let before = &tokens[index.saturating_sub(2)..index];
        before.iter().any(|word| LANGUAGE_CLEARERS.contains(&word.as_str()))
            || tokens[index + 1..].iter().any(|word| word == "matter")
    })
}

/// Longest gazetteer entry (up to two words) starting at `index`.
fn gazetteer_match(
    tokens: &[String],
    index: usize,
    gazetteer: &[&str],
) -> Option<(String, usize)> {
    if index + 1 < tokens.len() {
        let pair = format!("{} {}", tokens[index], tokens[index + 1]);
        if gazetteer.contains(&pair.as_str()) {
            return Some((pair, 2));
        }
    }
    tokens
        .get(index)
        .filter(|token| gazetteer.contains(&token.as_str()))
        .map(|token| (token.clone(), 1))
}

fn is_free_word(token: &str) -> bool {
    token.len() >= 3
        && token.chars().all(char::is_alphabetic)
        && !STOP_WORDS.contains(&token)
        && !SEARCH_WORDS.contains(&token)
        && !LANGUAGE_MARKERS.contains(&token)
        && !LANGUAGES.contains(&token)
}

/// Last city mention wins, so "Jaipur, actually Pune" yields Pune.
fn extract_city(tokens: &[String], free_words: bool) -> Option<String> {
    let mut found = None;
    let mut index = 0;
    while index < tokens.len() {
        if let Some((city, width)) = gazetteer_match(tokens, index, CITIES) {
            found = Some(city);
            index += width;
            continue;
        }

        let token = tokens[index].as_str();
        if free_words && CITY_MARKERS.contains(&token) {
            if let Some(next) = tokens.get(index + 1) {
                if gazetteer_match(tokens, index + 1, CITIES).is_none() && is_free_word(next) {
                    found = Some(next.clone());
                    index += 2;
                    continue;
                }
            }
        }
        index += 1;
    }
    found
}

fn extract_language(tokens: &[String], free_words: bool) -> Option<String> {
    let mut found = None;
    for (index, token) in tokens.iter().enumerate() {
        if LANGUAGES.contains(&token.as_str()) {
            found = Some(token.clone());
            continue;
        }

        if !LANGUAGE_MARKERS.contains(&token.as_str()) {
            continue;
        }

        // "hindi-speaking" / "hindi speaking" names the language before the marker.
        if token == "speaking" && index > 0 {
            let previous = tokens[index - 1].as_str();
            if LANGUAGES.contains(&previous) {
                continue;
            }
        }

        let candidate = match tokens.get(index + 1).map(String::as_str) {
            Some("in") => tokens.get(index + 2),
            _ => tokens.get(index + 1),
        };
        if let Some(candidate) = candidate {
            let known = LANGUAGES.contains(&candidate.as_str());
            let free = free_words
                && is_free_word(candidate)
                && !CITIES.contains(&candidate.as_str());
            if known || free {
                found = Some(candidate.clone());
            }
        }
    }
    found
}
