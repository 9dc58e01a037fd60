/// Word filter applied to chat traffic before broadcast. Matching is
/// whole-word and case-insensitive; masked words keep their length. The
/// built-in list is a seed — deployments extend it with `with_words`.
pub struct ProfanityFilter {
    words: Vec<String>,
}

const DEFAULT_WORDS: &[&str] = &[
    "damn", "hell", "crap", "jackass", "bollocks",
    "merde", "putain", "connard", "salaud",
];

impl ProfanityFilter {
    pub fn new() -> Self {
        Self::with_words([])
    }

    pub fn with_words(extra: impl IntoIterator<Item = String>) -> Self {
        let mut words: Vec<String> = DEFAULT_WORDS.iter().map(|w| w.to_lowercase()).collect();
        words.extend(extra.into_iter().map(|w| w.to_lowercase()));
        words.sort();
        words.dedup();
        Self { words }
    }

    fn is_banned(&self, word: &str) -> bool {
        let lowered = word.to_lowercase();
        self.words.binary_search(&lowered).is_ok()
    }

    /// Banned terms present in `text`, in list order.
    pub fn detect(&self, text: &str) -> Vec<&str> {
        let mut found = Vec::new();
        for word in split_words(text) {
            let lowered = word.to_lowercase();
            if let Ok(idx) = self.words.binary_search(&lowered) {
                let entry = self.words[idx].as_str();
                if !found.contains(&entry) {
                    found.push(entry);
                }
            }
        }
        found
    }

    pub fn contains_profanity(&self, text: &str) -> bool {
        split_words(text).any(|word| self.is_banned(word))
    }

    /// Replaces each banned word with asterisks of the same length,
    /// leaving everything else untouched.
    pub fn clean(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut word = String::new();

        for ch in text.chars() {
            if ch.is_alphanumeric() || ch == '\'' {
                word.push(ch);
            } else {
                self.flush_word(&mut out, &mut word);
                out.push(ch);
            }
        }
        self.flush_word(&mut out, &mut word);
        out
    }

    fn flush_word(&self, out: &mut String, word: &mut String) {
        if word.is_empty() {
            return;
        }
        if self.is_banned(word) {
            out.extend(std::iter::repeat_n('*', word.chars().count()));
        } else {
            out.push_str(word);
        }
        word.clear();
    }
}

impl Default for ProfanityFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn split_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
}
