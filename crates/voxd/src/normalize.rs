//! Utterance normalization.

/// Produces a canonical form of an utterance.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str, lang: &str, remove_articles: bool) -> String;
}

/// Word-level English normalizer.
///
/// Expands contractions, spells numbers zero to twenty as digits, and optionally
/// drops articles. Other languages only get whitespace collapsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicNormalizer;

const ARTICLES: [&str; 3] = ["a", "an", "the"];

const NUMBERS: [&str; 21] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen", "twenty",
];

const CONTRACTIONS: &[(&str, &str)] = &[
    ("ain't", "is not"),
    ("aren't", "are not"),
    ("can't", "can not"),
    ("could've", "could have"),
    ("couldn't", "could not"),
    ("didn't", "did not"),
    ("doesn't", "does not"),
    ("don't", "do not"),
    ("gonna", "going to"),
    ("gotta", "got to"),
    ("hadn't", "had not"),
    ("hasn't", "has not"),
    ("haven't", "have not"),
    ("he'd", "he would"),
    ("he'll", "he will"),
    ("he's", "he is"),
    ("how'd", "how did"),
    ("how'll", "how will"),
    ("how's", "how is"),
    ("i'd", "i would"),
    ("i'll", "i will"),
    ("i'm", "i am"),
    ("i've", "i have"),
    ("isn't", "is not"),
    ("it'd", "it would"),
    ("it'll", "it will"),
    ("it's", "it is"),
    ("let's", "let us"),
    ("mightn't", "might not"),
    ("might've", "might have"),
    ("mustn't", "must not"),
    ("must've", "must have"),
    ("needn't", "need not"),
    ("shan't", "shall not"),
    ("she'd", "she would"),
    ("she'll", "she will"),
    ("she's", "she is"),
    ("shouldn't", "should not"),
    ("should've", "should have"),
    ("that'll", "that will"),
    ("that's", "that is"),
    ("that'd", "that would"),
    ("there'd", "there would"),
    ("there're", "there are"),
    ("there's", "there is"),
    ("they'd", "they would"),
    ("they'll", "they will"),
    ("they're", "they are"),
    ("they've", "they have"),
    ("wasn't", "was not"),
    ("we'd", "we would"),
    ("we'll", "we will"),
    ("we're", "we are"),
    ("we've", "we have"),
    ("weren't", "were not"),
    ("what'd", "what did"),
    ("what'll", "what will"),
    ("what're", "what are"),
    ("what's", "what is"),
    ("what've", "what have"),
    ("whats", "what is"),
    ("when'd", "when did"),
    ("when's", "when is"),
    ("where'd", "where did"),
    ("where's", "where is"),
    ("where've", "where have"),
    ("who'd", "who would"),
    ("who'll", "who will"),
    ("who're", "who are"),
    ("who's", "who is"),
    ("who've", "who have"),
    ("why'd", "why did"),
    ("why're", "why are"),
    ("why's", "why is"),
    ("won't", "will not"),
    ("would've", "would have"),
    ("wouldn't", "would not"),
    ("y'all", "you all"),
    ("you'd", "you would"),
    ("you'll", "you will"),
    ("you're", "you are"),
    ("you've", "you have"),
];

fn is_english(lang: &str) -> bool {
    let lang = lang.to_ascii_lowercase();
    lang == "en" || lang.starts_with("en-") || lang.starts_with("en_")
}

impl Normalizer for BasicNormalizer {
    fn normalize(&self, text: &str, lang: &str, remove_articles: bool) -> String {
        if !is_english(lang) {
            return text.split_whitespace().collect::<Vec<_>>().join(" ");
        }

        let mut words: Vec<String> = Vec::new();
        for word in text.split_whitespace() {
            let key = word.to_lowercase().replace('\u{2019}', "'");
            if let Some((_, expansion)) = CONTRACTIONS.iter().find(|(from, _)| *from == key) {
                words.extend(expansion.split(' ').map(str::to_string));
            } else {
                words.push(word.to_string());
            }
        }

        words
            .into_iter()
            .filter(|word| !(remove_articles && ARTICLES.contains(&word.to_lowercase().as_str())))
            .map(|word| {
                NUMBERS
                    .iter()
                    .position(|n| word.eq_ignore_ascii_case(n))
                    .map_or(word, |value| value.to_string())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_contractions() {
        let n = BasicNormalizer;
        assert_eq!(n.normalize("what's the time", "en-us", false), "what is the time");
        assert_eq!(n.normalize("i can't hear you", "en-us", false), "i can not hear you");
        assert_eq!(n.normalize("it\u{2019}s late", "en-us", false), "it is late");
    }

    #[test]
    fn numbers_become_digits() {
        let n = BasicNormalizer;
        assert_eq!(
            n.normalize("set a timer for five minutes", "en-us", false),
            "set a timer for 5 minutes"
        );
        assert_eq!(n.normalize("twenty one", "en", false), "20 1");
    }

    #[test]
    fn articles_removed_only_when_asked() {
        let n = BasicNormalizer;
        assert_eq!(
            n.normalize("turn on the lights", "en-us", true),
            "turn on lights"
        );
        assert_eq!(
            n.normalize("turn on the lights", "en-us", false),
            "turn on the lights"
        );
    }

    #[test]
    fn collapses_whitespace() {
        let n = BasicNormalizer;
        assert_eq!(n.normalize("  hello   there ", "en-us", false), "hello there");
        assert_eq!(n.normalize("   ", "en-us", false), "");
    }

    #[test]
    fn other_languages_pass_through() {
        let n = BasicNormalizer;
        assert_eq!(n.normalize("wie   spät ist es", "de-de", true), "wie spät ist es");
        assert_eq!(n.normalize("one", "es-es", false), "one");
    }
}
