use std::collections::HashSet;

/// Minimum token length (in characters) kept by [`tokenize`]
pub const MIN_WORD_LENGTH: usize = 2;

/// Ellipsis appended to truncated snippets
const ELLIPSIS: &str = "...";

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
    "he", "her", "his", "if", "in", "into", "is", "it", "its", "no", "not", "of", "on", "or",
    "she", "so", "such", "that", "the", "their", "then", "there", "these", "they", "this", "to",
    "was", "we", "were", "will", "with", "you",
];

/// Removes anything that looks like markup.
///
/// Every `<` opens a tag that runs to the next `>`; an unterminated tag eats
/// the rest of the input. Each removed tag becomes a single space so words on
/// either side of `<br/>` stay apart.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match (in_tag, c) {
            (false, '<') => in_tag = true,
            (false, _) => out.push(c),
            (true, '>') => {
                in_tag = false;
                out.push(' ');
            }
            (true, _) => {}
        }
    }

    out
}

/// Plain-text preview of sanitized HTML: tags stripped, whitespace collapsed,
/// truncated to `max_chars` characters with "..." appended when cut.
pub fn snippet(html: &str, max_chars: usize) -> String {
    let text = strip_tags(html);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &collapsed[..cut], ELLIPSIS),
        None => collapsed,
    }
}

/// Search tokens for a piece of text that may contain HTML.
///
/// Lower-cased, split on anything that is not a letter or digit, stop words
/// and short tokens dropped, de-duplicated in order of first occurrence.
///
/// # Examples
///
/// ```
/// use vesper::util::tokenize;
///
/// assert_eq!(tokenize("<p>The quick <b>brown</b> fox</p>"), vec!["quick", "brown", "fox"]);
/// assert_eq!(tokenize("Hello HELLO world"), vec!["hello", "world"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    let plain = strip_tags(text).to_lowercase();
    let mut seen = HashSet::new();

    plain
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_WORD_LENGTH)
        .filter(|word| !STOP_WORDS.contains(word))
        .filter(|word| seen.insert(word.to_string()))
        .map(str::to_owned)
        .collect()
}
