//! Text normalisation for provider display names
//!
//! Names arrive upper-cased, padded and sometimes entity-encoded
//! (`&#350;ANLIURFA`). They are decoded, whitespace-collapsed and title-cased
//! word by word without folding diacritics.

/// Casing rules applied when title-casing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Casing {
    /// Dotted/dotless i pairs: `I`↔`ı`, `İ`↔`i`
    Turkish,
    /// Plain Unicode case mapping
    Unicode,
}

/// Decode HTML entities, trim and collapse inner whitespace
pub fn clean(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a display name and title-case it
pub fn display_name(raw: &str, casing: Casing) -> String {
    title_case(&clean(raw), casing)
}

/// Upper-case the first letter of every word and lower-case the rest
pub fn title_case(text: &str, casing: Casing) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;

    for c in text.chars() {
        if is_word_boundary(c) {
            out.push(c);
            at_word_start = true;
        } else if at_word_start {
            push_upper(&mut out, c, casing);
            at_word_start = false;
        } else {
            push_lower(&mut out, c, casing);
        }
    }

    out
}

fn is_word_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '(' | ')' | '/' | '.')
}

fn push_upper(out: &mut String, c: char, casing: Casing) {
    match (casing, c) {
        (Casing::Turkish, 'i') => out.push('İ'),
        (Casing::Turkish, 'ı') => out.push('I'),
        _ => out.extend(c.to_uppercase()),
    }
}

fn push_lower(out: &mut String, c: char, casing: Casing) {
    match (casing, c) {
        (Casing::Turkish, 'I') => out.push('ı'),
        (Casing::Turkish, 'İ') => out.push('i'),
        // 'İ' lower-cases to "i\u{307}" under plain Unicode rules
        (Casing::Unicode, 'İ') => out.push('i'),
        _ => out.extend(c.to_lowercase()),
    }
}
