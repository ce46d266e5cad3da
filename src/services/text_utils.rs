//! Shared text normalization and comparison utilities
//!
//! Path sanitizing for library folder and file names, plus title
//! normalization used for lease keys and lookup matching.

/// Fixed substitution table for filesystem-hostile characters. Applied after
/// transliteration, so every key and value here is ASCII.
const SUBSTITUTIONS: &[(char, &str)] = &[
    ('\\', " - "),
    ('/', " - "),
    (':', " - "),
    ('|', " - "),
    ('*', "-"),
    ('<', ""),
    ('>', ""),
    ('?', ""),
    ('!', ""),
    ('"', "'"),
    ('[', "("),
    (']', ")"),
    ('{', "("),
    ('}', ")"),
    ('\t', " "),
    ('\n', " "),
    ('\r', " "),
];

/// Characters that never survive [`sanitize_path_segment`]
pub const FORBIDDEN_CHARS: &[char] = &[
    '\\', '/', ':', '|', '*', '<', '>', '?', '!', '"', '[', ']', '{', '}',
    '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2026}',
];

/// Sanitize one path segment (directory or file name component).
///
/// Transliterates to ASCII, substitutes hostile characters, collapses runs of
/// spaces and strips leading/trailing whitespace, hyphens and periods.
/// Idempotent: `sanitize_path_segment(sanitize_path_segment(s)) == sanitize_path_segment(s)`.
pub fn sanitize_path_segment(name: &str) -> String {
    // Curly quotes and ellipsis get explicit ASCII forms before transliteration
    let pre: String = name
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}' => "'".to_string(),
            '\u{2026}' => "...".to_string(),
            other => other.to_string(),
        })
        .collect();

    let ascii = deunicode::deunicode(&pre);

    let mut substituted = String::with_capacity(ascii.len());
    for c in ascii.chars() {
        match SUBSTITUTIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => substituted.push_str(to),
            None if c.is_control() => substituted.push(' '),
            None => substituted.push(c),
        }
    }

    // Trim before and after the platform pass: reserved device names only
    // match once the surrounding punctuation is gone.
    let trimmed = collapse_and_trim(&substituted);
    let safe = sanitize_filename::sanitize(&trimmed);
    collapse_and_trim(&safe)
}

fn collapse_and_trim(s: &str) -> String {
    let collapsed = s.split(' ').filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == ' ' || c == '-' || c == '.')
        .to_string()
}

/// Normalize a title for matching and keying.
/// Removes punctuation and special characters, normalizes whitespace.
pub fn normalize_title(title: &str) -> String {
    deunicode::deunicode(title)
        .to_lowercase()
        .replace(['\'', ':', '-', '.', '_', ',', '!', '?'], " ")
        .replace('&', "and")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a title with leading article removal ("the", "a", "an")
pub fn normalize_title_no_articles(title: &str) -> String {
    let normalized = normalize_title(title);
    for article in ["the ", "a ", "an "] {
        if let Some(rest) = normalized.strip_prefix(article) {
            return rest.to_string();
        }
    }
    normalized
}

/// Similarity between two titles (0.0 to 1.0) after normalization
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title_no_articles(a);
    let b = normalize_title_no_articles(b);
    strsim::normalized_levenshtein(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NASTY: &[&str] = &[
        "Star Wars: Episode IV",
        "What/If?",
        "AC\\DC",
        "  -Leading and trailing-.  ",
        "Wall\u{2022}E",
        "Am\u{e9}lie",
        "Who Framed Roger Rabbit?!",
        "\u{201C}Quoted\u{201D} \u{2018}single\u{2019}",
        "To Be Continued\u{2026}",
        "Tab\tand\nnewline",
        "Brackets [and] {braces}",
        "CON",
        "-CON-",
        "...",
        "\u{6771}\u{4EAC}",
        "Many     spaces",
        "a*b|c<d>e\"f",
        "\u{ab}Guillemets\u{bb}",
        "Se7en.",
        "",
    ];

    #[test]
    fn test_sanitize_substitutions() {
        assert_eq!(sanitize_path_segment("Star Wars: Episode IV"), "Star Wars - Episode IV");
        assert_eq!(sanitize_path_segment("What/If?"), "What - If");
        assert_eq!(sanitize_path_segment("Am\u{e9}lie"), "Amelie");
        assert_eq!(sanitize_path_segment("To Be Continued\u{2026}"), "To Be Continued");
        assert_eq!(sanitize_path_segment("Many     spaces"), "Many spaces");
        assert_eq!(sanitize_path_segment("  -Leading and trailing-.  "), "Leading and trailing");
        assert_eq!(sanitize_path_segment("Se7en."), "Se7en");
        assert_eq!(sanitize_path_segment("Normal Name (1999)"), "Normal Name (1999)");
    }

    #[test]
    fn test_sanitize_keeps_common_punctuation() {
        assert_eq!(sanitize_path_segment("Schindler's List"), "Schindler's List");
        assert_eq!(sanitize_path_segment("Fast & Furious"), "Fast & Furious");
        assert_eq!(sanitize_path_segment("Spider-Man"), "Spider-Man");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for input in NASTY {
            let once = sanitize_path_segment(input);
            let twice = sanitize_path_segment(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_sanitize_output_has_no_forbidden_chars() {
        for input in NASTY {
            let out = sanitize_path_segment(input);
            assert!(
                !out.contains(FORBIDDEN_CHARS),
                "{input:?} sanitized to {out:?}"
            );
            assert!(out.is_ascii(), "{out:?} is not ASCII");
            assert!(!out.contains("  "));
            assert!(!out.starts_with([' ', '-', '.']));
            assert!(!out.ends_with([' ', '-', '.']));
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("The Lord's Return"), "the lord s return");
        assert_eq!(normalize_title("Spider-Man: No Way Home"), "spider man no way home");
        assert_eq!(normalize_title("Fast & Furious"), "fast and furious");
        assert_eq!(normalize_title("Am\u{e9}lie"), "amelie");
    }

    #[test]
    fn test_normalize_title_no_articles() {
        assert_eq!(normalize_title_no_articles("The Walking Dead"), "walking dead");
        assert_eq!(normalize_title_no_articles("A Series of Events"), "series of events");
        assert_eq!(normalize_title_no_articles("Breaking Bad"), "breaking bad");
    }

    #[test]
    fn test_title_similarity() {
        assert!((title_similarity("Alien", "alien") - 1.0).abs() < 0.001);
        assert!(title_similarity("The Office", "Office") > 0.99);
        assert!(title_similarity("Alien", "Aliens") > 0.8);
        assert!(title_similarity("Alien", "Heat") < 0.5);
    }
}
