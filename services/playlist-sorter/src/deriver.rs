//!
//! src/deriver.rs  Andrew Belles  Oct 2025
//!
//! Category derivation: builds the shuffled genre corpus from a playlist's
//! cached tracks, renders the categories prompt and parses the model's
//! free-form numbered list back into categories
//!

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use regex::Regex;

use crate::types::{Category, Track};

///
/// One line per track with at least one genre, genres comma-joined,
/// shuffled with a fixed seed and cut to `max_chars` characters
///
pub fn build_corpus(tracks: &[Track], seed: u64, max_chars: usize) -> String {
    let mut lines: Vec<String> = tracks.iter()
        .filter(|t| t.has_genres())
        .filter_map(|t| t.genres.as_ref().map(|g| g.join(", ")))
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    lines.shuffle(&mut rng);

    let mut corpus = lines.join("\n");
    if let Some((idx, _)) = corpus.char_indices().nth(max_chars) {
        corpus.truncate(idx);
    }
    corpus
}

pub fn categories_prompt(count: u32, corpus: &str) -> String {
    format!(
        "I have a list of songs, each with one or more genres associated with it. Based on these \
genres, I would like you to analyze the list and create {count} distinct categories that these \
songs could be grouped into. Each category should represent a unique theme or commonality found \
within the genres. Please provide a brief description for each category to explain the common \
theme or elements that define it.\n\
Please output each category using the following format:\n\
[[NUMBER]]. **[[TITLE]]**: [[DESCRIPTION]]\n\n\
Here is the list of songs and their associated genres:\n\n\
{corpus}\n\n\
Remember, the categories must be exactly {count}."
    )
}

///
/// Parses `<n>. <title>: <description>` entries. A description runs until
/// the next numbered line or the end of the text. Text before the first
/// entry is dropped, number 0 is rejected, and a repeated number replaces
/// the earlier entry in place.
///
pub fn parse_categories(text: &str) -> Vec<Category> {
    // static patterns, compiling cannot fail
    let Ok(header) = Regex::new(r"(?m)^[ \t]*(\d+)\.[ \t]*([^:\n]+):") else {
        return Vec::new();
    };
    let Ok(numbered) = Regex::new(r"(?m)^[ \t]*\d+\.") else {
        return Vec::new();
    };

    let boundaries: Vec<usize> = numbered.find_iter(text).map(|m| m.start()).collect();
    let mut out: Vec<Category> = Vec::new();

    for caps in header.captures_iter(text) {
        let (Some(whole), Some(number), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(category_number) = number.as_str().parse::<u32>() else {
            continue;
        };
        let category_name = name.as_str().trim().to_string();
        if category_number == 0 || category_name.is_empty() {
            continue;
        }

        let end = boundaries.iter()
            .copied()
            .find(|&b| b > whole.start())
            .unwrap_or(text.len());
        let description = text[whole.end()..end.max(whole.end())].trim().to_string();
        if description.is_empty() {
            continue;
        }

        let category = Category { category_number, category_name, description, playlist_id: None };
        match out.iter_mut().find(|c| c.category_number == category_number) {
            Some(existing) => *existing = category,
            None => out.push(category)
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::track;

    fn with_genres(id: &str, genres: &[&str]) -> Track {
        let mut t = track(id, &[]);
        t.genres = Some(genres.iter().map(|g| g.to_string()).collect());
        t
    }

    #[test]
    fn corpus_is_a_reproducible_permutation() {
        let tracks = vec![
            with_genres("t1", &["rock", "pop"]),
            with_genres("t2", &["jazz"]),
            with_genres("t3", &["blues", "classical"]),
            with_genres("t4", &[]),
            track("t5", &[]),
        ];

        let a = build_corpus(&tracks, 42, 50_000);
        let b = build_corpus(&tracks, 42, 50_000);
        assert_eq!(a, b);

        let mut lines: Vec<&str> = a.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["blues, classical", "jazz", "rock, pop"]);
    }

    #[test]
    fn corpus_truncates_on_char_boundaries() {
        let tracks = vec![with_genres("t1", &["música popular brasileira"])];
        let corpus = build_corpus(&tracks, 0, 7);
        assert_eq!(corpus, "música ");
        assert_eq!(build_corpus(&[], 0, 10), "");
    }

    #[test]
    fn prompt_carries_count_and_corpus() {
        let prompt = categories_prompt(4, "rock, pop\njazz");
        assert!(prompt.contains("create 4 distinct categories"));
        assert!(prompt.contains("rock, pop\njazz"));
        assert!(prompt.ends_with("the categories must be exactly 4."));
    }

    #[test]
    fn parses_numbered_markdown_list() {
        let text = "Here are the categories:\n\n\
            1. **Rock Genres**: Encompassing classic rock and modern rock.\n\n\
            2. **Pop Genres**: Covering all forms of pop music.\n\
            It also spans into dance.\n\n";
        let categories = parse_categories(text);

        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category_number, 1);
        assert_eq!(categories[0].category_name, "**Rock Genres**");
        assert_eq!(categories[0].description, "Encompassing classic rock and modern rock.");
        assert_eq!(
            categories[1].description,
            "Covering all forms of pop music.\nIt also spans into dance."
        );
        assert!(categories.iter().all(|c| c.playlist_id.is_none()));
    }

    #[test]
    fn malformed_entries_are_dropped_and_duplicates_replace() {
        let text = "0. **Zero**: never valid\n\
            3. **Gap**: numbers need not be contiguous\n\
            4. no colon on this line\n\
            3. **Again**: replaces the first three\n\
            7. **Empty**:\n";
        let categories = parse_categories(text);

        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].category_number, 3);
        assert_eq!(categories[0].category_name, "**Again**");
        assert_eq!(categories[0].description, "replaces the first three");

        assert!(parse_categories("no list here").is_empty());
    }
}
