//!
//! src/classifier.rs  Andrew Belles  Oct 2025
//!
//! Per-track classification prompt and the strict parser for the
//! model's three-field answer
//!

use regex::Regex;

use crate::types::{Category, Classification, Track};

/// `<n>. <name>: <description>` blocks separated by blank lines
pub fn format_categories(categories: &[Category]) -> String {
    categories.iter()
        .map(|c| format!("{}. {}: {}", c.category_number, c.category_name, c.description))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn or_none<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "None".to_string())
}

pub fn track_prompt(track: &Track, categories_text: &str) -> String {
    let artists = track.artists.join(", ");
    let genres = or_none(track.genres.as_ref().map(|g| g.join(", ")));
    let f = &track.features;

    format!(
        "Given a list of categories and their descriptions, please determine which category the \
following song fits best into. Use the song's genres, along with any other relevant information \
provided, to make your decision. After making your decision, structure your response as follows: \
Start with \"Category number:\" followed by the number of the category. Then, on a new line, write \
\"Category name:\" followed by the name of the category. Then, on a new line, write \"Reasoning:\" \
followed by a brief explanation of why the song fits best in the chosen category. Here are the \
categories:

{categories_text}

Song Information:

    Name: {name}
    Artists: {artists}
    Album: {album}
    Release Date: {release_date}
    Genres: {genres}
    Popularity: {popularity}
    Danceability: {danceability}
    Energy: {energy}
    Key: {key}
    Loudness: {loudness}
    Mode: {mode}
    Speechiness: {speechiness}
    Acousticness: {acousticness}
    Instrumentalness: {instrumentalness}
    Liveness: {liveness}
    Valence: {valence}
    Tempo: {tempo}
    Duration MS: {duration_ms}
    Time Signature: {time_signature}

Based on the genres listed and any other information you deem relevant from the song information \
provided, which of the categories does \"{name}\" by {artists} fit best into? Please explain your \
reasoning.",
        name = track.name,
        album = track.album,
        release_date = or_none(track.release_date.as_deref()),
        popularity = or_none(track.popularity),
        danceability = or_none(f.danceability),
        energy = or_none(f.energy),
        key = or_none(f.key),
        loudness = or_none(f.loudness),
        mode = or_none(f.mode),
        speechiness = or_none(f.speechiness),
        acousticness = or_none(f.acousticness),
        instrumentalness = or_none(f.instrumentalness),
        liveness = or_none(f.liveness),
        valence = or_none(f.valence),
        tempo = or_none(f.tempo),
        duration_ms = or_none(f.duration_ms),
        time_signature = or_none(f.time_signature),
    )
}

///
/// Matches `Category number: <n>` / `Category name: <name>` / `Reasoning: <text>`
/// anywhere in the response. Anything else is None.
///
pub fn parse_classification(text: &str) -> Option<Classification> {
    let pattern = Regex::new(
        r"(?s)Category number:\s*(\d+)\s+Category name:\s*([\w\s]+?)\s+Reasoning:\s*(.+)"
    ).ok()?;
    let caps = pattern.captures(text)?;

    let category_number = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let category_name = caps.get(2)?.as_str().trim().to_string();
    let reasoning = caps.get(3)?.as_str().trim().to_string();
    if category_name.is_empty() || reasoning.is_empty() {
        return None;
    }

    Some( Classification { category_number, category_name, reasoning } )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{category, track};

    #[test]
    fn categories_render_as_numbered_blocks() {
        let text = format_categories(&[
            category(1, "**Rock**", "guitars"),
            category(4, "Jazz", "swing"),
        ]);
        assert_eq!(text, "1. **Rock**: guitars\n\n4. Jazz: swing");
    }

    #[test]
    fn prompt_uses_none_for_missing_values() {
        let mut t = track("t1", &["a1"]);
        t.name = "Let It Happen".into();
        t.artists = vec!["Tame Impala".into()];
        t.features.tempo = Some(125.0);
        t.genres = Some(vec!["psychedelic rock".into(), "indie".into()]);

        let prompt = track_prompt(&t, "1. Rock: guitars");
        assert!(prompt.contains("1. Rock: guitars"));
        assert!(prompt.contains("    Name: Let It Happen\n"));
        assert!(prompt.contains("    Genres: psychedelic rock, indie\n"));
        assert!(prompt.contains("    Tempo: 125\n"));
        assert!(prompt.contains("    Energy: None\n"));
        assert!(prompt.contains("does \"Let It Happen\" by Tame Impala fit best"));
    }

    #[test]
    fn parses_three_labelled_fields() {
        let text = "Category number: 2\nCategory name: Dream Pop\nReasoning: Hazy guitars\nand reverb.";
        let parsed = parse_classification(text).expect("should parse");
        assert_eq!(parsed.category_number, 2);
        assert_eq!(parsed.category_name, "Dream Pop");
        assert_eq!(parsed.reasoning, "Hazy guitars\nand reverb.");
    }

    #[test]
    fn rejects_non_conforming_answers() {
        assert!(parse_classification("I think this is rock music.").is_none());
        assert!(parse_classification("Category number: two\nCategory name: Rock\nReasoning: x").is_none());
        assert!(parse_classification("Category number: 2\nReasoning: missing name").is_none());
    }
}
