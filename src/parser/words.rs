use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use ego_tree::{NodeId, NodeRef};
use scraper::{Html, Node};

/// Normalized stand-in for any numeric fragment. The literal value stays
/// recoverable from the token's `original_format`.
pub const NUMBER_WORD: &str = "#";

/// Fragment grammar, tried in order: numbers (decimal, fraction with either
/// slash character and optional whitespace around it, bare integer), then
/// punctuation runs with their surrounding whitespace, then plain words.
/// Anything else in the text is dropped.
static FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<number>\d+\.\d+|\d+\s*\d*\s*[/⁄]\s*\d+|\d+)",
        r"|(?P<symbol>\s*[:°.()&]+\s*)",
        r"|(?P<plain>[\p{L}'-]+)",
    ))
    .unwrap()
});

static NUMBER_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:(\d+)\s+)?(\d+)\s*[/⁄]\s*(\d+)|(\d+\.\d+)|(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct WordToken {
    /// Normalized text: `#` for numbers, the trimmed run for symbols, the word
    /// itself otherwise.
    pub word: String,
    /// Exact matched substring, kept only where normalization lost it
    /// (numbers and symbol runs). Plain words are already exact.
    pub original_format: Option<String>,
    pub document_position: i64,
    pub element_position: i64,
    pub element_tag: String,
}

/// Walk the HTML element tree in document order and emit one classified token
/// per fragment. An element's own text is attributed to it; text following a
/// child element ("tail") is attributed to the parent and consumes the
/// parent's position counter, in the order the elements are visited.
pub fn tokenize_document(html: &str) -> Result<Vec<WordToken>> {
    // html5ever recovers from nearly any markup; an empty payload is the one
    // input with no element tree to walk.
    if html.trim().is_empty() {
        bail!("cannot tokenize an empty document");
    }

    let dom = Html::parse_document(html);
    let mut tokens = Vec::new();
    let mut document_position: i64 = 0;
    let mut element_positions: HashMap<NodeId, i64> = HashMap::new();

    for node in dom.tree.root().descendants() {
        let Node::Element(element) = node.value() else {
            continue;
        };

        let text = leading_text(node);
        emit_fragments(
            &text,
            node.id(),
            element.name(),
            &mut tokens,
            &mut document_position,
            &mut element_positions,
        );

        if let Some(parent) = node.parent() {
            if let Node::Element(parent_element) = parent.value() {
                let tail = tail_text(node);
                emit_fragments(
                    &tail,
                    parent.id(),
                    parent_element.name(),
                    &mut tokens,
                    &mut document_position,
                    &mut element_positions,
                );
            }
        }
    }

    Ok(tokens)
}

/// Text-node children up to the element's first child element.
fn leading_text(node: NodeRef<Node>) -> String {
    let mut text = String::new();
    for child in node.children() {
        match child.value() {
            Node::Text(t) => text.push_str(&t),
            Node::Comment(_) => {}
            _ => break,
        }
    }
    text
}

/// Text-node siblings between this element's end and the next element sibling.
fn tail_text(node: NodeRef<Node>) -> String {
    let mut text = String::new();
    for sibling in node.next_siblings() {
        match sibling.value() {
            Node::Text(t) => text.push_str(&t),
            Node::Comment(_) => {}
            _ => break,
        }
    }
    text
}

fn emit_fragments(
    text: &str,
    counter_key: NodeId,
    element_tag: &str,
    tokens: &mut Vec<WordToken>,
    document_position: &mut i64,
    element_positions: &mut HashMap<NodeId, i64>,
) {
    for caps in FRAGMENT_RE.captures_iter(text) {
        let (word, original_format) = if let Some(m) = caps.name("number") {
            (NUMBER_WORD.to_string(), Some(m.as_str().to_string()))
        } else if let Some(m) = caps.name("symbol") {
            (m.as_str().trim().to_string(), Some(m.as_str().to_string()))
        } else {
            (caps[0].to_string(), None)
        };

        let element_position = element_positions.entry(counter_key).or_insert(0);
        tokens.push(WordToken {
            word,
            original_format,
            document_position: *document_position,
            element_position: *element_position,
            element_tag: element_tag.to_string(),
        });
        *document_position += 1;
        *element_position += 1;
    }
}

/// Recover the scalar value of a number token from its original text: every
/// number-shaped substring (mixed fraction, simple fraction, decimal, integer)
/// is parsed and the values are summed, so "1 1/2" and "1" + "1/2" both come
/// out as 1.5.
///
/// Panics when the text holds no number at all — the classifier only produces
/// number tokens from numeric matches, so that is an invariant violation, not
/// an input error.
pub fn reconstruct_number(original: &str) -> f64 {
    let mut total = 0.0;
    let mut found = false;
    for caps in NUMBER_VALUE_RE.captures_iter(original) {
        let value = match (caps.get(2), caps.get(3), caps.get(4), caps.get(5)) {
            (Some(numerator), Some(denominator), _, _) => fraction_value(
                caps.get(1).map(|m| m.as_str()),
                numerator.as_str(),
                denominator.as_str(),
            ),
            (_, _, Some(decimal), _) => decimal.as_str().parse().ok(),
            (_, _, _, Some(integer)) => integer.as_str().parse().ok(),
            _ => None,
        };
        if let Some(value) = value {
            total += value;
            found = true;
        }
    }
    if !found {
        panic!("number token with no numeric content: {:?}", original);
    }
    total
}

fn fraction_value(whole: Option<&str>, numerator: &str, denominator: &str) -> Option<f64> {
    let denominator: f64 = denominator.parse().ok()?;
    if denominator == 0.0 {
        return None;
    }
    let numerator: f64 = numerator.parse().ok()?;
    let whole: f64 = match whole {
        Some(w) => w.parse().ok()?,
        None => 0.0,
    };
    Some(whole + numerator / denominator)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn words(tokens: &[WordToken]) -> Vec<&str> {
        tokens.iter().map(|t| t.word.as_str()).collect()
    }

    #[test]
    fn classifies_degrees_line() {
        let tokens = tokenize_document("<p>Preheat oven to 350 ° F.</p>").unwrap();
        assert_eq!(
            words(&tokens),
            vec!["Preheat", "oven", "to", "#", "°", "F", "."]
        );
        assert_eq!(tokens[3].original_format.as_deref(), Some("350"));
        assert_eq!(tokens[4].original_format.as_deref(), Some(" ° "));
        assert_eq!(tokens[5].original_format, None);
        assert_eq!(tokens[6].original_format.as_deref(), Some("."));
    }

    #[test]
    fn mixed_fraction_is_one_token() {
        let tokens = tokenize_document("<p>1 1/2 cups flour</p>").unwrap();
        assert_eq!(words(&tokens), vec!["#", "cups", "flour"]);
        assert_eq!(tokens[0].original_format.as_deref(), Some("1 1/2"));
    }

    #[test]
    fn fraction_slash_character() {
        let tokens = tokenize_document("<p>1⁄2 teaspoon</p>").unwrap();
        assert_eq!(words(&tokens), vec!["#", "teaspoon"]);
        assert_eq!(reconstruct_number(tokens[0].original_format.as_deref().unwrap()), 0.5);
    }

    #[test]
    fn parentheses_keep_adjacent_whitespace() {
        let tokens = tokenize_document("<p>flour (sifted)</p>").unwrap();
        assert_eq!(words(&tokens), vec!["flour", "(", "sifted", ")"]);
        assert_eq!(tokens[1].original_format.as_deref(), Some(" ("));
        assert_eq!(tokens[3].original_format.as_deref(), Some(")"));
    }

    #[test]
    fn document_positions_are_contiguous() {
        let html = std::fs::read_to_string("tests/fixtures/banana_bread.html").unwrap();
        let tokens = tokenize_document(&html).unwrap();
        assert!(tokens.len() > 30);
        for (i, token) in tokens.iter().enumerate() {
            assert_eq!(token.document_position, i as i64);
        }
    }

    #[test]
    fn element_positions_reset_per_element() {
        let tokens = tokenize_document("<ul><li>two cups flour</li><li>one egg</li></ul>").unwrap();
        let positions: Vec<i64> = tokens.iter().map(|t| t.element_position).collect();
        assert_eq!(positions, vec![0, 1, 2, 0, 1]);
        assert!(tokens.iter().all(|t| t.element_tag == "li"));
    }

    #[test]
    fn tail_text_belongs_to_parent() {
        let tokens = tokenize_document("<p>before<b>bold</b>after</p>").unwrap();
        let tags: Vec<(&str, &str, i64)> = tokens
            .iter()
            .map(|t| (t.word.as_str(), t.element_tag.as_str(), t.element_position))
            .collect();
        assert_eq!(
            tags,
            vec![("before", "p", 0), ("bold", "b", 0), ("after", "p", 1)]
        );
    }

    #[test]
    fn empty_document_fails() {
        assert!(tokenize_document("").is_err());
        assert!(tokenize_document("   \n ").is_err());
    }

    #[test]
    fn reconstructs_integers_fractions_and_decimals() {
        assert_eq!(reconstruct_number("1"), 1.0);
        assert_eq!(reconstruct_number("1/2"), 0.5);
        assert_eq!(reconstruct_number("1 1/2"), 1.5);
        assert_eq!(reconstruct_number("2.25"), 2.25);
        assert_eq!(reconstruct_number("1 / 2"), 0.5);
        assert_eq!(reconstruct_number("1 1/2 2"), 3.5);
    }

    #[test]
    #[should_panic(expected = "no numeric content")]
    fn reconstruct_panics_without_digits() {
        reconstruct_number("half");
    }
}
