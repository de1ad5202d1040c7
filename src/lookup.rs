use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

/// Upper bound on candidates returned for one name query.
pub const MAX_NAME_MATCHES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngredientMatch {
    pub ingredient_id: i64,
    pub name: String,
}

/// Ranked canonical-name candidates for a free-text ingredient query. The
/// ranking function is pluggable; implementations return at most `limit`
/// results, best first.
pub trait IngredientLookup {
    fn find_matches(&self, query: &str, limit: usize) -> Result<Vec<IngredientMatch>>;
}

/// Ranks the `ingredient` catalog by character-trigram overlap (Jaccard) with
/// the query. Ties break alphabetically so rankings are deterministic.
pub struct TrigramLookup<'a> {
    conn: &'a Connection,
}

impl<'a> TrigramLookup<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl IngredientLookup for TrigramLookup<'_> {
    fn find_matches(&self, query: &str, limit: usize) -> Result<Vec<IngredientMatch>> {
        let query_trigrams = trigrams(query);
        if query_trigrams.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, IngredientMatch)> = crate::db::fetch_ingredients(self.conn)?
            .into_iter()
            .filter_map(|(ingredient_id, name)| {
                let score = similarity(&query_trigrams, &trigrams(&name));
                (score > 0.0).then_some((score, IngredientMatch { ingredient_id, name }))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.name.cmp(&b.1.name))
        });
        Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
    }
}

fn trigrams(text: &str) -> HashSet<String> {
    let padded = format!("  {} ", text.to_lowercase());
    let chars: Vec<char> = padded.chars().collect();
    chars
        .windows(3)
        .filter(|w| !w.iter().all(|c| c.is_whitespace()))
        .map(|w| w.iter().collect())
        .collect()
}

fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let shared = a.intersection(b).count();
    if shared == 0 {
        return 0.0;
    }
    shared as f64 / (a.len() + b.len() - shared) as f64
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn catalog(names: &[&str]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        db::insert_ingredients(&conn, &names).unwrap();
        conn
    }

    #[test]
    fn exact_name_ranks_first() {
        let conn = catalog(&["all-purpose flour", "flour", "granulated sugar"]);
        let matches = TrigramLookup::new(&conn)
            .find_matches("flour", MAX_NAME_MATCHES)
            .unwrap();
        assert_eq!(matches[0].name, "flour");
        assert_eq!(matches[1].name, "all-purpose flour");
        assert!(matches.iter().all(|m| m.name != "granulated sugar"));
    }

    #[test]
    fn result_count_is_bounded() {
        let conn = catalog(&[
            "flour", "rice flour", "rye flour", "oat flour", "corn flour", "spelt flour",
            "almond flour",
        ]);
        let matches = TrigramLookup::new(&conn)
            .find_matches("flour", MAX_NAME_MATCHES)
            .unwrap();
        assert_eq!(matches.len(), MAX_NAME_MATCHES);
    }

    #[test]
    fn empty_catalog_yields_no_matches() {
        let conn = catalog(&[]);
        let matches = TrigramLookup::new(&conn)
            .find_matches("flour", MAX_NAME_MATCHES)
            .unwrap();
        assert!(matches.is_empty());
    }
}
