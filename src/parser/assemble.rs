use anyhow::Result;
use serde::Serialize;

use crate::db::WordRow;
use crate::lookup::{IngredientLookup, IngredientMatch, MAX_NAME_MATCHES};
use crate::parser::groups::{GroupedRun, Segment};
use crate::parser::words::{reconstruct_number, NUMBER_WORD};

/// Closed label vocabulary the assembler understands. Runs carrying anything
/// else are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Label {
    Title,
    IngredientsHeading,
    IngredientName,
    IngredientQuantity,
    IngredientUnits,
    IngredientPreparation,
    Directions,
}

impl Label {
    fn from_tag(tag: &str) -> Option<Label> {
        match tag {
            "title" => Some(Label::Title),
            "ingredients-heading" => Some(Label::IngredientsHeading),
            "ingredient-name" => Some(Label::IngredientName),
            "ingredient-quantity" => Some(Label::IngredientQuantity),
            "ingredient-units" => Some(Label::IngredientUnits),
            "ingredient-preparation" => Some(Label::IngredientPreparation),
            "directions" => Some(Label::Directions),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftIngredient {
    pub name_query: Option<String>,
    pub matches: Vec<IngredientMatch>,
    pub quantity: Option<f64>,
    pub units: Option<String>,
    pub preparation: Option<String>,
    pub component: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecipeDraft {
    pub title: Option<String>,
    pub ingredients: Vec<DraftIngredient>,
    pub directions: Vec<String>,
}

/// Fields gathered for the ingredient currently being read. Appended to the
/// draft once the assembler decides the record is complete.
#[derive(Default)]
struct IngredientAccumulator {
    name_query: Option<String>,
    matches: Vec<IngredientMatch>,
    quantity: Option<f64>,
    units: Option<String>,
    preparation: Option<String>,
}

impl IngredientAccumulator {
    fn is_empty(&self) -> bool {
        self.name_query.is_none()
            && self.quantity.is_none()
            && self.units.is_none()
            && self.preparation.is_none()
    }

    fn flush_into(&mut self, component: Option<&str>, ingredients: &mut Vec<DraftIngredient>) {
        if self.is_empty() {
            return;
        }
        let finished = std::mem::take(self);
        ingredients.push(DraftIngredient {
            name_query: finished.name_query,
            matches: finished.matches,
            quantity: finished.quantity,
            units: finished.units,
            preparation: finished.preparation,
            component: component.map(str::to_string),
        });
    }
}

/// Interpret grouped runs against the label vocabulary and build the draft.
pub fn assemble_recipe(
    segments: &[Segment],
    lookup: &dyn IngredientLookup,
) -> Result<RecipeDraft> {
    let mut draft = RecipeDraft::default();
    let mut component: Option<String> = None;
    let mut accumulator = IngredientAccumulator::default();

    for segment in segments {
        for run in segment {
            let mut labels: Vec<Label> =
                run.tags.iter().filter_map(|t| Label::from_tag(t)).collect();
            labels.sort();
            for label in labels {
                apply_run(label, run, lookup, &mut draft, &mut component, &mut accumulator)?;
            }
        }
        accumulator.flush_into(component.as_deref(), &mut draft.ingredients);
    }

    Ok(draft)
}

fn apply_run(
    label: Label,
    run: &GroupedRun,
    lookup: &dyn IngredientLookup,
    draft: &mut RecipeDraft,
    component: &mut Option<String>,
    accumulator: &mut IngredientAccumulator,
) -> Result<()> {
    match label {
        Label::Title => {
            accumulator.flush_into(component.as_deref(), &mut draft.ingredients);
            draft.title = Some(joined_words(run));
        }
        Label::IngredientsHeading => {
            accumulator.flush_into(component.as_deref(), &mut draft.ingredients);
            *component = Some(joined_words(run));
        }
        Label::IngredientName => {
            if accumulator.name_query.is_some() {
                accumulator.flush_into(component.as_deref(), &mut draft.ingredients);
            }
            let query = joined_words(run);
            accumulator.matches = lookup.find_matches(&query, MAX_NAME_MATCHES)?;
            accumulator.name_query = Some(query);
        }
        Label::IngredientQuantity => {
            if accumulator.quantity.is_some() {
                accumulator.flush_into(component.as_deref(), &mut draft.ingredients);
            }
            accumulator.quantity = run_quantity(run);
        }
        Label::IngredientUnits => {
            if accumulator.units.is_some() {
                accumulator.flush_into(component.as_deref(), &mut draft.ingredients);
            }
            accumulator.units = run.words.first().map(|w| w.word.clone());
        }
        Label::IngredientPreparation => {
            if accumulator.preparation.is_some() {
                accumulator.flush_into(component.as_deref(), &mut draft.ingredients);
            }
            accumulator.preparation = Some(joined_words(run));
        }
        Label::Directions => {
            draft.directions.extend(reflow_direction_steps(&run.words));
        }
    }
    Ok(())
}

fn joined_words(run: &GroupedRun) -> String {
    run.words
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sum the numeric words of a quantity run. Concatenating the originals first
/// makes the one-token mixed fraction ("1 1/2") and the two-token spelling
/// ("1", "1/2") equivalent.
fn run_quantity(run: &GroupedRun) -> Option<f64> {
    let numeric: Vec<&str> = run
        .words
        .iter()
        .filter(|w| w.word == NUMBER_WORD)
        .map(|w| w.original_format.as_deref().unwrap_or(w.word.as_str()))
        .collect();
    if numeric.is_empty() {
        return None;
    }
    Some(reconstruct_number(&numeric.join(" ")))
}

/// Rebuild direction text from tokens. Display text is the original where one
/// was kept, else the normalized word. A space goes in front of every plain
/// word (including numbers) unless the previous word was an opening
/// parenthesis; symbol runs carry their own spacing. A normalized `.` closes
/// the current sentence as one step; trailing text becomes a final step.
pub fn reflow_direction_steps(words: &[WordRow]) -> Vec<String> {
    let mut steps = Vec::new();
    let mut current = String::new();
    let mut previous: Option<&WordRow> = None;

    for word in words {
        let plain = word.original_format.is_none() || word.word == NUMBER_WORD;
        if let Some(previous) = previous {
            if previous.word != "(" && plain {
                current.push(' ');
            }
        }
        current.push_str(word.original_format.as_deref().unwrap_or(&word.word));
        if word.word == "." {
            push_step(&mut steps, &mut current);
        }
        previous = Some(word);
    }
    push_step(&mut steps, &mut current);

    steps
}

fn push_step(steps: &mut Vec<String>, current: &mut String) {
    let step = std::mem::take(current);
    let step = step.trim();
    if !step.is_empty() {
        steps.push(step.to_string());
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::words::tokenize_document;
    use std::collections::BTreeSet;

    struct StubLookup;

    impl IngredientLookup for StubLookup {
        fn find_matches(&self, query: &str, _limit: usize) -> Result<Vec<IngredientMatch>> {
            Ok(vec![IngredientMatch {
                ingredient_id: 7,
                name: format!("canonical {}", query),
            }])
        }
    }

    fn word(text: &str, original: Option<&str>) -> WordRow {
        WordRow {
            id: 0,
            document_id: 1,
            word: text.to_string(),
            original_format: original.map(str::to_string),
            document_position: 0,
            element_position: 0,
            element_tag: "p".to_string(),
        }
    }

    fn run(labels: &[&str], words: Vec<WordRow>) -> GroupedRun {
        GroupedRun {
            tags: labels.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
            words,
        }
    }

    #[test]
    fn reflow_degrees_sentence() {
        let words = vec![
            word("Preheat", None),
            word("oven", None),
            word("to", None),
            word("#", Some("350")),
            word("°", Some(" ° ")),
            word("F", None),
            word(".", Some(".")),
        ];
        let steps = reflow_direction_steps(&words);
        // Derived from the spacing rule: " ° " keeps its trailing space and the
        // plain F still gets one inserted.
        assert_eq!(steps, vec!["Preheat oven to 350 °  F."]);
    }

    #[test]
    fn reflow_suppresses_space_after_open_paren() {
        let words = vec![
            word("see", None),
            word("(", Some(" (")),
            word("note", None),
            word(")", Some(")")),
        ];
        assert_eq!(reflow_direction_steps(&words), vec!["see (note)"]);
    }

    #[test]
    fn reflow_splits_sentences_and_keeps_trailing_text() {
        let words = vec![
            word("Mix", None),
            word(".", Some(".")),
            word("Bake", None),
            word(".", Some(".")),
            word("Serve", None),
            word("warm", None),
        ];
        assert_eq!(reflow_direction_steps(&words), vec!["Mix.", "Bake.", "Serve warm"]);
    }

    #[test]
    fn reflow_round_trips_tokenized_text() {
        // Equal up to whitespace: a symbol run keeps its own trailing space
        // and the next plain word still gets one inserted.
        let text = "Mix the flour (gently) for 1 1/2 minutes.";
        let tokens = tokenize_document(&format!("<p>{}</p>", text)).unwrap();
        let rows: Vec<WordRow> = tokens
            .into_iter()
            .map(|t| word(&t.word, t.original_format.as_deref()))
            .collect();
        let steps = reflow_direction_steps(&rows);
        assert_eq!(steps.len(), 1);
        let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(squash(&steps[0]), text);
    }

    #[test]
    fn assembles_full_draft() {
        let segments: Vec<Segment> = vec![
            vec![run(&["title"], vec![word("Banana", None), word("Bread", None)])],
            vec![run(&["ingredients-heading"], vec![word("Batter", None)])],
            vec![
                run(&["ingredient-quantity"], vec![word("#", Some("2"))]),
                run(&["ingredient-units"], vec![word("cups", None)]),
                run(&["ingredient-name"], vec![word("flour", None)]),
            ],
            vec![
                run(&["ingredient-quantity"], vec![word("#", Some("1 1/2"))]),
                run(&["ingredient-units"], vec![word("teaspoons", None)]),
                run(&["ingredient-name"], vec![word("baking", None), word("soda", None)]),
                run(&["ingredient-preparation"], vec![word("sifted", None)]),
            ],
            vec![run(
                &["directions"],
                vec![
                    word("Mix", None),
                    word("well", None),
                    word(".", Some(".")),
                    word("Bake", None),
                    word(".", Some(".")),
                ],
            )],
        ];

        let draft = assemble_recipe(&segments, &StubLookup).unwrap();
        assert_eq!(draft.title.as_deref(), Some("Banana Bread"));
        assert_eq!(draft.ingredients.len(), 2);

        let flour = &draft.ingredients[0];
        assert_eq!(flour.name_query.as_deref(), Some("flour"));
        assert_eq!(flour.matches[0].name, "canonical flour");
        assert_eq!(flour.quantity, Some(2.0));
        assert_eq!(flour.units.as_deref(), Some("cups"));
        assert_eq!(flour.component.as_deref(), Some("Batter"));

        let soda = &draft.ingredients[1];
        assert_eq!(soda.name_query.as_deref(), Some("baking soda"));
        assert_eq!(soda.quantity, Some(1.5));
        assert_eq!(soda.preparation.as_deref(), Some("sifted"));

        assert_eq!(draft.directions, vec!["Mix well.", "Bake."]);
    }

    #[test]
    fn two_token_quantity_sums() {
        let quantity_run = run(
            &["ingredient-quantity"],
            vec![word("#", Some("1")), word("#", Some("1/2"))],
        );
        let segments = vec![vec![quantity_run]];
        let draft = assemble_recipe(&segments, &StubLookup).unwrap();
        assert_eq!(draft.ingredients[0].quantity, Some(1.5));
    }

    #[test]
    fn repeated_field_starts_new_ingredient() {
        let segments = vec![vec![
            run(&["ingredient-name"], vec![word("flour", None)]),
            run(&["ingredient-name"], vec![word("sugar", None)]),
        ]];
        let draft = assemble_recipe(&segments, &StubLookup).unwrap();
        assert_eq!(draft.ingredients.len(), 2);
        assert_eq!(draft.ingredients[0].name_query.as_deref(), Some("flour"));
        assert_eq!(draft.ingredients[1].name_query.as_deref(), Some("sugar"));
    }

    #[test]
    fn heading_closes_open_ingredient_and_sets_component() {
        let segments = vec![vec![
            run(&["ingredient-name"], vec![word("flour", None)]),
            run(&["ingredients-heading"], vec![word("Topping", None)]),
            run(&["ingredient-name"], vec![word("sugar", None)]),
        ]];
        let draft = assemble_recipe(&segments, &StubLookup).unwrap();
        assert_eq!(draft.ingredients[0].component, None);
        assert_eq!(draft.ingredients[1].component.as_deref(), Some("Topping"));
    }

    #[test]
    fn unrecognized_labels_are_ignored() {
        let segments = vec![vec![run(&["yield"], vec![word("eight", None)])]];
        let draft = assemble_recipe(&segments, &StubLookup).unwrap();
        assert!(draft.title.is_none());
        assert!(draft.ingredients.is_empty());
        assert!(draft.directions.is_empty());
    }

    #[test]
    fn empty_accumulator_produces_no_record() {
        let segments = vec![vec![run(&["title"], vec![word("Bread", None)])]];
        let draft = assemble_recipe(&segments, &StubLookup).unwrap();
        assert!(draft.ingredients.is_empty());
    }
}
