mod db;
mod importer;
mod lookup;
mod parser;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use lookup::TrigramLookup;
use parser::assemble::RecipeDraft;
use parser::words::tokenize_document;

#[derive(Parser)]
#[command(name = "recipe_miner", about = "Recipe page tokenizer, tagger, and reconstructor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, sanitize, and tokenize recipe pages
    Import {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Sanitize and tokenize a local HTML file
    ImportFile {
        path: PathBuf,
        /// Identifier stored for the document (defaults to the file path)
        #[arg(short, long)]
        url: Option<String>,
    },
    /// List imported documents
    List,
    /// Show a document's token sequence
    Words {
        document_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Attach a label to words, from arguments or a JSON file
    Tag {
        document_id: i64,
        /// Label to attach to every word in --words
        #[arg(short, long, requires = "words")]
        label: Option<String>,
        /// Word ids receiving --label
        #[arg(short, long, value_delimiter = ',')]
        words: Vec<i64>,
        /// JSON file of {"word_id": .., "tag": ".."} entries
        #[arg(short, long, conflicts_with_all = ["label", "words"])]
        file: Option<PathBuf>,
    },
    /// List a document's tag assignments
    Tags { document_id: i64 },
    /// Delete tag assignments by id
    Untag {
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<i64>,
    },
    /// Delete every assignment of a label within a document
    UntagLabel { document_id: i64, label: String },
    /// Group tagged words and reconstruct the recipe
    Assemble {
        document_id: i64,
        /// Print the draft as JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Also persist the draft as a recipe
        #[arg(long)]
        save: bool,
    },
    /// Load ingredient names from a CSV catalog
    ImportIngredients { path: PathBuf },
    /// Show database statistics
    Stats,
}

#[derive(Deserialize)]
struct TagFileEntry {
    word_id: i64,
    tag: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import { urls } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;

            let mut new_urls = Vec::new();
            for url in urls {
                if db::document_exists(&conn, &url)? {
                    println!("Skipping {} (already imported)", url);
                } else {
                    new_urls.push(url);
                }
            }
            if new_urls.is_empty() {
                println!("Nothing to import.");
                return Ok(());
            }

            println!("Fetching {} pages...", new_urls.len());
            let rows = importer::fetch_pages(new_urls).await?;
            let (fetched, failed): (Vec<_>, Vec<_>) =
                rows.into_iter().partition(|r| r.error.is_none());
            for row in &failed {
                println!("Failed {}: {}", row.url, row.error.as_deref().unwrap_or("unknown"));
            }

            let imported = import_fetched(&conn, fetched)?;
            println!("Imported {} documents ({} failed).", imported, failed.len());
            Ok(())
        }
        Commands::ImportFile { path, url } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;

            let url = url.unwrap_or_else(|| format!("file://{}", path.display()));
            if db::document_exists(&conn, &url)? {
                println!("Skipping {} (already imported)", url);
                return Ok(());
            }
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let doc = importer::prepare_document(&url, &raw);
            let tokens = tokenize_document(&doc.html)?;
            let document_id =
                db::insert_document(&conn, &doc.url, doc.title.as_deref(), &doc.html, &tokens)?;
            println!("Imported document {} ({} words).", document_id, tokens.len());
            Ok(())
        }
        Commands::List => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let documents = db::fetch_documents(&conn)?;
            if documents.is_empty() {
                println!("No documents. Run 'import' first.");
                return Ok(());
            }
            println!("{:>4} | {:<40} | {:>6} | {:<25}", "#", "Title", "Words", "Retrieved");
            println!("{}", "-".repeat(85));
            for d in &documents {
                println!(
                    "{:>4} | {:<40} | {:>6} | {:<25}",
                    d.id,
                    truncate(d.title.as_deref().unwrap_or("-"), 40),
                    d.word_count,
                    truncate(&d.retrieved_at, 25),
                );
            }
            println!("\n{} documents", documents.len());
            Ok(())
        }
        Commands::Words { document_id, json } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let words = db::fetch_words(&conn, document_id)?;
            if words.is_empty() {
                println!("No words for document {}. Is it imported?", document_id);
                return Ok(());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&words)?);
            } else {
                println!("{:>6} | {:>4} | {:>4} | {:<5} | {:<20} | {}", "id", "doc", "el", "tag", "word", "original");
                println!("{}", "-".repeat(70));
                for w in &words {
                    println!(
                        "{:>6} | {:>4} | {:>4} | {:<5} | {:<20} | {}",
                        w.id,
                        w.document_position,
                        w.element_position,
                        w.element_tag,
                        truncate(&w.word, 20),
                        w.original_format.as_deref().map(|o| format!("{:?}", o)).unwrap_or_default(),
                    );
                }
            }
            Ok(())
        }
        Commands::Tag {
            document_id,
            label,
            words,
            file,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;

            let assignments: Vec<(i64, String)> = if let Some(path) = file {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let entries: Vec<TagFileEntry> = serde_json::from_str(&raw)?;
                entries.into_iter().map(|e| (e.word_id, e.tag)).collect()
            } else if let Some(label) = label {
                words.into_iter().map(|id| (id, label.clone())).collect()
            } else {
                bail!("Pass either --label with --words, or --file");
            };
            if assignments.is_empty() {
                println!("No assignments given.");
                return Ok(());
            }

            let count = db::assign_tags(&conn, document_id, &assignments)?;
            println!("Tagged {} words.", count);
            Ok(())
        }
        Commands::Tags { document_id } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let tags = db::fetch_tags(&conn, document_id)?;
            if tags.is_empty() {
                println!("No tags for document {}.", document_id);
                return Ok(());
            }
            println!("{:>6} | {:>6} | {}", "id", "word", "tag");
            println!("{}", "-".repeat(40));
            for t in &tags {
                println!("{:>6} | {:>6} | {}", t.id, t.word_id, t.tag);
            }
            Ok(())
        }
        Commands::Untag { ids } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let deleted = db::remove_tags(&conn, &ids)?;
            if deleted == 0 {
                println!("No matching tag assignments.");
            } else {
                println!("Deleted {} tag assignments.", deleted);
            }
            Ok(())
        }
        Commands::UntagLabel { document_id, label } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let deleted = db::remove_tags_by_label(&conn, document_id, &label)?;
            if deleted == 0 {
                println!("No '{}' assignments in document {}.", label, document_id);
            } else {
                println!("Deleted {} '{}' assignments.", deleted, label);
            }
            Ok(())
        }
        Commands::Assemble {
            document_id,
            json,
            save,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;

            let (words, tags) = db::fetch_tagged_words(&conn, document_id)?;
            if words.is_empty() {
                println!("No words for document {}. Is it imported?", document_id);
                return Ok(());
            }
            if tags.is_empty() {
                println!("Document {} has no tags yet. Run 'tag' first.", document_id);
                return Ok(());
            }

            let lookup = TrigramLookup::new(&conn);
            let draft = parser::reconstruct(&words, &tags, &lookup)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&draft)?);
            } else {
                print_draft(&conn, document_id, &draft)?;
            }
            if save {
                let recipe_id = db::save_recipe(&conn, document_id, &draft)?;
                println!("\nSaved recipe {}.", recipe_id);
            }
            Ok(())
        }
        Commands::ImportIngredients { path } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let names = read_ingredient_names(&path)?;
            if names.is_empty() {
                println!("No ingredient names in {}.", path.display());
                return Ok(());
            }
            let inserted = db::insert_ingredients(&conn, &names)?;
            println!("Inserted {} new ingredients ({} rows read).", inserted, names.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Documents:   {}", s.documents);
            println!("Words:       {}", s.words);
            println!("Tag sets:    {}", s.tag_sets);
            println!("Tags:        {}", s.tags);
            println!("Ingredients: {}", s.ingredients);
            println!("Recipes:     {}", s.recipes);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Tokenize fetched pages in parallel and store each document.
fn import_fetched(
    conn: &rusqlite::Connection,
    fetched: Vec<importer::FetchRow>,
) -> anyhow::Result<usize> {
    use rayon::prelude::*;

    let tokenized: Vec<_> = fetched
        .par_iter()
        .map(|row| {
            let html = row.html.as_deref().unwrap_or_default();
            tokenize_document(html).map(|tokens| (row, tokens))
        })
        .collect();

    let mut imported = 0;
    for result in tokenized {
        match result {
            Ok((row, tokens)) => {
                let html = row.html.as_deref().unwrap_or_default();
                db::insert_document(conn, &row.url, row.title.as_deref(), html, &tokens)?;
                imported += 1;
            }
            Err(e) => println!("Tokenization failed: {}", e),
        }
    }
    Ok(imported)
}

fn print_draft(
    conn: &rusqlite::Connection,
    document_id: i64,
    draft: &RecipeDraft,
) -> anyhow::Result<()> {
    let fallback = db::fetch_document_title(conn, document_id)?;
    let title = draft
        .title
        .as_deref()
        .or(fallback.as_deref())
        .unwrap_or("(untitled)");
    println!("{}", title);
    println!("{}", "=".repeat(title.chars().count()));

    if draft.ingredients.is_empty() {
        println!("\nNo ingredients tagged.");
    } else {
        println!("\nIngredients:");
        for ingredient in &draft.ingredients {
            let mut line = String::from("  -");
            if let Some(q) = ingredient.quantity {
                line.push_str(&format!(" {}", q));
            }
            if let Some(units) = &ingredient.units {
                line.push_str(&format!(" {}", units));
            }
            if let Some(name) = &ingredient.name_query {
                line.push_str(&format!(" {}", name));
            }
            if let Some(prep) = &ingredient.preparation {
                line.push_str(&format!(", {}", prep));
            }
            if let Some(component) = &ingredient.component {
                line.push_str(&format!("  [{}]", component));
            }
            println!("{}", line);
            for m in &ingredient.matches {
                println!("      ~ {} (#{})", m.name, m.ingredient_id);
            }
        }
    }

    if draft.directions.is_empty() {
        println!("\nNo directions tagged.");
    } else {
        println!("\nDirections:");
        for (i, step) in draft.directions.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }
    Ok(())
}

/// Read ingredient names from a CSV catalog: the "name" or "description"
/// column when a header has one, else the first column.
fn read_ingredient_names(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let column = reader
        .headers()?
        .iter()
        .position(|h| {
            let h = h.to_lowercase();
            h == "name" || h == "description"
        })
        .unwrap_or(0);

    let mut names = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(name) = record.get(column) {
            let name = name.trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
