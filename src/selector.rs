use rustyline::completion::Completer;
use rustyline::config::{CompletionType, Config};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{Error, Result};

const PROMPT: &str = "Enter the Game Name: ";

/// How many candidates are listed after an ambiguous answer.
const MAX_LISTED: usize = 20;

/// Names offered for `input`: everything when empty, otherwise the names
/// starting with it (case-sensitive), always in catalog order.
pub fn candidates<'a>(catalog: &'a Catalog, input: &str) -> Vec<&'a str> {
    if input.is_empty() {
        return catalog.names().collect();
    }
    catalog.names().filter(|name| name.starts_with(input)).collect()
}

/// Outcome of matching what the user submitted against the catalog.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    Selected(&'a CatalogEntry),
    Ambiguous(Vec<&'a str>),
    NoMatch,
}

/// An exact name wins; otherwise a single prefix candidate is taken.
pub fn resolve<'a>(catalog: &'a Catalog, input: &str) -> Resolution<'a> {
    if let Some(entry) = catalog.get(input) {
        return Resolution::Selected(entry);
    }
    let names = candidates(catalog, input);
    match names.as_slice() {
        [] => Resolution::NoMatch,
        [only] => catalog
            .get(only)
            .map_or(Resolution::NoMatch, Resolution::Selected),
        _ => Resolution::Ambiguous(names),
    }
}

/// Type-ahead for the prompt: inline hint for the first candidate, Tab for
/// the whole list.
struct CatalogHelper<'a> {
    catalog: &'a Catalog,
}

impl Completer for CatalogHelper<'_> {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let input = &line[..pos];
        let names = candidates(self.catalog, input)
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok((0, names))
    }
}

impl Hinter for CatalogHelper<'_> {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        if line.is_empty() || pos < line.len() {
            return None;
        }
        candidates(self.catalog, line)
            .first()
            .and_then(|name| name.get(line.len()..))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    }
}

impl Highlighter for CatalogHelper<'_> {}

impl Validator for CatalogHelper<'_> {}

impl Helper for CatalogHelper<'_> {}

/// Prompts until the user picks one catalog entry.
///
/// Ctrl-C / Ctrl-D abort the run.
pub fn prompt(catalog: &Catalog) -> Result<CatalogEntry> {
    let config = Config::builder()
        .completion_type(CompletionType::List)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<CatalogHelper<'_>, DefaultHistory> =
        Editor::with_config(config).map_err(|e| Error::Prompt(e.to_string()))?;
    rl.set_helper(Some(CatalogHelper { catalog }));

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                return Err(Error::Prompt("cancelled by user".to_string()));
            }
            Err(e) => return Err(Error::Prompt(e.to_string())),
        };

        match resolve(catalog, line.trim()) {
            Resolution::Selected(entry) => {
                log::info!("Selected {:?} ({})", entry.name, entry.app_id);
                return Ok(entry.clone());
            }
            Resolution::Ambiguous(names) => {
                println!("{} matches, keep typing (Tab lists them):", names.len());
                for name in names.iter().take(MAX_LISTED) {
                    println!("  {name}");
                }
                if names.len() > MAX_LISTED {
                    println!("  ...");
                }
            }
            Resolution::NoMatch => println!("No match for {:?}", line.trim()),
        }
    }
}
