use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::browser::{self, BrowserSession};
use crate::error::{catalog, Result};

/// SteamDB search for every app whose name mentions "Server".
pub const DEFAULT_CATALOG_URL: &str = "https://steamdb.info/search/?a=app&q=Server";

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr.app").unwrap());
static ID_CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td:nth-child(1)").unwrap());
static NAME_CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td:nth-child(3)").unwrap());

/// Shows every row of the results table instead of the first page.
const SHOW_ALL_ROWS_JS: &str = r#"(() => {
    const select = document.querySelector('select[name="table-sortable_length"]');
    if (!select) return false;
    select.value = "-1";
    select.dispatchEvent(new Event('input', { bubbles: true }));
    select.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
})()"#;

const PAGE_HTML_JS: &str = "document.documentElement.outerHTML";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub app_id: String,
}

/// Dedicated server apps by display name, in scrape order.
///
/// Inserting a name twice keeps its first position but takes the later id.
/// SteamDB does list distinct apps under identical names; the last row wins.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, app_id: impl Into<String>) {
        let name = name.into();
        let app_id = app_id.into();
        if let Some(&i) = self.index.get(&name) {
            log::debug!(
                "Duplicate catalog name {name:?}: {} replaced by {app_id}",
                self.entries[i].app_id
            );
            self.entries[i].app_id = app_id;
            return;
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(CatalogEntry { name, app_id });
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, I: Into<String>> FromIterator<(N, I)> for Catalog {
    fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
        let mut catalog = Catalog::new();
        for (name, app_id) in iter {
            catalog.insert(name, app_id);
        }
        catalog
    }
}

fn cell_text(row: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let text = row
        .select(selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extracts `tr.app` rows: first cell is the app id, third the name.
///
/// Rows missing either cell are skipped.
pub fn parse_catalog(html: &str) -> Catalog {
    let doc = Html::parse_document(html);
    let mut catalog = Catalog::new();
    for row in doc.select(&ROW_SELECTOR) {
        let (Some(app_id), Some(name)) = (
            cell_text(row, &ID_CELL_SELECTOR),
            cell_text(row, &NAME_CELL_SELECTOR),
        ) else {
            log::debug!("Skipping malformed catalog row: {}", row.html());
            continue;
        };
        catalog.insert(name, app_id);
    }
    catalog
}

/// Loads the catalog page in a headless browser and scrapes it.
///
/// The browser is closed before returning; on error it is killed when the
/// session drops.
pub async fn fetch_catalog(browser_path: Option<&Path>, url: &str) -> Result<Catalog> {
    let executable = browser::find_browser(browser_path)?;
    let mut session = BrowserSession::launch(&executable).await?;

    let html = scrape_page(&mut session, url).await?;
    session.close().await;

    let servers = parse_catalog(&html);
    log::info!("Catalog has {} server apps", servers.len());
    if servers.is_empty() {
        return Err(catalog(format!(
            "no server apps found on {url}; the page layout may have changed"
        )));
    }
    Ok(servers)
}

async fn scrape_page(session: &mut BrowserSession, url: &str) -> Result<String> {
    let user_agent = browser::headful_user_agent(&session.user_agent().await?);
    session.set_user_agent(&user_agent).await?;
    session.goto(url).await?;

    let shown = session.evaluate(SHOW_ALL_ROWS_JS).await?;
    if shown.as_bool() != Some(true) {
        return Err(catalog("results page-size control not found"));
    }

    session
        .evaluate(PAGE_HTML_JS)
        .await?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| catalog("page HTML was not a string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, kind: &str, name: &str) -> String {
        format!(
            r#"<tr class="app" data-appid="{id}"><td><a href="/app/{id}/">{id}</a></td><td>{kind}</td><td>
                {name}
            </td><td>2024-01-01</td></tr>"#
        )
    }

    fn page(rows: &[String]) -> String {
        format!(
            r#"<html><body><table id="table-sortable"><thead><tr><th>AppID</th><th>Type</th><th>Name</th></tr></thead><tbody>{}</tbody></table></body></html>"#,
            rows.concat()
        )
    }

    #[test]
    fn distinct_rows_become_entries_in_order() {
        let html = page(&[
            row("740", "Tool", "Counter-Strike Global Offensive - Dedicated Server"),
            row("232250", "Tool", "Team Fortress 2 Dedicated Server"),
            row("896660", "Tool", "Valheim Dedicated Server"),
        ]);
        let catalog = parse_catalog(&html);

        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.names().collect::<Vec<_>>(),
            vec![
                "Counter-Strike Global Offensive - Dedicated Server",
                "Team Fortress 2 Dedicated Server",
                "Valheim Dedicated Server",
            ]
        );
        assert_eq!(
            catalog.get("Valheim Dedicated Server").map(|e| e.app_id.as_str()),
            Some("896660")
        );
    }

    #[test]
    fn duplicate_names_collapse_last_wins() {
        let html = page(&[
            row("10", "Tool", "Rust Dedicated Server"),
            row("20", "Tool", "Ark Server"),
            row("30", "Tool", "Rust Dedicated Server"),
        ]);
        let catalog = parse_catalog(&html);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.entries()[0].name, "Rust Dedicated Server");
        assert_eq!(catalog.entries()[0].app_id, "30");
    }

    #[test]
    fn malformed_and_foreign_rows_are_skipped() {
        let html = page(&[
            row("10", "Tool", "Good Server"),
            r#"<tr class="app"><td>11</td></tr>"#.to_string(),
            r#"<tr class="sub"><td>12</td><td>Tool</td><td>Not An App</td></tr>"#.to_string(),
        ]);
        let catalog = parse_catalog(&html);

        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["Good Server"]);
    }

    #[test]
    fn page_without_rows_is_empty() {
        assert!(parse_catalog("<html><body><p>Just a moment...</p></body></html>").is_empty());
    }

    #[test]
    fn collects_from_pairs() {
        let catalog: Catalog = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a").unwrap().app_id, "3");
    }
}
