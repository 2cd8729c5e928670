//! HTML directory parser.
//!
//! Turns an Apache-style autoindex HTML page into a typed folder record,
//! selecting `table#list tbody tr` the way a browser's own autoindex
//! stylesheet does.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use scraper::{ElementRef, Html, Selector};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntryFile {
    pub size_text: String,
    pub date_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFolder {
    pub folders: Vec<String>,
    pub files: HashMap<String, ParsedEntryFile>,
}

const PARENT_DIRECTORY_LABEL: &str = "Parent directory/";

/// Parses a directory listing page. Fails with `MalformedListing` if the
/// `table#list` element is absent, or if any row's first column lacks an
/// anchor with an `href`.
pub fn parse_directory_html(html: &str) -> Result<ParsedFolder, EngineError> {
    let document = Html::parse_document(html);

    let table_selector = Selector::parse("table#list")
        .expect("static selector must be valid");
    if document.select(&table_selector).next().is_none() {
        return Err(EngineError::MalformedListing("missing table#list".to_string()));
    }

    let row_selector = Selector::parse("table#list tbody tr")
        .expect("static selector must be valid");
    let td_selector = Selector::parse("td").expect("static selector must be valid");

    let mut folders = Vec::new();
    let mut files = HashMap::new();

    for row in document.select(&row_selector) {
        let cols: Vec<ElementRef> = row.select(&td_selector).collect();
        if cols.len() != 3 {
            return Err(EngineError::MalformedListing(format!(
                "row has {} columns, expected 3",
                cols.len()
            )));
        }

        let name_title: String = cols[0].text().collect::<String>().trim().to_string();
        if name_title == PARENT_DIRECTORY_LABEL {
            continue;
        }

        let anchor = cols[0]
            .children()
            .find_map(ElementRef::wrap)
            .ok_or_else(|| EngineError::MalformedListing("missing anchor in name column".to_string()))?;
        let href = anchor
            .value()
            .attr("href")
            .ok_or_else(|| EngineError::MalformedListing("anchor missing href".to_string()))?;
        let decoded = percent_decode_str(href).decode_utf8_lossy().into_owned();
        let parts: Vec<&str> = decoded.split('/').collect();

        let (is_dir, name) = match parts.as_slice() {
            [.., second_to_last, ""] => (true, second_to_last.to_string()),
            [.., last] => (false, last.to_string()),
            [] => return Err(EngineError::MalformedListing("empty href".to_string())),
        };

        let size_text = cols[1].text().collect::<String>().trim().to_string();
        let date_text = cols[2].text().collect::<String>().trim().to_string();

        if is_dir {
            folders.push(name);
        } else {
            files.insert(name, ParsedEntryFile { size_text, date_text });
        }
    }

    Ok(ParsedFolder { folders, files })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"
        <html><body>
        <table id="list">
        <tbody>
        <tr><td><a href="Parent%20directory/">Parent directory/</a></td><td>-</td><td>-</td></tr>
        <tr><td><a href="a/">a/</a></td><td>-</td><td>2024-01-01</td></tr>
        <tr><td><a href="b/">b/</a></td><td>-</td><td>2024-01-01</td></tr>
        <tr><td><a href="c.txt">c.txt</a></td><td>20 B</td><td>2024-01-01</td></tr>
        <tr><td><a href="d.bin">d.bin</a></td><td>2.5 MiB</td><td>2024-01-01</td></tr>
        </tbody>
        </table>
        </body></html>
    "#;

    #[test]
    fn parses_folders_and_files_skipping_parent() {
        let parsed = parse_directory_html(WELL_FORMED).unwrap();
        assert_eq!(parsed.folders, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files["c.txt"].size_text, "20 B");
        assert_eq!(parsed.files["d.bin"].size_text, "2.5 MiB");
    }

    #[test]
    fn decodes_percent_encoded_names() {
        let html = r#"
            <table id="list"><tbody>
            <tr><td><a href="na%20me.txt">na me.txt</a></td><td>1 B</td><td>-</td></tr>
            </tbody></table>
        "#;
        let parsed = parse_directory_html(html).unwrap();
        assert!(parsed.files.contains_key("na me.txt"));
    }

    #[test]
    fn missing_table_is_malformed() {
        let err = parse_directory_html("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, EngineError::MalformedListing(_)));
    }

    #[test]
    fn missing_column_is_malformed() {
        let html = r#"
            <table id="list"><tbody>
            <tr><td><a href="a/">a/</a></td><td>-</td></tr>
            </tbody></table>
        "#;
        let err = parse_directory_html(html).unwrap_err();
        assert!(matches!(err, EngineError::MalformedListing(_)));
    }

    #[test]
    fn missing_href_is_malformed() {
        let html = r#"
            <table id="list"><tbody>
            <tr><td><a>no href</a></td><td>-</td><td>-</td></tr>
            </tbody></table>
        "#;
        let err = parse_directory_html(html).unwrap_err();
        assert!(matches!(err, EngineError::MalformedListing(_)));
    }
}
