use std::collections::BTreeMap;

use crate::config::Endpoints;
use crate::formats::Document;

/// Renders the corpus summary: totals, line counts per decade and per year,
/// and an index of all works. `documents` must carry `num_lines`.
pub fn render(documents: &[Document], endpoints: &Endpoints) -> String {
    let mut documents: Vec<&Document> = documents.iter().collect();
    documents.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.identifier.cmp(&b.identifier)));

    let mut per_year: BTreeMap<i32, usize> = BTreeMap::new();
    let mut per_decade: BTreeMap<i32, usize> = BTreeMap::new();
    let mut total = 0_usize;
    for doc in &documents {
        let lines = doc.num_lines.unwrap_or(doc.lines.len());
        total += lines;
        *per_year.entry(doc.year).or_default() += lines;
        *per_decade.entry(doc.year.div_euclid(10) * 10).or_default() += lines;
    }

    let mut out = String::new();
    out.push_str("# archiscribe-corpus\n\n");
    out.push_str(
        "OCR ground truth for 19th century German prints, transcribed line by line.\n\n",
    );
    out.push_str(&format!(
        "Currently the corpus contains {total} lines from {} works published across {} years. \
         Detailed statistics are available below.\n\n",
        documents.len(),
        per_year.len()
    ));

    out.push_str("## Statistics: Decades\n\n");
    out.push_str(&table(
        &["Decade", "# lines"],
        per_decade
            .iter()
            .map(|(decade, lines)| vec![decade.to_string(), lines.to_string()]),
    ));

    out.push_str("\n## Statistics: Years\n\n");
    out.push_str(&table(
        &["Year", "# lines"],
        per_year
            .iter()
            .map(|(year, lines)| vec![year.to_string(), lines.to_string()]),
    ));

    out.push_str("\n## Statistics: Works\n\n");
    out.push_str(&table(
        &["Title", "Date", "Archive.org", "IIIF"],
        documents.iter().map(|doc| {
            let id = &doc.identifier;
            vec![
                doc.title.clone(),
                doc.year.to_string(),
                format!("[{id}]({})", endpoints.details_url(id)),
                format!(
                    "[Manifest]({})/[Mirador]({})",
                    endpoints.manifest_url(id),
                    endpoints.viewer_url(id)
                ),
            ]
        }),
    ));
    out
}

fn table<I>(header: &[&str], rows: I) -> String
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", header.join(" | ")));
    let rule: Vec<String> = header.iter().map(|h| "-".repeat(h.len() + 2)).collect();
    out.push_str(&format!("|{}|\n", rule.join("|")));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| escape_cell(c)).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, year: i32, lines: usize) -> Document {
        Document {
            identifier: id.to_owned(),
            title: format!("Title | {id}"),
            year,
            manifest_url: String::new(),
            lines: Vec::new(),
            history: Vec::new(),
            num_lines: Some(lines),
        }
    }

    #[test]
    fn aggregates_by_year_and_decade() {
        let docs = vec![doc("b", 1855, 3), doc("a", 1851, 4), doc("c", 1860, 5)];
        let out = render(&docs, &Endpoints::default());
        assert!(out.contains("contains 12 lines from 3 works published across 3 years"));
        assert!(out.contains("| 1850 | 7 |"));
        assert!(out.contains("| 1860 | 5 |"));
        assert!(out.contains("| 1851 | 4 |"));
        assert!(out.contains("Title \\| a"));
        let a = out.find("[a](https://archive.org/details/a)").expect("row for a");
        let b = out.find("[b](https://archive.org/details/b)").expect("row for b");
        assert!(a < b);
    }

    #[test]
    fn tables_have_header_rule_and_rows() {
        let out = table(
            &["Year", "# lines"],
            vec![vec!["1850".to_owned(), "7".to_owned()]],
        );
        assert_eq!(out, "| Year | # lines |\n|------|---------|\n| 1850 | 7 |\n");
    }

    #[test]
    fn empty_corpus_renders_headers() {
        let out = render(&[], &Endpoints::default());
        assert!(out.contains("contains 0 lines from 0 works"));
        assert!(out.contains("| Decade | # lines |"));
    }
}
