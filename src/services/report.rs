use std::fmt::Write as _;
use serde::Serialize;
use crate::config::Config;
use crate::models::CellValue;
use crate::services::excel::{BasicInsights, ColumnInsight};

const TITLE: &str = "Dataset Insights";
const FORM_FEED: char = '\x0c';

/// Insights for the current (filtered) view, ready to be exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightReport {
    pub basic: BasicInsights,
    pub columns: Vec<ColumnInsight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub width: usize,
    pub lines_per_page: usize,
}

impl PageLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.report_width,
            lines_per_page: config.report_lines_per_page,
        }
    }
}

impl Default for PageLayout {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPage {
    pub number: usize,
    pub lines: Vec<String>,
    pub footer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedReport {
    pub title: String,
    pub page_count: usize,
    pub pages: Vec<ReportPage>,
}

impl InsightReport {
    /// Plain-text rendering: summary counts, column list, then one block per column.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let basic = &self.basic;

        let _ = writeln!(out, "{}", TITLE);
        let _ = writeln!(out);
        let _ = writeln!(out, "Rows: {}", basic.row_count);
        let _ = writeln!(out, "Columns: {}", basic.column_count);
        if let Some(file_name) = &basic.file_name {
            let _ = writeln!(out, "File: {}", file_name);
        }
        if let Some(uploaded_at) = &basic.uploaded_at {
            let _ = writeln!(out, "Uploaded At: {}", uploaded_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Columns:");
        let _ = writeln!(out, "- {}", basic.columns.join(", "));

        for insight in &self.columns {
            let _ = writeln!(out);
            let _ = writeln!(out, "Column: {}", insight.column);
            let _ = writeln!(out, "Type: {}", insight.kind.as_str());
            let _ = writeln!(out, "Unique Values: {}", insight.unique_count);
            match &insight.numeric {
                Some(stats) => {
                    let (min, max) = (CellValue::from(stats.min), CellValue::from(stats.max));
                    let _ = writeln!(out, "Min: {}, Max: {}, Mean: {}", min, max, stats.mean);
                }
                None => {
                    let _ = writeln!(out, "Most Frequent: {}", insight.top_value.as_deref().unwrap_or("N/A"));
                }
            }
            let samples: Vec<String> = insight.sample_values.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "Sample Values: {}", samples.join(", "));
        }

        out
    }

    pub fn paginate(&self, layout: PageLayout) -> PagedReport {
        paginate(&self.render_text(), layout)
    }

    /// Paginated text with pages separated by form feeds.
    pub fn render_paged_text(&self, layout: PageLayout) -> String {
        let paged = self.paginate(layout);
        let pages: Vec<String> = paged
            .pages
            .iter()
            .map(|page| {
                let mut text = page.lines.join("\n");
                text.push_str("\n\n");
                text.push_str(&page.footer);
                text.push('\n');
                text
            })
            .collect();
        pages.join(&FORM_FEED.to_string())
    }
}

/// Wrap `text` to `layout.width` and split it into pages.
///
/// Two lines of every page are reserved for the footer. A document always has
/// at least one page.
pub fn paginate(text: &str, layout: PageLayout) -> PagedReport {
    let width = layout.width.max(1);
    let body_lines = layout.lines_per_page.saturating_sub(2).max(1);

    let lines: Vec<String> = text
        .lines()
        .flat_map(|line| wrap_line(line, width))
        .collect();

    let chunks: Vec<Vec<String>> = if lines.is_empty() {
        vec![Vec::new()]
    } else {
        lines.chunks(body_lines).map(<[String]>::to_vec).collect()
    };
    let page_count = chunks.len();

    PagedReport {
        title: TITLE.to_string(),
        page_count,
        pages: chunks
            .into_iter()
            .enumerate()
            .map(|(i, lines)| ReportPage {
                number: i + 1,
                lines,
                footer: format!("Page {} of {}", i + 1, page_count),
            })
            .collect(),
    }
}

// words longer than the width are hard-split
fn wrap_line(line: &str, width: usize) -> Vec<String> {
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }

    let mut wrapped = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                wrapped.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(width);
            wrapped.push(word.into_iter().collect());
            word = rest;
        }

        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word.len() > width {
            wrapped.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }
    if !current.is_empty() || wrapped.is_empty() {
        wrapped.push(current);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dataset;
    use crate::services::excel::infer_schema;
    use crate::services::excel::insights::{basic_insights, column_insights};

    fn sample_report() -> InsightReport {
        let dataset = Dataset::sample();
        let schema = infer_schema(&dataset.rows);
        InsightReport {
            basic: basic_insights(&dataset.meta(), &dataset.rows, &schema.columns),
            columns: column_insights(&dataset.rows, &schema.columns),
        }
    }

    #[test]
    fn text_report_follows_section_order() {
        let text = sample_report().render_text();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Dataset Insights");
        assert_eq!(lines[2], "Rows: 4");
        assert_eq!(lines[3], "Columns: 4");
        assert_eq!(lines[5], "Columns:");
        assert_eq!(lines[6], "- Quarter, Sales, Profit, Region");

        let quarter = text.find("Column: Quarter").unwrap();
        let sales = text.find("Column: Sales").unwrap();
        assert!(quarter < sales);
        assert!(text.contains("Type: numeric\nUnique Values: 4\nMin: 120, Max: 210, Mean: 162.50\n"));
        assert!(text.contains("Most Frequent: Q1"));
        assert!(text.contains("Sample Values: 32, 54, 43, 76"));
        assert!(!text.contains("File:"));
    }

    #[test]
    fn text_report_for_empty_view_has_no_column_blocks() {
        let report = InsightReport {
            basic: basic_insights(&Dataset::sample().meta(), &[], &["a".to_string()]),
            columns: Vec::new(),
        };
        let text = report.render_text();
        assert!(text.contains("Rows: 0"));
        assert!(!text.contains("Column: "));
    }

    #[test]
    fn long_lines_wrap_on_words() {
        let wrapped = wrap_line("alpha beta gamma delta", 11);
        assert_eq!(wrapped, ["alpha beta", "gamma delta"]);
        assert_eq!(wrap_line("abcdefghij", 4), ["abcd", "efgh", "ij"]);
        assert_eq!(wrap_line("", 4), [""]);
        assert_eq!(wrap_line("          ", 4), [""]);
    }

    #[test]
    fn pages_carry_numbered_footers() {
        let text = (1..=7).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let paged = paginate(&text, PageLayout { width: 80, lines_per_page: 5 });

        assert_eq!(paged.page_count, 3);
        assert_eq!(paged.pages[0].lines, ["line 1", "line 2", "line 3"]);
        assert_eq!(paged.pages[2].lines, ["line 7"]);
        assert_eq!(paged.pages[1].footer, "Page 2 of 3");
    }

    #[test]
    fn empty_text_still_has_one_page() {
        let paged = paginate("", PageLayout::default());
        assert_eq!(paged.page_count, 1);
        assert_eq!(paged.pages[0].footer, "Page 1 of 1");
    }

    #[test]
    fn paged_text_separates_pages_with_form_feed() {
        let layout = PageLayout { width: 40, lines_per_page: 10 };
        let report = sample_report();
        let paged = report.paginate(layout);
        let text = report.render_paged_text(layout);

        assert_eq!(text.matches('\x0c').count(), paged.page_count - 1);
        assert!(text.contains(&format!("Page {} of {}", paged.page_count, paged.page_count)));
        assert!(paged.pages.iter().all(|p| p.lines.iter().all(|l| l.chars().count() <= 40)));
    }
}
