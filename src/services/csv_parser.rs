//! Publisher upload CSV parsing and template generation
//!
//! Format: comma-delimited UTF-8, header row first, double quotes only to
//! protect literal commas (quote characters are stripped, `""` is not an
//! escape). Blank lines are ignored and every value is trimmed.

use csv::{StringRecord, Terminator, WriterBuilder};

use crate::error::CsvError;
use crate::types::{PublisherCsvRow, UploadTemplateResponse};

/// Maximum data rows accepted per upload
pub const MAX_UPLOAD_ROWS: usize = 50;

pub const REQUIRED_HEADERS: [&str; 5] = [
    "publisherName",
    "email",
    "siteLink",
    "networkCode",
    "revenueShare",
];

pub const TEMPLATE_HEADERS: [&str; 7] = [
    "publisherName",
    "email",
    "siteLink",
    "networkCode",
    "revenueShare",
    "parentNetworkCode",
    "comments",
];

const TEMPLATE_EXAMPLE: [&str; 7] = [
    "Publisher LLC",
    "contact@example.com",
    "https://example.com",
    "12345678",
    "30",
    "",
    "Optional notes",
];

pub const TEMPLATE_FILENAME: &str = "publisher_bulk_upload_template.csv";
pub const TEMPLATE_CONTENT_TYPE: &str = "text/csv;charset=utf-8";

/// Column positions resolved from the header row
struct ColumnMap {
    publisher_name: Option<usize>,
    email: Option<usize>,
    site_link: Option<usize>,
    network_code: Option<usize>,
    revenue_share: Option<usize>,
    parent_network_code: Option<usize>,
    comments: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Self {
            publisher_name: find("publisherName"),
            email: find("email"),
            site_link: find("siteLink"),
            network_code: find("networkCode"),
            revenue_share: find("revenueShare"),
            parent_network_code: find("parentNetworkCode"),
            comments: find("comments"),
        }
    }

    fn row(&self, record: &StringRecord) -> PublisherCsvRow {
        let value = |index: Option<usize>| {
            index
                .and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string()
        };
        let optional = |index: Option<usize>| Some(value(index)).filter(|v| !v.is_empty());

        PublisherCsvRow {
            publisher_name: value(self.publisher_name),
            email: value(self.email),
            site_link: value(self.site_link),
            network_code: value(self.network_code),
            revenue_share: value(self.revenue_share),
            parent_network_code: optional(self.parent_network_code),
            comments: optional(self.comments),
        }
    }
}

/// Split one data line on commas outside double quotes. Quote characters
/// only toggle the quoted state and never reach the value.
fn split_line(line: &str) -> StringRecord {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);

    StringRecord::from(fields.iter().map(|f| f.trim()).collect::<Vec<_>>())
}

/// Parse uploaded CSV text into rows, in file order.
///
/// Each line is its own record, so an unbalanced quote never swallows the
/// lines after it.
pub fn parse_publisher_csv(content: &str) -> Result<Vec<PublisherCsvRow>, CsvError> {
    let lines: Vec<&str> = content.lines().filter(|line| !line.trim().is_empty()).collect();

    if lines.len() < 2 {
        return Err(CsvError::EmptyFile);
    }

    let headers = StringRecord::from(lines[0].split(',').map(str::trim).collect::<Vec<_>>());
    let missing: Vec<String> = REQUIRED_HEADERS
        .iter()
        .filter(|required| !headers.iter().any(|h| h == **required))
        .map(|h| h.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CsvError::MissingHeaders(missing));
    }

    let records: Vec<StringRecord> = lines[1..].iter().map(|line| split_line(line)).collect();

    if records.is_empty() {
        return Err(CsvError::NoDataRows);
    }
    if records.len() > MAX_UPLOAD_ROWS {
        return Err(CsvError::TooManyRows {
            count: records.len(),
            max: MAX_UPLOAD_ROWS,
        });
    }

    let columns = ColumnMap::from_headers(&headers);
    Ok(records.iter().map(|record| columns.row(record)).collect())
}

/// Template file with the header row and one example row.
pub fn upload_template() -> anyhow::Result<UploadTemplateResponse> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(TEMPLATE_HEADERS)?;
    writer.write_record(TEMPLATE_EXAMPLE)?;
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("{}", e.error()))?;

    Ok(UploadTemplateResponse {
        filename: TEMPLATE_FILENAME.to_string(),
        content_type: TEMPLATE_CONTENT_TYPE.to_string(),
        content: String::from_utf8(bytes)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "publisherName,email,siteLink,networkCode,revenueShare,parentNetworkCode,comments";

    fn csv_with_rows(count: usize) -> String {
        let mut content = String::from(HEADER);
        for i in 0..count {
            content.push_str(&format!(
                "\nPublisher {i},p{i}@example.com,https://site{i}.com,{},30,,",
                1000 + i
            ));
        }
        content
    }

    #[test]
    fn parses_rows_in_file_order() {
        let rows = parse_publisher_csv(&csv_with_rows(3)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].publisher_name, "Publisher 0");
        assert_eq!(rows[2].network_code, "1002");
        assert_eq!(rows[1].parent_network_code, None);
    }

    #[test]
    fn quoted_commas_stay_inside_field() {
        let content = format!(
            "{HEADER}\n\"Acme, Inc.\",a@acme.com,acme.com,123,50,,\"notes, with, commas\""
        );
        let rows = parse_publisher_csv(&content).unwrap();
        assert_eq!(rows[0].publisher_name, "Acme, Inc.");
        assert_eq!(rows[0].comments.as_deref(), Some("notes, with, commas"));
    }

    #[test]
    fn quote_characters_are_stripped_from_values() {
        let content = format!("{HEADER}\nAcme \"The Best\" Media,a@acme.com,acme.com,123,50,,");
        let rows = parse_publisher_csv(&content).unwrap();
        assert_eq!(rows[0].publisher_name, "Acme The Best Media");
        assert_eq!(rows[0].email, "a@acme.com");
    }

    #[test]
    fn unbalanced_quote_stays_on_its_own_line() {
        let content = format!(
            "{HEADER}\n\"Acme,a@acme.com,acme.com,123,50,,\nBeta,b@beta.com,beta.com,456,40,,"
        );
        let rows = parse_publisher_csv(&content).unwrap();
        assert_eq!(rows.len(), 2);
        // The open quote swallows the rest of its own line only
        assert_eq!(rows[0].publisher_name, "Acme,a@acme.com,acme.com,123,50,,");
        assert_eq!(rows[0].email, "");
        assert_eq!(rows[1].publisher_name, "Beta");
        assert_eq!(rows[1].network_code, "456");
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let content = format!("{HEADER}\r\nAcme,a@acme.com,acme.com,123,50,,\r\n");
        let rows = parse_publisher_csv(&content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].comments, None);
    }

    #[test]
    fn values_are_trimmed() {
        let content = format!("{HEADER}\n  Acme  , a@acme.com ,acme.com, 123 ,50, 999 ,");
        let rows = parse_publisher_csv(&content).unwrap();
        assert_eq!(rows[0].publisher_name, "Acme");
        assert_eq!(rows[0].network_code, "123");
        assert_eq!(rows[0].parent_network_code.as_deref(), Some("999"));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let content = format!("\n{HEADER}\n\n   \nAcme,a@acme.com,acme.com,123,50\n\n");
        let rows = parse_publisher_csv(&content).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn short_rows_fill_missing_values_with_empty_strings() {
        let content = format!("{HEADER}\nAcme,a@acme.com");
        let rows = parse_publisher_csv(&content).unwrap();
        assert_eq!(rows[0].site_link, "");
        assert_eq!(rows[0].revenue_share, "");
        assert_eq!(rows[0].comments, None);
    }

    #[test]
    fn columns_are_matched_by_header_name() {
        let content = "revenueShare,networkCode,siteLink,email,publisherName\n25,42,x.com,x@x.com,X";
        let rows = parse_publisher_csv(content).unwrap();
        assert_eq!(rows[0].publisher_name, "X");
        assert_eq!(rows[0].revenue_share, "25");
    }

    #[test]
    fn empty_input_is_empty_file() {
        assert!(matches!(parse_publisher_csv(""), Err(CsvError::EmptyFile)));
        assert!(matches!(parse_publisher_csv("\n\n  \n"), Err(CsvError::EmptyFile)));
    }

    #[test]
    fn header_only_is_empty_file() {
        assert!(matches!(parse_publisher_csv(HEADER), Err(CsvError::EmptyFile)));
    }

    #[test]
    fn missing_headers_are_named() {
        let content = "publisherName,email,networkCode\nAcme,a@acme.com,123";
        match parse_publisher_csv(content) {
            Err(CsvError::MissingHeaders(missing)) => {
                assert_eq!(missing, vec!["siteLink".to_string(), "revenueShare".to_string()]);
            }
            other => panic!("expected MissingHeaders, got {:?}", other),
        }
    }

    #[test]
    fn fifty_rows_are_accepted() {
        let rows = parse_publisher_csv(&csv_with_rows(MAX_UPLOAD_ROWS)).unwrap();
        assert_eq!(rows.len(), MAX_UPLOAD_ROWS);
    }

    #[test]
    fn fifty_one_rows_are_rejected() {
        match parse_publisher_csv(&csv_with_rows(MAX_UPLOAD_ROWS + 1)) {
            Err(CsvError::TooManyRows { count, max }) => {
                assert_eq!(count, 51);
                assert_eq!(max, 50);
            }
            other => panic!("expected TooManyRows, got {:?}", other),
        }
    }

    #[test]
    fn template_has_header_and_example_row() {
        let template = upload_template().unwrap();
        assert_eq!(template.filename, TEMPLATE_FILENAME);
        let lines: Vec<&str> = template.content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("Publisher LLC,contact@example.com"));
    }

    #[test]
    fn template_is_a_valid_upload() {
        let template = upload_template().unwrap();
        let rows = parse_publisher_csv(&template.content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].network_code, "12345678");
        assert_eq!(rows[0].parent_network_code, None);
    }
}
