//! Recipient CSV import
//!
//! The header must contain `email`; `name`, `company`, `city`, `subject`,
//! `body` and `html_body` are optional. Headers match case-insensitively.
//! Malformed addresses and repeated addresses are dropped and counted.

use bulkmail_common::types::EmailAddress;
use bulkmail_common::{Error, Result};
use bulkmail_storage::models::NewRecipient;
use std::collections::HashSet;

/// One accepted CSV row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedRow {
    pub recipient: NewRecipient,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
}

/// Parsed upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvImport {
    pub rows: Vec<ImportedRow>,
    pub dropped_invalid: usize,
    pub dropped_duplicate: usize,
}

impl CsvImport {
    /// Recipients only, in file order
    pub fn recipients(&self) -> Vec<NewRecipient> {
        self.rows.iter().map(|r| r.recipient.clone()).collect()
    }
}

struct Columns {
    email: usize,
    name: Option<usize>,
    company: Option<usize>,
    city: Option<usize>,
    subject: Option<usize>,
    body: Option<usize>,
    html_body: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
        };

        let email = find("email").ok_or_else(|| {
            Error::Validation("CSV file must have an 'email' column".to_string())
        })?;

        Ok(Self {
            email,
            name: find("name"),
            company: find("company"),
            city: find("city"),
            subject: find("subject"),
            body: find("body"),
            html_body: find("html_body"),
        })
    }
}

fn field(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse an uploaded recipient CSV
pub fn parse_recipient_csv(data: &[u8]) -> Result<CsvImport> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::None)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| Error::Validation(format!("Invalid CSV file: {}", e)))?
        .clone();
    let columns = Columns::from_headers(&headers)?;

    let mut import = CsvImport::default();
    let mut seen = HashSet::new();

    for record in reader.records() {
        let record = record.map_err(|e| Error::Validation(format!("Invalid CSV file: {}", e)))?;

        let raw_email = record.get(columns.email).unwrap_or("");
        let Some(address) = EmailAddress::parse(raw_email) else {
            import.dropped_invalid += 1;
            continue;
        };

        if !seen.insert(address.normalized()) {
            import.dropped_duplicate += 1;
            continue;
        }

        import.rows.push(ImportedRow {
            recipient: NewRecipient {
                email: address.to_string(),
                name: field(&record, columns.name),
                company: field(&record, columns.company),
                city: field(&record, columns.city),
            },
            subject: field(&record, columns.subject),
            body: field(&record, columns.body),
            html_body: field(&record, columns.html_body),
        });
    }

    if import.rows.is_empty() {
        return Err(Error::Validation(format!(
            "CSV file contains no valid recipients ({} invalid, {} duplicate)",
            import.dropped_invalid, import.dropped_duplicate
        )));
    }

    Ok(import)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_drops_invalid_and_duplicate_rows() {
        let csv = "email,name\na@x.com,Ann\nbad,Bob\nA@X.com,Ann again\n";
        let import = parse_recipient_csv(csv.as_bytes()).unwrap();

        assert_eq!(import.rows.len(), 1);
        assert_eq!(import.dropped_invalid, 1);
        assert_eq!(import.dropped_duplicate, 1);
        assert_eq!(import.rows[0].recipient.email, "a@x.com");
        assert_eq!(import.rows[0].recipient.name.as_deref(), Some("Ann"));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let csv = " Email , Company ,CITY,Subject\njane@example.com,Acme,Oslo,Hi {{name}}\n";
        let import = parse_recipient_csv(csv.as_bytes()).unwrap();

        let row = &import.rows[0];
        assert_eq!(row.recipient.company.as_deref(), Some("Acme"));
        assert_eq!(row.recipient.city.as_deref(), Some("Oslo"));
        assert_eq!(row.recipient.name, None);
        assert_eq!(row.subject.as_deref(), Some("Hi {{name}}"));
        assert_eq!(row.body, None);
    }

    #[test]
    fn test_missing_email_column_is_rejected() {
        let err = parse_recipient_csv(b"name,company\nAnn,Acme\n").unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("'email' column"));
    }

    #[test]
    fn test_zero_valid_rows_is_rejected() {
        let err = parse_recipient_csv(b"email\nnope\nstill nope\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: CSV file contains no valid recipients (2 invalid, 0 duplicate)"
        );
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let csv = "email,name,company\nann@example.com\n";
        let import = parse_recipient_csv(csv.as_bytes()).unwrap();
        assert_eq!(import.rows[0].recipient, NewRecipient {
            email: "ann@example.com".to_string(),
            ..NewRecipient::default()
        });
    }
}
