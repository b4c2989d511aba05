//! Plain-text tables for `show` commands

use certman_core::{CertificateKind, CertificateRecord};

#[derive(Debug, Clone)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row; missing cells render empty, extra cells are dropped
    pub fn add_row(&mut self, cells: Vec<String>) {
        let mut row = cells;
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render with columns padded to their widest cell, separated by two spaces
    pub fn render(&self) -> String {
        let widths: Vec<usize> = (0..self.headers.len())
            .map(|col| {
                self.rows
                    .iter()
                    .map(|row| row[col].chars().count())
                    .chain(std::iter::once(self.headers[col].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        std::iter::once(&self.headers)
            .chain(&self.rows)
            .map(|row| {
                let line: Vec<String> = row
                    .iter()
                    .zip(&widths)
                    .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                    .collect();
                line.join("  ").trim_end().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Root listing: SERIAL, NAME, FLAGS
pub fn root_table(root: &CertificateRecord) -> Table {
    let mut table = Table::new(&["SERIAL", "NAME", "FLAGS"]);
    table.add_row(vec![
        root.serial().to_string(),
        root.name().to_string(),
        root.flags().summary(),
    ]);
    table
}

/// Signing certificate listing: SERIAL, NAME, FLAGS, PARENT SERIAL
pub fn signing_table(records: &[CertificateRecord]) -> Table {
    let mut table = Table::new(&["SERIAL", "NAME", "FLAGS", "PARENT SERIAL"]);
    for record in records {
        table.add_row(vec![
            record.serial().to_string(),
            record.name().to_string(),
            record.flags().summary(),
            record
                .parent_serial()
                .map(|p| p.to_string())
                .unwrap_or_default(),
        ]);
    }
    table
}

/// Encryption certificate listing: SERIAL, NAME, FLAGS, PARENT SERIAL, KEY
pub fn encryption_table(records: &[CertificateRecord]) -> Table {
    let mut table = Table::new(&["SERIAL", "NAME", "FLAGS", "PARENT SERIAL", "KEY"]);
    for record in records {
        let key = match record.kind() {
            CertificateKind::Encryption(kem) => kem.name(),
            CertificateKind::Signing => "",
        };
        table.add_row(vec![
            record.serial().to_string(),
            record.name().to_string(),
            record.flags().summary(),
            record
                .parent_serial()
                .map(|p| p.to_string())
                .unwrap_or_default(),
            key.to_string(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_pads_columns() {
        let mut table = Table::new(&["SERIAL", "NAME"]);
        table.add_row(vec!["0".into(), "example.com".into()]);
        table.add_row(vec!["12".into(), "ops".into()]);

        assert_eq!(
            table.render(),
            "SERIAL  NAME\n0       example.com\n12      ops"
        );
    }

    #[test]
    fn test_short_rows_are_padded() {
        let mut table = Table::new(&["A", "B", "C"]);
        table.add_row(vec!["x".into()]);

        assert_eq!(table.render(), "A  B  C\nx");
    }
}
