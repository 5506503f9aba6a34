//! Spreadsheet input: Excel/ODS workbooks through `calamine`, CSV through `csv`.

use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AdminError, Result};

/// One data row. `line` is the 1-based line number in the spreadsheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRow {
    pub line: usize,
    cells: HashMap<String, String>,
}

impl SheetRow {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            cells: HashMap::new(),
        }
    }

    /// Sets `header` unless it already holds a non-empty value.
    pub fn insert(&mut self, header: &str, value: impl Into<String>) {
        let header = header.trim();
        if header.is_empty() {
            return;
        }
        let value = value.into();
        match self.cells.get(header) {
            Some(existing) if !existing.trim().is_empty() => {}
            _ => {
                self.cells.insert(header.to_string(), value);
            }
        }
    }

    pub fn has_column(&self, header: &str) -> bool {
        self.cells.contains_key(header.trim())
    }

    /// Raw cell text, empty when the column is absent.
    pub fn text(&self, header: &str) -> &str {
        self.cells.get(header.trim()).map(String::as_str).unwrap_or("")
    }

    /// First non-blank value among `headers`.
    pub fn first(&self, headers: &[&str]) -> &str {
        headers
            .iter()
            .map(|h| self.text(h))
            .find(|v| !v.trim().is_empty())
            .unwrap_or("")
    }

    pub fn is_blank(&self) -> bool {
        self.cells.values().all(|v| v.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub available_sheets: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

/// Renders a cell the way it reads in the spreadsheet. Integral floats lose
/// their fractional part so `11.0` stays `11`.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        other => other.to_string(),
    }
}

/// Reads `path`. `header_line` is the 1-based line holding the column names;
/// data starts on the line after it. Fully blank rows are dropped.
pub fn read_sheet(path: &Path, requested: Option<&str>, header_line: usize) -> Result<Sheet> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    let (name, available_sheets, grid) = if is_csv {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("csv")
            .to_string();
        (name.clone(), vec![name], read_csv_grid(path)?)
    } else {
        read_workbook_grid(path, requested)?
    };
    build_sheet(name, available_sheets, grid, header_line)
}

fn read_workbook_grid(
    path: &Path,
    requested: Option<&str>,
) -> Result<(String, Vec<String>, Vec<Vec<String>>)> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| AdminError::Spreadsheet(e.to_string()))?;
    let available = workbook.sheet_names().to_vec();
    info!(sheets = ?available, "Workbook opened");

    let name = match requested {
        Some(wanted) if available.iter().any(|s| s == wanted) => wanted.to_string(),
        _ => {
            let first = available
                .first()
                .cloned()
                .ok_or_else(|| AdminError::Spreadsheet("No sheet in workbook".to_string()))?;
            if let Some(wanted) = requested {
                warn!("Sheet '{}' not found, using '{}'", wanted, first);
            }
            first
        }
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| AdminError::Spreadsheet(e.to_string()))?;
    let grid = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    Ok((name, available, grid))
}

fn read_csv_grid(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    if let Some(first) = grid.first_mut().and_then(|row: &mut Vec<String>| row.first_mut()) {
        if let Some(stripped) = first.strip_prefix('\u{feff}') {
            *first = stripped.to_string();
        }
    }
    Ok(grid)
}

fn build_sheet(
    name: String,
    available_sheets: Vec<String>,
    grid: Vec<Vec<String>>,
    header_line: usize,
) -> Result<Sheet> {
    let header_index = header_line.max(1) - 1;
    let headers: Vec<String> = grid
        .get(header_index)
        .ok_or_else(|| AdminError::Spreadsheet(format!("Sheet '{}' contains no data", name)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let rows: Vec<SheetRow> = grid
        .iter()
        .enumerate()
        .skip(header_index + 1)
        .map(|(index, cells)| {
            let mut row = SheetRow::new(index + 1);
            for (header, value) in headers.iter().zip(cells.iter()) {
                row.insert(header, value.clone());
            }
            row
        })
        .filter(|row| !row.is_blank())
        .collect();

    if rows.is_empty() {
        return Err(AdminError::Spreadsheet(format!(
            "Sheet '{}' contains no data",
            name
        )));
    }
    info!(sheet = %name, rows = rows.len(), columns = headers.len(), "Sheet loaded");
    Ok(Sheet {
        name,
        available_sheets,
        headers,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn duplicate_headers_keep_first_non_empty_value() {
        let sheet = build_sheet(
            "Feuil1".into(),
            vec!["Feuil1".into()],
            grid(&[
                &["Ref", "Préférences", "Préférences"],
                &["CHEZ", "", "Casher"],
            ]),
            1,
        )
        .unwrap();
        let row = &sheet.rows[0];
        assert_eq!(row.text("Préférences"), "Casher");
        assert_eq!(row.line, 2);
    }

    #[test]
    fn header_offset_and_blank_rows() {
        let sheet = build_sheet(
            "Feuil1".into(),
            vec![],
            grid(&[
                &["Infos", "", "Tags"],
                &["Ref", "Nom de base", "Stations de metro 2 "],
                &["", "", ""],
                &["CHEZ", "Chez Nous", "Bastille"],
            ]),
            2,
        )
        .unwrap();
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].line, 4);
        assert_eq!(sheet.rows[0].text("Stations de metro 2 "), "Bastille");
        assert_eq!(sheet.rows[0].first(&["Vrai Nom", "Nom de base"]), "Chez Nous");
    }

    #[test]
    fn empty_sheet_is_an_error() {
        let err = build_sheet("S".into(), vec![], grid(&[&["Ref"]]), 1).unwrap_err();
        assert!(matches!(err, AdminError::Spreadsheet(_)));
    }

    #[test]
    fn integral_floats_render_without_fraction() {
        assert_eq!(cell_to_string(&Data::Float(11.0)), "11");
        assert_eq!(cell_to_string(&Data::Float(48.8566)), "48.8566");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn csv_with_bom_is_read() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write!(file, "\u{feff}Tag,Nom\nabc,Chez A\n").unwrap();
        let sheet = read_sheet(file.path(), None, 1).unwrap();
        assert_eq!(sheet.headers, vec!["Tag", "Nom"]);
        assert_eq!(sheet.rows[0].text("Tag"), "abc");
    }
}
