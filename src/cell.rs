/// A single classified table cell.
///
/// Every raw field goes through [`Cell::classify`] exactly once; the parser
/// works on these tags instead of re-parsing strings.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    /// A finite floating point number.
    Numeric(f64),
    /// Non-blank text that is not a finite number (including `NaN`/`inf`).
    Text(String),
    /// Blank or whitespace-only field.
    #[default]
    Empty,
}

impl Cell {
    /// Classify a raw field value.
    pub fn classify(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Numeric(v),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    /// Returns the numeric value if this cell holds one.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns true if this cell is a finite number.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Numeric(_))
    }

    /// Returns true if this cell is blank.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// Classify every field of a raw record.
pub fn classify_row<'a, I>(fields: I) -> Vec<Cell>
where
    I: IntoIterator<Item = &'a str>,
{
    fields.into_iter().map(Cell::classify).collect()
}

/// A row is numeric when none of its non-blank cells is text.
pub fn is_numeric_row(cells: &[Cell]) -> bool {
    cells.iter().all(|c| c.is_numeric() || c.is_empty())
}

/// A row is blank when every cell is empty.
pub fn is_blank_row(cells: &[Cell]) -> bool {
    cells.iter().all(Cell::is_empty)
}
