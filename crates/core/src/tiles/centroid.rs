//! Centroid lookup table for pre-tiled artifacts.

use std::path::Path;

use super::ArtifactError;

/// One row of the centroid table.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub name: String,
    pub center_x: String,
    pub center_y: String,
}

/// Rows of a `name,center_x,center_y` CSV, in file order.
#[derive(Debug, Clone, Default)]
pub struct CentroidTable {
    rows: Vec<Centroid>,
}

impl CentroidTable {
    /// Parse CSV text. The first line is a header and is skipped.
    ///
    /// Coordinates are kept as written so they reach the object metadata
    /// unchanged.
    pub fn parse(text: &str) -> Result<Self, ArtifactError> {
        let mut rows = Vec::new();

        for (index, line) in text.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(unquote).collect();
            if fields.len() < 3 {
                return Err(ArtifactError::Centroids(format!(
                    "line {}: expected name,center_x,center_y",
                    index + 1
                )));
            }
            rows.push(Centroid {
                name: fields[0].to_string(),
                center_x: fields[1].to_string(),
                center_y: fields[2].to_string(),
            });
        }

        Ok(Self { rows })
    }

    pub async fn load(path: &Path) -> Result<Self, ArtifactError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row whose name contains `stem`, ignoring case.
    pub fn find(&self, stem: &str) -> Option<&Centroid> {
        let needle = stem.to_lowercase();
        self.rows
            .iter()
            .find(|row| row.name.to_lowercase().contains(&needle))
    }
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "name,center_x,center_y\n\
                       Grid_A01,106.8,-6.2\n\
                       \"grid_b02\",106.9,-6.3\n\
                       \n";

    #[test]
    fn test_parse_skips_header_and_blank_lines() {
        let table = CentroidTable::parse(CSV).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_find_is_case_insensitive_substring() {
        let table = CentroidTable::parse(CSV).unwrap();
        let row = table.find("grid_a01").unwrap();
        assert_eq!(row.name, "Grid_A01");
        assert_eq!(row.center_x, "106.8");

        assert_eq!(table.find("B02").unwrap().center_y, "-6.3");
        assert!(table.find("c03").is_none());
    }

    #[test]
    fn test_short_row_rejected() {
        let err = CentroidTable::parse("name,x,y\nonly_name\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
