//! The `column_mapping` and `data_format` sections.

use serde::{Deserialize, Serialize};

/// Role of each column for the statistical engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub prediction: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub numerical_features: Vec<String>,
    #[serde(default)]
    pub categorical_features: Vec<String>,
}

impl ColumnMapping {
    /// Every column the mapping names, in declaration order.
    pub fn named_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::new();
        cols.extend(self.target.as_deref());
        cols.extend(self.prediction.as_deref());
        cols.extend(self.datetime.as_deref());
        cols.extend(self.numerical_features.iter().map(String::as_str));
        cols.extend(self.categorical_features.iter().map(String::as_str));
        cols
    }
}

/// How the reference CSV is laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormat {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_header")]
    pub header: bool,
    #[serde(default)]
    pub date_column: Option<String>,
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_header() -> bool {
    true
}

impl Default for DataFormat {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            header: default_header(),
            date_column: None,
        }
    }
}

impl DataFormat {
    /// The separator as a single byte, if it is one.
    pub fn separator_byte(&self) -> Option<u8> {
        match self.separator.as_bytes() {
            [b] => Some(*b),
            _ if self.separator == "\\t" => Some(b'\t'),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_columns() {
        let mapping = ColumnMapping {
            target: Some("target_".into()),
            prediction: Some("predicted_".into()),
            datetime: Some("date_".into()),
            numerical_features: vec!["a".into(), "b".into()],
            categorical_features: vec!["c".into()],
        };
        assert_eq!(
            mapping.named_columns(),
            vec!["target_", "predicted_", "date_", "a", "b", "c"]
        );
    }

    #[test]
    fn test_separator_byte() {
        let mut fmt = DataFormat::default();
        assert_eq!(fmt.separator_byte(), Some(b','));
        fmt.separator = ";".into();
        assert_eq!(fmt.separator_byte(), Some(b';'));
        fmt.separator = "\\t".into();
        assert_eq!(fmt.separator_byte(), Some(b'\t'));
        fmt.separator = "::".into();
        assert_eq!(fmt.separator_byte(), None);
    }
}
