use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult};

/// Widget types the renderer knows how to place on a screen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Button,
    Checkbox,
    Label,
    Slider,
    Switch,
    Progressbar,
}

impl WidgetKind {
    pub const ALL: [WidgetKind; 6] = [
        WidgetKind::Button,
        WidgetKind::Checkbox,
        WidgetKind::Label,
        WidgetKind::Slider,
        WidgetKind::Switch,
        WidgetKind::Progressbar,
    ];

    /// Name used on the command line and in sample file names.
    pub fn name(self) -> &'static str {
        match self {
            WidgetKind::Button => "button",
            WidgetKind::Checkbox => "checkbox",
            WidgetKind::Label => "label",
            WidgetKind::Slider => "slider",
            WidgetKind::Switch => "switch",
            WidgetKind::Progressbar => "progressbar",
        }
    }

    /// Class token the renderer writes into its annotation files.
    pub fn class_name(self) -> &'static str {
        match self {
            WidgetKind::Button => "lv_btn",
            WidgetKind::Checkbox => "lv_checkbox",
            WidgetKind::Label => "lv_label",
            WidgetKind::Slider => "lv_slider",
            WidgetKind::Switch => "lv_switch",
            WidgetKind::Progressbar => "lv_bar",
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered class name -> index mapping, built once per run.
///
/// The index of a class is its position in the table and never changes for the
/// lifetime of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    names: Vec<String>,
}

impl ClassTable {
    pub fn new<I, S>(names: I) -> DatasetResult<ClassTable>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = ClassTable { names: vec![] };
        for name in names {
            let name = name.into();
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(DatasetError::InvalidConfig(format!(
                    "class name {:?} must be a single non-empty token",
                    name
                )));
            }
            if name.parse::<usize>().is_ok() {
                return Err(DatasetError::InvalidConfig(format!(
                    "class name {:?} would be indistinguishable from a class index",
                    name
                )));
            }
            if table.index_of(&name).is_some() {
                return Err(DatasetError::InvalidConfig(format!(
                    "class {:?} requested more than once",
                    name
                )));
            }
            table.names.push(name);
        }
        Ok(table)
    }

    /// Table holding the renderer class names of `widgets`, in request order.
    pub fn from_widgets(widgets: &[WidgetKind]) -> DatasetResult<ClassTable> {
        ClassTable::new(widgets.iter().map(|w| w.class_name()))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn to_index_map(&self) -> BTreeMap<usize, String> {
        self.names.iter().cloned().enumerate().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_request_order() {
        let table =
            ClassTable::from_widgets(&[WidgetKind::Slider, WidgetKind::Button]).unwrap();
        assert_eq!(table.index_of("lv_slider"), Some(0));
        assert_eq!(table.index_of("lv_btn"), Some(1));
        assert_eq!(table.index_of("lv_label"), None);
        assert_eq!(table.name_of(1), Some("lv_btn"));
    }

    #[test]
    fn duplicate_widget_is_rejected() {
        let err = ClassTable::from_widgets(&[WidgetKind::Switch, WidgetKind::Switch]).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidConfig(_)));
    }

    #[test]
    fn numeric_and_blank_names_are_rejected() {
        assert!(ClassTable::new(vec!["3"]).is_err());
        assert!(ClassTable::new(vec!["two words"]).is_err());
        assert!(ClassTable::new(vec![""]).is_err());
    }

    #[test]
    fn index_map_is_index_to_name() {
        let table = ClassTable::new(vec!["a", "b"]).unwrap();
        let map = table.to_index_map();
        assert_eq!(map.get(&0).map(String::as_str), Some("a"));
        assert_eq!(map.get(&1).map(String::as_str), Some("b"));
    }
}
