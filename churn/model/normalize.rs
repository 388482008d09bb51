use serde_json::{Map, Value};

use crate::{
    dataset::Cell,
    schema::FeatureSchema,
    value::{coerce_number, is_blank, render_text, FeatureRow, FeatureValue},
};

/// Builds a complete model row from a sparse request.
///
/// Walks `expected_columns` in order. Absent or blank inputs take the schema
/// default. Columns with a numeric default are coerced to a finite float and
/// fall back to the default when coercion fails; other columns keep text.
/// Request keys outside the schema are ignored.
#[must_use]
pub fn normalize(schema: &FeatureSchema, incoming: &Map<String, Value>) -> FeatureRow {
    schema
        .expected_columns
        .iter()
        .map(|column| {
            let supplied = incoming.get(column).filter(|value| !is_blank(value));
            let value = match schema.defaults.get(column) {
                Some(FeatureValue::Number(fallback)) => {
                    FeatureValue::Number(supplied.and_then(coerce_number).unwrap_or(*fallback))
                }
                Some(fallback) => supplied
                    .and_then(render_text)
                    .map_or_else(|| fallback.clone(), FeatureValue::Text),
                None => supplied.map_or(FeatureValue::Missing, FeatureValue::from_json),
            };
            (column.clone(), value)
        })
        .collect()
}

/// Request-shaped view of a raw dataset row, for offline scoring.
#[must_use]
pub fn cells_to_request<'a>(
    cells: impl IntoIterator<Item = (&'a String, &'a Cell)>,
) -> Map<String, Value> {
    cells
        .into_iter()
        .map(|(name, cell)| {
            let value = cell.clone().map_or(Value::Null, Value::String);
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;

    fn schema() -> FeatureSchema {
        FeatureSchema {
            expected_columns: vec!["tenure".into(), "Contract".into(), "Extra".into()],
            defaults: IndexMap::from([
                ("tenure".to_string(), FeatureValue::Number(12.0)),
                (
                    "Contract".to_string(),
                    FeatureValue::Text("Month-to-month".into()),
                ),
            ]),
            categorical_options: IndexMap::new(),
        }
    }

    fn request(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn empty_request_takes_defaults_in_order() {
        let row = normalize(&schema(), &Map::new());
        assert_eq!(
            row.keys().collect::<Vec<_>>(),
            vec!["tenure", "Contract", "Extra"]
        );
        assert_eq!(row["tenure"], FeatureValue::Number(12.0));
        assert_eq!(row["Contract"], FeatureValue::Text("Month-to-month".into()));
        assert!(row["Extra"].is_missing());
    }

    #[test]
    fn blank_and_unparseable_values_fall_back() {
        let row = normalize(
            &schema(),
            &request(json!({ "tenure": "lots", "Contract": "  ", "Ignored": 1 })),
        );
        assert_eq!(row["tenure"], FeatureValue::Number(12.0));
        assert_eq!(row["Contract"], FeatureValue::Text("Month-to-month".into()));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn supplied_values_are_coerced() {
        let row = normalize(
            &schema(),
            &request(json!({ "tenure": " 40 ", "Contract": 2, "Extra": "x" })),
        );
        assert_eq!(row["tenure"], FeatureValue::Number(40.0));
        assert_eq!(row["Contract"], FeatureValue::Text("2".into()));
        assert_eq!(row["Extra"], FeatureValue::Text("x".into()));
    }

    #[test]
    fn complete_row_is_unchanged() {
        let complete = request(json!({ "tenure": 3.5, "Contract": "Two year", "Extra": "y" }));
        let row = normalize(&schema(), &complete);
        let again = normalize(&schema(), &request(serde_json::to_value(&row).unwrap()));
        assert_eq!(row, again);
        assert_eq!(serde_json::to_value(&row).unwrap(), Value::Object(complete));
    }

    #[test]
    fn dataset_rows_become_requests() {
        let cells: IndexMap<String, Cell> = IndexMap::from([
            ("tenure".to_string(), Some("7".to_string())),
            ("Contract".to_string(), None),
        ]);
        let req = cells_to_request(&cells);
        assert_eq!(Value::Object(req), json!({ "tenure": "7", "Contract": null }));
    }
}
