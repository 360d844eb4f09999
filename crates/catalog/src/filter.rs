use model::{Error, Result};
use serde_json::{json, Value};

/// Field names usable in filters and sort columns. Each entity projects
/// into a flat JSON object keyed by these names (see the `project_*`
/// helpers in the table modules).
pub mod fields {
    pub const OBJ_OID: &str = "oid";
    pub const OBJ_UUID: &str = "uuid";
    pub const OBJ_VERSION: &str = "version";
    pub const OBJ_GROUPING: &str = "grouping";
    pub const OBJ_USER_MD: &str = "user_md";
    pub const COPY_NAME: &str = "copy_name";
    pub const COPY_STATUS: &str = "status";
    pub const EXT_UUID: &str = "ext_uuid";
    pub const EXT_STATE: &str = "state";
    pub const EXT_SIZE: &str = "size";
    pub const MEDIUM_NAME: &str = "medium_name";
    pub const MEDIUM_FAMILY: &str = "medium_family";
    pub const MEDIUM_LIBRARY: &str = "medium_library";
    pub const CREATION_TIME: &str = "creation_time";
    pub const ACCESS_TIME: &str = "access_time";
}

/// A catalog query filter, expressed in a small JSON DSL.
///
/// Supported operators:
/// - `{"field": value}` — equality on a projected field;
/// - `{"$AND": [f, ...]}` / `{"$OR": [f, ...]}` — boolean combinators;
/// - `{"$REGEXP": {"field": "pattern"}}` — regex match on a string field;
/// - `{"$KVINJSON": {"field": f, "key": k, "value": v}}` — key/value
///   membership within a JSON-object field (e.g. user metadata).
#[derive(Debug, Clone, PartialEq)]
pub struct Filter(Value);

impl Filter {
    /// Equality on a projected field.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self(json!({ field: value.into() }))
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self(json!({ "$AND": filters.into_iter().map(|f| f.0).collect::<Vec<_>>() }))
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self(json!({ "$OR": filters.into_iter().map(|f| f.0).collect::<Vec<_>>() }))
    }

    pub fn regexp(field: &str, pattern: &str) -> Self {
        Self(json!({ "$REGEXP": { field: pattern } }))
    }

    pub fn kv_in_json(field: &str, key: &str, value: &str) -> Self {
        Self(json!({ "$KVINJSON": { "field": field, "key": key, "value": value } }))
    }

    /// Parse a filter from its JSON rendering.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| Error::InvalidInput(format!("malformed filter: {err}")))?;
        Ok(Self(value))
    }

    pub fn to_json(&self) -> String {
        self.0.to_string()
    }

    /// Evaluate this filter against one entity projection.
    pub fn matches(&self, row: &Value) -> Result<bool> {
        eval(&self.0, row)
    }
}

fn eval(filter: &Value, row: &Value) -> Result<bool> {
    let obj = filter
        .as_object()
        .ok_or_else(|| Error::InvalidInput("filter must be a JSON object".into()))?;

    for (key, operand) in obj {
        let ok = match key.as_str() {
            "$AND" => {
                let mut all = true;
                for filter in operand_list(operand)? {
                    all = eval(filter, row)? && all;
                }
                all
            }
            "$OR" => {
                let mut any = false;
                for filter in operand_list(operand)? {
                    any = eval(filter, row)? || any;
                }
                any
            }
            "$REGEXP" => eval_regexp(operand, row)?,
            "$KVINJSON" => eval_kv_in_json(operand, row)?,
            field => eval_eq(field, operand, row),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn operand_list(operand: &Value) -> Result<&Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| Error::InvalidInput("$AND / $OR operand must be an array".into()))
}

fn eval_eq(field: &str, operand: &Value, row: &Value) -> bool {
    match row.get(field) {
        Some(actual) => values_equal(actual, operand),
        None => false,
    }
}

// Integers may project as numbers but be filtered as strings (the DSL is
// stringly typed at its edges). Compare through a string rendering when the
// JSON types disagree.
fn values_equal(actual: &Value, wanted: &Value) -> bool {
    if actual == wanted {
        return true;
    }
    scalar_string(actual)
        .zip(scalar_string(wanted))
        .map(|(a, w)| a == w)
        .unwrap_or(false)
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn eval_regexp(operand: &Value, row: &Value) -> Result<bool> {
    let map = operand
        .as_object()
        .ok_or_else(|| Error::InvalidInput("$REGEXP operand must be an object".into()))?;

    for (field, pattern) in map {
        let pattern = pattern
            .as_str()
            .ok_or_else(|| Error::InvalidInput("$REGEXP pattern must be a string".into()))?;
        let re = regex::Regex::new(pattern)
            .map_err(|err| Error::InvalidInput(format!("bad $REGEXP pattern: {err}")))?;

        let matched = row
            .get(field.as_str())
            .and_then(Value::as_str)
            .map(|s| re.is_match(s))
            .unwrap_or(false);
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_kv_in_json(operand: &Value, row: &Value) -> Result<bool> {
    let (field, key, value) = match (
        operand.get("field").and_then(Value::as_str),
        operand.get("key").and_then(Value::as_str),
        operand.get("value").and_then(Value::as_str),
    ) {
        (Some(f), Some(k), Some(v)) => (f, k, v),
        _ => {
            return Err(Error::InvalidInput(
                "$KVINJSON operand needs 'field', 'key' and 'value' strings".into(),
            ))
        }
    };

    Ok(row
        .get(field)
        .and_then(|map| map.get(key))
        .and_then(Value::as_str)
        .map(|v| v == value)
        .unwrap_or(false))
}

/// Listing order: a projected column plus a direction.
#[derive(Debug, Clone)]
pub struct Sort {
    pub column: String,
    pub reverse: bool,
}

impl Sort {
    pub fn by(column: &str) -> Self {
        Self {
            column: column.to_string(),
            reverse: false,
        }
    }

    pub fn reversed(column: &str) -> Self {
        Self {
            column: column.to_string(),
            reverse: true,
        }
    }

    /// Order two projections. Missing columns sort first; numbers order
    /// numerically, everything else by string rendering.
    pub fn compare(&self, lhs: &Value, rhs: &Value) -> std::cmp::Ordering {
        let l = lhs.get(&self.column);
        let r = rhs.get(&self.column);

        let ord = match (l, r) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(Value::Number(a)), Some(Value::Number(b))) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(std::cmp::Ordering::Equal),
            (Some(a), Some(b)) => scalar_string(a)
                .unwrap_or_default()
                .cmp(&scalar_string(b).unwrap_or_default()),
        };
        if self.reverse {
            ord.reverse()
        } else {
            ord
        }
    }
}

#[cfg(test)]
mod test {
    use super::{fields, Filter, Sort};
    use serde_json::json;

    #[test]
    fn test_equality_and_combinators() {
        let row = json!({"oid": "obj-1", "version": 2, "copy_name": "source"});

        assert!(Filter::eq(fields::OBJ_OID, "obj-1").matches(&row).unwrap());
        assert!(!Filter::eq(fields::OBJ_OID, "obj-2").matches(&row).unwrap());
        // Stringly-typed comparison against a numeric projection.
        assert!(Filter::eq(fields::OBJ_VERSION, "2").matches(&row).unwrap());

        let both = Filter::and([
            Filter::eq(fields::OBJ_OID, "obj-1"),
            Filter::eq(fields::COPY_NAME, "source"),
        ]);
        assert!(both.matches(&row).unwrap());

        let either = Filter::or([
            Filter::eq(fields::OBJ_OID, "nope"),
            Filter::eq(fields::OBJ_VERSION, 2),
        ]);
        assert!(either.matches(&row).unwrap());
    }

    #[test]
    fn test_regexp() {
        let row = json!({"oid": "photos/2024/march/0001"});
        assert!(Filter::regexp(fields::OBJ_OID, "^photos/2024/")
            .matches(&row)
            .unwrap());
        assert!(!Filter::regexp(fields::OBJ_OID, "^videos/")
            .matches(&row)
            .unwrap());
        assert!(Filter::regexp(fields::OBJ_OID, "[").matches(&row).is_err());
    }

    #[test]
    fn test_kv_in_json() {
        let row = json!({"oid": "x", "user_md": {"tier": "cold", "owner": "alice"}});
        assert!(Filter::kv_in_json(fields::OBJ_USER_MD, "tier", "cold")
            .matches(&row)
            .unwrap());
        assert!(!Filter::kv_in_json(fields::OBJ_USER_MD, "tier", "hot")
            .matches(&row)
            .unwrap());
        assert!(!Filter::kv_in_json(fields::OBJ_USER_MD, "absent", "x")
            .matches(&row)
            .unwrap());
    }

    #[test]
    fn test_sort_orders_numbers_numerically() {
        let mut rows = vec![json!({"version": 10}), json!({"version": 2})];
        let sort = Sort::by(fields::OBJ_VERSION);
        rows.sort_by(|a, b| sort.compare(a, b));
        assert_eq!(rows[0]["version"], 2);

        let sort = Sort::reversed(fields::OBJ_VERSION);
        rows.sort_by(|a, b| sort.compare(a, b));
        assert_eq!(rows[0]["version"], 10);
    }

    #[test]
    fn test_round_trip() {
        let f = Filter::and([
            Filter::eq(fields::OBJ_OID, "a"),
            Filter::regexp(fields::COPY_NAME, "^src"),
        ]);
        let back = Filter::from_json(&f.to_json()).unwrap();
        assert_eq!(back, f);
    }
}
