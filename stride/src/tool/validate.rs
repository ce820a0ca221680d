//! Parameter shape-checking against compiled tool schemas.
//!
//! Validation never throws up the stack: a failed check becomes a
//! [`ToolFailure`] that is recorded in the turn and surfaced to the model
//! so it can self-correct on the next call.

use jsonschema::Validator;
use serde_json::Value;

use super::call::ToolFailure;

/// Check `params` against a compiled schema.
pub(crate) fn check(validator: &Validator, params: &Value) -> Result<(), ToolFailure> {
    match validator.validate(params) {
        Ok(()) => Ok(()),
        Err(error) => {
            let field = field_of(&error.instance_path().to_string());
            Err(ToolFailure::validation(field, error.to_string()))
        }
    }
}

/// Turn a JSON pointer like `/city` into the field name the model used.
/// The empty pointer means the parameter object itself was wrong.
fn field_of(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        "params".to_owned()
    } else {
        trimmed.replace('/', ".")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_validator() -> Validator {
        jsonschema::validator_for(&json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "units": {"type": "string"}
            },
            "required": ["city"]
        }))
        .unwrap()
    }

    #[test]
    fn valid_params_pass() {
        let validator = weather_validator();
        assert!(check(&validator, &json!({"city": "Paris"})).is_ok());
    }

    #[test]
    fn wrong_type_names_the_field() {
        let validator = weather_validator();
        let failure = check(&validator, &json!({"city": 123})).unwrap_err();
        assert_eq!(failure.field.as_deref(), Some("city"));
        assert!(!failure.message.is_empty());
    }

    #[test]
    fn missing_required_points_at_root() {
        let validator = weather_validator();
        let failure = check(&validator, &json!({})).unwrap_err();
        assert_eq!(failure.field.as_deref(), Some("params"));
    }

    #[test]
    fn non_object_params_fail() {
        let validator = weather_validator();
        assert!(check(&validator, &json!("Paris")).is_err());
    }

    #[test]
    fn nested_pointer_becomes_dotted_path() {
        let validator = jsonschema::validator_for(&json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": {"limit": {"type": "integer"}}
                }
            }
        }))
        .unwrap();
        let failure = check(&validator, &json!({"filter": {"limit": "ten"}})).unwrap_err();
        assert_eq!(failure.field.as_deref(), Some("filter.limit"));
    }
}
