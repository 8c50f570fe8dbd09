use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    pub comment_prefix: String,
    /// Categories lowered first, in this order. The rest follow in registration order.
    pub category_order: Vec<String>,
    /// STRUCTs whose tuples feed the token table.
    pub token_sources: Vec<String>,
    /// Character class helpers whose literals are never replaced by tokens.
    pub exempt_rules: Vec<String>,
    pub strict_references: bool,
    pub strict_operands: bool,
    pub max_action_args: usize,
    pub token_rules: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            comment_prefix: "#".to_owned(),
            category_order: Vec::new(),
            token_sources: ["Operator", "Separator", "Keyword"]
                .map(str::to_owned)
                .to_vec(),
            exempt_rules: [
                "CHAR",
                "DIGIT",
                "ASCII",
                "ESCAPE",
                "HEXDIGIT",
                "OCTALDIGIT",
                "IRREGULAR_CHAR",
                "UTF8",
            ]
            .map(str::to_owned)
            .to_vec(),
            strict_references: true,
            strict_operands: true,
            max_action_args: 5,
            token_rules: false,
        }
    }
}

impl Config {
    /// Reads a JSON object, missing fields keep their defaults.
    pub fn from_json(src: &str) -> anyhow::Result<Config> {
        let mut value: Value = serde_json::from_str(src).context("Config is not valid JSON")?;
        let Value::Object(fields) = &mut value else {
            bail!("Config is not an object");
        };

        let mut config = Config::default();
        read_field(fields, "comment_prefix", &mut config.comment_prefix)?;
        read_field(fields, "category_order", &mut config.category_order)?;
        read_field(fields, "token_sources", &mut config.token_sources)?;
        read_field(fields, "exempt_rules", &mut config.exempt_rules)?;
        read_field(fields, "strict_references", &mut config.strict_references)?;
        read_field(fields, "strict_operands", &mut config.strict_operands)?;
        read_field(fields, "max_action_args", &mut config.max_action_args)?;
        read_field(fields, "token_rules", &mut config.token_rules)?;

        if let Some(unknown) = fields.keys().next() {
            bail!("Unknown field config.{unknown}");
        }
        if config.max_action_args > u8::MAX as usize {
            bail!("config.max_action_args must be at most {}", u8::MAX);
        }

        Ok(config)
    }

    pub fn is_exempt(&self, rule: &str) -> bool {
        self.exempt_rules.iter().any(|r| r == rule)
    }
}

fn read_field<T: for<'de> Deserialize<'de>>(
    fields: &mut serde_json::Map<String, Value>,
    name: &str,
    out: &mut T,
) -> anyhow::Result<()> {
    let Some(field) = fields.remove(name) else {
        return Ok(());
    };

    let typename = std::any::type_name::<T>();
    *out = serde_json::from_value::<T>(field.clone())
        .with_context(|| format!("Expected type {typename} for config.{name}, got {field}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.is_exempt("DIGIT"));
        assert!(!config.is_exempt("Digit"));
    }

    #[test]
    fn partial_override() {
        let config = Config::from_json(
            r#"{ "comment_prefix": "//", "category_order": ["literal", "expr"], "token_rules": true }"#,
        )
        .unwrap();
        assert_eq!(config.comment_prefix, "//");
        assert_eq!(config.category_order, ["literal", "expr"]);
        assert!(config.token_rules);
        assert!(config.strict_references);
    }

    #[test]
    fn bad_fields() {
        let err = Config::from_json(r#"{ "strict_operands": "yes" }"#).unwrap_err();
        assert!(err.to_string().contains("config.strict_operands"));

        let err = Config::from_json(r#"{ "colour": 1 }"#).unwrap_err();
        assert!(err.to_string().contains("config.colour"));

        assert!(Config::from_json("[]").is_err());
    }
}
