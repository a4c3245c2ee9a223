use anyhow::{Context as _, Result, bail};
use serde::Serialize;
use serde_json::Value;

/// Converts a flat parameters object into the command line arguments of a tool.
///
/// Every field of the serialized object is converted in declaration order according to the
/// following rules:
///
/// - `None` and `false` are omitted.
/// - `true` becomes a bare `--flag`.
/// - Numbers and strings become `--flag value`. An empty string becomes a bare `--flag`.
/// - Maps become one `--flag key:value` pair per entry.
/// - Sequences become a single `--flag a,b,c` pair. Empty sequences are omitted.
///
/// Field names are converted from `snake_case` to `kebab-case` flags.
pub fn to_args(parameters: &impl Serialize) -> Result<Vec<String>> {
    let fields = match serde_json::to_value(parameters)
        .context("Failed to serialize the parameters into arguments")?
    {
        Value::Object(fields) => fields,
        other => bail!("Expected the parameters to serialize into an object but got: {other}"),
    };

    let mut arguments = Vec::new();
    for (name, value) in fields {
        let flag = to_flag(&name);
        match value {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => arguments.push(flag),
            Value::Object(entries) => {
                for (key, value) in entries {
                    if value.is_null() {
                        continue;
                    }
                    let value = scalar_to_string(&name, &value)?;
                    arguments.push(flag.clone());
                    arguments.push(format!("{key}:{value}"));
                }
            }
            Value::Array(items) => {
                if items.is_empty() {
                    continue;
                }
                let items = items
                    .iter()
                    .map(|item| scalar_to_string(&name, item))
                    .collect::<Result<Vec<_>>>()?;
                arguments.push(flag);
                arguments.push(items.join(","));
            }
            scalar => {
                let value = scalar_to_string(&name, &scalar)?;
                arguments.push(flag);
                if !value.is_empty() {
                    arguments.push(value);
                }
            }
        }
    }

    Ok(arguments)
}

fn to_flag(name: &str) -> String {
    format!("--{}", name.replace('_', "-"))
}

fn scalar_to_string(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(string) => Ok(string.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(boolean) => Ok(boolean.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            bail!("The value of `{name}` is nested too deeply to become an argument: {value}")
        }
    }
}
