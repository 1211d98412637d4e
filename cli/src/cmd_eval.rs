//! `powerstream eval`: evaluate a query against an attribute map.

use std::io::Read;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use powerstream_core::event::AttributeMap;

pub fn run(query: &str, attrs: &str) -> Result<()> {
    let compiled = crate::compile(query)?;

    let text = if attrs == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(attrs).with_context(|| format!("reading {attrs}"))?
    };
    let attributes = attribute_map(&serde_json::from_str(&text)?)?;

    let matched = compiled.predicate()?.matches(&attributes);
    println!("{}", if matched { "✓ match" } else { "✗ no match" });
    if !matched {
        std::process::exit(1);
    }
    Ok(())
}

/// Accepts `{"path": "v"}` or `{"path": ["v1", "v2"]}`.
fn attribute_map(value: &Value) -> Result<AttributeMap> {
    let Value::Object(entries) = value else {
        bail!("attributes must be a JSON object");
    };

    let mut map = AttributeMap::new();
    for (path, values) in entries {
        let values = match values {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            other => vec![other.to_string()],
        };
        map.insert(path.clone(), values);
    }
    Ok(map)
}
