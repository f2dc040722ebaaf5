//! Builds the natural-language instruction that asks the agent to invoke
//! the MCP tool and reply with the canonical JSON shape.

use serde_json::Value;

use crate::error::Result;

/// Deterministic prompt: the tool name plus compact-JSON arguments
/// interpolated into a fixed template. The shape instruction is advisory;
/// the normalizer still validates whatever comes back.
pub fn build_tool_prompt(tool_name: &str, arguments: &Value) -> Result<String> {
    let args = serde_json::to_string(arguments)?;
    Ok(format!(
        "Call the MongoDB MCP tool '{tool_name}' with arguments {args}. \
         Respond only with valid JSON of the shape \
         {{\"latest\": <latest document>, \
         \"summary\": <short sentence about the measurements containing the sensor values>, \
         \"recommendation\": <practical advice based on the readings>}}. \
         Do not invent fields inside the documents; reuse exactly what the tool returns. \
         The summary field must contain the sensor values."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embeds_tool_name_and_compact_arguments() {
        let arguments = json!({"filter": {}, "limit": 1, "sort": {"timestamp": -1}});
        let prompt = build_tool_prompt("mongodb.collection.findOne", &arguments).unwrap();

        assert!(prompt.contains("'mongodb.collection.findOne'"));
        assert!(prompt.contains(r#"{"filter":{},"limit":1,"sort":{"timestamp":-1}}"#));
        assert!(prompt.contains("\"latest\""));
        assert!(prompt.contains("reuse exactly what the tool returns"));
    }

    #[test]
    fn is_deterministic() {
        let arguments = json!({"limit": 1});
        let first = build_tool_prompt("find", &arguments).unwrap();
        let second = build_tool_prompt("find", &arguments).unwrap();
        assert_eq!(first, second);
    }
}
