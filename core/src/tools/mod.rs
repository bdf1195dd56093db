use serde_json::Value;

pub mod respond;
pub mod shell;

pub use respond::RespondTool;
pub use shell::ShellTool;

pub fn extract_string_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

pub fn extract_u64_arg_opt(args: &Value, key: &str, default: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_arg_must_be_a_string() {
        let args = json!({"command": "ls", "count": 3});
        assert_eq!(extract_string_arg(&args, "command").unwrap(), "ls");
        let err = extract_string_arg(&args, "count").unwrap_err();
        assert_eq!(err.to_string(), "Missing 'count' parameter");
    }

    #[test]
    fn u64_arg_falls_back_to_default() {
        let args = json!({"timeout_secs": 5, "bad": "x"});
        assert_eq!(extract_u64_arg_opt(&args, "timeout_secs", 60), 5);
        assert_eq!(extract_u64_arg_opt(&args, "bad", 60), 60);
        assert_eq!(extract_u64_arg_opt(&args, "missing", 60), 60);
    }
}
