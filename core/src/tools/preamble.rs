//! Preamble text describing the available tools to script authors
//!
//! The preamble is prepended to every script as comment lines, so it never
//! changes what the script does; it is stored with the execution record so a
//! resumed run sees the same source.

use super::{ToolSchema, RUN_SCRIPT_TOOL};
use crate::bridge::parameter_order;

/// Build the preamble for a set of tools
///
/// One line per tool: `// name(required, optional?) - description`, with
/// parameters in the order positional arguments bind.
pub fn preamble_build(tools: &[ToolSchema]) -> String {
    let mut lines = vec!["// Available functions:".to_string()];

    for tool in tools.iter().filter(|t| t.name != RUN_SCRIPT_TOOL) {
        let params = parameter_order(tool)
            .into_iter()
            .map(|(name, required)| if required { name } else { format!("{}?", name) })
            .collect::<Vec<_>>()
            .join(", ");

        let description = tool.description.lines().next().unwrap_or("").trim();
        if description.is_empty() {
            lines.push(format!("// {}({})", tool.name, params));
        } else {
            lines.push(format!("// {}({}) - {}", tool.name, params, description));
        }
    }

    lines.join("\n")
}

/// Full script source as executed: preamble, blank line, user code
pub fn script_compose(preamble: &str, code: &str) -> String {
    let preamble = preamble.trim();
    if preamble.is_empty() {
        code.to_string()
    } else {
        format!("{}\n\n{}", preamble, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::host_tools;
    use crate::tools::ToolRegistry;

    #[test]
    fn test_preamble_lists_tools_with_binding_order() {
        let tools = host_tools(".").list();
        let preamble = preamble_build(&tools);

        assert!(preamble.starts_with("// Available functions:"));
        assert!(preamble.contains("// write_file(path, content) - Write text"));
        assert!(preamble.contains("// list_dir(path?) - List entry names"));
        assert!(preamble.lines().all(|line| line.starts_with("//")));
    }

    #[test]
    fn test_script_compose_keeps_code_unchanged() {
        assert_eq!(script_compose("", "x = 1"), "x = 1");
        assert_eq!(script_compose("// a\n", "x = 1"), "// a\n\nx = 1");
    }
}
