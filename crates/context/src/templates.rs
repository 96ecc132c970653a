//! Task templates

use serde::{Deserialize, Serialize};
use shellforge_common::context::tokenize;
use std::fmt;
use std::str::FromStr;

/// What the user wants from the model
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Explain what a command does
    Explain,
    /// Write a command from a description
    Generate,
    /// Suggest what to run next
    Suggest,
    #[default]
    Generic,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Explain => "explain",
            TaskType::Generate => "generate",
            TaskType::Suggest => "suggest",
            TaskType::Generic => "generic",
        }
    }

    /// Guess the task from the query's leading words
    pub fn detect(query: &str) -> Self {
        let tokens = tokenize(query);
        match tokens.first().map(String::as_str) {
            Some("explain" | "describe") => TaskType::Explain,
            Some("generate" | "write" | "create" | "make") => TaskType::Generate,
            Some("suggest" | "next" | "recommend") => TaskType::Suggest,
            _ if tokens.iter().any(|t| t == "what" || t == "whats") && tokens.iter().any(|t| t == "does") => {
                TaskType::Explain
            }
            _ => TaskType::Generic,
        }
    }

    /// System instructions for this task
    pub fn system_prompt(&self) -> &'static str {
        match self {
            TaskType::Explain => {
                "You are a shell expert. Explain what the given command does, flag anything destructive, and keep it short."
            }
            TaskType::Generate => {
                "You are a shell expert. Reply with a single command that does what the user asks, followed by a one-line explanation."
            }
            TaskType::Suggest => {
                "You are a shell assistant. Based on the user's recent activity, suggest the most likely next command."
            }
            TaskType::Generic => "You are a concise, accurate command-line assistant.",
        }
    }

    /// The query as presented to the model
    pub fn render_query(&self, query: &str) -> String {
        let query = query.trim();
        match self {
            TaskType::Explain => format!("Explain: {}", query),
            TaskType::Generate => format!("Write a command to: {}", query),
            TaskType::Suggest => format!("Suggest the next command. {}", query).trim_end().to_string(),
            TaskType::Generic => query.to_string(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "explain" => Ok(TaskType::Explain),
            "generate" => Ok(TaskType::Generate),
            "suggest" => Ok(TaskType::Suggest),
            "generic" => Ok(TaskType::Generic),
            other => Err(format!("unknown task type '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(TaskType::detect("explain tar -xzf"), TaskType::Explain);
        assert_eq!(TaskType::detect("what does chmod 755 do"), TaskType::Explain);
        assert_eq!(TaskType::detect("write a loop over all pngs"), TaskType::Generate);
        assert_eq!(TaskType::detect("suggest"), TaskType::Suggest);
        assert_eq!(TaskType::detect("install firewall"), TaskType::Generic);
    }

    #[test]
    fn test_render_query() {
        assert_eq!(TaskType::Explain.render_query(" ls -la "), "Explain: ls -la");
        assert_eq!(TaskType::Suggest.render_query(""), "Suggest the next command.");
        assert_eq!(TaskType::Generic.render_query("df -h"), "df -h");
    }

    #[test]
    fn test_parse() {
        assert_eq!("Generate".parse::<TaskType>(), Ok(TaskType::Generate));
        assert!("translate".parse::<TaskType>().is_err());
    }
}
